mod test_support;

use serde_json::{json, Value};
use test_support::{array, request_ok, spawn_sidecar, str_field, temp_dir, Sidecar};

fn names(v: &Value) -> Vec<String> {
    array(v, "products")
        .iter()
        .filter_map(|p| p["name"].as_str().map(str::to_string))
        .collect()
}

fn seed_catalog(s: &mut Sidecar, campus_id: &str) {
    for (name, category, tags, price, rating, sort_order) in [
        ("Pencil Set", "stationery", vec!["kids", "art"], 12.5, 4.2, 3),
        ("Sketchbook", "stationery", vec!["art"], 30.0, 4.8, 1),
        ("Math Workbook", "books", vec!["kids"], 45.0, 4.5, 2),
        ("Story Book", "books", vec!["reading"], 25.0, 3.9, 4),
    ] {
        s.product(json!({
            "campusId": campus_id,
            "name": name,
            "category": category,
            "tags": tags,
            "price": price,
            "rating": rating,
            "stock": 10,
            "sortOrder": sort_order
        }));
    }
}

#[test]
fn catalog_filters_sorts_and_pages() {
    let mut s = Sidecar::start("campusd-catalog");
    let campus_id = s.campus("Mall Campus");
    seed_catalog(&mut s, &campus_id);

    let featured = s.ok("mall.products.list", json!({ "campusId": campus_id }));
    assert_eq!(featured["sort"], "featured");
    assert_eq!(featured["currency"], "CNY");
    assert_eq!(
        names(&featured),
        vec!["Sketchbook", "Math Workbook", "Pencil Set", "Story Book"]
    );

    let art_stationery = s.ok(
        "mall.products.list",
        json!({ "campusId": campus_id, "category": "stationery", "tag": "art", "sort": "price-low" }),
    );
    assert_eq!(names(&art_stationery), vec!["Pencil Set", "Sketchbook"]);

    let by_rating = s.ok(
        "mall.products.list",
        json!({ "campusId": campus_id, "category": "all", "sort": "rating" }),
    );
    assert_eq!(
        names(&by_rating),
        vec!["Sketchbook", "Math Workbook", "Pencil Set", "Story Book"]
    );

    let page = s.ok(
        "mall.products.list",
        json!({ "campusId": campus_id, "sort": "price-high", "page": 2, "pageSize": 3 }),
    );
    assert_eq!(page["total"], 4);
    assert_eq!(names(&page), vec!["Pencil Set"]);

    let kw = s.ok("mall.products.list", json!({ "campusId": campus_id, "keyword": "BOOK" }));
    assert_eq!(kw["total"], 3);

    assert_eq!(
        s.err_code("mall.products.list", json!({ "sort": "cheapest" })),
        "bad_params"
    );

    let facets = s.ok("mall.categories", json!({ "campusId": campus_id }));
    assert_eq!(facets["categories"]["books"], 2);
    assert_eq!(facets["categories"]["stationery"], 2);
    assert_eq!(facets["tags"]["art"], 2);
    assert_eq!(facets["tags"]["kids"], 2);
}

#[test]
fn shared_products_and_upsert_rules() {
    let mut s = Sidecar::start("campusd-products");
    let north = s.campus("North");
    let south = s.campus("South");

    let shared = s.product(json!({ "name": "Water Bottle", "category": "gear", "price": 20, "stock": 5 }));
    s.product(json!({ "campusId": north, "name": "North Tee", "category": "gear", "price": 60, "stock": 5 }));

    let south_view = s.ok("mall.products.list", json!({ "campusId": south }));
    assert_eq!(names(&south_view), vec!["Water Bottle"]);
    let north_view = s.ok("mall.products.list", json!({ "campusId": north, "sort": "price-low" }));
    assert_eq!(names(&north_view), vec!["Water Bottle", "North Tee"]);

    let updated = s.ok(
        "mall.products.upsert",
        json!({ "product": { "id": shared, "price": 18.5, "active": false } }),
    );
    assert_eq!(updated["created"], false);
    assert_eq!(updated["product"]["name"], "Water Bottle");
    assert_eq!(updated["product"]["price"], 18.5);
    let south_view = s.ok("mall.products.list", json!({ "campusId": south }));
    assert!(array(&south_view, "products").is_empty());
    let with_inactive = s.ok(
        "mall.products.list",
        json!({ "campusId": south, "includeInactive": true }),
    );
    assert_eq!(with_inactive["total"], 1);

    let bad = s.err(
        "mall.products.upsert",
        json!({ "product": { "name": "Broken", "category": "gear", "price": -1, "rating": 7, "stock": -2 } }),
    );
    assert_eq!(bad["code"], "validation_failed");
    assert_eq!(array(&bad["details"], "fields").len(), 3);

    s.ok("mall.products.delete", json!({ "productId": shared }));
    assert_eq!(
        s.err_code("mall.products.get", json!({ "productId": shared })),
        "not_found"
    );
}

#[test]
fn cart_merges_lines_and_keeps_scopes_apart() {
    let mut s = Sidecar::start("campusd-cart");
    let pen = s.product(json!({ "name": "Pen", "category": "stationery", "price": 3.3, "stock": 50 }));
    let ink = s.product(json!({ "name": "Ink", "category": "stationery", "price": 9.9, "stock": 50 }));

    s.ok("cart.add", json!({ "productId": pen }));
    let cart = s.ok("cart.add", json!({ "productId": pen, "quantity": 2 }));
    assert_eq!(array(&cart, "items").len(), 1);
    assert_eq!(cart["items"][0]["quantity"], 3);
    assert_eq!(cart["count"], 3);
    assert_eq!(cart["total"], 9.9);

    let cart = s.ok("cart.add", json!({ "productId": ink }));
    assert_eq!(cart["count"], 4);
    assert_eq!(cart["total"], 19.8);

    let console = s.ok("cart.get", json!({ "scope": "console" }));
    assert!(array(&console, "items").is_empty());
    assert_eq!(
        s.err_code("cart.get", json!({ "scope": "kiosk" })),
        "bad_params"
    );

    let cart = s.ok("cart.updateQuantity", json!({ "productId": pen, "quantity": 1 }));
    assert_eq!(cart["total"], 13.2);
    let cart = s.ok("cart.updateQuantity", json!({ "productId": pen, "quantity": 0 }));
    assert_eq!(array(&cart, "items").len(), 1);
    assert_eq!(
        s.err_code("cart.updateQuantity", json!({ "productId": pen, "quantity": 2 })),
        "not_found"
    );
    assert_eq!(
        s.err_code("cart.add", json!({ "productId": ink, "quantity": 0 })),
        "bad_params"
    );
    assert_eq!(
        s.err_code("cart.add", json!({ "productId": "missing" })),
        "not_found"
    );

    let removed = s.ok("cart.remove", json!({ "productId": ink }));
    assert_eq!(removed["removed"], true);
    assert_eq!(removed["count"], 0);
    let removed = s.ok("cart.remove", json!({ "productId": ink }));
    assert_eq!(removed["removed"], false);
}

#[test]
fn cart_quantities_stay_within_line_limit() {
    let mut s = Sidecar::start("campusd-cart-limit");
    let pen = s.product(json!({ "name": "Pen", "category": "stationery", "price": 1.0, "stock": 50 }));

    assert_eq!(
        s.err_code("cart.add", json!({ "productId": pen, "quantity": 4294967295u64 })),
        "bad_params"
    );
    assert_eq!(
        s.err_code("cart.add", json!({ "productId": pen, "quantity": 10000 })),
        "bad_params"
    );

    let cart = s.ok("cart.add", json!({ "productId": pen, "quantity": 9998 }));
    assert_eq!(cart["count"], 9998);
    assert_eq!(
        s.err_code("cart.add", json!({ "productId": pen, "quantity": 2 })),
        "bad_params"
    );
    let cart = s.ok("cart.get", json!({}));
    assert_eq!(cart["items"][0]["quantity"], 9998);

    assert_eq!(
        s.err_code("cart.updateQuantity", json!({ "productId": pen, "quantity": 10000 })),
        "bad_params"
    );
    let cart = s.ok("cart.updateQuantity", json!({ "productId": pen, "quantity": 9999 }));
    assert_eq!(cart["count"], 9999);
}

#[test]
fn cart_survives_restart_and_tolerates_corruption() {
    let workspace = temp_dir("campusd-cart-restart");
    let path = workspace.to_string_lossy().to_string();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": path }));
    let product = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "mall.products.upsert",
        json!({ "product": { "name": "Ruler", "category": "stationery", "price": 4, "stock": 9 } }),
    );
    let product_id = str_field(&product, "productId");
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cart.add",
        json!({ "scope": "console", "productId": product_id, "quantity": 2 }),
    );
    let _ = child.kill();
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": path }));
    let cart = request_ok(&mut stdin, &mut reader, "2", "cart.get", json!({ "scope": "console" }));
    assert_eq!(cart["count"], 2);
    assert_eq!(cart["total"], 8.0);
    let _ = child.kill();
    let _ = child.wait();

    let conn = rusqlite::Connection::open(workspace.join("campusd.sqlite3")).expect("open db");
    conn.execute(
        "UPDATE settings SET value_json = '{not a cart' WHERE key = 'cart'",
        [],
    )
    .expect("corrupt cart");
    drop(conn);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": path }));
    let cart = request_ok(&mut stdin, &mut reader, "2", "cart.get", json!({ "scope": "console" }));
    assert!(cart["items"].as_array().expect("items").is_empty());
    assert_eq!(cart["total"], 0.0);
    let cart = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cart.add",
        json!({ "scope": "console", "productId": product_id }),
    );
    assert_eq!(cart["count"], 1);
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn checkout_moves_stock_and_empties_the_cart() {
    let mut s = Sidecar::start("campusd-checkout");
    let campus_id = s.campus("Shop Campus");
    let student_id = s.student(&campus_id, "Buyer", "13800138000");
    let notebook = s.product(json!({ "campusId": campus_id, "name": "Notebook", "category": "stationery", "price": 8.5, "stock": 5 }));
    let bag = s.product(json!({ "campusId": campus_id, "name": "School Bag", "category": "gear", "price": 120, "stock": 1 }));

    assert_eq!(s.err_code("orders.checkout", json!({})), "bad_params");

    s.ok("cart.add", json!({ "productId": notebook, "quantity": 2 }));
    s.ok("cart.add", json!({ "productId": bag, "quantity": 2 }));
    let short = s.err("orders.checkout", json!({ "campusId": campus_id }));
    assert_eq!(short["code"], "conflict");
    assert_eq!(short["details"]["productId"], bag.as_str());
    assert_eq!(short["details"]["available"], 1);
    assert_eq!(short["details"]["requested"], 2);
    // Nothing moved on the failed attempt.
    let nb = s.ok("mall.products.get", json!({ "productId": notebook }));
    assert_eq!(nb["product"]["stock"], 5);
    let cart = s.ok("cart.get", json!({}));
    assert_eq!(cart["count"], 4);

    s.ok("cart.updateQuantity", json!({ "productId": bag, "quantity": 1 }));
    let placed = s.ok(
        "orders.checkout",
        json!({ "campusId": campus_id, "studentId": student_id, "paymentMethod": "wechat" }),
    );
    let order = &placed["order"];
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total"], 137.0);
    assert_eq!(array(order, "items").len(), 2);
    let order_no = str_field(order, "orderNo");
    assert_eq!(order_no.len(), 20);
    let order_id = str_field(order, "id");

    let cart = s.ok("cart.get", json!({}));
    assert!(array(&cart, "items").is_empty());
    let nb = s.ok("mall.products.get", json!({ "productId": notebook }));
    assert_eq!(nb["product"]["stock"], 3);
    let b = s.ok("mall.products.get", json!({ "productId": bag }));
    assert_eq!(b["product"]["stock"], 0);

    let listed = s.ok("orders.list", json!({ "studentId": student_id }));
    assert_eq!(array(&listed, "orders").len(), 1);
    let fetched = s.ok("orders.get", json!({ "orderId": order_id }));
    assert_eq!(fetched["order"]["paymentMethod"], "wechat");

    let paid = s.ok("orders.updateStatus", json!({ "orderId": order_id, "status": "paid" }));
    assert_eq!(paid["order"]["status"], "paid");
    let backwards = s.err("orders.updateStatus", json!({ "orderId": order_id, "status": "pending" }));
    assert_eq!(backwards["code"], "conflict");
    assert_eq!(backwards["details"]["from"], "paid");

    s.ok("orders.updateStatus", json!({ "orderId": order_id, "status": "cancelled" }));
    let nb = s.ok("mall.products.get", json!({ "productId": notebook }));
    assert_eq!(nb["product"]["stock"], 5);
    let b = s.ok("mall.products.get", json!({ "productId": bag }));
    assert_eq!(b["product"]["stock"], 1);

    let cancelled = s.ok("orders.list", json!({ "status": "cancelled" }));
    assert_eq!(array(&cancelled, "orders").len(), 1);
    assert_eq!(
        s.err_code("orders.list", json!({ "status": "lost" })),
        "bad_params"
    );
}

#[test]
fn checkout_rejects_products_that_went_away() {
    let mut s = Sidecar::start("campusd-checkout-gone");
    let gone = s.product(json!({ "name": "Limited Pin", "category": "gifts", "price": 5, "stock": 3 }));
    s.ok("cart.add", json!({ "productId": gone }));
    s.ok(
        "mall.products.upsert",
        json!({ "product": { "id": gone, "active": false } }),
    );
    let err = s.err("orders.checkout", json!({}));
    assert_eq!(err["code"], "not_found");
    assert_eq!(err["details"]["productId"], gone.as_str());
}
