use crate::catalog::{facets, filter_and_sort, paginate, Product, ProductQuery, SortKey};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::mall_defaults;
use crate::ipc::helpers::{
    json_str_list, new_id, now_ts, object, opt_bool, opt_i64, opt_str, opt_str_list, paging,
    patch_bool, patch_f64, patch_i64, patch_required_str, patch_str, required_str, row_exists,
    with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const PRODUCT_COLUMNS: &str = "id, campus_id, name, category, tags_json, price, original_price, rating, stock, image_url, description, created_at, active, sort_order";

fn product_from_row(r: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: r.get(0)?,
        campus_id: r.get(1)?,
        name: r.get(2)?,
        category: r.get(3)?,
        tags: json_str_list(&r.get::<_, String>(4)?),
        price: r.get(5)?,
        original_price: r.get(6)?,
        rating: r.get(7)?,
        stock: r.get(8)?,
        image_url: r.get(9)?,
        description: r.get(10)?,
        created_at: r.get(11)?,
        active: r.get::<_, i64>(12)? != 0,
        sort_order: r.get(13)?,
    })
}

pub(crate) fn load_product(conn: &Connection, id: &str) -> Result<Option<Product>, HandlerErr> {
    let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
    Ok(conn.query_row(&sql, [id], product_from_row).optional()?)
}

/// Products visible to a campus: its own plus the shared (campus-less) ones.
pub(crate) fn load_products(
    conn: &Connection,
    campus_id: Option<&str>,
) -> Result<Vec<Product>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM products
         WHERE (?1 IS NULL OR campus_id = ?1 OR campus_id IS NULL)",
        PRODUCT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let products = stmt
        .query_map([campus_id], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(products)
}

fn validate_product(p: &Product) -> Result<(), HandlerErr> {
    let mut v = Validator::new();
    v.required("name", &p.name);
    v.required("category", &p.category);
    v.price("price", p.price);
    if let Some(op) = p.original_price {
        v.price("originalPrice", op);
    }
    v.range_f64("rating", p.rating, 0.0, 5.0);
    if p.stock < 0 {
        v.push("stock", "must be >= 0");
    }
    Ok(v.finish()?)
}

fn products_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let defaults = mall_defaults(conn);
    let campus_id = opt_str(params, "campusId")?;
    let sort = match opt_str(params, "sort")? {
        Some(raw) => SortKey::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown sort key: {}", raw)))?,
        None => defaults.sort,
    };
    let query = ProductQuery {
        category: opt_str(params, "category")?,
        tag: opt_str(params, "tag")?,
        keyword: opt_str(params, "keyword")?,
        sort,
        include_inactive: opt_bool(params, "includeInactive")?.unwrap_or(false),
    };
    let (page, page_size) = paging(params, defaults.page_size)?;

    let matched = filter_and_sort(load_products(conn, campus_id.as_deref())?, &query);
    let (total, products) = paginate(matched, page, page_size);
    Ok(json!({
        "total": total,
        "page": page,
        "pageSize": page_size,
        "sort": sort.as_str(),
        "currency": defaults.currency,
        "products": products
    }))
}

fn products_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let product_id = required_str(params, "productId")?;
    let product = load_product(conn, &product_id)?
        .ok_or_else(|| HandlerErr::not_found("product not found"))?;
    Ok(json!({ "product": product }))
}

fn products_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = Value::Object(object(params, "product")?.clone());
    let id = opt_str(&input, "id")?;
    let existing = match id.as_deref() {
        Some(id) => load_product(conn, id)?,
        None => None,
    };
    let created = existing.is_none();
    let base = existing.unwrap_or_else(|| Product {
        id: id.clone().unwrap_or_else(new_id),
        campus_id: None,
        name: String::new(),
        category: String::new(),
        tags: Vec::new(),
        price: 0.0,
        original_price: None,
        rating: 0.0,
        stock: 0,
        image_url: None,
        description: None,
        created_at: now_ts(),
        active: true,
        sort_order: 0,
    });
    let tags = match input.get("tags") {
        Some(_) => opt_str_list(&input, "tags")?.unwrap_or_default(),
        None => base.tags.clone(),
    };
    let original_price = match input.get("originalPrice") {
        None => base.original_price,
        Some(Value::Null) => None,
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| HandlerErr::bad_params("originalPrice must be a number"))?,
        ),
    };
    let product = Product {
        campus_id: patch_str(&input, "campusId", base.campus_id.clone())?,
        name: patch_required_str(&input, "name", base.name.clone())?,
        category: patch_required_str(&input, "category", base.category.clone())?,
        tags,
        price: patch_f64(&input, "price", base.price)?,
        original_price,
        rating: patch_f64(&input, "rating", base.rating)?,
        stock: patch_i64(&input, "stock", base.stock)?,
        image_url: patch_str(&input, "imageUrl", base.image_url.clone())?,
        description: patch_str(&input, "description", base.description.clone())?,
        active: patch_bool(&input, "active", base.active)?,
        sort_order: opt_i64(&input, "sortOrder")?.unwrap_or(base.sort_order),
        ..base
    };
    validate_product(&product)?;
    if let Some(cid) = product.campus_id.as_deref() {
        if !row_exists(conn, "campuses", cid)? {
            return Err(HandlerErr::not_found("campus not found"));
        }
    }

    let tags_json = serde_json::to_string(&product.tags)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    conn.execute(
        "INSERT INTO products(
            id, campus_id, name, category, tags_json, price, original_price, rating, stock,
            image_url, description, active, created_at, sort_order
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            campus_id = excluded.campus_id,
            name = excluded.name,
            category = excluded.category,
            tags_json = excluded.tags_json,
            price = excluded.price,
            original_price = excluded.original_price,
            rating = excluded.rating,
            stock = excluded.stock,
            image_url = excluded.image_url,
            description = excluded.description,
            active = excluded.active,
            sort_order = excluded.sort_order",
        rusqlite::params![
            product.id,
            product.campus_id,
            product.name,
            product.category,
            tags_json,
            product.price,
            product.original_price,
            product.rating,
            product.stock,
            product.image_url,
            product.description,
            product.active as i64,
            product.created_at,
            product.sort_order,
        ],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "products"))?;
    Ok(json!({ "productId": product.id, "created": created, "product": product }))
}

fn products_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let product_id = required_str(params, "productId")?;
    let changed = conn
        .execute("DELETE FROM products WHERE id = ?", [&product_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "products"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("product not found"));
    }
    Ok(json!({ "ok": true }))
}

fn mall_categories(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = opt_str(params, "campusId")?;
    let products = load_products(conn, campus_id.as_deref())?;
    let counts = facets(products.iter().filter(|p| p.active));
    Ok(json!({ "categories": counts.categories, "tags": counts.tags }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "mall.products.list" => products_list,
        "mall.products.get" => products_get,
        "mall.products.upsert" => products_upsert,
        "mall.products.delete" => products_delete,
        "mall.categories" => mall_categories,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
