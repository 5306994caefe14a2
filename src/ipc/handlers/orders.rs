use crate::cart::round_cents;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::cart::{load_cart, save_cart, scope_param};
use crate::ipc::helpers::{new_id, now_ts, opt_str, require_row, required_str, with_db, HandlerFn};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "shipped" => Some(Self::Shipped),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    fn can_move_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Paid, Shipped)
                | (Paid, Cancelled)
                | (Shipped, Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderItem {
    product_id: String,
    name: String,
    price: f64,
    quantity: i64,
    subtotal: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    id: String,
    order_no: String,
    campus_id: Option<String>,
    student_id: Option<String>,
    cashier_id: Option<String>,
    total: f64,
    status: String,
    payment_method: Option<String>,
    created_at: String,
    updated_at: String,
    items: Vec<OrderItem>,
}

const ORDER_COLUMNS: &str = "id, order_no, campus_id, student_id, cashier_id, total, status, payment_method, created_at, updated_at";

impl Order {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            order_no: r.get(1)?,
            campus_id: r.get(2)?,
            student_id: r.get(3)?,
            cashier_id: r.get(4)?,
            total: r.get(5)?,
            status: r.get(6)?,
            payment_method: r.get(7)?,
            created_at: r.get(8)?,
            updated_at: r.get(9)?,
            items: Vec::new(),
        })
    }
}

fn load_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT product_id, name, price, quantity
         FROM order_items
         WHERE order_id = ?
         ORDER BY line_no",
    )?;
    let items = stmt
        .query_map([order_id], |r| {
            let price: f64 = r.get(2)?;
            let quantity: i64 = r.get(3)?;
            Ok(OrderItem {
                product_id: r.get(0)?,
                name: r.get(1)?,
                price,
                quantity,
                subtotal: round_cents(price * quantity as f64),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn load_order(conn: &Connection, order_id: &str) -> Result<Order, HandlerErr> {
    let sql = format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS);
    let mut order = conn
        .query_row(&sql, [order_id], Order::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("order not found"))?;
    order.items = load_items(conn, &order.id)?;
    Ok(order)
}

/// `YYYYMMDDHHMMSS` plus a short random suffix.
fn next_order_no() -> String {
    let suffix: String = new_id()
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("{}{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

fn orders_checkout(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = scope_param(params)?;
    let campus_id = opt_str(params, "campusId")?;
    let student_id = opt_str(params, "studentId")?;
    let cashier_id = opt_str(params, "cashierId")?;
    let payment_method = opt_str(params, "paymentMethod")?;
    if let Some(id) = campus_id.as_deref() {
        require_row(conn, "campuses", id, "campus")?;
    }
    if let Some(id) = student_id.as_deref() {
        require_row(conn, "students", id, "student")?;
    }
    if let Some(id) = cashier_id.as_deref() {
        require_row(conn, "cashiers", id, "cashier")?;
    }

    let mut cart = load_cart(conn, scope)?;
    if cart.is_empty() {
        return Err(HandlerErr::bad_params("cart is empty"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let mut lines: Vec<OrderItem> = Vec::with_capacity(cart.items().len());
    for item in cart.items() {
        let row: Option<(String, f64, i64)> = tx
            .query_row(
                "SELECT name, price, stock FROM products WHERE id = ? AND active = 1",
                [&item.id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((name, price, stock)) = row else {
            return Err(HandlerErr::not_found("product is no longer available")
                .with_details(json!({ "productId": item.id })));
        };
        let quantity = i64::from(item.quantity);
        if stock < quantity {
            return Err(HandlerErr::conflict("insufficient stock").with_details(json!({
                "productId": item.id,
                "available": stock,
                "requested": quantity
            })));
        }
        tx.execute(
            "UPDATE products SET stock = stock - ? WHERE id = ?",
            (quantity, &item.id),
        )
        .map_err(HandlerErr::db_write("db_update_failed", "products"))?;
        lines.push(OrderItem {
            product_id: item.id.clone(),
            name,
            price,
            quantity,
            subtotal: round_cents(price * quantity as f64),
        });
    }
    let total = round_cents(lines.iter().map(|l| l.price * l.quantity as f64).sum());

    let order_id = new_id();
    let order_no = next_order_no();
    let ts = now_ts();
    tx.execute(
        "INSERT INTO orders(
            id, order_no, campus_id, student_id, cashier_id, total, status, payment_method,
            created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        rusqlite::params![
            order_id,
            order_no,
            campus_id,
            student_id,
            cashier_id,
            total,
            payment_method,
            ts,
            ts,
        ],
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "orders"))?;
    for (line_no, line) in lines.iter().enumerate() {
        tx.execute(
            "INSERT INTO order_items(order_id, line_no, product_id, name, price, quantity)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &order_id,
                line_no as i64,
                &line.product_id,
                &line.name,
                line.price,
                line.quantity,
            ),
        )
        .map_err(HandlerErr::db_write("db_insert_failed", "order_items"))?;
    }
    cart.clear();
    save_cart(&tx, scope, &cart)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(order_id = %order_id, order_no = %order_no, total, "order placed");
    Ok(json!({ "order": load_order(conn, &order_id)? }))
}

fn orders_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = opt_str(params, "campusId")?;
    let student_id = opt_str(params, "studentId")?;
    let status = opt_str(params, "status")?;
    if let Some(s) = status.as_deref() {
        if OrderStatus::parse(s).is_none() {
            return Err(HandlerErr::bad_params(format!("unknown order status: {}", s)));
        }
    }
    let sql = format!(
        "SELECT {} FROM orders
         WHERE (?1 IS NULL OR campus_id = ?1)
           AND (?2 IS NULL OR student_id = ?2)
           AND (?3 IS NULL OR status = ?3)
         ORDER BY created_at DESC, rowid DESC",
        ORDER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut orders = stmt
        .query_map(
            (campus_id.as_deref(), student_id.as_deref(), status.as_deref()),
            Order::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for order in &mut orders {
        order.items = load_items(conn, &order.id)?;
    }
    Ok(json!({ "orders": orders }))
}

fn orders_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let order_id = required_str(params, "orderId")?;
    Ok(json!({ "order": load_order(conn, &order_id)? }))
}

fn orders_update_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let order_id = required_str(params, "orderId")?;
    let raw = required_str(params, "status")?;
    let next = OrderStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown order status: {}", raw)))?;
    let order = load_order(conn, &order_id)?;
    let current = OrderStatus::parse(&order.status).ok_or_else(|| {
        HandlerErr::new("db_query_failed", format!("stored status is invalid: {}", order.status))
    })?;
    if current == next {
        return Ok(json!({ "order": order }));
    }
    if !current.can_move_to(next) {
        return Err(HandlerErr::conflict("order status change not allowed").with_details(json!({
            "from": current.as_str(),
            "to": next.as_str()
        })));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE orders SET status = ?, updated_at = ? WHERE id = ?",
        (next.as_str(), now_ts(), &order_id),
    )
    .map_err(HandlerErr::db_write("db_update_failed", "orders"))?;
    if next == OrderStatus::Cancelled {
        for item in &order.items {
            tx.execute(
                "UPDATE products SET stock = stock + ? WHERE id = ?",
                (item.quantity, &item.product_id),
            )
            .map_err(HandlerErr::db_write("db_update_failed", "products"))?;
        }
    }
    tx.commit().map_err(HandlerErr::commit)?;
    tracing::info!(order_id = %order_id, from = current.as_str(), to = next.as_str(), "order status changed");
    Ok(json!({ "order": load_order(conn, &order_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "orders.checkout" => orders_checkout,
        "orders.list" => orders_list,
        "orders.get" => orders_get,
        "orders.updateStatus" => orders_update_status,
        _ => return None,
    };
    Some(with_db(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::{self, *};

    #[test]
    fn only_forward_transitions_are_allowed() {
        assert!(Pending.can_move_to(Paid));
        assert!(Pending.can_move_to(Cancelled));
        assert!(Paid.can_move_to(Shipped));
        assert!(Paid.can_move_to(Cancelled));
        assert!(Shipped.can_move_to(Completed));
        assert!(!Shipped.can_move_to(Cancelled));
        assert!(!Completed.can_move_to(Pending));
        assert!(!Cancelled.can_move_to(Paid));
        assert!(!Pending.can_move_to(Completed));
    }

    #[test]
    fn status_names_round_trip() {
        for s in [Pending, Paid, Shipped, Completed, Cancelled] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("refunded"), None);
    }
}
