use crate::cart::round_cents;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::mall::load_products;
use crate::ipc::handlers::schedule::load_slots;
use crate::ipc::handlers::setup::mall_defaults;
use crate::ipc::helpers::{opt_str, with_db, HandlerFn};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Orders that count as sales.
const SOLD_STATUSES: &str = "('paid', 'shipped', 'completed')";
const TOP_PRODUCTS: i64 = 5;

fn scoped_count(
    conn: &Connection,
    table: &'static str,
    extra: &str,
    campus_id: Option<&str>,
) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE (?1 IS NULL OR campus_id = ?1) {}",
        table, extra
    );
    Ok(conn.query_row(&sql, [campus_id], |r| r.get(0))?)
}

fn dashboard_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = opt_str(params, "campusId")?;
    let campus = campus_id.as_deref();
    let defaults = mall_defaults(conn);

    let students = scoped_count(conn, "students", "AND active = 1", campus)?;
    let active_courses = scoped_count(conn, "courses", "AND status = 'open'", campus)?;
    let staff = scoped_count(conn, "staff", "AND active = 1", campus)?;
    let cashiers = scoped_count(conn, "cashiers", "AND active = 1", campus)?;

    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    let today_slots = load_slots(
        conn,
        "(?1 IS NULL OR ts.campus_id = ?1) AND ts.date = ?2",
        (campus, &today),
    )?;

    let (order_count, revenue): (i64, f64) = conn.query_row(
        &format!(
            "SELECT COUNT(*), COALESCE(SUM(total), 0)
             FROM orders
             WHERE (?1 IS NULL OR campus_id = ?1) AND status IN {}",
            SOLD_STATUSES
        ),
        [campus],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut low_stock: Vec<_> = load_products(conn, campus)?
        .into_iter()
        .filter(|p| p.active && p.stock <= defaults.low_stock_threshold)
        .collect();
    low_stock.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));
    let low_stock: Vec<Value> = low_stock
        .iter()
        .map(|p| json!({ "id": p.id, "name": p.name, "stock": p.stock }))
        .collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT oi.product_id, MAX(oi.name), SUM(oi.quantity), SUM(oi.price * oi.quantity)
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id
         WHERE (?1 IS NULL OR o.campus_id = ?1) AND o.status IN {}
         GROUP BY oi.product_id
         ORDER BY SUM(oi.quantity) DESC, MAX(oi.name), oi.product_id
         LIMIT ?2",
        SOLD_STATUSES
    ))?;
    let top_products = stmt
        .query_map((campus, TOP_PRODUCTS), |r| {
            Ok(json!({
                "productId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "unitsSold": r.get::<_, i64>(2)?,
                "revenue": round_cents(r.get::<_, f64>(3)?),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "campusId": campus_id,
        "date": today,
        "students": students,
        "activeCourses": active_courses,
        "staff": staff,
        "cashiers": cashiers,
        "todaySlotCount": today_slots.len(),
        "todaySlots": today_slots,
        "orderCount": order_count,
        "revenue": round_cents(revenue),
        "currency": defaults.currency,
        "lowStockThreshold": defaults.low_stock_threshold,
        "lowStock": low_stock,
        "topProducts": top_products,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "dashboard.summary" => dashboard_summary,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
