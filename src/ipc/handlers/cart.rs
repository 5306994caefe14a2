use crate::cart::{Cart, CartItem, CartScope, MAX_LINE_QUANTITY};
use crate::db::{settings_get, settings_set};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::mall::load_product;
use crate::ipc::helpers::{opt_i64, opt_str, required_str, with_db, HandlerFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

pub(crate) fn scope_param(params: &Value) -> Result<CartScope, HandlerErr> {
    match opt_str(params, "scope")? {
        None => Ok(CartScope::Mall),
        Some(raw) => CartScope::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown cart scope: {}", raw))),
    }
}

pub(crate) fn load_cart(conn: &Connection, scope: CartScope) -> Result<Cart, HandlerErr> {
    let raw = settings_get(conn, scope.key())?;
    Ok(Cart::load_lenient(raw.as_deref()))
}

pub(crate) fn save_cart(conn: &Connection, scope: CartScope, cart: &Cart) -> Result<(), HandlerErr> {
    let raw = cart.to_json()?;
    settings_set(conn, scope.key(), &raw)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
    Ok(())
}

fn cart_view(cart: &Cart) -> Value {
    json!({
        "items": cart.items(),
        "total": cart.total(),
        "count": cart.count(),
    })
}

fn quantity_param(params: &Value, default: Option<u32>) -> Result<u32, HandlerErr> {
    let raw = match (opt_i64(params, "quantity")?, default) {
        (Some(q), _) => q,
        (None, Some(d)) => return Ok(d),
        (None, None) => return Err(HandlerErr::bad_params("missing quantity")),
    };
    let quantity = u32::try_from(raw)
        .map_err(|_| HandlerErr::bad_params("quantity must be a non-negative integer"))?;
    if quantity > MAX_LINE_QUANTITY {
        return Err(HandlerErr::bad_params(format!(
            "quantity must be at most {}",
            MAX_LINE_QUANTITY
        )));
    }
    Ok(quantity)
}

fn cart_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = scope_param(params)?;
    Ok(cart_view(&load_cart(conn, scope)?))
}

fn cart_add(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = scope_param(params)?;
    let product_id = required_str(params, "productId")?;
    let quantity = quantity_param(params, Some(1))?;
    let product = load_product(conn, &product_id)?
        .filter(|p| p.active)
        .ok_or_else(|| HandlerErr::not_found("product not found"))?;

    let mut cart = load_cart(conn, scope)?;
    let line_quantity = cart.add(CartItem {
        id: product.id,
        name: product.name,
        price: product.price,
        category: product.category,
        image_url: product.image_url,
        quantity,
    })?;
    save_cart(conn, scope, &cart)?;
    tracing::debug!(scope = scope.key(), product_id = %product_id, line_quantity, "cart add");
    Ok(cart_view(&cart))
}

fn cart_update_quantity(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = scope_param(params)?;
    let product_id = required_str(params, "productId")?;
    let quantity = quantity_param(params, None)?;
    let mut cart = load_cart(conn, scope)?;
    cart.set_quantity(&product_id, quantity)?;
    save_cart(conn, scope, &cart)?;
    Ok(cart_view(&cart))
}

fn cart_remove(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = scope_param(params)?;
    let product_id = required_str(params, "productId")?;
    let mut cart = load_cart(conn, scope)?;
    let removed = cart.remove(&product_id);
    if removed {
        save_cart(conn, scope, &cart)?;
    }
    let mut view = cart_view(&cart);
    view["removed"] = json!(removed);
    Ok(view)
}

fn cart_clear(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = scope_param(params)?;
    let mut cart = load_cart(conn, scope)?;
    cart.clear();
    save_cart(conn, scope, &cart)?;
    Ok(cart_view(&cart))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "cart.get" => cart_get,
        "cart.add" => cart_add,
        "cart.updateQuantity" => cart_update_quantity,
        "cart.remove" => cart_remove,
        "cart.clear" => cart_clear,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
