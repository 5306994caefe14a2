use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartScope {
    /// Front-desk cart in the admin console.
    Console,
    /// Student-facing mall cart.
    Mall,
}

impl CartScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "console" => Some(Self::Console),
            "mall" => Some(Self::Mall),
            _ => None,
        }
    }

    /// Settings key the cart array is stored under.
    pub fn key(self) -> &'static str {
        match self {
            Self::Console => "cart",
            Self::Mall => "mall-cart",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub quantity: u32,
}

/// Upper bound on a single line's quantity.
pub const MAX_LINE_QUANTITY: u32 = 9999;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("product {0} is not in the cart")]
    NotInCart(String),
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("quantity must be at most {max}")]
    QuantityTooLarge { max: u32 },
    #[error("stored cart is not a valid item array: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn check_quantity(quantity: u32) -> Result<(), CartError> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(CartError::QuantityTooLarge {
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn from_items(items: Vec<CartItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merges by product id: an existing line gets its quantity bumped, a new id is appended.
    /// Returns the line's resulting quantity. A merge that would exceed
    /// [`MAX_LINE_QUANTITY`] leaves the cart unchanged.
    pub fn add(&mut self, item: CartItem) -> Result<u32, CartError> {
        if item.quantity == 0 {
            return Err(CartError::ZeroQuantity);
        }
        check_quantity(item.quantity)?;
        if let Some(line) = self.items.iter_mut().find(|i| i.id == item.id) {
            let merged = line.quantity.saturating_add(item.quantity);
            check_quantity(merged)?;
            line.quantity = merged;
            return Ok(merged);
        }
        let q = item.quantity;
        self.items.push(item);
        Ok(q)
    }

    /// Zero removes the line.
    pub fn set_quantity(&mut self, product_id: &str, quantity: u32) -> Result<(), CartError> {
        let Some(pos) = self.items.iter().position(|i| i.id == product_id) else {
            return Err(CartError::NotInCart(product_id.to_string()));
        };
        check_quantity(quantity)?;
        if quantity == 0 {
            self.items.remove(pos);
        } else {
            self.items[pos].quantity = quantity;
        }
        Ok(())
    }

    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != product_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total(&self) -> f64 {
        round_cents(
            self.items
                .iter()
                .map(|i| i.price * f64::from(i.quantity))
                .sum(),
        )
    }

    pub fn count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    pub fn to_json(&self) -> Result<String, CartError> {
        Ok(serde_json::to_string(&self.items)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, CartError> {
        let items: Vec<CartItem> = serde_json::from_str(raw)?;
        Ok(Self { items })
    }

    /// A missing or unreadable stored cart is an empty cart.
    pub fn load_lenient(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match Self::from_json(raw) {
            Ok(cart) => cart,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cart");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, price: f64, quantity: u32) -> CartItem {
        CartItem {
            id: id.to_string(),
            name: format!("Product {}", id),
            price,
            category: "books".to_string(),
            image_url: None,
            quantity,
        }
    }

    #[test]
    fn adding_same_id_twice_bumps_quantity() {
        let mut cart = Cart::default();
        cart.add(item("p1", 10.0, 1)).expect("add");
        let q = cart.add(item("p1", 10.0, 2)).expect("add again");
        assert_eq!(q, 3);
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
    }

    #[test]
    fn new_ids_are_appended_in_order() {
        let mut cart = Cart::default();
        cart.add(item("b", 1.0, 1)).expect("add");
        cart.add(item("a", 1.0, 1)).expect("add");
        let ids: Vec<&str> = cart.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn total_is_sum_of_price_times_quantity() {
        let mut cart = Cart::default();
        cart.add(item("p1", 19.5, 2)).expect("add");
        cart.add(item("p2", 5.25, 1)).expect("add");
        cart.add(item("p3", 0.1, 3)).expect("add");
        assert_eq!(cart.total(), 44.55);
        assert_eq!(cart.count(), 6);
    }

    #[test]
    fn zero_quantity_rejected_on_add_and_removes_on_set() {
        let mut cart = Cart::default();
        assert!(matches!(
            cart.add(item("p1", 1.0, 0)),
            Err(CartError::ZeroQuantity)
        ));
        cart.add(item("p1", 1.0, 1)).expect("add");
        cart.set_quantity("p1", 0).expect("set");
        assert!(cart.is_empty());
        assert!(matches!(
            cart.set_quantity("p1", 2),
            Err(CartError::NotInCart(_))
        ));
    }

    #[test]
    fn line_quantity_is_capped() {
        let mut cart = Cart::default();
        assert!(matches!(
            cart.add(item("p1", 1.0, MAX_LINE_QUANTITY + 1)),
            Err(CartError::QuantityTooLarge { max: MAX_LINE_QUANTITY })
        ));
        assert!(cart.is_empty());

        cart.add(item("p1", 1.0, MAX_LINE_QUANTITY - 1)).expect("add");
        assert!(matches!(
            cart.add(item("p1", 1.0, 2)),
            Err(CartError::QuantityTooLarge { .. })
        ));
        assert_eq!(cart.items()[0].quantity, MAX_LINE_QUANTITY - 1);
        assert_eq!(cart.add(item("p1", 1.0, 1)).expect("add"), MAX_LINE_QUANTITY);

        assert!(matches!(
            cart.set_quantity("p1", u32::MAX),
            Err(CartError::QuantityTooLarge { .. })
        ));
        assert_eq!(cart.items()[0].quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn count_does_not_wrap_on_stored_carts() {
        let cart = Cart::from_items(vec![item("a", 1.0, u32::MAX), item("b", 1.0, 1)]);
        assert_eq!(cart.count(), u64::from(u32::MAX) + 1);
    }

    #[test]
    fn stored_json_reads_back_equal() {
        let mut cart = Cart::default();
        cart.add(item("p1", 12.0, 2)).expect("add");
        let mut with_image = item("p2", 3.5, 1);
        with_image.image_url = Some("/img/p2.png".to_string());
        cart.add(with_image).expect("add");

        let raw = cart.to_json().expect("to json");
        assert_eq!(Cart::from_json(&raw).expect("from json"), cart);
    }

    #[test]
    fn unreadable_cart_loads_empty() {
        assert!(Cart::load_lenient(Some("{not json")).is_empty());
        assert!(Cart::load_lenient(Some("{\"id\":\"x\"}")).is_empty());
        assert!(Cart::load_lenient(None).is_empty());
    }
}
