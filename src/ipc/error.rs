use serde_json::json;

use crate::cart::CartError;
use crate::scoring::ScoringError;
use crate::validate::ValidationErrors;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    /// For `map_err` on writes: `.map_err(HandlerErr::db_write("db_insert_failed", "students"))`.
    pub fn db_write(
        code: &'static str,
        table: &'static str,
    ) -> impl FnOnce(rusqlite::Error) -> HandlerErr {
        move |e| HandlerErr {
            code,
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        Self::new("db_commit_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        Self::new("db_query_failed", format!("{e:#}"))
    }
}

impl From<ValidationErrors> for HandlerErr {
    fn from(e: ValidationErrors) -> Self {
        Self::new("validation_failed", e.to_string()).with_details(json!({ "fields": e.0 }))
    }
}

impl From<CartError> for HandlerErr {
    fn from(e: CartError) -> Self {
        let code = match e {
            CartError::NotInCart(_) => "not_found",
            CartError::ZeroQuantity | CartError::QuantityTooLarge { .. } => "bad_params",
            CartError::Malformed(_) => "db_query_failed",
        };
        Self::new(code, e.to_string())
    }
}

impl From<ScoringError> for HandlerErr {
    fn from(e: ScoringError) -> Self {
        let code = match e {
            ScoringError::ActionOutOfRange { .. } | ScoringError::UnknownStep { .. } => {
                "bad_params"
            }
            ScoringError::Incomplete { .. } => "conflict",
            _ => "validation_failed",
        };
        Self::new(code, e.to_string())
    }
}
