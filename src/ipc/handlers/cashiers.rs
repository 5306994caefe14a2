use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    new_id, now_ts, object, opt_str, paging, patch_bool, patch_required_str, patch_str,
    require_row, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Cashier {
    id: String,
    campus_id: String,
    name: String,
    account: String,
    phone: String,
    id_number: Option<String>,
    active: bool,
    created_at: String,
}

const CASHIER_COLUMNS: &str = "id, campus_id, name, account, phone, id_number, active, created_at";

impl Cashier {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            campus_id: r.get(1)?,
            name: r.get(2)?,
            account: r.get(3)?,
            phone: r.get(4)?,
            id_number: r.get(5)?,
            active: r.get::<_, i64>(6)? != 0,
            created_at: r.get(7)?,
        })
    }

    fn validate(&self, v: &mut Validator) {
        v.required("name", &self.name);
        v.required("account", &self.account);
        v.phone("phone", &self.phone);
        v.optional_id_number("idNumber", self.id_number.as_deref());
    }
}

/// Hex sha256 of `account:password`.
fn password_digest(account: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn check_password(v: &mut Validator, password: &str) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        v.push(
            "password",
            format!("must be at least {} characters", MIN_PASSWORD_LEN),
        );
    }
}

fn account_taken(
    conn: &Connection,
    campus_id: &str,
    account: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM cashiers
             WHERE campus_id = ?1 AND account = ?2 AND (?3 IS NULL OR id <> ?3)",
            (campus_id, account, except_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn cashiers_add(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    require_row(conn, "campuses", &campus_id, "campus")?;
    let cashier = Cashier {
        id: new_id(),
        campus_id,
        name: opt_str(params, "name")?.unwrap_or_default(),
        account: opt_str(params, "account")?.unwrap_or_default(),
        phone: opt_str(params, "phone")?.unwrap_or_default(),
        id_number: opt_str(params, "idNumber")?,
        active: true,
        created_at: now_ts(),
    };
    // Passwords are taken verbatim; surrounding spaces are significant.
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut v = Validator::new();
    cashier.validate(&mut v);
    check_password(&mut v, &password);
    v.finish()?;

    if account_taken(conn, &cashier.campus_id, &cashier.account, None)? {
        return Err(HandlerErr::conflict("account already exists on this campus")
            .with_details(json!({ "account": cashier.account })));
    }

    conn.execute(
        "INSERT INTO cashiers(id, campus_id, name, account, password_digest, phone, id_number, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &cashier.id,
            &cashier.campus_id,
            &cashier.name,
            &cashier.account,
            password_digest(&cashier.account, &password),
            &cashier.phone,
            cashier.id_number.as_deref(),
            &cashier.created_at,
        ),
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "cashiers"))?;
    tracing::info!(cashier_id = %cashier.id, account = %cashier.account, "cashier added");
    Ok(json!({ "cashierId": cashier.id }))
}

fn cashiers_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let keyword = opt_str(params, "keyword")?.map(|k| format!("%{}%", k.to_lowercase()));
    let (page, page_size) = paging(params, 20)?;

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cashiers
         WHERE campus_id = ?1
           AND (?2 IS NULL OR lower(name) LIKE ?2 OR lower(account) LIKE ?2 OR phone LIKE ?2)",
        (&campus_id, keyword.as_deref()),
        |r| r.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM cashiers
         WHERE campus_id = ?1
           AND (?2 IS NULL OR lower(name) LIKE ?2 OR lower(account) LIKE ?2 OR phone LIKE ?2)
         ORDER BY created_at, account
         LIMIT ?3 OFFSET ?4",
        CASHIER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let cashiers = stmt
        .query_map(
            (
                &campus_id,
                keyword.as_deref(),
                page_size as i64,
                ((page - 1) * page_size) as i64,
            ),
            Cashier::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "total": total,
        "page": page,
        "pageSize": page_size,
        "cashiers": cashiers
    }))
}

fn cashiers_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let cashier_id = required_str(params, "cashierId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let sql = format!("SELECT {} FROM cashiers WHERE id = ?", CASHIER_COLUMNS);
    let current = conn
        .query_row(&sql, [&cashier_id], Cashier::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("cashier not found"))?;
    let account_before = current.account.clone();
    let cashier = Cashier {
        name: patch_required_str(&patch, "name", current.name)?,
        account: patch_required_str(&patch, "account", current.account)?,
        phone: patch_required_str(&patch, "phone", current.phone)?,
        id_number: patch_str(&patch, "idNumber", current.id_number)?,
        active: patch_bool(&patch, "active", current.active)?,
        ..current
    };
    let password = match patch.get("password") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_str()
                .ok_or_else(|| HandlerErr::bad_params("password must be string"))?
                .to_string(),
        ),
    };

    let mut v = Validator::new();
    cashier.validate(&mut v);
    if let Some(p) = password.as_deref() {
        check_password(&mut v, p);
    }
    v.finish()?;

    if cashier.account != account_before
        && account_taken(conn, &cashier.campus_id, &cashier.account, Some(&cashier.id))?
    {
        return Err(HandlerErr::conflict("account already exists on this campus")
            .with_details(json!({ "account": cashier.account })));
    }
    // The digest is salted with the account, so renaming needs the password again.
    if cashier.account != account_before && password.is_none() {
        return Err(HandlerErr::bad_params(
            "changing account requires a new password",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE cashiers SET name = ?, account = ?, phone = ?, id_number = ?, active = ? WHERE id = ?",
        (
            &cashier.name,
            &cashier.account,
            &cashier.phone,
            cashier.id_number.as_deref(),
            cashier.active as i64,
            &cashier.id,
        ),
    )
    .map_err(HandlerErr::db_write("db_update_failed", "cashiers"))?;
    if let Some(p) = password.as_deref() {
        tx.execute(
            "UPDATE cashiers SET password_digest = ? WHERE id = ?",
            (password_digest(&cashier.account, p), &cashier.id),
        )
        .map_err(HandlerErr::db_write("db_update_failed", "cashiers"))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "cashier": cashier }))
}

fn cashiers_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let cashier_id = required_str(params, "cashierId")?;
    let changed = conn
        .execute("DELETE FROM cashiers WHERE id = ?", [&cashier_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "cashiers"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("cashier not found"));
    }
    Ok(json!({ "ok": true }))
}

fn cashiers_verify(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let account = required_str(params, "account")?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_digest FROM cashiers
             WHERE campus_id = ? AND account = ? AND active = 1",
            (&campus_id, &account),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match row {
        Some((id, digest)) if digest == password_digest(&account, password) => {
            Ok(json!({ "valid": true, "cashierId": id }))
        }
        _ => {
            tracing::info!(account = %account, "cashier verification failed");
            Ok(json!({ "valid": false }))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "cashiers.add" => cashiers_add,
        "cashiers.list" => cashiers_list,
        "cashiers.update" => cashiers_update,
        "cashiers.delete" => cashiers_delete,
        "cashiers.verify" => cashiers_verify,
        _ => return None,
    };
    Some(with_db(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::password_digest;

    #[test]
    fn digest_depends_on_account_and_password() {
        let a = password_digest("front01", "secret1");
        assert_eq!(a.len(), 64);
        assert_eq!(a, password_digest("front01", "secret1"));
        assert_ne!(a, password_digest("front02", "secret1"));
        assert_ne!(a, password_digest("front01", "secret2"));
    }
}
