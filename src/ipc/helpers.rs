use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;

pub type HandlerFn = fn(&Connection, &Value) -> Result<Value, HandlerErr>;

/// Runs a handler against the open workspace and shapes the response.
pub fn with_db(state: &AppState, req: &Request, f: HandlerFn) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::warn!(
                id = %req.id,
                method = %req.method,
                code = error.code,
                "{}",
                error.message
            );
            error.response(&req.id)
        }
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_ts() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null and blank strings all read as `None`.
pub fn opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
    }
}

pub fn opt_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    opt_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_str_list(params: &Value, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array of strings", key)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|v| Some(v.into_iter().filter(|s| !s.is_empty()).collect())),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be an array of strings",
            key
        ))),
    }
}

pub fn object<'a>(params: &'a Value, key: &str) -> Result<&'a Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

/// 1-based page and page size, clamped.
pub fn paging(params: &Value, default_size: i64) -> Result<(usize, usize), HandlerErr> {
    let page = opt_i64(params, "page")?.unwrap_or(1).max(1);
    let size = opt_i64(params, "pageSize")?
        .unwrap_or(default_size)
        .clamp(1, 500);
    Ok((page as usize, size as usize))
}

/// `table` is always a literal from the caller, never user input.
pub fn row_exists(conn: &Connection, table: &'static str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn require_row(
    conn: &Connection,
    table: &'static str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} not found", what)))
    }
}

pub fn count_where(conn: &Connection, sql: &str, id: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, [id], |r| r.get(0))?)
}

pub fn campus_name(conn: &Connection, campus_id: &str) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row("SELECT name FROM campuses WHERE id = ?", [campus_id], |r| {
            r.get(0)
        })
        .optional()?)
}

/// Teacher and classroom, when given, must belong to `campus_id`.
pub fn check_campus_resources(
    conn: &Connection,
    campus_id: &str,
    teacher_id: Option<&str>,
    classroom_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let mut v = Validator::new();
    if let Some(tid) = teacher_id {
        let n = conn.query_row(
            "SELECT COUNT(*) FROM staff WHERE id = ? AND campus_id = ?",
            (tid, campus_id),
            |r| r.get::<_, i64>(0),
        )?;
        if n == 0 {
            v.push("teacherId", "no such staff member on this campus");
        }
    }
    if let Some(rid) = classroom_id {
        let n = conn.query_row(
            "SELECT COUNT(*) FROM classrooms WHERE id = ? AND campus_id = ?",
            (rid, campus_id),
            |r| r.get::<_, i64>(0),
        )?;
        if n == 0 {
            v.push("classroomId", "no such classroom on this campus");
        }
    }
    Ok(v.finish()?)
}

/// The `school` value object every campus-scoped record carries.
pub fn school_ref(campus_id: &str, campus_name: Option<&str>) -> Value {
    serde_json::json!({
        "schoolId": campus_id,
        "schoolName": campus_name.unwrap_or(""),
    })
}

pub fn json_str_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Patch semantics: a key that is present (even null) replaces the current value.
pub fn patch_str(
    patch: &Value,
    key: &str,
    current: Option<String>,
) -> Result<Option<String>, HandlerErr> {
    if patch.get(key).is_some() {
        opt_str(patch, key)
    } else {
        Ok(current)
    }
}

pub fn patch_required_str(patch: &Value, key: &str, current: String) -> Result<String, HandlerErr> {
    Ok(patch_str(patch, key, Some(current))?.unwrap_or_default())
}

pub fn patch_bool(patch: &Value, key: &str, current: bool) -> Result<bool, HandlerErr> {
    Ok(opt_bool(patch, key)?.unwrap_or(current))
}

pub fn patch_i64(patch: &Value, key: &str, current: i64) -> Result<i64, HandlerErr> {
    Ok(opt_i64(patch, key)?.unwrap_or(current))
}

pub fn patch_f64(patch: &Value, key: &str, current: f64) -> Result<f64, HandlerErr> {
    Ok(opt_f64(patch, key)?.unwrap_or(current))
}
