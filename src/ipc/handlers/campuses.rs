use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    count_where, new_id, now_ts, object, opt_bool, opt_str, patch_bool, patch_required_str,
    patch_str, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
struct Campus {
    id: String,
    name: String,
    address: Option<String>,
    phone: Option<String>,
    principal: Option<String>,
    active: bool,
    created_at: String,
}

const CAMPUS_COLUMNS: &str = "id, name, address, phone, principal, active, created_at";

impl Campus {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            address: r.get(2)?,
            phone: r.get(3)?,
            principal: r.get(4)?,
            active: r.get::<_, i64>(5)? != 0,
            created_at: r.get(6)?,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "schoolId": self.id,
            "name": self.name,
            "schoolName": self.name,
            "address": self.address,
            "phone": self.phone,
            "principal": self.principal,
            "active": self.active,
            "createdAt": self.created_at,
        })
    }
}

fn load_campus(conn: &Connection, id: &str) -> Result<Option<Campus>, HandlerErr> {
    let sql = format!("SELECT {} FROM campuses WHERE id = ?", CAMPUS_COLUMNS);
    Ok(conn.query_row(&sql, [id], Campus::from_row).optional()?)
}

fn campuses_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = Value::Object(object(params, "campus")?.clone());
    let id = opt_str(&input, "id")?;
    let existing = match id.as_deref() {
        Some(id) => load_campus(conn, id)?,
        None => None,
    };

    let name = patch_required_str(
        &input,
        "name",
        existing.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
    )?;
    let address = patch_str(&input, "address", existing.as_ref().and_then(|c| c.address.clone()))?;
    let phone = patch_str(&input, "phone", existing.as_ref().and_then(|c| c.phone.clone()))?;
    let principal = patch_str(
        &input,
        "principal",
        existing.as_ref().and_then(|c| c.principal.clone()),
    )?;
    let active = patch_bool(&input, "active", existing.as_ref().map(|c| c.active).unwrap_or(true))?;

    let mut v = Validator::new();
    v.required("name", &name);
    v.optional_phone("phone", phone.as_deref());
    v.finish()?;

    let campus_id = id.unwrap_or_else(new_id);
    let created = existing.is_none();
    conn.execute(
        "INSERT INTO campuses(id, name, address, phone, principal, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           address = excluded.address,
           phone = excluded.phone,
           principal = excluded.principal,
           active = excluded.active",
        (
            &campus_id,
            &name,
            address.as_deref(),
            phone.as_deref(),
            principal.as_deref(),
            active as i64,
            now_ts(),
        ),
    )
    .map_err(HandlerErr::db_write("db_update_failed", "campuses"))?;

    Ok(json!({ "campusId": campus_id, "created": created }))
}

fn campuses_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = opt_bool(params, "includeInactive")?.unwrap_or(false);
    let sql = format!(
        "SELECT {} FROM campuses WHERE (? OR active = 1) ORDER BY name, id",
        CAMPUS_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let schools = stmt
        .query_map([include_inactive], Campus::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let schools: Vec<Value> = schools.iter().map(Campus::to_json).collect();
    Ok(json!({ "schools": schools }))
}

fn campuses_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let campus = load_campus(conn, &campus_id)?
        .ok_or_else(|| HandlerErr::not_found("campus not found"))?;
    Ok(json!({ "campus": campus.to_json() }))
}

fn campuses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    if load_campus(conn, &campus_id)?.is_none() {
        return Err(HandlerErr::not_found("campus not found"));
    }
    let students = count_where(conn, "SELECT COUNT(*) FROM students WHERE campus_id = ?", &campus_id)?;
    let courses = count_where(conn, "SELECT COUNT(*) FROM courses WHERE campus_id = ?", &campus_id)?;
    let classrooms = count_where(
        conn,
        "SELECT COUNT(*) FROM classrooms WHERE campus_id = ?",
        &campus_id,
    )?;
    if students + courses + classrooms > 0 {
        return Err(HandlerErr::conflict("campus still has students, courses or classrooms")
            .with_details(json!({
                "students": students,
                "courses": courses,
                "classrooms": classrooms
            })));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM staff WHERE campus_id = ?", [&campus_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "staff"))?;
    tx.execute("DELETE FROM cashiers WHERE campus_id = ?", [&campus_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "cashiers"))?;
    tx.execute("DELETE FROM campuses WHERE id = ?", [&campus_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "campuses"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "campuses.save" => campuses_save,
        "campuses.list" => campuses_list,
        "campuses.get" => campuses_get,
        "campuses.delete" => campuses_delete,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
