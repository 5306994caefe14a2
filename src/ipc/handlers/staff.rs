use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    count_where, json_str_list, new_id, object, opt_bool, opt_str, opt_str_list, patch_bool,
    patch_required_str, require_row, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

const ROLES: [&str; 3] = ["teacher", "admin", "counselor"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StaffMember {
    id: String,
    campus_id: String,
    name: String,
    phone: String,
    role: String,
    subjects: Vec<String>,
    active: bool,
}

const STAFF_COLUMNS: &str = "id, campus_id, name, phone, role, subjects_json, active";

impl StaffMember {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            campus_id: r.get(1)?,
            name: r.get(2)?,
            phone: r.get(3)?,
            role: r.get(4)?,
            subjects: json_str_list(&r.get::<_, String>(5)?),
            active: r.get::<_, i64>(6)? != 0,
        })
    }

    fn validate(&self) -> Result<(), HandlerErr> {
        let mut v = Validator::new();
        v.required("name", &self.name);
        v.phone("phone", &self.phone);
        v.one_of("role", &self.role, &ROLES);
        Ok(v.finish()?)
    }

    fn subjects_json(&self) -> String {
        serde_json::to_string(&self.subjects).unwrap_or_else(|_| "[]".to_string())
    }
}

fn staff_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let role = opt_str(params, "role")?;
    let include_inactive = opt_bool(params, "includeInactive")?.unwrap_or(false);
    let sql = format!(
        "SELECT {} FROM staff
         WHERE campus_id = ?1
           AND (?2 IS NULL OR role = ?2)
           AND (?3 OR active = 1)
         ORDER BY name, id",
        STAFF_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (&campus_id, role.as_deref(), include_inactive),
            StaffMember::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "staff": rows }))
}

fn staff_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    require_row(conn, "campuses", &campus_id, "campus")?;
    let member = StaffMember {
        id: new_id(),
        campus_id,
        name: opt_str(params, "name")?.unwrap_or_default(),
        phone: opt_str(params, "phone")?.unwrap_or_default(),
        role: opt_str(params, "role")?
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| "teacher".to_string()),
        subjects: opt_str_list(params, "subjects")?.unwrap_or_default(),
        active: opt_bool(params, "active")?.unwrap_or(true),
    };
    member.validate()?;
    conn.execute(
        "INSERT INTO staff(id, campus_id, name, phone, role, subjects_json, active)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &member.id,
            &member.campus_id,
            &member.name,
            &member.phone,
            &member.role,
            member.subjects_json(),
            member.active as i64,
        ),
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "staff"))?;
    Ok(json!({ "staffId": member.id }))
}

fn staff_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let staff_id = required_str(params, "staffId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let sql = format!("SELECT {} FROM staff WHERE id = ?", STAFF_COLUMNS);
    let current = conn
        .query_row(&sql, [&staff_id], StaffMember::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("staff member not found"))?;
    let member = StaffMember {
        name: patch_required_str(&patch, "name", current.name)?,
        phone: patch_required_str(&patch, "phone", current.phone)?,
        role: patch_required_str(&patch, "role", current.role)?.to_ascii_lowercase(),
        subjects: opt_str_list(&patch, "subjects")?.unwrap_or(current.subjects),
        active: patch_bool(&patch, "active", current.active)?,
        ..current
    };
    member.validate()?;
    conn.execute(
        "UPDATE staff SET name = ?, phone = ?, role = ?, subjects_json = ?, active = ? WHERE id = ?",
        (
            &member.name,
            &member.phone,
            &member.role,
            member.subjects_json(),
            member.active as i64,
            &member.id,
        ),
    )
    .map_err(HandlerErr::db_write("db_update_failed", "staff"))?;
    Ok(json!({ "staff": member }))
}

fn staff_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let staff_id = required_str(params, "staffId")?;
    require_row(conn, "staff", &staff_id, "staff member")?;
    let slots = count_where(
        conn,
        "SELECT COUNT(*) FROM time_slots WHERE teacher_id = ?",
        &staff_id,
    )?;
    if slots > 0 {
        return Err(HandlerErr::conflict("staff member is assigned to scheduled time slots")
            .with_details(json!({ "timeSlots": slots })));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE courses SET teacher_id = NULL WHERE teacher_id = ?",
        [&staff_id],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "courses"))?;
    tx.execute("DELETE FROM staff WHERE id = ?", [&staff_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "staff"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "staff.list" => staff_list,
        "staff.create" => staff_create,
        "staff.update" => staff_update,
        "staff.delete" => staff_delete,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
