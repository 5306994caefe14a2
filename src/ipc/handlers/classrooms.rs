use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    count_where, new_id, object, opt_i64, opt_str, patch_i64, patch_required_str, patch_str,
    require_row, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Classroom {
    id: String,
    campus_id: String,
    name: String,
    capacity: i64,
    location: Option<String>,
}

impl Classroom {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            campus_id: r.get(1)?,
            name: r.get(2)?,
            capacity: r.get(3)?,
            location: r.get(4)?,
        })
    }

    fn validate(&self) -> Result<(), HandlerErr> {
        let mut v = Validator::new();
        v.required("name", &self.name);
        v.range_i64("capacity", self.capacity, 1, 1000);
        Ok(v.finish()?)
    }
}

fn classrooms_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let mut stmt = conn.prepare(
        "SELECT id, campus_id, name, capacity, location
         FROM classrooms
         WHERE campus_id = ?
         ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([&campus_id], Classroom::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classrooms": rows }))
}

fn classrooms_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    require_row(conn, "campuses", &campus_id, "campus")?;
    let room = Classroom {
        id: new_id(),
        campus_id,
        name: opt_str(params, "name")?.unwrap_or_default(),
        capacity: opt_i64(params, "capacity")?.unwrap_or(0),
        location: opt_str(params, "location")?,
    };
    room.validate()?;
    conn.execute(
        "INSERT INTO classrooms(id, campus_id, name, capacity, location) VALUES(?, ?, ?, ?, ?)",
        (
            &room.id,
            &room.campus_id,
            &room.name,
            room.capacity,
            room.location.as_deref(),
        ),
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "classrooms"))?;
    Ok(json!({ "classroomId": room.id }))
}

fn classrooms_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let current = conn
        .query_row(
            "SELECT id, campus_id, name, capacity, location FROM classrooms WHERE id = ?",
            [&classroom_id],
            Classroom::from_row,
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("classroom not found"))?;
    let room = Classroom {
        name: patch_required_str(&patch, "name", current.name)?,
        capacity: patch_i64(&patch, "capacity", current.capacity)?,
        location: patch_str(&patch, "location", current.location)?,
        ..current
    };
    room.validate()?;
    conn.execute(
        "UPDATE classrooms SET name = ?, capacity = ?, location = ? WHERE id = ?",
        (&room.name, room.capacity, room.location.as_deref(), &room.id),
    )
    .map_err(HandlerErr::db_write("db_update_failed", "classrooms"))?;
    Ok(json!({ "classroom": room }))
}

fn classrooms_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    require_row(conn, "classrooms", &classroom_id, "classroom")?;
    let slots = count_where(
        conn,
        "SELECT COUNT(*) FROM time_slots WHERE classroom_id = ?",
        &classroom_id,
    )?;
    if slots > 0 {
        return Err(HandlerErr::conflict("classroom is used by scheduled time slots")
            .with_details(json!({ "timeSlots": slots })));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE courses SET classroom_id = NULL WHERE classroom_id = ?",
        [&classroom_id],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "courses"))?;
    tx.execute("DELETE FROM classrooms WHERE id = ?", [&classroom_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "classrooms"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "classrooms.list" => classrooms_list,
        "classrooms.create" => classrooms_create,
        "classrooms.update" => classrooms_update,
        "classrooms.delete" => classrooms_delete,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
