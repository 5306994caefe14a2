use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::courses::require_course;
use crate::ipc::handlers::setup::week_start;
use crate::ipc::helpers::{
    check_campus_resources, count_where, new_id, object, opt_i64, opt_str, patch_i64, patch_str,
    require_row, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{bucket_grids, build_week_grid, week_first_day, GroupBy, TimeSlot};
use crate::validate::Validator;
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{Connection, Params, Row};
use serde_json::{json, Value};

const SLOT_SELECT: &str = "SELECT ts.id, ts.course_id, c.name, ts.campus_id,
        ts.teacher_id, st.name, ts.classroom_id, cr.name,
        ts.date, ts.start_time, ts.end_time, ts.student_count, ts.note
     FROM time_slots ts
     JOIN courses c ON c.id = ts.course_id
     LEFT JOIN staff st ON st.id = ts.teacher_id
     LEFT JOIN classrooms cr ON cr.id = ts.classroom_id";

fn parse_col<T>(
    r: &Row<'_>,
    idx: usize,
    parse: fn(&str, &str) -> chrono::ParseResult<T>,
    fmt: &str,
) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    parse(&raw, fmt).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn slot_from_row(r: &Row<'_>) -> rusqlite::Result<TimeSlot> {
    Ok(TimeSlot {
        id: r.get(0)?,
        course_id: r.get(1)?,
        course_name: r.get(2)?,
        campus_id: r.get(3)?,
        teacher_id: r.get(4)?,
        teacher_name: r.get(5)?,
        classroom_id: r.get(6)?,
        classroom_name: r.get(7)?,
        date: parse_col(r, 8, NaiveDate::parse_from_str, "%Y-%m-%d")?,
        start_time: parse_col(r, 9, NaiveTime::parse_from_str, "%H:%M")?,
        end_time: parse_col(r, 10, NaiveTime::parse_from_str, "%H:%M")?,
        student_count: r.get(11)?,
        note: r.get(12)?,
    })
}

/// Slots matching `filter` (a WHERE fragment over `ts`), in date/time order.
pub(crate) fn load_slots<P: Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<TimeSlot>, HandlerErr> {
    let sql = format!(
        "{} WHERE {} ORDER BY ts.date, ts.start_time, ts.end_time, ts.id",
        SLOT_SELECT, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let slots = stmt
        .query_map(params, slot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(slots)
}

fn load_slot(conn: &Connection, slot_id: &str) -> Result<TimeSlot, HandlerErr> {
    load_slots(conn, "ts.id = ?1", [slot_id])?
        .into_iter()
        .next()
        .ok_or_else(|| HandlerErr::not_found("time slot not found"))
}

/// Checked slot fields, before they are written.
struct SlotInput {
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

fn check_slot_times(date: &str, start: &str, end: &str) -> Result<SlotInput, HandlerErr> {
    let mut v = Validator::new();
    let date = v.date("date", date);
    let start_time = v.time("startTime", start);
    let end_time = v.time("endTime", end);
    if let (Some(s), Some(e)) = (start_time, end_time) {
        if e <= s {
            v.push("endTime", "must be after startTime");
        }
    }
    v.finish()?;
    match (date, start_time, end_time) {
        (Some(date), Some(start_time), Some(end_time)) => Ok(SlotInput {
            date,
            start_time,
            end_time,
        }),
        _ => Err(HandlerErr::bad_params("invalid slot date or time")),
    }
}

fn slots_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let course = require_course(conn, &course_id)?;
    let input = check_slot_times(
        &opt_str(params, "date")?.unwrap_or_default(),
        &opt_str(params, "startTime")?.unwrap_or_default(),
        &opt_str(params, "endTime")?.unwrap_or_default(),
    )?;
    let teacher_id = opt_str(params, "teacherId")?.or(course.teacher_id);
    let classroom_id = opt_str(params, "classroomId")?.or(course.classroom_id);
    check_campus_resources(
        conn,
        &course.campus_id,
        teacher_id.as_deref(),
        classroom_id.as_deref(),
    )?;
    let student_count = match opt_i64(params, "studentCount")? {
        Some(n) => n,
        None => count_where(
            conn,
            "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
            &course_id,
        )?,
    };
    if student_count < 0 {
        return Err(HandlerErr::bad_params("studentCount must be >= 0"));
    }

    let slot_id = new_id();
    conn.execute(
        "INSERT INTO time_slots(
            id, course_id, campus_id, teacher_id, classroom_id, date, start_time, end_time,
            student_count, note
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            slot_id,
            course_id,
            course.campus_id,
            teacher_id,
            classroom_id,
            input.date.format("%Y-%m-%d").to_string(),
            input.start_time.format("%H:%M").to_string(),
            input.end_time.format("%H:%M").to_string(),
            student_count,
            opt_str(params, "note")?,
        ],
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "time_slots"))?;
    Ok(json!({ "slot": load_slot(conn, &slot_id)? }))
}

fn slots_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot_id = required_str(params, "slotId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let current = load_slot(conn, &slot_id)?;

    let text = |key: &str, current: String| -> Result<String, HandlerErr> {
        Ok(patch_str(&patch, key, Some(current))?.unwrap_or_default())
    };
    let input = check_slot_times(
        &text("date", current.date.format("%Y-%m-%d").to_string())?,
        &text("startTime", current.start_time.format("%H:%M").to_string())?,
        &text("endTime", current.end_time.format("%H:%M").to_string())?,
    )?;
    let teacher_id = patch_str(&patch, "teacherId", current.teacher_id)?;
    let classroom_id = patch_str(&patch, "classroomId", current.classroom_id)?;
    check_campus_resources(
        conn,
        &current.campus_id,
        teacher_id.as_deref(),
        classroom_id.as_deref(),
    )?;
    let student_count = patch_i64(&patch, "studentCount", current.student_count)?;
    if student_count < 0 {
        return Err(HandlerErr::bad_params("studentCount must be >= 0"));
    }
    let note = patch_str(&patch, "note", current.note)?;

    conn.execute(
        "UPDATE time_slots SET
            teacher_id = ?, classroom_id = ?, date = ?, start_time = ?, end_time = ?,
            student_count = ?, note = ?
         WHERE id = ?",
        rusqlite::params![
            teacher_id,
            classroom_id,
            input.date.format("%Y-%m-%d").to_string(),
            input.start_time.format("%H:%M").to_string(),
            input.end_time.format("%H:%M").to_string(),
            student_count,
            note,
            slot_id,
        ],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "time_slots"))?;
    Ok(json!({ "slot": load_slot(conn, &slot_id)? }))
}

fn slots_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot_id = required_str(params, "slotId")?;
    let changed = conn
        .execute("DELETE FROM time_slots WHERE id = ?", [&slot_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "time_slots"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("time slot not found"));
    }
    Ok(json!({ "ok": true }))
}

fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    let Some(raw) = opt_str(params, key)? else {
        return Ok(None);
    };
    let mut v = Validator::new();
    let date = v.date(key, &raw);
    v.finish()?;
    Ok(date)
}

fn slots_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let from = optional_date(params, "from")?.map(|d| d.format("%Y-%m-%d").to_string());
    let to = optional_date(params, "to")?.map(|d| d.format("%Y-%m-%d").to_string());
    let slots = load_slots(
        conn,
        "ts.campus_id = ?1 AND (?2 IS NULL OR ts.date >= ?2) AND (?3 IS NULL OR ts.date <= ?3)",
        (&campus_id, from.as_deref(), to.as_deref()),
    )?;
    Ok(json!({ "slots": slots }))
}

/// The campus's slots in the week containing `weekOf` (today when absent).
fn week_slots(conn: &Connection, params: &Value) -> Result<(NaiveDate, Vec<TimeSlot>), HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    require_row(conn, "campuses", &campus_id, "campus")?;
    let week_of = optional_date(params, "weekOf")?.unwrap_or_else(|| Local::now().date_naive());
    let first = week_first_day(week_of, week_start(conn));
    let last = first + Duration::days(6);
    let slots = load_slots(
        conn,
        "ts.campus_id = ?1 AND ts.date >= ?2 AND ts.date <= ?3",
        (
            &campus_id,
            first.format("%Y-%m-%d").to_string(),
            last.format("%Y-%m-%d").to_string(),
        ),
    )?;
    Ok((first, slots))
}

fn schedule_weekly(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (first, slots) = week_slots(conn, params)?;
    Ok(json!({ "grid": build_week_grid(&slots, first) }))
}

fn schedule_grouped(conn: &Connection, params: &Value, by: GroupBy) -> Result<Value, HandlerErr> {
    let (first, slots) = week_slots(conn, params)?;
    let slot_count = slots.len();
    let buckets = bucket_grids(slots, by, first);
    Ok(json!({
        "weekStart": first,
        "slotCount": slot_count,
        "buckets": buckets
    }))
}

fn schedule_by_teacher(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    schedule_grouped(conn, params, GroupBy::Teacher)
}

fn schedule_by_classroom(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    schedule_grouped(conn, params, GroupBy::Classroom)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "schedule.slots.create" => slots_create,
        "schedule.slots.update" => slots_update,
        "schedule.slots.delete" => slots_delete,
        "schedule.slots.list" => slots_list,
        "schedule.weekly" => schedule_weekly,
        "schedule.byTeacher" => schedule_by_teacher,
        "schedule.byClassroom" => schedule_by_classroom,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
