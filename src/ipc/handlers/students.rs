use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    new_id, now_ts, object, opt_bool, opt_str, patch_bool, patch_required_str,
    patch_str, require_row, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

const GENDERS: [&str; 3] = ["male", "female", "unknown"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Student {
    pub id: String,
    pub campus_id: String,
    pub name: String,
    pub gender: String,
    pub phone: String,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub id_number: Option<String>,
    pub birth_date: Option<String>,
    pub grade: Option<String>,
    pub active: bool,
    pub sort_order: i64,
}

pub(crate) const STUDENT_COLUMNS: &str = "id, campus_id, name, gender, phone, guardian_name, guardian_phone, id_number, birth_date, grade, active, sort_order";

impl Student {
    pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            campus_id: r.get(1)?,
            name: r.get(2)?,
            gender: r.get(3)?,
            phone: r.get(4)?,
            guardian_name: r.get(5)?,
            guardian_phone: r.get(6)?,
            id_number: r.get(7)?,
            birth_date: r.get(8)?,
            grade: r.get(9)?,
            active: r.get::<_, i64>(10)? != 0,
            sort_order: r.get(11)?,
        })
    }

    fn validate(&self) -> Result<(), HandlerErr> {
        let mut v = Validator::new();
        v.required("name", &self.name);
        v.one_of("gender", &self.gender, &GENDERS);
        v.phone("phone", &self.phone);
        v.optional_phone("guardianPhone", self.guardian_phone.as_deref());
        v.optional_id_number("idNumber", self.id_number.as_deref());
        v.optional_date("birthDate", self.birth_date.as_deref());
        Ok(v.finish()?)
    }
}

fn load_student(conn: &Connection, id: &str) -> Result<Option<Student>, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    Ok(conn.query_row(&sql, [id], Student::from_row).optional()?)
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let keyword = opt_str(params, "keyword")?.map(|k| format!("%{}%", k.to_lowercase()));
    let grade = opt_str(params, "grade")?;
    let include_inactive = opt_bool(params, "includeInactive")?.unwrap_or(false);
    let sql = format!(
        "SELECT {} FROM students
         WHERE campus_id = ?1
           AND (?2 IS NULL OR lower(name) LIKE ?2 OR phone LIKE ?2 OR lower(COALESCE(guardian_name, '')) LIKE ?2)
           AND (?3 IS NULL OR grade = ?3)
           AND (?4 OR active = 1)
         ORDER BY sort_order, id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(
            (&campus_id, keyword.as_deref(), grade.as_deref(), include_inactive),
            Student::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    require_row(conn, "campuses", &campus_id, "campus")?;
    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE campus_id = ?",
        [&campus_id],
        |r| r.get(0),
    )?;
    let student = Student {
        id: new_id(),
        campus_id,
        name: opt_str(params, "name")?.unwrap_or_default(),
        gender: opt_str(params, "gender")?
            .map(|g| g.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        phone: opt_str(params, "phone")?.unwrap_or_default(),
        guardian_name: opt_str(params, "guardianName")?,
        guardian_phone: opt_str(params, "guardianPhone")?,
        id_number: opt_str(params, "idNumber")?,
        birth_date: opt_str(params, "birthDate")?,
        grade: opt_str(params, "grade")?,
        active: opt_bool(params, "active")?.unwrap_or(true),
        sort_order: next_sort,
    };
    student.validate()?;
    conn.execute(
        "INSERT INTO students(
            id, campus_id, name, gender, phone, guardian_name, guardian_phone,
            id_number, birth_date, grade, active, sort_order, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student.id,
            student.campus_id,
            student.name,
            student.gender,
            student.phone,
            student.guardian_name,
            student.guardian_phone,
            student.id_number,
            student.birth_date,
            student.grade,
            student.active as i64,
            student.sort_order,
            now_ts(),
        ],
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "students"))?;
    Ok(json!({ "studentId": student.id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let current = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let student = Student {
        name: patch_required_str(&patch, "name", current.name)?,
        gender: patch_required_str(&patch, "gender", current.gender)?.to_ascii_lowercase(),
        phone: patch_required_str(&patch, "phone", current.phone)?,
        guardian_name: patch_str(&patch, "guardianName", current.guardian_name)?,
        guardian_phone: patch_str(&patch, "guardianPhone", current.guardian_phone)?,
        id_number: patch_str(&patch, "idNumber", current.id_number)?,
        birth_date: patch_str(&patch, "birthDate", current.birth_date)?,
        grade: patch_str(&patch, "grade", current.grade)?,
        active: patch_bool(&patch, "active", current.active)?,
        ..current
    };
    student.validate()?;
    conn.execute(
        "UPDATE students SET
            name = ?, gender = ?, phone = ?, guardian_name = ?, guardian_phone = ?,
            id_number = ?, birth_date = ?, grade = ?, active = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            student.name,
            student.gender,
            student.phone,
            student.guardian_name,
            student.guardian_phone,
            student.id_number,
            student.birth_date,
            student.grade,
            student.active as i64,
            now_ts(),
            student.id,
        ],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "students"))?;
    Ok(json!({ "student": student }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for (sql, table) in [
        ("DELETE FROM enrollments WHERE student_id = ?", "enrollments"),
        (
            "DELETE FROM attendance_student_months WHERE student_id = ?",
            "attendance_student_months",
        ),
        (
            "DELETE FROM lesson_plan_scores WHERE student_id = ?",
            "lesson_plan_scores",
        ),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        tx.execute(sql, [&student_id])
            .map_err(HandlerErr::db_write("db_delete_failed", table))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

fn students_reorder(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    let Some(raw) = params.get("studentIdOrder").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing/invalid studentIdOrder"));
    };
    // Every entry counts toward the permutation; blanks are not skipped.
    let mut ordered: Vec<String> = Vec::with_capacity(raw.len());
    for (index, v) in raw.iter().enumerate() {
        match v.as_str().map(str::trim) {
            Some(id) if !id.is_empty() => ordered.push(id.to_string()),
            _ => {
                return Err(HandlerErr::bad_params("studentIdOrder entries must be non-empty ids")
                    .with_details(json!({ "index": index })))
            }
        }
    }

    let mut stmt = conn.prepare("SELECT id FROM students WHERE campus_id = ? ORDER BY sort_order")?;
    let current_ids = stmt
        .query_map([&campus_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    if ordered.len() != current_ids.len() {
        return Err(HandlerErr::bad_params(
            "studentIdOrder must be a permutation of the campus students",
        )
        .with_details(json!({ "expected": current_ids.len(), "got": ordered.len() })));
    }
    let current: HashSet<&str> = current_ids.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for id in &ordered {
        if !seen.insert(id.as_str()) {
            return Err(HandlerErr::bad_params("studentIdOrder contains duplicates")
                .with_details(json!({ "studentId": id })));
        }
        if !current.contains(id.as_str()) {
            return Err(HandlerErr::bad_params("studentIdOrder contains unknown studentId")
                .with_details(json!({ "studentId": id })));
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let ts = now_ts();
    for (i, sid) in ordered.iter().enumerate() {
        tx.execute(
            "UPDATE students SET sort_order = ?, updated_at = ? WHERE id = ? AND campus_id = ?",
            (i as i64, &ts, sid, &campus_id),
        )
        .map_err(HandlerErr::db_write("db_update_failed", "students"))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "students.list" => students_list,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.reorder" => students_reorder,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
