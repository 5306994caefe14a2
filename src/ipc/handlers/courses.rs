use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::schedule::load_slots;
use crate::ipc::handlers::students::{Student, STUDENT_COLUMNS};
use crate::ipc::helpers::{
    campus_name, check_campus_resources, count_where, new_id, now_ts, object, opt_f64, opt_i64,
    opt_str, patch_f64, patch_i64, patch_required_str, patch_str, require_row, required_str,
    school_ref, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

const STATUSES: [&str; 3] = ["draft", "open", "closed"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Course {
    pub id: String,
    pub campus_id: String,
    pub name: String,
    pub category: String,
    pub teacher_id: Option<String>,
    pub classroom_id: Option<String>,
    pub price: f64,
    pub capacity: i64,
    pub total_lessons: i64,
    pub description: Option<String>,
    pub status: String,
    pub cover_url: Option<String>,
    pub created_at: String,
}

const COURSE_COLUMNS: &str = "c.id, c.campus_id, c.name, c.category, c.teacher_id, c.classroom_id, c.price, c.capacity, c.total_lessons, c.description, c.status, c.cover_url, c.created_at";

impl Course {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            campus_id: r.get(1)?,
            name: r.get(2)?,
            category: r.get(3)?,
            teacher_id: r.get(4)?,
            classroom_id: r.get(5)?,
            price: r.get(6)?,
            capacity: r.get(7)?,
            total_lessons: r.get(8)?,
            description: r.get(9)?,
            status: r.get(10)?,
            cover_url: r.get(11)?,
            created_at: r.get(12)?,
        })
    }

    fn validate(&self) -> Result<(), HandlerErr> {
        let mut v = Validator::new();
        v.required("name", &self.name);
        v.required("category", &self.category);
        v.price("price", self.price);
        v.range_i64("capacity", self.capacity, 1, 1000);
        v.range_i64("totalLessons", self.total_lessons, 0, 1000);
        v.one_of("status", &self.status, &STATUSES);
        Ok(v.finish()?)
    }
}

/// A course plus the names the list views show next to it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseRow {
    #[serde(flatten)]
    course: Course,
    teacher_name: Option<String>,
    classroom_name: Option<String>,
    enrolled_count: i64,
}

const COURSE_ROW_SELECT: &str = "SELECT c.id, c.campus_id, c.name, c.category, c.teacher_id, c.classroom_id, c.price, c.capacity, c.total_lessons, c.description, c.status, c.cover_url, c.created_at,
        st.name, cr.name,
        (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id)
     FROM courses c
     LEFT JOIN staff st ON st.id = c.teacher_id
     LEFT JOIN classrooms cr ON cr.id = c.classroom_id";

impl CourseRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            course: Course::from_row(r)?,
            teacher_name: r.get(13)?,
            classroom_name: r.get(14)?,
            enrolled_count: r.get(15)?,
        })
    }
}

pub(crate) fn load_course(conn: &Connection, id: &str) -> Result<Option<Course>, HandlerErr> {
    let sql = format!("SELECT {} FROM courses c WHERE c.id = ?", COURSE_COLUMNS);
    Ok(conn.query_row(&sql, [id], Course::from_row).optional()?)
}

pub(crate) fn require_course(conn: &Connection, id: &str) -> Result<Course, HandlerErr> {
    load_course(conn, id)?.ok_or_else(|| HandlerErr::not_found("course not found"))
}

fn courses_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = opt_str(params, "campusId")?;
    let category = opt_str(params, "category")?.filter(|c| c != "all");
    let status = opt_str(params, "status")?;
    let teacher_id = opt_str(params, "teacherId")?;
    let keyword = opt_str(params, "keyword")?.map(|k| format!("%{}%", k.to_lowercase()));
    let sql = format!(
        "{}
         WHERE (?1 IS NULL OR c.campus_id = ?1)
           AND (?2 IS NULL OR c.category = ?2)
           AND (?3 IS NULL OR c.status = ?3)
           AND (?4 IS NULL OR c.teacher_id = ?4)
           AND (?5 IS NULL OR lower(c.name) LIKE ?5 OR lower(COALESCE(c.description, '')) LIKE ?5)
         ORDER BY c.created_at DESC, c.name, c.id",
        COURSE_ROW_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let courses = stmt
        .query_map(
            (
                campus_id.as_deref(),
                category.as_deref(),
                status.as_deref(),
                teacher_id.as_deref(),
                keyword.as_deref(),
            ),
            CourseRow::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let campus_id = required_str(params, "campusId")?;
    require_row(conn, "campuses", &campus_id, "campus")?;
    let course = Course {
        id: new_id(),
        campus_id,
        name: opt_str(params, "name")?.unwrap_or_default(),
        category: opt_str(params, "category")?.unwrap_or_default(),
        teacher_id: opt_str(params, "teacherId")?,
        classroom_id: opt_str(params, "classroomId")?,
        price: opt_f64(params, "price")?.unwrap_or(0.0),
        capacity: opt_i64(params, "capacity")?.unwrap_or(20),
        total_lessons: opt_i64(params, "totalLessons")?.unwrap_or(0),
        description: opt_str(params, "description")?,
        status: opt_str(params, "status")?.unwrap_or_else(|| "draft".to_string()),
        cover_url: opt_str(params, "coverUrl")?,
        created_at: now_ts(),
    };
    course.validate()?;
    check_campus_resources(
        conn,
        &course.campus_id,
        course.teacher_id.as_deref(),
        course.classroom_id.as_deref(),
    )?;
    conn.execute(
        "INSERT INTO courses(
            id, campus_id, name, category, teacher_id, classroom_id, price, capacity,
            total_lessons, description, status, cover_url, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            course.id,
            course.campus_id,
            course.name,
            course.category,
            course.teacher_id,
            course.classroom_id,
            course.price,
            course.capacity,
            course.total_lessons,
            course.description,
            course.status,
            course.cover_url,
            course.created_at,
        ],
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "courses"))?;
    Ok(json!({ "courseId": course.id }))
}

fn courses_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let current = require_course(conn, &course_id)?;
    let course = Course {
        name: patch_required_str(&patch, "name", current.name)?,
        category: patch_required_str(&patch, "category", current.category)?,
        teacher_id: patch_str(&patch, "teacherId", current.teacher_id)?,
        classroom_id: patch_str(&patch, "classroomId", current.classroom_id)?,
        price: patch_f64(&patch, "price", current.price)?,
        capacity: patch_i64(&patch, "capacity", current.capacity)?,
        total_lessons: patch_i64(&patch, "totalLessons", current.total_lessons)?,
        description: patch_str(&patch, "description", current.description)?,
        status: patch_required_str(&patch, "status", current.status)?,
        cover_url: patch_str(&patch, "coverUrl", current.cover_url)?,
        ..current
    };
    course.validate()?;
    check_campus_resources(
        conn,
        &course.campus_id,
        course.teacher_id.as_deref(),
        course.classroom_id.as_deref(),
    )?;
    let enrolled = count_where(
        conn,
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
        &course.id,
    )?;
    if course.capacity < enrolled {
        return Err(HandlerErr::conflict("capacity is below the current enrollment")
            .with_details(json!({ "enrolled": enrolled, "capacity": course.capacity })));
    }
    conn.execute(
        "UPDATE courses SET
            name = ?, category = ?, teacher_id = ?, classroom_id = ?, price = ?, capacity = ?,
            total_lessons = ?, description = ?, status = ?, cover_url = ?
         WHERE id = ?",
        rusqlite::params![
            course.name,
            course.category,
            course.teacher_id,
            course.classroom_id,
            course.price,
            course.capacity,
            course.total_lessons,
            course.description,
            course.status,
            course.cover_url,
            course.id,
        ],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "courses"))?;
    Ok(json!({ "course": course }))
}

fn courses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM time_slots WHERE course_id = ?", [&course_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "time_slots"))?;
    tx.execute("DELETE FROM enrollments WHERE course_id = ?", [&course_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "enrollments"))?;
    tx.execute(
        "DELETE FROM attendance_student_months WHERE course_id = ?",
        [&course_id],
    )
    .map_err(HandlerErr::db_write("db_delete_failed", "attendance_student_months"))?;
    // Plans outlive the course they were written for.
    tx.execute(
        "UPDATE lesson_plans SET course_id = NULL WHERE course_id = ?",
        [&course_id],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "lesson_plans"))?;
    tx.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "courses"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

pub(crate) fn enrolled_students(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<Student>, HandlerErr> {
    let cols = STUDENT_COLUMNS
        .split(", ")
        .map(|c| format!("s.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY s.sort_order, s.id",
        cols
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([course_id], Student::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

fn courses_detail(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let sql = format!("{} WHERE c.id = ?", COURSE_ROW_SELECT);
    let row = conn
        .query_row(&sql, [&course_id], CourseRow::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("course not found"))?;
    let school = school_ref(
        &row.course.campus_id,
        campus_name(conn, &row.course.campus_id)?.as_deref(),
    );
    let students = enrolled_students(conn, &course_id)?;
    let slots = load_slots(conn, "ts.course_id = ?1", [&course_id])?;
    let mut detail = serde_json::to_value(&row)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    detail["school"] = school;
    detail["students"] = json!(students);
    detail["slots"] = json!(slots);
    Ok(json!({ "course": detail }))
}

fn courses_enroll(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    let course = require_course(conn, &course_id)?;
    let student_campus: String = conn
        .query_row(
            "SELECT campus_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    if student_campus != course.campus_id {
        return Err(HandlerErr::conflict("student belongs to another campus")
            .with_details(json!({ "studentCampusId": student_campus, "courseCampusId": course.campus_id })));
    }

    let already = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
            (&course_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    let enrolled = count_where(
        conn,
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
        &course_id,
    )?;
    if already {
        return Ok(json!({ "enrolled": true, "alreadyEnrolled": true, "enrolledCount": enrolled }));
    }
    if enrolled >= course.capacity {
        return Err(HandlerErr::conflict("course is full")
            .with_details(json!({ "capacity": course.capacity, "enrolled": enrolled })));
    }

    conn.execute(
        "INSERT INTO enrollments(course_id, student_id, enrolled_at) VALUES(?, ?, ?)",
        (&course_id, &student_id, now_ts()),
    )
    .map_err(HandlerErr::db_write("db_insert_failed", "enrollments"))?;
    Ok(json!({ "enrolled": true, "alreadyEnrolled": false, "enrolledCount": enrolled + 1 }))
}

fn courses_unenroll(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    let removed = conn
        .execute(
            "DELETE FROM enrollments WHERE course_id = ? AND student_id = ?",
            (&course_id, &student_id),
        )
        .map_err(HandlerErr::db_write("db_delete_failed", "enrollments"))?;
    Ok(json!({ "removed": removed > 0 }))
}

fn courses_for_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;
    let sql = format!(
        "{}
         JOIN enrollments en ON en.course_id = c.id
         WHERE en.student_id = ?
         ORDER BY en.enrolled_at DESC, c.name",
        COURSE_ROW_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let courses = stmt
        .query_map([&student_id], CourseRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "courses.list" => courses_list,
        "courses.create" => courses_create,
        "courses.update" => courses_update,
        "courses.delete" => courses_delete,
        "courses.detail" => courses_detail,
        "courses.enroll" => courses_enroll,
        "courses.unenroll" => courses_unenroll,
        "courses.forStudent" => courses_for_student,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
