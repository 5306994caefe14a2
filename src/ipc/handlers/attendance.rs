use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::courses::{enrolled_students, require_course};
use crate::ipc::handlers::setup::{attendance_codes, AttendanceCodes};
use crate::ipc::handlers::students::Student;
use crate::ipc::helpers::{opt_str_list, required_str, with_db, HandlerFn};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

const BLANK: char = ' ';

/// A `YYYY-MM` key and its length in days.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MonthKey {
    key: String,
    days: usize,
}

fn parse_month_key(month: &str) -> Result<MonthKey, HandlerErr> {
    let t = month.trim();
    let first = NaiveDate::parse_from_str(&format!("{}-01", t), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("month must be YYYY-MM"))?;
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    }
    .ok_or_else(|| HandlerErr::bad_params("month out of range"))?;
    Ok(MonthKey {
        key: first.format("%Y-%m").to_string(),
        days: (next - first).num_days() as usize,
    })
}

fn normalize_day_codes(raw: &str, days: usize) -> String {
    raw.chars()
        .chain(std::iter::repeat(BLANK))
        .take(days)
        .collect()
}

fn patch_day_code(existing: &str, days: usize, day: usize, code: Option<char>) -> String {
    normalize_day_codes(existing, days)
        .chars()
        .enumerate()
        .map(|(i, c)| if i + 1 == day { code.unwrap_or(BLANK) } else { c })
        .collect()
}

fn required_day(params: &Value, month: &MonthKey) -> Result<usize, HandlerErr> {
    let day = params
        .get("day")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing day"))? as usize;
    if day == 0 || day > month.days {
        return Err(HandlerErr::bad_params("day out of range for month")
            .with_details(json!({ "day": day, "daysInMonth": month.days })));
    }
    Ok(day)
}

/// Null or blank clears the day. Anything else must be one of the configured codes.
fn parse_code(params: &Value, codes: &AttendanceCodes) -> Result<Option<char>, HandlerErr> {
    let Some(v) = params.get("code").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let s = v
        .as_str()
        .ok_or_else(|| HandlerErr::bad_params("code must be string or null"))?
        .trim();
    let Some(c) = s.chars().next() else {
        return Ok(None);
    };
    let c = c.to_ascii_uppercase();
    let allowed = [codes.present, codes.absent, codes.late, codes.excused];
    if s.chars().count() != 1 || !allowed.contains(&c) {
        return Err(HandlerErr::bad_params("unknown attendance code").with_details(json!({
            "code": s,
            "allowed": allowed.iter().map(|c| c.to_string()).collect::<Vec<_>>()
        })));
    }
    Ok(Some(c))
}

fn month_rows(
    conn: &Connection,
    course_id: &str,
    month: &MonthKey,
) -> Result<HashMap<String, String>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT student_id, day_codes
         FROM attendance_student_months
         WHERE course_id = ? AND month = ?",
    )?;
    let rows = stmt
        .query_map((course_id, &month.key), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(sid, codes)| (sid, normalize_day_codes(&codes, month.days)))
        .collect())
}

fn upsert_student_month(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
    month: &MonthKey,
    day: usize,
    code: Option<char>,
) -> Result<(), HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT day_codes FROM attendance_student_months
             WHERE course_id = ? AND student_id = ? AND month = ?",
            (course_id, student_id, &month.key),
            |r| r.get(0),
        )
        .optional()?;
    let patched = patch_day_code(existing.as_deref().unwrap_or(""), month.days, day, code);
    conn.execute(
        "INSERT INTO attendance_student_months(course_id, student_id, month, day_codes)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(course_id, student_id, month) DO UPDATE SET
           day_codes = excluded.day_codes",
        (course_id, student_id, &month.key, &patched),
    )
    .map_err(HandlerErr::db_write("db_update_failed", "attendance_student_months"))?;
    Ok(())
}

fn student_json(s: &Student) -> Value {
    json!({
        "id": s.id,
        "name": s.name,
        "sortOrder": s.sort_order,
        "active": s.active
    })
}

fn attendance_month_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let month = parse_month_key(&required_str(params, "month")?)?;
    require_course(conn, &course_id)?;
    let students = enrolled_students(conn, &course_id)?;
    let by_student = month_rows(conn, &course_id, &month)?;
    let codes = attendance_codes(conn);

    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let day_codes = by_student
                .get(&s.id)
                .cloned()
                .unwrap_or_else(|| normalize_day_codes("", month.days));
            json!({ "studentId": s.id, "dayCodes": day_codes })
        })
        .collect();
    Ok(json!({
        "courseId": course_id,
        "month": month.key,
        "daysInMonth": month.days,
        "codes": {
            "present": codes.present.to_string(),
            "absent": codes.absent.to_string(),
            "late": codes.late.to_string(),
            "excused": codes.excused.to_string(),
        },
        "students": students.iter().map(student_json).collect::<Vec<_>>(),
        "rows": rows
    }))
}

fn attendance_set_student_day(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    let month = parse_month_key(&required_str(params, "month")?)?;
    let day = required_day(params, &month)?;
    let code = parse_code(params, &attendance_codes(conn))?;
    require_course(conn, &course_id)?;
    let enrolled = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
            (&course_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !enrolled {
        return Err(HandlerErr::not_found("student is not enrolled in this course"));
    }
    upsert_student_month(conn, &course_id, &student_id, &month, day, code)?;
    Ok(json!({ "ok": true }))
}

fn attendance_bulk_stamp_day(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let month = parse_month_key(&required_str(params, "month")?)?;
    let day = required_day(params, &month)?;
    let code = parse_code(params, &attendance_codes(conn))?;
    require_course(conn, &course_id)?;
    let enrolled: Vec<String> = enrolled_students(conn, &course_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();

    let targets: Vec<String> = match opt_str_list(params, "studentIds")? {
        None => enrolled,
        Some(ids) => {
            let known: HashSet<&str> = enrolled.iter().map(String::as_str).collect();
            if let Some(unknown) = ids.iter().find(|id| !known.contains(id.as_str())) {
                return Err(HandlerErr::bad_params("studentIds contains a student not enrolled in this course")
                    .with_details(json!({ "studentId": unknown })));
            }
            ids
        }
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for student_id in &targets {
        upsert_student_month(&tx, &course_id, student_id, &month, day, code)?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true, "updated": targets.len() }))
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct DayTally {
    present: usize,
    absent: usize,
    late: usize,
    excused: usize,
}

impl DayTally {
    fn count(day_codes: &str, codes: &AttendanceCodes) -> Self {
        let mut t = Self::default();
        for c in day_codes.chars() {
            if c == codes.present {
                t.present += 1;
            } else if c == codes.absent {
                t.absent += 1;
            } else if c == codes.late {
                t.late += 1;
            } else if c == codes.excused {
                t.excused += 1;
            }
        }
        t
    }

    /// Late counts as attended; excused days are left out of the base.
    fn rate(&self) -> Option<f64> {
        let base = self.present + self.absent + self.late;
        if base == 0 {
            None
        } else {
            Some(((self.present + self.late) as f64 / base as f64 * 1000.0).round() / 1000.0)
        }
    }
}

fn attendance_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let month = parse_month_key(&required_str(params, "month")?)?;
    require_course(conn, &course_id)?;
    let students = enrolled_students(conn, &course_id)?;
    let by_student = month_rows(conn, &course_id, &month)?;
    let codes = attendance_codes(conn);

    let mut overall = DayTally::default();
    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let t = by_student
                .get(&s.id)
                .map(|dc| DayTally::count(dc, &codes))
                .unwrap_or_default();
            overall.present += t.present;
            overall.absent += t.absent;
            overall.late += t.late;
            overall.excused += t.excused;
            json!({
                "studentId": s.id,
                "name": s.name,
                "present": t.present,
                "absent": t.absent,
                "late": t.late,
                "excused": t.excused,
                "rate": t.rate(),
            })
        })
        .collect();
    Ok(json!({
        "courseId": course_id,
        "month": month.key,
        "students": rows,
        "overall": {
            "present": overall.present,
            "absent": overall.absent,
            "late": overall.late,
            "excused": overall.excused,
            "rate": overall.rate(),
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "attendance.monthOpen" => attendance_month_open,
        "attendance.setStudentDay" => attendance_set_student_day,
        "attendance.bulkStampDay" => attendance_bulk_stamp_day,
        "attendance.summary" => attendance_summary,
        _ => return None,
    };
    Some(with_db(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> AttendanceCodes {
        AttendanceCodes {
            present: 'P',
            absent: 'A',
            late: 'L',
            excused: 'E',
        }
    }

    #[test]
    fn month_key_knows_month_lengths() {
        assert_eq!(parse_month_key("2024-02").map(|m| m.days).ok(), Some(29));
        assert_eq!(parse_month_key("2023-02").map(|m| m.days).ok(), Some(28));
        assert_eq!(parse_month_key("2026-12").map(|m| m.days).ok(), Some(31));
        assert_eq!(
            parse_month_key(" 2026-4 ").map(|m| m.key).ok(),
            Some("2026-04".to_string())
        );
        assert!(parse_month_key("09").is_err());
        assert!(parse_month_key("2026-13").is_err());
    }

    #[test]
    fn day_codes_pad_truncate_and_patch() {
        assert_eq!(normalize_day_codes("PA", 4), "PA  ");
        assert_eq!(normalize_day_codes("PAPAP", 3), "PAP");
        assert_eq!(patch_day_code("", 5, 3, Some('L')), "  L  ");
        assert_eq!(patch_day_code("PPPPP", 5, 1, None), " PPPP");
        assert_eq!(patch_day_code("PP", 3, 9, Some('A')), "PP ");
    }

    #[test]
    fn code_must_be_configured() {
        let c = codes();
        assert_eq!(parse_code(&json!({ "code": "p" }), &c).ok(), Some(Some('P')));
        assert_eq!(parse_code(&json!({ "code": null }), &c).ok(), Some(None));
        assert_eq!(parse_code(&json!({ "code": " " }), &c).ok(), Some(None));
        assert!(parse_code(&json!({ "code": "X" }), &c).is_err());
        assert!(parse_code(&json!({ "code": "PA" }), &c).is_err());
    }

    #[test]
    fn tally_and_rate() {
        let t = DayTally::count("PPLA E  ", &codes());
        assert_eq!(
            t,
            DayTally {
                present: 2,
                absent: 1,
                late: 1,
                excused: 1
            }
        );
        assert_eq!(t.rate(), Some(0.75));
        assert_eq!(DayTally::default().rate(), None);
    }
}
