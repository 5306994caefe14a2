use crate::catalog::SortKey;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::WeekStart;
use crate::validate::parse_time;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Mall,
    Schedule,
    Attendance,
    Scoring,
}

impl SetupSection {
    const ALL: [SetupSection; 4] = [Self::Mall, Self::Schedule, Self::Attendance, Self::Scoring];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "mall" => Some(Self::Mall),
            "schedule" => Some(Self::Schedule),
            "attendance" => Some(Self::Attendance),
            "scoring" => Some(Self::Scoring),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Mall => "mall",
            Self::Schedule => "schedule",
            Self::Attendance => "attendance",
            Self::Scoring => "scoring",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Mall => "setup.mall",
            Self::Schedule => "setup.schedule",
            Self::Attendance => "setup.attendance",
            Self::Scoring => "setup.scoring",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Mall => json!({
            "currency": "CNY",
            "defaultSort": "featured",
            "pageSize": 20,
            "lowStockThreshold": 5
        }),
        SetupSection::Schedule => json!({
            "weekStartsOn": "monday",
            "dayStartTime": "08:00",
            "dayEndTime": "21:00",
            "slotMinutes": 60
        }),
        SetupSection::Attendance => json!({
            "presentCode": "P",
            "absentCode": "A",
            "lateCode": "L",
            "excusedCode": "E"
        }),
        SetupSection::Scoring => json!({
            "defaultMaxStepScore": 10,
            "allowPartialSubmit": false
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Mall => match k.as_str() {
                "currency" => {
                    let s = parse_string_max(v, k, 8)?.to_ascii_uppercase();
                    if s.is_empty() {
                        return Err("currency must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultSort" => {
                    let s = parse_string_max(v, k, 16)?;
                    let Some(sort) = SortKey::parse(&s) else {
                        return Err(
                            "defaultSort must be one of: featured, price-low, price-high, rating, newest"
                                .into(),
                        );
                    };
                    obj.insert(k.clone(), Value::String(sort.as_str().to_string()));
                }
                "pageSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 100)?));
                }
                "lowStockThreshold" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 1000)?));
                }
                _ => return Err(format!("unknown mall field: {}", k)),
            },
            SetupSection::Schedule => match k.as_str() {
                "weekStartsOn" => {
                    let s = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                    if WeekStart::parse(&s).is_none() {
                        return Err("weekStartsOn must be one of: monday, sunday".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "dayStartTime" | "dayEndTime" => {
                    let s = parse_string_max(v, k, 5)?;
                    if parse_time(&s).is_none() {
                        return Err(format!("{} must be HH:MM", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "slotMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 15, 240)?));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "presentCode" | "absentCode" | "lateCode" | "excusedCode" => {
                    let s = parse_string_max(v, k, 1)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s.to_ascii_uppercase()));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Scoring => match k.as_str() {
                "defaultMaxStepScore" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "allowPartialSubmit" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown scoring field: {}", k)),
            },
        }
    }
    if let SetupSection::Schedule = section {
        let start = obj.get("dayStartTime").and_then(|v| v.as_str()).and_then(parse_time);
        let end = obj.get("dayEndTime").and_then(|v| v.as_str()).and_then(parse_time);
        if let (Some(s), Some(e)) = (start, end) {
            if e <= s {
                return Err("dayEndTime must be after dayStartTime".into());
            }
        }
    }
    if let SetupSection::Attendance = section {
        let mut seen: Vec<&str> = Vec::new();
        for key in ["presentCode", "absentCode", "lateCode", "excusedCode"] {
            let Some(code) = obj.get(key).and_then(|v| v.as_str()) else {
                continue;
            };
            if seen.contains(&code) {
                return Err(format!("attendance codes must be distinct: {} reuses {}", key, code));
            }
            seen.push(code);
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A malformed stored section falls back to defaults as a whole.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring stored setup value");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Best-effort read used by other handlers: a broken section never blocks a request.
fn section_or_default(conn: &Connection, section: SetupSection) -> Value {
    load_section(conn, section).unwrap_or_else(|_| default_section(section))
}

#[derive(Debug, Clone)]
pub struct MallDefaults {
    pub sort: SortKey,
    pub page_size: i64,
    pub low_stock_threshold: i64,
    pub currency: String,
}

pub fn mall_defaults(conn: &Connection) -> MallDefaults {
    let v = section_or_default(conn, SetupSection::Mall);
    MallDefaults {
        sort: v
            .get("defaultSort")
            .and_then(|s| s.as_str())
            .and_then(SortKey::parse)
            .unwrap_or_default(),
        page_size: v.get("pageSize").and_then(|n| n.as_i64()).unwrap_or(20),
        low_stock_threshold: v
            .get("lowStockThreshold")
            .and_then(|n| n.as_i64())
            .unwrap_or(5),
        currency: v
            .get("currency")
            .and_then(|s| s.as_str())
            .unwrap_or("CNY")
            .to_string(),
    }
}

pub fn week_start(conn: &Connection) -> WeekStart {
    section_or_default(conn, SetupSection::Schedule)
        .get("weekStartsOn")
        .and_then(|s| s.as_str())
        .and_then(WeekStart::parse)
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ScoringDefaults {
    pub default_max_step_score: f64,
    pub allow_partial_submit: bool,
}

pub fn scoring_defaults(conn: &Connection) -> ScoringDefaults {
    let v = section_or_default(conn, SetupSection::Scoring);
    ScoringDefaults {
        default_max_step_score: v
            .get("defaultMaxStepScore")
            .and_then(|n| n.as_f64())
            .unwrap_or(10.0),
        allow_partial_submit: v
            .get("allowPartialSubmit")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceCodes {
    pub present: char,
    pub absent: char,
    pub late: char,
    pub excused: char,
}

pub fn attendance_codes(conn: &Connection) -> AttendanceCodes {
    let v = section_or_default(conn, SetupSection::Attendance);
    let code = |key: &str, fallback: char| {
        v.get(key)
            .and_then(|s| s.as_str())
            .and_then(|s| s.chars().next())
            .unwrap_or(fallback)
    };
    AttendanceCodes {
        present: code("presentCode", 'P'),
        absent: code("absentCode", 'A'),
        late: code("lateCode", 'L'),
        excused: code("excusedCode", 'E'),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, json!({ "ok": true, "section": section.name(), "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mall_patch_canonicalizes_and_validates() {
        let mut current = default_section(SetupSection::Mall);
        let patch = json!({ "defaultSort": "PRICE-LOW", "currency": "usd" });
        merge_section_patch(SetupSection::Mall, &mut current, patch.as_object().expect("obj"))
            .expect("merge");
        assert_eq!(current["defaultSort"], "price-low");
        assert_eq!(current["currency"], "USD");

        let bad = json!({ "pageSize": 1000 });
        assert!(merge_section_patch(SetupSection::Mall, &mut current, bad.as_object().expect("obj")).is_err());
    }

    #[test]
    fn schedule_day_window_must_be_ordered() {
        let mut current = default_section(SetupSection::Schedule);
        let patch = json!({ "dayStartTime": "22:00" });
        assert!(merge_section_patch(SetupSection::Schedule, &mut current, patch.as_object().expect("obj")).is_err());
    }

    #[test]
    fn attendance_codes_must_differ() {
        let mut current = default_section(SetupSection::Attendance);
        let clash = json!({ "absentCode": "p" });
        let e = merge_section_patch(SetupSection::Attendance, &mut current, clash.as_object().expect("obj"))
            .expect_err("duplicate code");
        assert!(e.contains("distinct"));

        let mut current = default_section(SetupSection::Attendance);
        let swap = json!({ "presentCode": "Y", "absentCode": "N" });
        merge_section_patch(SetupSection::Attendance, &mut current, swap.as_object().expect("obj"))
            .expect("merge");
        assert_eq!(current["presentCode"], "Y");
        assert_eq!(current["absentCode"], "N");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut current = default_section(SetupSection::Scoring);
        let patch = json!({ "bogus": 1 });
        let e = merge_section_patch(SetupSection::Scoring, &mut current, patch.as_object().expect("obj"))
            .expect_err("unknown");
        assert!(e.contains("unknown scoring field"));
    }
}
