use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::scoring_defaults;
use crate::ipc::helpers::{
    new_id, now_ts, object, opt_str, patch_required_str, patch_str, require_row, required_f64,
    required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{max_total, normalize_actions, Action, ActionScores, ScoreSheet};
use crate::validate::Validator;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LessonPlan {
    id: String,
    course_id: Option<String>,
    title: String,
    objective: Option<String>,
    warm_up: String,
    gathering: String,
    actions: Vec<Action>,
    max_total: f64,
    created_at: String,
    updated_at: String,
}

const PLAN_COLUMNS: &str =
    "id, course_id, title, objective, warm_up, gathering, actions_json, created_at, updated_at";

impl LessonPlan {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = r.get(6)?;
        let actions: Vec<Action> = serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: r.get(0)?,
            course_id: r.get(1)?,
            title: r.get(2)?,
            objective: r.get(3)?,
            warm_up: r.get(4)?,
            gathering: r.get(5)?,
            max_total: max_total(&actions),
            actions,
            created_at: r.get(7)?,
            updated_at: r.get(8)?,
        })
    }
}

fn load_plan(conn: &Connection, plan_id: &str) -> Result<LessonPlan, HandlerErr> {
    let sql = format!("SELECT {} FROM lesson_plans WHERE id = ?", PLAN_COLUMNS);
    conn.query_row(&sql, [plan_id], LessonPlan::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("lesson plan not found"))
}

fn parse_actions(value: &Value) -> Result<Vec<Action>, HandlerErr> {
    serde_json::from_value(value.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid actions: {}", e)))
}

fn checked_actions(conn: &Connection, mut actions: Vec<Action>) -> Result<Vec<Action>, HandlerErr> {
    let defaults = scoring_defaults(conn);
    normalize_actions(&mut actions, defaults.default_max_step_score)?;
    Ok(actions)
}

fn write_plan(conn: &Connection, plan: &LessonPlan) -> Result<(), HandlerErr> {
    let mut v = Validator::new();
    v.required("title", &plan.title);
    v.finish()?;
    if let Some(cid) = plan.course_id.as_deref() {
        require_row(conn, "courses", cid, "course")?;
    }
    let actions_json = serde_json::to_string(&plan.actions)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    conn.execute(
        "INSERT INTO lesson_plans(
            id, course_id, title, objective, warm_up, gathering, actions_json, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            course_id = excluded.course_id,
            title = excluded.title,
            objective = excluded.objective,
            warm_up = excluded.warm_up,
            gathering = excluded.gathering,
            actions_json = excluded.actions_json,
            updated_at = excluded.updated_at",
        rusqlite::params![
            plan.id,
            plan.course_id,
            plan.title,
            plan.objective,
            plan.warm_up,
            plan.gathering,
            actions_json,
            plan.created_at,
            plan.updated_at,
        ],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "lesson_plans"))?;
    Ok(())
}

fn plans_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = Value::Object(object(params, "plan")?.clone());
    let actions = match input.get("actions") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => checked_actions(conn, parse_actions(v)?)?,
    };
    let ts = now_ts();
    let plan = LessonPlan {
        id: new_id(),
        course_id: opt_str(&input, "courseId")?,
        title: opt_str(&input, "title")?.unwrap_or_default(),
        objective: opt_str(&input, "objective")?,
        warm_up: opt_str(&input, "warmUp")?.unwrap_or_default(),
        gathering: opt_str(&input, "gathering")?.unwrap_or_default(),
        max_total: max_total(&actions),
        actions,
        created_at: ts.clone(),
        updated_at: ts,
    };
    write_plan(conn, &plan)?;
    Ok(json!({ "planId": plan.id, "plan": plan }))
}

fn plans_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let current = load_plan(conn, &plan_id)?;
    let actions = match patch.get("actions") {
        None => current.actions,
        Some(Value::Null) => Vec::new(),
        Some(v) => checked_actions(conn, parse_actions(v)?)?,
    };
    let plan = LessonPlan {
        course_id: patch_str(&patch, "courseId", current.course_id)?,
        title: patch_required_str(&patch, "title", current.title)?,
        objective: patch_str(&patch, "objective", current.objective)?,
        warm_up: patch_required_str(&patch, "warmUp", current.warm_up)?,
        gathering: patch_required_str(&patch, "gathering", current.gathering)?,
        max_total: max_total(&actions),
        actions,
        updated_at: now_ts(),
        ..current
    };
    write_plan(conn, &plan)?;
    Ok(json!({ "plan": plan }))
}

fn plans_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = opt_str(params, "courseId")?;
    let sql = format!(
        "SELECT {} FROM lesson_plans
         WHERE (?1 IS NULL OR course_id = ?1)
         ORDER BY created_at DESC, title",
        PLAN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let plans = stmt
        .query_map([course_id.as_deref()], LessonPlan::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let summaries: Vec<Value> = plans
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "courseId": p.course_id,
                "title": p.title,
                "actionCount": p.actions.len(),
                "maxTotal": p.max_total,
                "createdAt": p.created_at,
                "updatedAt": p.updated_at,
            })
        })
        .collect();
    Ok(json!({ "plans": summaries }))
}

fn plans_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    Ok(json!({ "plan": load_plan(conn, &plan_id)? }))
}

fn plans_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    require_row(conn, "lesson_plans", &plan_id, "lesson plan")?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM lesson_plan_scores WHERE plan_id = ?", [&plan_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "lesson_plan_scores"))?;
    tx.execute("DELETE FROM lesson_plans WHERE id = ?", [&plan_id])
        .map_err(HandlerErr::db_write("db_delete_failed", "lesson_plans"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

/// A student's stored sheet for a plan, reshaped onto the plan's current actions.
struct StoredSheet {
    sheet: ScoreSheet,
    submitted: bool,
    submitted_at: Option<String>,
}

fn load_sheet(
    conn: &Connection,
    plan: &LessonPlan,
    student_id: &str,
) -> Result<StoredSheet, HandlerErr> {
    let row: Option<(String, i64, Option<String>)> = conn
        .query_row(
            "SELECT scores_json, submitted, submitted_at
             FROM lesson_plan_scores
             WHERE plan_id = ? AND student_id = ?",
            (&plan.id, student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((raw, submitted, submitted_at)) = row else {
        return Ok(StoredSheet {
            sheet: ScoreSheet::blank(&plan.actions),
            submitted: false,
            submitted_at: None,
        });
    };
    let scores: Vec<ActionScores> = serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(plan_id = %plan.id, student_id, error = %e, "resetting unreadable score sheet");
        Vec::new()
    });
    Ok(StoredSheet {
        sheet: ScoreSheet { scores }.aligned(&plan.actions),
        submitted: submitted != 0,
        submitted_at,
    })
}

fn save_sheet(
    conn: &Connection,
    plan_id: &str,
    student_id: &str,
    stored: &StoredSheet,
) -> Result<(), HandlerErr> {
    let scores_json = serde_json::to_string(&stored.sheet.scores)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    conn.execute(
        "INSERT INTO lesson_plan_scores(plan_id, student_id, scores_json, submitted, submitted_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(plan_id, student_id) DO UPDATE SET
            scores_json = excluded.scores_json,
            submitted = excluded.submitted,
            submitted_at = excluded.submitted_at,
            updated_at = excluded.updated_at",
        rusqlite::params![
            plan_id,
            student_id,
            scores_json,
            stored.submitted as i64,
            stored.submitted_at,
            now_ts(),
        ],
    )
    .map_err(HandlerErr::db_write("db_update_failed", "lesson_plan_scores"))?;
    Ok(())
}

fn scoring_view(plan: &LessonPlan, student_id: &str, stored: &StoredSheet) -> Value {
    json!({
        "plan": plan,
        "studentId": student_id,
        "scores": stored.sheet.scores,
        "total": stored.sheet.total(),
        "maxTotal": plan.max_total,
        "unscored": stored.sheet.unscored(&plan.actions).len(),
        "submitted": stored.submitted,
        "submittedAt": stored.submitted_at,
    })
}

fn plan_and_student(conn: &Connection, params: &Value) -> Result<(LessonPlan, String), HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let student_id = required_str(params, "studentId")?;
    let plan = load_plan(conn, &plan_id)?;
    require_row(conn, "students", &student_id, "student")?;
    Ok((plan, student_id))
}

fn scoring_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (plan, student_id) = plan_and_student(conn, params)?;
    let stored = load_sheet(conn, &plan, &student_id)?;
    Ok(scoring_view(&plan, &student_id, &stored))
}

fn scoring_set_score(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (plan, student_id) = plan_and_student(conn, params)?;
    let action_index = params
        .get("actionIndex")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing/invalid actionIndex"))?
        as usize;
    let step_key = required_str(params, "stepKey")?;
    let score = required_f64(params, "score")?;
    let comment = opt_str(params, "comment")?;

    let mut stored = load_sheet(conn, &plan, &student_id)?;
    if stored.submitted {
        return Err(HandlerErr::conflict("score sheet already submitted"));
    }
    stored
        .sheet
        .set_score(&plan.actions, action_index, &step_key, score, comment)?;
    save_sheet(conn, &plan.id, &student_id, &stored)?;
    Ok(scoring_view(&plan, &student_id, &stored))
}

fn scoring_submit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (plan, student_id) = plan_and_student(conn, params)?;
    let mut stored = load_sheet(conn, &plan, &student_id)?;
    if !scoring_defaults(conn).allow_partial_submit {
        stored.sheet.check_complete(&plan.actions)?;
    }
    if !stored.submitted {
        stored.submitted = true;
        stored.submitted_at = Some(now_ts());
        save_sheet(conn, &plan.id, &student_id, &stored)?;
    }
    tracing::info!(plan_id = %plan.id, student_id = %student_id, total = stored.sheet.total(), "score sheet submitted");
    Ok(json!({
        "submitted": true,
        "submittedAt": stored.submitted_at,
        "total": stored.sheet.total(),
        "maxTotal": plan.max_total,
    }))
}

fn scoring_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let plan = load_plan(conn, &plan_id)?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name
         FROM lesson_plan_scores sc
         JOIN students s ON s.id = sc.student_id
         WHERE sc.plan_id = ?
         ORDER BY s.sort_order, s.id",
    )?;
    let students = stmt
        .query_map([&plan_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut rows = Vec::with_capacity(students.len());
    for (student_id, name) in students {
        let stored = load_sheet(conn, &plan, &student_id)?;
        rows.push(json!({
            "studentId": student_id,
            "name": name,
            "total": stored.sheet.total(),
            "unscored": stored.sheet.unscored(&plan.actions).len(),
            "submitted": stored.submitted,
        }));
    }
    Ok(json!({ "planId": plan.id, "maxTotal": plan.max_total, "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "lessonPlans.create" => plans_create,
        "lessonPlans.update" => plans_update,
        "lessonPlans.list" => plans_list,
        "lessonPlans.get" => plans_get,
        "lessonPlans.delete" => plans_delete,
        "scoring.open" => scoring_open,
        "scoring.setScore" => scoring_set_score,
        "scoring.submit" => scoring_submit,
        "scoring.list" => scoring_list,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
