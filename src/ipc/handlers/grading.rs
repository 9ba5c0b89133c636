use crate::db;
use crate::grading::{
    aggregate_student, compute_subject_result, grade_from_percentage, lenient_value, parse_policy,
    GradeScale, GradingPolicy, SubjectScore, POLICY_PRESETS,
};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{resolve_policy, POLICY_SETTING_KEY};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_from_percentage(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("percentage") else {
        return err(&req.id, "bad_params", "missing percentage", None);
    };
    // Lenient by contract: junk grades as 0.
    let percentage = lenient_value(raw).unwrap_or(0.0);

    let scale = match req.params.get("scale") {
        Some(v) if !v.is_null() => match serde_json::from_value::<GradeScale>(v.clone()) {
            Ok(s) => s,
            Err(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    "scale must be eightBand or sevenBand",
                    Some(json!({ "scale": v })),
                )
            }
        },
        _ => match resolve_policy(state, req) {
            Ok(p) => p.scale,
            Err(e) => return calc_err(&req.id, e),
        },
    };

    let grade = grade_from_percentage(percentage, scale);
    ok(
        &req.id,
        json!({
            "percentage": percentage,
            "scale": scale,
            "grade": grade,
            "gradePoint": grade.grade_point(),
            "description": grade.description(scale),
        }),
    )
}

fn handle_calculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let percentage = match req.params.get("percentage").and_then(lenient_value) {
        Some(v) if (0.0..=100.0).contains(&v) => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "Percentage must be between 0 and 100",
                Some(json!({ "percentage": v })),
            )
        }
        None => return err(&req.id, "bad_params", "Invalid percentage value", None),
    };
    let policy = match resolve_policy(state, req) {
        Ok(p) => p,
        Err(e) => return calc_err(&req.id, e),
    };

    let result = compute_subject_result(
        &SubjectScore {
            subject_name: String::new(),
            theory_obtained: percentage,
            theory_max: 100.0,
            practical_obtained: 0.0,
            practical_max: 0.0,
            credit_hour: 1.0,
        },
        &policy,
    );
    ok(
        &req.id,
        json!({
            "percentage": percentage,
            "grade": result.grade,
            "gradePoint": result.grade_point,
            "description": result.grade.description(policy.scale),
            "passed": result.passed,
            "status": result.status,
        }),
    )
}

fn handle_subject_result(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("score") else {
        return err(&req.id, "bad_params", "missing score", None);
    };
    let score: SubjectScore = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid score: {}", e), None),
    };
    let policy = match resolve_policy(state, req) {
        Ok(p) => p,
        Err(e) => return calc_err(&req.id, e),
    };
    let result = compute_subject_result(&score, &policy);
    ok(&req.id, json!(result))
}

fn handle_aggregate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let scores: Vec<SubjectScore> = match req.params.get("subjects") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("invalid subjects: {}", e),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing subjects", None),
    };
    let policy = match resolve_policy(state, req) {
        Ok(p) => p,
        Err(e) => return calc_err(&req.id, e),
    };

    let results = scores
        .iter()
        .map(|s| compute_subject_result(s, &policy))
        .collect();
    ok(&req.id, json!(aggregate_student(student_id, results, &policy)))
}

fn handle_policy_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stored = match db::settings_get_json(conn, POLICY_SETTING_KEY) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match parse_policy(stored.as_ref()) {
        Ok(p) => ok(&req.id, json!({ "policy": p })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_policy_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let policy = match parse_policy(req.params.get("policy")) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing policy", None),
        Err(e) => return calc_err(&req.id, e),
    };
    // Presets are stored expanded so the workspace keeps its rules.
    if let Err(e) = db::settings_set_json(conn, POLICY_SETTING_KEY, &json!(policy)) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "policy": policy }))
}

fn handle_policy_presets(req: &Request) -> serde_json::Value {
    let presets: Vec<serde_json::Value> = POLICY_PRESETS
        .iter()
        .filter_map(|name| {
            GradingPolicy::preset(name).map(|p| json!({ "name": name, "policy": p }))
        })
        .collect();
    ok(&req.id, json!({ "presets": presets }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grade.fromPercentage" => Some(handle_from_percentage(state, req)),
        "grade.calculate" => Some(handle_calculate(state, req)),
        "grade.subjectResult" => Some(handle_subject_result(state, req)),
        "grade.aggregate" => Some(handle_aggregate(state, req)),
        "grade.policy.get" => Some(handle_policy_get(state, req)),
        "grade.policy.set" => Some(handle_policy_set(state, req)),
        "grade.policy.presets" => Some(handle_policy_presets(req)),
        _ => None,
    }
}
