use serde_json::json;

use super::types::{AppState, Request};
use crate::db;
use crate::grading::{parse_policy, CalcError, GradingPolicy, POLICY_PRESETS};
use crate::store::ExamKey;

pub const POLICY_SETTING_KEY: &str = "grading.policy";

pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn exam_from_params(req: &Request) -> Result<ExamKey, CalcError> {
    let get = |k: &str| {
        param_str(req, k)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let exam = ExamKey {
        class_name: get("className"),
        exam_type: get("examType"),
        academic_year: get("academicYear"),
    };
    if !exam.is_complete() {
        return Err(CalcError::new(
            "bad_params",
            "missing className, examType or academicYear",
        ));
    }
    Ok(exam)
}

/// The request's `policy` wins; otherwise the workspace default. Never a
/// built-in fallback.
pub fn resolve_policy(state: &AppState, req: &Request) -> Result<GradingPolicy, CalcError> {
    if let Some(p) = parse_policy(req.params.get("policy"))? {
        return Ok(p);
    }
    if let Some(conn) = state.db.as_ref() {
        let stored = db::settings_get_json(conn, POLICY_SETTING_KEY)
            .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        if let Some(p) = parse_policy(stored.as_ref())? {
            return Ok(p);
        }
    }
    Err(CalcError::new(
        "policy_required",
        "no grading policy in the request and none set for the workspace",
    )
    .with_details(json!({ "presets": POLICY_PRESETS })))
}
