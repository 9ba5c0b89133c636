use crate::autosave::SaveKey;
use crate::grading::lenient_value;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::flush::flush_all;
use crate::ipc::helpers::{exam_from_params, param_str, resolve_policy};
use crate::ipc::types::{AppState, Request};
use crate::session::{MarkEntry, MarksSession, StudentDef, SubjectDef};
use crate::store;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info};

fn parse_list<T: serde::de::DeserializeOwned>(
    req: &Request,
    key: &str,
) -> Result<Vec<T>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid {}: {}", key, e), None))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam = match exam_from_params(req) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    let policy = match resolve_policy(state, req) {
        Ok(p) => p,
        Err(e) => return calc_err(&req.id, e),
    };
    let subjects: Vec<SubjectDef> = match parse_list(req, "subjects") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let students: Vec<StudentDef> = match parse_list(req, "students") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut session = match MarksSession::open(exam, policy, subjects, students) {
        Ok(s) => s,
        Err(e) => return calc_err(&req.id, e),
    };

    // The previous session's pending edits land before the new one reads
    // its stored marks. It stays open if that read fails.
    let flushed = flush_all(state);

    let mut preloaded = 0;
    if let Some(conn) = state.db.as_ref() {
        match store::list_marks(conn, &session.exam, None) {
            Ok(rows) => preloaded = session.preload(rows),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    info!(
        class_name = %session.exam.class_name,
        exam_type = %session.exam.exam_type,
        academic_year = %session.exam.academic_year,
        subjects = session.subjects().len(),
        students = session.students().len(),
        preloaded,
        "session opened"
    );
    let aggregates = session.all_aggregates();
    let result = json!({
        "exam": session.exam,
        "policy": session.policy,
        "preloaded": preloaded,
        "flushed": flushed,
        "students": aggregates,
    });
    state.session = Some(session);
    ok(&req.id, result)
}

fn mark_field(req: &Request, key: &str, current: Option<f64>) -> Option<f64> {
    match req.params.get(key) {
        None => current,
        Some(v) => lenient_value(v),
    }
}

fn handle_set_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let Some(student_id) = param_str(req, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(subject) = param_str(req, "subject") else {
        return err(&req.id, "bad_params", "missing subject", None);
    };

    let current = session.mark(student_id, subject);
    let entry = MarkEntry {
        theory: mark_field(req, "theory", current.theory),
        practical: mark_field(req, "practical", current.practical),
    };
    let result = match session.set_mark(student_id, subject, entry) {
        Ok(r) => r,
        Err(e) => return calc_err(&req.id, e),
    };
    let aggregate = session.student_aggregate(student_id);

    let scheduled = state.db.is_some();
    if scheduled {
        let deadline = state
            .autosave
            .schedule(SaveKey::new(student_id, subject), Instant::now());
        debug!(student_id, subject, in_ms = ?deadline.saturating_duration_since(Instant::now()).as_millis(), "autosave armed");
    }

    ok(
        &req.id,
        json!({
            "result": result,
            "student": aggregate,
            "autosave": {
                "scheduled": scheduled,
                "pending": state.autosave.len(),
            },
        }),
    )
}

fn handle_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let Some(student_id) = param_str(req, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    match session.student_aggregate(student_id) {
        Some(agg) => ok(&req.id, json!(agg)),
        None => err(
            &req.id,
            "not_found",
            "student not in session",
            Some(json!({ "studentId": student_id })),
        ),
    }
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let report = session.summary();
    ok(
        &req.id,
        json!({
            "exam": session.exam,
            "students": report.students,
            "summary": report.summary,
            "subjects": report.subjects,
        }),
    )
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.session.is_none() {
        return ok(&req.id, json!({ "closed": false }));
    }
    let flushed = flush_all(state);
    state.session = None;
    info!(saved = flushed.saved, failed = flushed.failed, "session closed");
    ok(&req.id, json!({ "closed": true, "flushed": flushed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_open(state, req)),
        "session.setMark" => Some(handle_set_mark(state, req)),
        "session.student" => Some(handle_student(state, req)),
        "session.summary" => Some(handle_summary(state, req)),
        "session.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
