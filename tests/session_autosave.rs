mod test_support;

use serde_json::json;
use std::time::Duration;
use test_support::{
    f, request, request_err, request_ok, s, select_workspace, spawn_sidecar,
    spawn_sidecar_with_env, temp_dir,
};

fn exam() -> serde_json::Value {
    json!({ "className": "10", "examType": "Final Term", "academicYear": "2024-25" })
}

fn open_params() -> serde_json::Value {
    let mut p = exam();
    p["policy"] = json!("resultCard");
    p["subjects"] = json!([
        { "name": "Math", "theoryMax": 100 },
        { "name": "Science", "theoryMax": 75, "practicalMax": 25, "creditHour": 4 }
    ]);
    p["students"] = json!([
        { "id": "S-001", "name": "Asha" },
        { "id": "S-002", "name": "Bikash" }
    ]);
    p
}

fn list_rows(result: &serde_json::Value) -> Vec<serde_json::Value> {
    result
        .get("marks")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("marks array")
}

#[test]
fn session_recomputes_on_every_edit() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Math", "theory": 90 }),
    );
    assert_eq!(code, "no_session");

    let opened = request_ok(&mut stdin, &mut reader, "2", "session.open", open_params());
    assert_eq!(f(&opened, "preloaded"), 0.0);
    assert_eq!(
        opened.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Math", "theory": "90" }),
    );
    let result = set.get("result").expect("result");
    assert_eq!(s(result, "grade"), "A+");
    assert_eq!(f(result, "gradePoint"), 4.0);
    assert_eq!(
        set.get("autosave").and_then(|a| a.get("scheduled")),
        Some(&json!(false))
    );

    // Science is still blank and grades as NG.
    let student = set.get("student").expect("student aggregate");
    assert_eq!(f(student, "overallGPA"), 2.0);
    assert_eq!(student.get("promoted"), Some(&json!(false)));
    assert_eq!(f(student, "failedSubjects"), 1.0);

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Science", "theory": 50, "practical": 20 }),
    );
    let result = set.get("result").expect("result");
    assert_eq!(f(result, "percentage"), 70.0);
    assert_eq!(s(result, "grade"), "B+");

    // Only the practical changes; theory keeps its value.
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Science", "practical": 25 }),
    );
    assert_eq!(f(set.get("result").expect("result"), "percentage"), 75.0);

    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.student",
        json!({ "studentId": "S-001" }),
    );
    assert_eq!(f(&agg, "overallGPA"), 3.6);
    assert_eq!(agg.get("promoted"), Some(&json!(true)));

    let summary = request_ok(&mut stdin, &mut reader, "7", "session.summary", json!({}));
    let totals = summary.get("summary").expect("summary");
    assert_eq!(f(totals, "students"), 2.0);
    assert_eq!(f(totals, "promoted"), 1.0);
    assert_eq!(f(totals, "notPromoted"), 1.0);
    assert_eq!(f(totals, "highestGPA"), 3.6);
    assert_eq!(f(totals, "lowestGPA"), 0.0);
    assert_eq!(f(totals, "passPercentage"), 50.0);
    let rows = summary.get("students").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(s(&rows[0], "studentId"), "S-001");
    assert_eq!(f(&rows[0], "classPosition"), 1.0);
    assert_eq!(f(&rows[1], "classPosition"), 2.0);
    let subjects = summary.get("subjects").and_then(|v| v.as_array()).expect("subjects");
    assert_eq!(s(&subjects[0], "subjectName"), "Math");
    assert_eq!(f(&subjects[0], "highestMarks"), 90.0);

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "session.setMark",
        json!({ "studentId": "S-999", "subject": "Math", "theory": 10 }),
    );
    assert_eq!(code, "not_found");
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Art", "theory": 10 }),
    );
    assert_eq!(code, "not_found");

    let closed = request_ok(&mut stdin, &mut reader, "10", "session.close", json!({}));
    assert_eq!(closed.get("closed"), Some(&json!(true)));
    let (code, _) = request_err(&mut stdin, &mut reader, "11", "session.summary", json!({}));
    assert_eq!(code, "no_session");
}

#[test]
fn session_open_rejects_duplicate_subjects() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut params = open_params();
    params["subjects"] = json!([{ "name": "Math" }, { "name": "Math" }]);
    let (code, _) = request_err(&mut stdin, &mut reader, "1", "session.open", params);
    assert_eq!(code, "bad_params");

    let mut params = open_params();
    params["className"] = json!("");
    let (code, _) = request_err(&mut stdin, &mut reader, "2", "session.open", params);
    assert_eq!(code, "bad_params");
}

#[test]
fn autosave_writes_after_the_quiet_period() {
    let workspace = temp_dir("resultsd-autosave-quiet");
    let (_child, mut stdin, mut reader) =
        spawn_sidecar_with_env(&[("RESULTSD_AUTOSAVE_MS", "50")]);
    select_workspace(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", open_params());

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.setMark",
        json!({ "studentId": "S-002", "subject": "Math", "theory": 88 }),
    );
    assert_eq!(
        set.get("autosave").and_then(|a| a.get("scheduled")),
        Some(&json!(true))
    );

    std::thread::sleep(Duration::from_millis(500));

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(f(&health, "pendingSaves"), 0.0);
    let listed = request_ok(&mut stdin, &mut reader, "4", "marks.list", exam());
    let rows = list_rows(&listed);
    assert_eq!(rows.len(), 1);
    assert_eq!(s(&rows[0], "studentId"), "S-002");
    assert_eq!(f(&rows[0], "theory"), 88.0);
    assert_eq!(f(&rows[0], "theoryMax"), 100.0);
}

#[test]
fn repeated_edits_collapse_into_one_save() {
    let workspace = temp_dir("resultsd-autosave-supersede");
    let (_child, mut stdin, mut reader) =
        spawn_sidecar_with_env(&[("RESULTSD_AUTOSAVE_MS", "60000")]);
    select_workspace(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", open_params());

    for (id, theory) in [("2", 40), ("3", 48), ("4", 55)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "session.setMark",
            json!({ "studentId": "S-001", "subject": "Math", "theory": theory }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Science", "theory": 60, "practical": 20 }),
    );

    let health = request_ok(&mut stdin, &mut reader, "6", "health", json!({}));
    assert_eq!(f(&health, "pendingSaves"), 2.0);
    assert_eq!(f(&health, "autosaveMs"), 60000.0);
    let listed = request_ok(&mut stdin, &mut reader, "7", "marks.list", exam());
    assert!(list_rows(&listed).is_empty());

    let flushed = request_ok(&mut stdin, &mut reader, "8", "marks.flush", json!({}));
    assert_eq!(f(&flushed, "saved"), 2.0);
    assert_eq!(f(&flushed, "failed"), 0.0);

    let listed = request_ok(&mut stdin, &mut reader, "9", "marks.list", exam());
    let rows = list_rows(&listed);
    assert_eq!(rows.len(), 2);
    assert_eq!(s(&rows[0], "subject"), "Math");
    assert_eq!(f(&rows[0], "theory"), 55.0);
    assert_eq!(s(&rows[1], "subject"), "Science");
    assert_eq!(f(&rows[1], "practical"), 20.0);
    assert_eq!(f(&rows[1], "theoryMax"), 75.0);
    assert_eq!(f(&rows[1], "practicalMax"), 25.0);
    assert_eq!(f(&rows[1], "creditHour"), 4.0);
}

#[test]
fn out_of_range_cells_are_graded_but_not_saved() {
    let workspace = temp_dir("resultsd-autosave-reject");
    let (_child, mut stdin, mut reader) =
        spawn_sidecar_with_env(&[("RESULTSD_AUTOSAVE_MS", "60000")]);
    select_workspace(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", open_params());

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Math", "theory": 150 }),
    );
    assert_eq!(f(set.get("result").expect("result"), "percentage"), 100.0);

    let flushed = request_ok(&mut stdin, &mut reader, "3", "marks.flush", json!({}));
    assert_eq!(f(&flushed, "saved"), 0.0);
    assert_eq!(f(&flushed, "failed"), 1.0);
    let listed = request_ok(&mut stdin, &mut reader, "4", "marks.list", exam());
    assert!(list_rows(&listed).is_empty());
}

#[test]
fn pending_saves_survive_shutdown_and_preload_on_reopen() {
    let workspace = temp_dir("resultsd-autosave-shutdown");
    let ws = workspace.to_string_lossy().to_string();
    let env = [
        ("RESULTSD_WORKSPACE", ws.as_str()),
        ("RESULTSD_AUTOSAVE_MS", "60000"),
    ];

    let (mut child, mut stdin, mut reader) = spawn_sidecar_with_env(&env);
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(s(&health, "workspacePath"), ws);
    let _ = request_ok(&mut stdin, &mut reader, "2", "session.open", open_params());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Math", "theory": 77 }),
    );
    drop(stdin);
    let status = child.wait().expect("wait for sidecar");
    assert!(status.success());

    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&env);
    let opened = request_ok(&mut stdin, &mut reader, "4", "session.open", open_params());
    assert_eq!(f(&opened, "preloaded"), 1.0);
    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.student",
        json!({ "studentId": "S-001" }),
    );
    let math = agg
        .get("subjects")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("math result");
    assert_eq!(f(&math, "totalObtained"), 77.0);
    assert_eq!(s(&math, "grade"), "B+");
}

#[test]
fn closing_the_session_flushes_pending_edits() {
    let workspace = temp_dir("resultsd-autosave-close");
    let (_child, mut stdin, mut reader) =
        spawn_sidecar_with_env(&[("RESULTSD_AUTOSAVE_MS", "60000")]);
    select_workspace(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", open_params());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.setMark",
        json!({ "studentId": "S-002", "subject": "Science", "theory": 70 }),
    );

    let closed = request_ok(&mut stdin, &mut reader, "3", "session.close", json!({}));
    assert_eq!(
        closed.get("flushed").map(|o| f(o, "saved")),
        Some(1.0)
    );
    let listed = request_ok(&mut stdin, &mut reader, "4", "marks.list", exam());
    assert_eq!(list_rows(&listed).len(), 1);

    let again = request(&mut stdin, &mut reader, "5", "session.close", json!({}));
    assert_eq!(
        again.get("result").and_then(|r| r.get("closed")),
        Some(&json!(false))
    );
}

#[test]
fn switching_workspace_closes_the_session() {
    let first = temp_dir("resultsd-switch-first");
    let second = temp_dir("resultsd-switch-second");
    let (_child, mut stdin, mut reader) =
        spawn_sidecar_with_env(&[("RESULTSD_AUTOSAVE_MS", "60000")]);
    select_workspace(&mut stdin, &mut reader, &first);
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", open_params());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.setMark",
        json!({ "studentId": "S-001", "subject": "Math", "theory": 64 }),
    );

    let switched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": second.to_string_lossy() }),
    );
    assert_eq!(switched.get("sessionClosed"), Some(&json!(true)));

    let (code, _) = request_err(&mut stdin, &mut reader, "4", "session.summary", json!({}));
    assert_eq!(code, "no_session");
    let listed = request_ok(&mut stdin, &mut reader, "5", "marks.list", exam());
    assert!(list_rows(&listed).is_empty());

    // The pending edit went to the workspace it was made in.
    select_workspace(&mut stdin, &mut reader, &first);
    let listed = request_ok(&mut stdin, &mut reader, "6", "marks.list", exam());
    let rows = list_rows(&listed);
    assert_eq!(rows.len(), 1);
    assert_eq!(f(&rows[0], "theory"), 64.0);
}
