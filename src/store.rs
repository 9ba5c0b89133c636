use crate::grading::{lenient_value, SubjectScore};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_THEORY_TOTAL: f64 = 100.0;

/// Class + exam + year: the scope every stored mark belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamKey {
    pub class_name: String,
    pub exam_type: String,
    pub academic_year: String,
}

impl ExamKey {
    pub fn is_complete(&self) -> bool {
        !self.class_name.trim().is_empty()
            && !self.exam_type.trim().is_empty()
            && !self.academic_year.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMark {
    pub student_id: String,
    pub subject: String,
    pub theory: Option<f64>,
    pub practical: Option<f64>,
    pub theory_max: f64,
    pub practical_max: f64,
    pub credit_hour: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StoredMark {
    pub fn to_score(&self) -> SubjectScore {
        SubjectScore {
            subject_name: self.subject.clone(),
            theory_obtained: self.theory.unwrap_or(0.0),
            theory_max: self.theory_max,
            practical_obtained: self.practical.unwrap_or(0.0),
            practical_max: self.practical_max,
            credit_hour: self.credit_hour,
        }
    }
}

pub fn upsert_mark(conn: &Connection, exam: &ExamKey, mark: &StoredMark) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    conn.execute(
        "INSERT INTO marks(id, class_name, exam_type, academic_year, student_id, subject,
                           theory, practical, theory_max, practical_max, credit_hour, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_name, exam_type, academic_year, student_id, subject) DO UPDATE SET
           theory = excluded.theory,
           practical = excluded.practical,
           theory_max = excluded.theory_max,
           practical_max = excluded.practical_max,
           credit_hour = excluded.credit_hour,
           updated_at = excluded.updated_at",
        rusqlite::params![
            id,
            exam.class_name,
            exam.exam_type,
            exam.academic_year,
            mark.student_id,
            mark.subject,
            mark.theory,
            mark.practical,
            mark.theory_max,
            mark.practical_max,
            mark.credit_hour,
            now,
        ],
    )?;
    Ok(())
}

/// Stored marks for one exam, ordered by student then subject name.
pub fn list_marks(
    conn: &Connection,
    exam: &ExamKey,
    student_id: Option<&str>,
) -> anyhow::Result<Vec<StoredMark>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject, theory, practical, theory_max, practical_max, credit_hour, updated_at
         FROM marks
         WHERE class_name = ?1 AND exam_type = ?2 AND academic_year = ?3
           AND (?4 IS NULL OR student_id = ?4)
         ORDER BY student_id, subject",
    )?;
    let rows = stmt
        .query_map(
            (
                &exam.class_name,
                &exam.exam_type,
                &exam.academic_year,
                student_id,
            ),
            |r| {
                Ok(StoredMark {
                    student_id: r.get(0)?,
                    subject: r.get(1)?,
                    theory: r.get(2)?,
                    practical: r.get(3)?,
                    theory_max: r.get(4)?,
                    practical_max: r.get(5)?,
                    credit_hour: r.get(6)?,
                    updated_at: r.get(7)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One subject's entry in a save request. Values stay untyped until
/// validation so a bad cell is reported instead of failing the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectMarks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theory: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practical: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theory_total: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practical_total: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_hour: Option<serde_json::Value>,
}

/// Save request for one student: `{student_id, marks: {subject: {theory,
/// practical}}, ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavePayload {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub exam_type: String,
    #[serde(default)]
    pub academic_year: String,
    #[serde(default)]
    pub marks: BTreeMap<String, SubjectMarks>,
}

impl SavePayload {
    pub fn exam(&self) -> ExamKey {
        ExamKey {
            class_name: self.class_name.clone(),
            exam_type: self.exam_type.clone(),
            academic_year: self.academic_year.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub saved_count: usize,
    pub errors: Vec<String>,
    /// Subjects written, in payload order. Not part of the reply.
    #[serde(skip)]
    pub saved: Vec<String>,
}

impl SaveResponse {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            saved_count: 0,
            errors: Vec::new(),
            saved: Vec::new(),
        }
    }
}

/// Blank cells mean "not entered"; junk is an error.
fn optional_mark(v: Option<&serde_json::Value>) -> Result<Option<f64>, ()> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(other) => lenient_value(other).filter(|x| x.is_finite()).map(Some).ok_or(()),
    }
}

fn resolve_subject(student_id: &str, subject: &str, m: &SubjectMarks) -> Result<StoredMark, String> {
    let invalid = |what: &str| format!("Invalid {} format for {}", what, subject);
    let theory = optional_mark(m.theory.as_ref()).map_err(|_| invalid("theory marks"))?;
    let practical = optional_mark(m.practical.as_ref()).map_err(|_| invalid("practical marks"))?;
    let theory_max = optional_mark(m.theory_total.as_ref())
        .map_err(|_| invalid("theory total"))?
        .unwrap_or(DEFAULT_THEORY_TOTAL);
    let practical_max = optional_mark(m.practical_total.as_ref())
        .map_err(|_| invalid("practical total"))?
        .unwrap_or(0.0);
    let credit_hour = optional_mark(m.credit_hour.as_ref())
        .map_err(|_| invalid("credit hour"))?
        .unwrap_or(1.0);

    if let Some(t) = theory {
        if t < 0.0 || t > theory_max {
            return Err(format!("Invalid theory marks for {}: {}", subject, t));
        }
    }
    if let Some(p) = practical {
        if p < 0.0 || p > practical_max {
            return Err(format!("Invalid practical marks for {}: {}", subject, p));
        }
    }

    Ok(StoredMark {
        student_id: student_id.to_string(),
        subject: subject.to_string(),
        theory,
        practical,
        theory_max,
        practical_max,
        credit_hour,
        updated_at: None,
    })
}

/// Validates and stores every subject in the payload inside one transaction.
/// Rejected subjects are listed in `errors`; the rest are still saved.
pub fn save_payload(conn: &Connection, payload: &SavePayload) -> SaveResponse {
    let exam = payload.exam();
    if payload.student_id.trim().is_empty() || !exam.is_complete() || payload.marks.is_empty() {
        return SaveResponse::failed("Missing required fields");
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return SaveResponse::failed(e.to_string()),
    };

    let mut saved = Vec::new();
    let mut errors = Vec::new();
    for (subject, m) in &payload.marks {
        let mark = match resolve_subject(&payload.student_id, subject, m) {
            Ok(v) => v,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        match upsert_mark(&tx, &exam, &mark) {
            Ok(()) => saved.push(subject.clone()),
            Err(e) => errors.push(format!("Error saving marks for {}: {}", subject, e)),
        }
    }

    if let Err(e) = tx.commit() {
        return SaveResponse::failed(e.to_string());
    }

    SaveResponse {
        success: true,
        error: None,
        saved_count: saved.len(),
        errors,
        saved,
    }
}
