//! Marks-entry session: the class/exam being edited, its subject columns,
//! student rows and the raw marks typed so far. Created by `session.open`,
//! dropped by `session.close` or when another session replaces it. Nothing
//! derived is cached here; every read recomputes from the raw marks.

use crate::grading::{
    aggregate_student, compute_subject_result, lenient_f64, round_off_2_decimal, CalcError,
    GradingPolicy, StudentAggregate, SubjectResult, SubjectScore,
};
use crate::store::{ExamKey, SavePayload, StoredMark, SubjectMarks, DEFAULT_THEORY_TOTAL};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

fn default_theory_max() -> f64 {
    DEFAULT_THEORY_TOTAL
}

fn default_credit_hour() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDef {
    pub name: String,
    #[serde(default = "default_theory_max", deserialize_with = "lenient_f64")]
    pub theory_max: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub practical_max: f64,
    #[serde(default = "default_credit_hour", deserialize_with = "lenient_f64")]
    pub credit_hour: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarkEntry {
    pub theory: Option<f64>,
    pub practical: Option<f64>,
}

/// Class-wide figures. `passPercentage` is the share of promoted students.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub students: usize,
    pub promoted: usize,
    pub not_promoted: usize,
    pub average_percentage: f64,
    #[serde(rename = "averageGPA")]
    pub average_gpa: f64,
    #[serde(rename = "highestGPA")]
    pub highest_gpa: f64,
    #[serde(rename = "lowestGPA")]
    pub lowest_gpa: f64,
    pub pass_percentage: f64,
}

/// One subject column across the class. Marks are theory plus practical.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPerformance {
    pub subject_name: String,
    pub students: usize,
    pub passed_students: usize,
    pub failed_students: usize,
    pub average_marks: f64,
    pub highest_marks: f64,
    pub lowest_marks: f64,
    pub pass_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    #[serde(flatten)]
    pub aggregate: StudentAggregate,
    pub class_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub students: Vec<RankedStudent>,
    pub summary: ClassSummary,
    pub subjects: Vec<SubjectPerformance>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / (values.len() as f64)
    }
}

fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_off_2_decimal(100.0 * (part as f64) / (whole as f64))
    }
}

fn ranks_above(a: &StudentAggregate, b: &StudentAggregate) -> bool {
    a.overall_gpa > b.overall_gpa
        || (a.overall_gpa == b.overall_gpa && a.overall_percentage > b.overall_percentage)
}

/// Competition ranking by GPA, then overall percentage: equal students share
/// a position and the next one skips ahead.
pub fn class_positions(aggregates: &[StudentAggregate]) -> Vec<usize> {
    aggregates
        .iter()
        .map(|a| 1 + aggregates.iter().filter(|b| ranks_above(b, a)).count())
        .collect()
}

#[derive(Debug)]
pub struct MarksSession {
    pub exam: ExamKey,
    pub policy: GradingPolicy,
    subjects: Vec<SubjectDef>,
    students: Vec<StudentDef>,
    marks: HashMap<(String, String), MarkEntry>,
}

impl MarksSession {
    pub fn open(
        exam: ExamKey,
        policy: GradingPolicy,
        subjects: Vec<SubjectDef>,
        students: Vec<StudentDef>,
    ) -> Result<Self, CalcError> {
        if !exam.is_complete() {
            return Err(CalcError::new(
                "bad_params",
                "className, examType and academicYear are required",
            ));
        }
        if subjects.is_empty() {
            return Err(CalcError::new("bad_params", "at least one subject is required"));
        }

        let mut seen = HashSet::new();
        for s in &subjects {
            let name = s.name.trim();
            if name.is_empty() || !seen.insert(name.to_string()) {
                return Err(CalcError::new("bad_params", "subject names must be unique and non-empty")
                    .with_details(json!({ "subject": s.name })));
            }
        }
        let mut seen = HashSet::new();
        for s in &students {
            let id = s.id.trim();
            if id.is_empty() || !seen.insert(id.to_string()) {
                return Err(CalcError::new("bad_params", "student ids must be unique and non-empty")
                    .with_details(json!({ "studentId": s.id })));
            }
        }

        Ok(Self {
            exam,
            policy,
            subjects,
            students,
            marks: HashMap::new(),
        })
    }

    pub fn subjects(&self) -> &[SubjectDef] {
        &self.subjects
    }

    pub fn students(&self) -> &[StudentDef] {
        &self.students
    }

    pub fn has_student(&self, student_id: &str) -> bool {
        self.students.iter().any(|s| s.id == student_id)
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectDef> {
        self.subjects.iter().find(|s| s.name == name)
    }

    /// Seeds raw marks saved earlier for this exam. Rows for students or
    /// subjects outside the session are skipped. Returns how many were used.
    pub fn preload<I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = StoredMark>,
    {
        let mut used = 0;
        for row in rows {
            if !self.has_student(&row.student_id) || self.subject(&row.subject).is_none() {
                continue;
            }
            self.marks.insert(
                (row.student_id, row.subject),
                MarkEntry {
                    theory: row.theory,
                    practical: row.practical,
                },
            );
            used += 1;
        }
        used
    }

    pub fn mark(&self, student_id: &str, subject: &str) -> MarkEntry {
        self.marks
            .get(&(student_id.to_string(), subject.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Replaces one cell and returns the recomputed subject result.
    pub fn set_mark(
        &mut self,
        student_id: &str,
        subject: &str,
        entry: MarkEntry,
    ) -> Result<SubjectResult, CalcError> {
        if !self.has_student(student_id) {
            return Err(CalcError::new("not_found", "student not in session")
                .with_details(json!({ "studentId": student_id })));
        }
        let Some(def) = self.subject(subject).cloned() else {
            return Err(CalcError::new("not_found", "subject not in session")
                .with_details(json!({ "subject": subject })));
        };
        self.marks
            .insert((student_id.to_string(), subject.to_string()), entry);
        Ok(compute_subject_result(
            &self.score_for(student_id, &def),
            &self.policy,
        ))
    }

    fn score_for(&self, student_id: &str, def: &SubjectDef) -> SubjectScore {
        let entry = self.mark(student_id, &def.name);
        SubjectScore {
            subject_name: def.name.clone(),
            theory_obtained: entry.theory.unwrap_or(0.0),
            theory_max: def.theory_max,
            practical_obtained: entry.practical.unwrap_or(0.0),
            practical_max: def.practical_max,
            credit_hour: def.credit_hour,
        }
    }

    /// Every subject column counts; blank cells are graded as 0.
    pub fn student_aggregate(&self, student_id: &str) -> Option<StudentAggregate> {
        if !self.has_student(student_id) {
            return None;
        }
        let results: Vec<SubjectResult> = self
            .subjects
            .iter()
            .map(|def| compute_subject_result(&self.score_for(student_id, def), &self.policy))
            .collect();
        Some(aggregate_student(student_id, results, &self.policy))
    }

    pub fn all_aggregates(&self) -> Vec<StudentAggregate> {
        self.students
            .iter()
            .filter_map(|s| self.student_aggregate(&s.id))
            .collect()
    }

    /// Rows in session order, each with its class position, plus class and
    /// per-subject figures.
    pub fn summary(&self) -> ClassReport {
        let aggregates = self.all_aggregates();
        let promoted = aggregates.iter().filter(|a| a.promoted).count();
        let percentages: Vec<f64> = aggregates.iter().map(|a| a.overall_percentage).collect();
        let gpas: Vec<f64> = aggregates.iter().map(|a| a.overall_gpa).collect();
        let summary = ClassSummary {
            students: aggregates.len(),
            promoted,
            not_promoted: aggregates.len() - promoted,
            average_percentage: round_off_2_decimal(mean(&percentages)),
            average_gpa: round_off_2_decimal(mean(&gpas)),
            highest_gpa: gpas.iter().copied().reduce(f64::max).unwrap_or(0.0),
            lowest_gpa: gpas.iter().copied().reduce(f64::min).unwrap_or(0.0),
            pass_percentage: share(promoted, aggregates.len()),
        };

        let subjects = self
            .subjects
            .iter()
            .map(|def| {
                let results: Vec<&SubjectResult> = aggregates
                    .iter()
                    .filter_map(|a| a.subjects.iter().find(|r| r.subject_name == def.name))
                    .collect();
                let marks: Vec<f64> = results.iter().map(|r| r.total_obtained).collect();
                let passed = results.iter().filter(|r| r.passed).count();
                SubjectPerformance {
                    subject_name: def.name.clone(),
                    students: results.len(),
                    passed_students: passed,
                    failed_students: results.len() - passed,
                    average_marks: round_off_2_decimal(mean(&marks)),
                    highest_marks: marks.iter().copied().reduce(f64::max).unwrap_or(0.0),
                    lowest_marks: marks.iter().copied().reduce(f64::min).unwrap_or(0.0),
                    pass_percentage: share(passed, results.len()),
                }
            })
            .collect();

        let positions = class_positions(&aggregates);
        let students = aggregates
            .into_iter()
            .zip(positions)
            .map(|(aggregate, class_position)| RankedStudent {
                aggregate,
                class_position,
            })
            .collect();

        ClassReport {
            students,
            summary,
            subjects,
        }
    }

    /// Save request for the given cells of one student, in the store's shape.
    pub fn save_payload(&self, student_id: &str, subjects: &[&str]) -> Option<SavePayload> {
        if !self.has_student(student_id) {
            return None;
        }
        let mut marks = BTreeMap::new();
        for name in subjects {
            let Some(def) = self.subject(name) else {
                continue;
            };
            let entry = self.mark(student_id, name);
            marks.insert(
                def.name.clone(),
                SubjectMarks {
                    theory: entry.theory.map(|v| json!(v)),
                    practical: entry.practical.map(|v| json!(v)),
                    theory_total: Some(json!(def.theory_max)),
                    practical_total: Some(json!(def.practical_max)),
                    credit_hour: Some(json!(def.credit_hour)),
                },
            );
        }
        if marks.is_empty() {
            return None;
        }
        Some(SavePayload {
            student_id: student_id.to_string(),
            class_name: self.exam.class_name.clone(),
            exam_type: self.exam.exam_type.clone(),
            academic_year: self.exam.academic_year.clone(),
            marks,
        })
    }
}
