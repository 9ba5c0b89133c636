//! Grade engine: marks -> percentage -> grade letter -> grade point, and
//! per-student aggregation.
//!
//! Every function here is pure and total. Malformed numbers (NaN, infinities,
//! negatives) are coerced to 0 before use, division by a zero maximum yields 0,
//! and subject percentages are clamped into `[0, 100]`, so a marks grid can
//! always be rendered while entry is still in progress. Which grading table,
//! pass rule, GPA weighting and promotion rule apply is never assumed: callers
//! hand in a [`GradingPolicy`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Grade point at or above which a subject counts as passed under the
/// theory-share rule, and the usual results-card threshold.
pub const PASS_GRADE_POINT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradeLetter {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "C+")]
    CPlus,
    C,
    D,
    E,
    NG,
}

impl GradeLetter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::CPlus => "C+",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::NG => "NG",
        }
    }

    pub fn grade_point(self) -> f64 {
        match self {
            Self::APlus => 4.0,
            Self::A => 3.6,
            Self::BPlus => 3.2,
            Self::B => 2.8,
            Self::CPlus => 2.4,
            Self::C => 2.0,
            Self::D => 1.6,
            Self::E => 0.8,
            Self::NG => 0.0,
        }
    }

    /// Remark printed next to the grade. The two scales were labelled by
    /// different screens and the wording differs below `B`.
    pub fn description(self, scale: GradeScale) -> &'static str {
        match (scale, self) {
            (_, Self::APlus) => "Outstanding",
            (_, Self::A) => "Excellent",
            (_, Self::BPlus) => "Very Good",
            (_, Self::B) => "Good",
            (GradeScale::SevenBand, Self::CPlus) => "Satisfactory",
            (GradeScale::SevenBand, Self::C) => "Acceptable",
            (GradeScale::SevenBand, Self::D) => "Partially Acceptable",
            (GradeScale::EightBand, Self::CPlus) => "Above Average",
            (GradeScale::EightBand, Self::C) => "Average",
            (GradeScale::EightBand, Self::D) => "Below Average",
            (GradeScale::EightBand, Self::E) => "Insufficient",
            _ => "Not Graded",
        }
    }
}

impl fmt::Display for GradeLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage -> letter tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeScale {
    /// Spreadsheet/admin table: D from 20%, E below.
    EightBand,
    /// Results/marks-entry table: D from 30%, NG below.
    SevenBand,
}

const EIGHT_BAND: [(f64, GradeLetter); 7] = [
    (90.0, GradeLetter::APlus),
    (80.0, GradeLetter::A),
    (70.0, GradeLetter::BPlus),
    (60.0, GradeLetter::B),
    (50.0, GradeLetter::CPlus),
    (40.0, GradeLetter::C),
    (20.0, GradeLetter::D),
];

const SEVEN_BAND: [(f64, GradeLetter); 7] = [
    (90.0, GradeLetter::APlus),
    (80.0, GradeLetter::A),
    (70.0, GradeLetter::BPlus),
    (60.0, GradeLetter::B),
    (50.0, GradeLetter::CPlus),
    (40.0, GradeLetter::C),
    (30.0, GradeLetter::D),
];

const GPA_BANDS: [(f64, GradeLetter); 6] = [
    (3.6, GradeLetter::APlus),
    (3.2, GradeLetter::A),
    (2.8, GradeLetter::BPlus),
    (2.4, GradeLetter::B),
    (2.0, GradeLetter::CPlus),
    (1.6, GradeLetter::C),
];

impl GradeScale {
    fn bands(self) -> &'static [(f64, GradeLetter)] {
        match self {
            Self::EightBand => &EIGHT_BAND,
            Self::SevenBand => &SEVEN_BAND,
        }
    }

    pub fn bottom(self) -> GradeLetter {
        match self {
            Self::EightBand => GradeLetter::E,
            Self::SevenBand => GradeLetter::NG,
        }
    }
}

fn bucket(value: f64, bands: &[(f64, GradeLetter)], bottom: GradeLetter) -> GradeLetter {
    bands
        .iter()
        .find(|(min, _)| value >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(bottom)
}

/// Highest band whose lower bound `percentage` meets, top-down. Any real is
/// accepted; NaN falls through to the bottom letter.
pub fn grade_from_percentage(percentage: f64, scale: GradeScale) -> GradeLetter {
    bucket(percentage, scale.bands(), scale.bottom())
}

/// Overall grade from an (already rounded) GPA. Shared by both scales.
pub fn grade_from_gpa(gpa: f64) -> GradeLetter {
    bucket(gpa, &GPA_BANDS, GradeLetter::NG)
}

pub fn performance_label(gpa: f64) -> &'static str {
    if gpa >= 3.6 {
        "Excellent"
    } else if gpa >= 3.0 {
        "Good"
    } else if gpa >= 2.0 {
        "Satisfactory"
    } else {
        "Needs Improvement"
    }
}

/// Display rounding used for percentages and GPA: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimal(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn coerce_mark(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        0.0
    }
}

fn percent_of(obtained: f64, max: f64) -> f64 {
    if max > 0.0 {
        (100.0 * obtained / max).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Per-subject pass decision. The source screens disagreed, so each variant
/// reproduces one of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PassRule {
    /// Passed iff the subject grade point reaches `min`.
    GradePoint { min: f64 },
    /// Total below `fraction` of the subject maximum forces NG / 0.0.
    TotalShare { fraction: f64 },
    /// Passed iff the subject percentage reaches `min`.
    Percentage { min: f64 },
    /// Theory below `fraction` of the theory maximum forces NG / 0.0 for the
    /// whole subject; otherwise passed iff the grade point reaches 2.0.
    TheoryShare { fraction: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GpaWeighting {
    /// Arithmetic mean of subject grade points.
    Unweighted,
    /// Mean weighted by credit hour; equal weights when no subject carries
    /// a positive credit hour.
    CreditHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PromotionRule {
    AllSubjectsPass,
    GpaAtLeast { min: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingPolicy {
    pub scale: GradeScale,
    pub pass_rule: PassRule,
    pub gpa_weighting: GpaWeighting,
    pub promotion: PromotionRule,
}

/// Named policies, one per screen the rules were lifted from.
pub const POLICY_PRESETS: [&str; 4] = ["marksEntry", "resultCard", "adminSheet", "marksRecord"];

impl GradingPolicy {
    pub fn preset(name: &str) -> Option<Self> {
        let policy = match name {
            "marksEntry" => Self {
                scale: GradeScale::SevenBand,
                pass_rule: PassRule::TotalShare { fraction: 0.35 },
                gpa_weighting: GpaWeighting::Unweighted,
                promotion: PromotionRule::AllSubjectsPass,
            },
            "resultCard" => Self {
                scale: GradeScale::SevenBand,
                pass_rule: PassRule::GradePoint {
                    min: PASS_GRADE_POINT,
                },
                gpa_weighting: GpaWeighting::Unweighted,
                promotion: PromotionRule::AllSubjectsPass,
            },
            "adminSheet" => Self {
                scale: GradeScale::EightBand,
                pass_rule: PassRule::Percentage { min: 40.0 },
                gpa_weighting: GpaWeighting::Unweighted,
                promotion: PromotionRule::AllSubjectsPass,
            },
            "marksRecord" => Self {
                scale: GradeScale::SevenBand,
                pass_rule: PassRule::TheoryShare { fraction: 0.40 },
                gpa_weighting: GpaWeighting::Unweighted,
                promotion: PromotionRule::GpaAtLeast {
                    min: PASS_GRADE_POINT,
                },
            },
            _ => return None,
        };
        Some(policy)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Accepts a preset name or a full policy object. `None`/null means the
/// caller did not pick one.
pub fn parse_policy(raw: Option<&serde_json::Value>) -> Result<Option<GradingPolicy>, CalcError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(name) => GradingPolicy::preset(name.trim())
            .map(Some)
            .ok_or_else(|| {
                CalcError::new("bad_params", format!("unknown policy preset: {}", name))
                    .with_details(serde_json::json!({ "presets": POLICY_PRESETS }))
            }),
        serde_json::Value::Object(_) => serde_json::from_value::<GradingPolicy>(raw.clone())
            .map(Some)
            .map_err(|e| CalcError::new("bad_params", format!("invalid policy: {}", e))),
        _ => Err(CalcError::new(
            "bad_params",
            "policy must be a preset name or an object",
        )),
    }
}

/// Number fields typed into a grid may arrive as numbers, numeric strings,
/// blanks or junk. Anything unparseable becomes 0.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_value(&v).unwrap_or(0.0))
}

pub fn lenient_value(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn default_credit_hour() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject_name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub theory_obtained: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub theory_max: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub practical_obtained: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub practical_max: f64,
    #[serde(default = "default_credit_hour", deserialize_with = "lenient_f64")]
    pub credit_hour: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubjectStatus {
    Passed,
    Failed,
    BelowPassMark { fraction: f64 },
    BelowTheoryPassMark { fraction: f64 },
}

fn share_label(fraction: f64) -> f64 {
    ((fraction * 1000.0).round()) / 10.0
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("Passed"),
            Self::Failed => f.write_str("Failed"),
            Self::BelowPassMark { fraction } => {
                write!(f, "Failed (Below {}% Pass Mark)", share_label(*fraction))
            }
            Self::BelowTheoryPassMark { fraction } => {
                write!(f, "Failed (Below {}% Theory Pass Mark)", share_label(*fraction))
            }
        }
    }
}

impl Serialize for SubjectStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_name: String,
    pub credit_hour: f64,
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    pub grade: GradeLetter,
    pub grade_point: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theory_grade: Option<GradeLetter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practical_grade: Option<GradeLetter>,
    pub passed: bool,
    pub status: SubjectStatus,
}

pub fn compute_subject_result(score: &SubjectScore, policy: &GradingPolicy) -> SubjectResult {
    let scale = policy.scale;
    let theory = coerce_mark(score.theory_obtained);
    let theory_max = coerce_mark(score.theory_max);
    let practical = coerce_mark(score.practical_obtained);
    let practical_max = coerce_mark(score.practical_max);

    let total_obtained = theory + practical;
    let total_max = theory_max + practical_max;
    let percentage = percent_of(total_obtained, total_max);
    let by_percentage = grade_from_percentage(percentage, scale);

    let mut theory_grade =
        (theory_max > 0.0).then(|| grade_from_percentage(percent_of(theory, theory_max), scale));
    let mut practical_grade = (practical_max > 0.0)
        .then(|| grade_from_percentage(percent_of(practical, practical_max), scale));

    let (grade, status) = match policy.pass_rule {
        PassRule::GradePoint { min } => {
            let passed = by_percentage.grade_point() >= min;
            (by_percentage, pass_status(passed))
        }
        PassRule::Percentage { min } => (by_percentage, pass_status(percentage >= min)),
        PassRule::TotalShare { fraction } => {
            if total_obtained < total_max * fraction {
                (GradeLetter::NG, SubjectStatus::BelowPassMark { fraction })
            } else {
                (by_percentage, pass_status(percentage >= fraction * 100.0))
            }
        }
        PassRule::TheoryShare { fraction } => {
            // A missing theory maximum is read as the usual 100.
            let base = if theory_max > 0.0 { theory_max } else { 100.0 };
            if theory < base * fraction {
                theory_grade = theory_grade.map(|_| GradeLetter::NG);
                practical_grade = practical_grade.map(|_| GradeLetter::NG);
                (GradeLetter::NG, SubjectStatus::BelowTheoryPassMark { fraction })
            } else {
                let passed = by_percentage.grade_point() >= PASS_GRADE_POINT;
                (by_percentage, pass_status(passed))
            }
        }
    };

    SubjectResult {
        subject_name: score.subject_name.clone(),
        credit_hour: coerce_mark(score.credit_hour),
        total_obtained,
        total_max,
        percentage,
        grade,
        grade_point: grade.grade_point(),
        theory_grade,
        practical_grade,
        passed: status == SubjectStatus::Passed,
        status,
    }
}

fn pass_status(passed: bool) -> SubjectStatus {
    if passed {
        SubjectStatus::Passed
    } else {
        SubjectStatus::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub subjects: Vec<SubjectResult>,
    pub total_obtained: f64,
    pub total_max: f64,
    pub overall_percentage: f64,
    #[serde(rename = "overallGPA")]
    pub overall_gpa: f64,
    pub overall_grade: GradeLetter,
    pub promoted: bool,
    pub passed_subjects: usize,
    pub failed_subjects: usize,
    pub pass_percentage: f64,
    pub performance: &'static str,
}

fn mean_grade_point(subjects: &[SubjectResult], weighting: GpaWeighting) -> f64 {
    if subjects.is_empty() {
        return 0.0;
    }
    let equal = subjects.iter().map(|s| s.grade_point).sum::<f64>() / (subjects.len() as f64);
    match weighting {
        GpaWeighting::Unweighted => equal,
        GpaWeighting::CreditHour => {
            let mut sum = 0.0_f64;
            let mut denom = 0.0_f64;
            for s in subjects {
                let w = coerce_mark(s.credit_hour);
                sum += s.grade_point * w;
                denom += w;
            }
            if denom > 0.0 {
                sum / denom
            } else {
                equal
            }
        }
    }
}

/// Aggregates subject results in the order given. The GPA is rounded to two
/// decimals before it is bucketed, so a mean like 3.5999999 lands in A+ as
/// the printed "3.60" would.
pub fn aggregate_student(
    student_id: &str,
    subjects: Vec<SubjectResult>,
    policy: &GradingPolicy,
) -> StudentAggregate {
    let total_obtained: f64 = subjects.iter().map(|s| s.total_obtained).sum();
    let total_max: f64 = subjects.iter().map(|s| s.total_max).sum();
    let overall_percentage = percent_of(total_obtained, total_max);
    let overall_gpa = round_off_2_decimal(mean_grade_point(&subjects, policy.gpa_weighting));
    let passed_subjects = subjects.iter().filter(|s| s.passed).count();
    let failed_subjects = subjects.len() - passed_subjects;
    let pass_percentage = if subjects.is_empty() {
        0.0
    } else {
        100.0 * (passed_subjects as f64) / (subjects.len() as f64)
    };
    let promoted = match policy.promotion {
        PromotionRule::AllSubjectsPass => failed_subjects == 0,
        PromotionRule::GpaAtLeast { min } => overall_gpa >= min,
    };

    StudentAggregate {
        student_id: student_id.to_string(),
        subjects,
        total_obtained,
        total_max,
        overall_percentage,
        overall_gpa,
        overall_grade: grade_from_gpa(overall_gpa),
        promoted,
        passed_subjects,
        failed_subjects,
        pass_percentage,
        performance: performance_label(overall_gpa),
    }
}
