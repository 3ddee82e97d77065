use rusqlite::Connection;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};

use crate::db;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 20.0;

pub const GRADING_SETTINGS_KEY: &str = "setup.grading";

pub const ATTENDANCE_CRITERIA: [&str; 3] = ["conceptual", "procedural", "attitudinal"];

/// Relative slack that lets a binary value just under a decimal half (10.165 is stored as
/// 10.16499...) round as the decimal it stands for.
const HALF_NUDGE: f64 = 1e-9;

/// Two-decimal rounding applied to every derived grade (decimal half away from zero).
pub fn round_2_decimals(x: f64) -> f64 {
    let scaled = x * 100.0;
    (scaled + scaled.signum() * scaled.abs().max(1.0) * HALF_NUDGE).round() / 100.0
}

#[derive(thiserror::Error, Debug)]
pub enum ScoreError {
    #[error("{field} must be between 0 and 20 (got {value})")]
    InvalidScoreRange { field: String, value: f64 },
    #[error("{field} must be a whole number between 0 and 20 (got {value})")]
    NotWholeScore { field: String, value: f64 },
    #[error("missing rubric criterion: {0}")]
    IncompleteCriteria(&'static str),
    #[error("unknown rubric criterion: {0}")]
    UnknownCriterion(String),
    #[error("remarks must not be empty")]
    EmptyRemarks,
    #[error("jury member {jury_id} has already evaluated practice {practice_id}")]
    DuplicateEvaluation {
        jury_id: String,
        practice_id: String,
    },
    #[error("a grade has already been recorded")]
    AlreadyEvaluated,
    #[error("no report has been submitted for this practice")]
    ReportNotSubmitted,
    #[error("absent sessions cannot carry rubric scores")]
    AbsentWithScores,
    #[error("invalid component weights: {0}")]
    InvalidWeights(String),
    #[error("invalid grade thresholds: {0}")]
    InvalidThresholds(String),
    #[error("stored grading settings are unusable: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl ScoreError {
    /// Stable wire code reported to the UI shell.
    pub fn code(&self) -> &'static str {
        match self {
            ScoreError::InvalidScoreRange { .. } | ScoreError::NotWholeScore { .. } => {
                "invalid_score_range"
            }
            ScoreError::IncompleteCriteria(_) => "incomplete_criteria",
            ScoreError::UnknownCriterion(_) => "unknown_criterion",
            ScoreError::EmptyRemarks => "empty_remarks",
            ScoreError::DuplicateEvaluation { .. } => "duplicate_evaluation",
            ScoreError::AlreadyEvaluated => "already_evaluated",
            ScoreError::ReportNotSubmitted => "report_not_submitted",
            ScoreError::AbsentWithScores => "absent_with_scores",
            ScoreError::InvalidWeights(_) => "invalid_weights",
            ScoreError::InvalidThresholds(_) => "invalid_thresholds",
            ScoreError::InvalidSettings(_) => "invalid_settings",
            ScoreError::Store(_) => "db_query_failed",
        }
    }
}

pub fn check_range(field: &str, value: f64) -> Result<f64, ScoreError> {
    if value.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&value) {
        Ok(value)
    } else {
        Err(ScoreError::InvalidScoreRange {
            field: field.to_string(),
            value,
        })
    }
}

fn whole_score(field: &str, value: f64) -> Result<u8, ScoreError> {
    check_range(field, value)?;
    if value.fract() != 0.0 {
        return Err(ScoreError::NotWholeScore {
            field: field.to_string(),
            value,
        });
    }
    Ok(value as u8)
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRubric {
    pub conceptual: u8,
    pub procedural: u8,
    pub attitudinal: u8,
}

impl AttendanceRubric {
    pub fn new(conceptual: f64, procedural: f64, attitudinal: f64) -> Result<Self, ScoreError> {
        Ok(Self {
            conceptual: whole_score("conceptual", conceptual)?,
            procedural: whole_score("procedural", procedural)?,
            attitudinal: whole_score("attitudinal", attitudinal)?,
        })
    }

    /// Builds a rubric from a keyed criteria map. Keys are matched case-insensitively;
    /// every criterion must be present and nothing else may be.
    pub fn from_criteria(criteria: &BTreeMap<String, f64>) -> Result<Self, ScoreError> {
        if let Some(unknown) = criteria.keys().find(|k| {
            !ATTENDANCE_CRITERIA
                .iter()
                .any(|name| k.eq_ignore_ascii_case(name))
        }) {
            return Err(ScoreError::UnknownCriterion(unknown.clone()));
        }
        let get = |name: &'static str| {
            criteria
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| *v)
                .ok_or(ScoreError::IncompleteCriteria(name))
        };
        Self::new(get("conceptual")?, get("procedural")?, get("attitudinal")?)
    }
}

pub fn compute_daily_score(rubric: &AttendanceRubric) -> f64 {
    let sum = rubric.conceptual as f64 + rubric.procedural as f64 + rubric.attitudinal as f64;
    round_2_decimals(sum / 3.0)
}

/// Score for one session: present sessions are graded on the rubric, absent ones count as 0.
pub fn compute_session_score(
    present: bool,
    rubric: Option<&AttendanceRubric>,
) -> Result<f64, ScoreError> {
    match (present, rubric) {
        (true, Some(r)) => Ok(compute_daily_score(r)),
        (true, None) => Err(ScoreError::IncompleteCriteria("criteria")),
        (false, None) => Ok(0.0),
        (false, Some(_)) => Err(ScoreError::AbsentWithScores),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneralScoreMode {
    /// Mean of every daily score recorded so far.
    #[default]
    Cumulative,
    /// The latest session's daily score only.
    Session,
}

/// General attendance score after the sessions in `daily_scores` (in date order).
pub fn general_score(mode: GeneralScoreMode, daily_scores: &[f64]) -> Option<f64> {
    let last = *daily_scores.last()?;
    match mode {
        GeneralScoreMode::Session => Some(last),
        GeneralScoreMode::Cumulative => {
            let sum: f64 = daily_scores.iter().sum();
            Some(round_2_decimals(sum / daily_scores.len() as f64))
        }
    }
}

// ---------------------------------------------------------------------------
// Jury
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JuryRubric {
    pub presentation: f64,
    pub theory: f64,
    pub practical: f64,
    pub attitude: f64,
}

impl JuryRubric {
    pub fn new(
        presentation: f64,
        theory: f64,
        practical: f64,
        attitude: f64,
    ) -> Result<Self, ScoreError> {
        Ok(Self {
            presentation: check_range("presentation", presentation)?,
            theory: check_range("theory", theory)?,
            practical: check_range("practical", practical)?,
            attitude: check_range("attitude", attitude)?,
        })
    }
}

pub fn compute_jury_grade(rubric: &JuryRubric) -> f64 {
    let sum = rubric.presentation + rubric.theory + rubric.practical + rubric.attitude;
    round_2_decimals(sum / 4.0)
}

pub fn validate_remarks(remarks: &str) -> Result<&str, ScoreError> {
    let trimmed = remarks.trim();
    if trimmed.is_empty() {
        return Err(ScoreError::EmptyRemarks);
    }
    Ok(trimmed)
}

/// Source of truth for which (jury, practice) pairs already carry an evaluation.
pub trait EvaluationLedger {
    fn has_existing_evaluation(&self, jury_id: &str, practice_id: &str)
        -> Result<bool, ScoreError>;
}

impl EvaluationLedger for [JuryEvaluation] {
    fn has_existing_evaluation(
        &self,
        jury_id: &str,
        practice_id: &str,
    ) -> Result<bool, ScoreError> {
        Ok(self
            .iter()
            .any(|e| e.jury_id == jury_id && e.practice_id == practice_id))
    }
}

impl EvaluationLedger for HashSet<(String, String)> {
    fn has_existing_evaluation(
        &self,
        jury_id: &str,
        practice_id: &str,
    ) -> Result<bool, ScoreError> {
        Ok(self.contains(&(jury_id.to_string(), practice_id.to_string())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JuryEvaluation {
    pub jury_id: String,
    pub practice_id: String,
    pub scores: JuryRubric,
    pub grade: f64,
    pub remarks: String,
}

/// Validates and scores a jury submission. Nothing is recorded here; the caller persists the
/// returned evaluation.
pub fn submit_jury_evaluation<L>(
    ledger: &L,
    jury_id: &str,
    practice_id: &str,
    scores: JuryRubric,
    remarks: &str,
) -> Result<JuryEvaluation, ScoreError>
where
    L: EvaluationLedger + ?Sized,
{
    if ledger.has_existing_evaluation(jury_id, practice_id)? {
        return Err(ScoreError::DuplicateEvaluation {
            jury_id: jury_id.to_string(),
            practice_id: practice_id.to_string(),
        });
    }
    let remarks = validate_remarks(remarks)?;
    Ok(JuryEvaluation {
        jury_id: jury_id.to_string(),
        practice_id: practice_id.to_string(),
        grade: compute_jury_grade(&scores),
        scores,
        remarks: remarks.to_string(),
    })
}

/// Practice-level jury grade: mean of the members' grades once every assigned member has
/// evaluated.
pub fn aggregate_jury_grades(grades: &[f64], assigned: usize) -> Option<f64> {
    if grades.is_empty() || grades.len() < assigned {
        return None;
    }
    let sum: f64 = grades.iter().sum();
    Some(round_2_decimals(sum / grades.len() as f64))
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGrade {
    pub grade: Option<f64>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedReport {
    pub grade: f64,
    pub remarks: String,
}

/// Grades a submitted report. `current` is `None` when nothing was submitted.
pub fn evaluate_report(
    current: Option<&ReportGrade>,
    grade: f64,
    remarks: &str,
) -> Result<EvaluatedReport, ScoreError> {
    let Some(current) = current else {
        return Err(ScoreError::ReportNotSubmitted);
    };
    if current.grade.is_some() {
        return Err(ScoreError::AlreadyEvaluated);
    }
    let grade = check_range("grade", grade)?;
    Ok(EvaluatedReport {
        grade: round_2_decimals(grade),
        remarks: remarks.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Final grade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub attendance: f64,
    pub jury: f64,
    pub report: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            attendance: 0.30,
            jury: 0.40,
            report: 0.30,
        }
    }
}

impl ComponentWeights {
    pub fn validate(&self) -> Result<(), ScoreError> {
        for (name, w) in [
            ("attendance", self.attendance),
            ("jury", self.jury),
            ("report", self.report),
        ] {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(ScoreError::InvalidWeights(format!(
                    "{name} weight must be between 0 and 1"
                )));
            }
        }
        let total = self.attendance + self.jury + self.report;
        if (total - 1.0).abs() > 1e-9 {
            return Err(ScoreError::InvalidWeights(format!(
                "weights must sum to 1 (got {total})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalGrade {
    Pending,
    Graded(f64),
}

impl Serialize for FinalGrade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FinalGrade::Pending => serializer.serialize_str("PENDING"),
            FinalGrade::Graded(v) => serializer.serialize_f64(*v),
        }
    }
}

pub fn compute_final_grade(
    attendance: Option<f64>,
    jury: Option<f64>,
    report: Option<f64>,
) -> Result<FinalGrade, ScoreError> {
    compute_final_grade_weighted(&ComponentWeights::default(), attendance, jury, report)
}

pub fn compute_final_grade_weighted(
    weights: &ComponentWeights,
    attendance: Option<f64>,
    jury: Option<f64>,
    report: Option<f64>,
) -> Result<FinalGrade, ScoreError> {
    for (field, v) in [("attendance", attendance), ("jury", jury), ("report", report)] {
        if let Some(v) = v {
            check_range(field, v)?;
        }
    }
    let (Some(a), Some(j), Some(r)) = (attendance, jury, report) else {
        return Ok(FinalGrade::Pending);
    };
    weights.validate()?;
    let weighted = weights.attendance * a + weights.jury * j + weights.report * r;
    Ok(FinalGrade::Graded(round_2_decimals(weighted)))
}

// ---------------------------------------------------------------------------
// Bands and workspace grading settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradeBand {
    Outstanding,
    Passing,
    Failing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradingConfig {
    pub weights: ComponentWeights,
    pub passing_grade: f64,
    pub outstanding_grade: f64,
    pub general_score_mode: GeneralScoreMode,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            weights: ComponentWeights::default(),
            passing_grade: 10.5,
            outstanding_grade: 14.0,
            general_score_mode: GeneralScoreMode::default(),
        }
    }
}

impl GradingConfig {
    pub fn validate(&self) -> Result<(), ScoreError> {
        self.weights.validate()?;
        check_range("passingGrade", self.passing_grade)?;
        check_range("outstandingGrade", self.outstanding_grade)?;
        if self.passing_grade > self.outstanding_grade {
            return Err(ScoreError::InvalidThresholds(
                "passingGrade must not exceed outstandingGrade".to_string(),
            ));
        }
        Ok(())
    }

    pub fn band(&self, grade: f64) -> GradeBand {
        if grade >= self.outstanding_grade {
            GradeBand::Outstanding
        } else if grade >= self.passing_grade {
            GradeBand::Passing
        } else {
            GradeBand::Failing
        }
    }

    pub fn final_grade(
        &self,
        attendance: Option<f64>,
        jury: Option<f64>,
        report: Option<f64>,
    ) -> Result<FinalGrade, ScoreError> {
        compute_final_grade_weighted(&self.weights, attendance, jury, report)
    }
}

/// Reads a stored grading section. Missing fields take their defaults; anything that does not
/// deserialize or validate is reported as unusable settings.
pub fn grading_config_from_value(value: serde_json::Value) -> Result<GradingConfig, ScoreError> {
    let cfg: GradingConfig =
        serde_json::from_value(value).map_err(|e| ScoreError::InvalidSettings(e.to_string()))?;
    cfg.validate()
        .map_err(|e| ScoreError::InvalidSettings(e.to_string()))?;
    Ok(cfg)
}

pub fn load_grading_config(conn: &Connection) -> anyhow::Result<GradingConfig> {
    match db::settings_get_json(conn, GRADING_SETTINGS_KEY)? {
        Some(v) => Ok(grading_config_from_value(v)?),
        None => Ok(GradingConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn daily_score_matches_reference_scenario() {
        let r = AttendanceRubric::new(15.0, 18.0, 12.0).expect("rubric");
        assert_eq!(compute_daily_score(&r), 15.0);
    }

    #[test]
    fn daily_score_rounds_to_two_decimals_and_is_commutative() {
        let a = AttendanceRubric::new(20.0, 19.0, 19.0).expect("rubric");
        let b = AttendanceRubric::new(19.0, 20.0, 19.0).expect("rubric");
        let c = AttendanceRubric::new(19.0, 19.0, 20.0).expect("rubric");
        assert_eq!(compute_daily_score(&a), 19.33);
        assert_eq!(compute_daily_score(&a), compute_daily_score(&b));
        assert_eq!(compute_daily_score(&b), compute_daily_score(&c));
    }

    #[test]
    fn attendance_rejects_out_of_range_and_fractional_scores() {
        let e = AttendanceRubric::new(21.0, 10.0, 10.0).unwrap_err();
        assert_eq!(e.code(), "invalid_score_range");
        let e = AttendanceRubric::new(10.0, -1.0, 10.0).unwrap_err();
        assert_eq!(e.code(), "invalid_score_range");
        let e = AttendanceRubric::new(10.0, 10.0, 12.5).unwrap_err();
        assert_eq!(e.code(), "invalid_score_range");
        let e = AttendanceRubric::new(f64::NAN, 10.0, 10.0).unwrap_err();
        assert_eq!(e.code(), "invalid_score_range");
    }

    #[test]
    fn criteria_map_must_be_complete_and_known() {
        let ok = AttendanceRubric::from_criteria(&criteria(&[
            ("CONCEPTUAL", 10.0),
            ("procedural", 12.0),
            ("Attitudinal", 14.0),
        ]))
        .expect("rubric");
        assert_eq!(compute_daily_score(&ok), 12.0);

        let missing =
            AttendanceRubric::from_criteria(&criteria(&[("conceptual", 10.0), ("procedural", 12.0)]))
                .unwrap_err();
        assert!(matches!(missing, ScoreError::IncompleteCriteria("attitudinal")));

        let unknown = AttendanceRubric::from_criteria(&criteria(&[
            ("conceptual", 10.0),
            ("procedural", 12.0),
            ("attitudinal", 14.0),
            ("creativity", 20.0),
        ]))
        .unwrap_err();
        assert_eq!(unknown.code(), "unknown_criterion");
    }

    #[test]
    fn session_score_handles_absence() {
        let r = AttendanceRubric::new(12.0, 12.0, 12.0).expect("rubric");
        assert_eq!(compute_session_score(true, Some(&r)).expect("present"), 12.0);
        assert_eq!(compute_session_score(false, None).expect("absent"), 0.0);
        assert_eq!(
            compute_session_score(false, Some(&r)).unwrap_err().code(),
            "absent_with_scores"
        );
        assert_eq!(
            compute_session_score(true, None).unwrap_err().code(),
            "incomplete_criteria"
        );
    }

    #[test]
    fn general_score_modes() {
        assert_eq!(general_score(GeneralScoreMode::Cumulative, &[]), None);
        let history = [15.0, 12.0, 16.33];
        assert_eq!(
            general_score(GeneralScoreMode::Cumulative, &history),
            Some(14.44)
        );
        assert_eq!(general_score(GeneralScoreMode::Session, &history), Some(16.33));
        // A single session is the same under both modes.
        assert_eq!(
            general_score(GeneralScoreMode::Cumulative, &[13.67]),
            general_score(GeneralScoreMode::Session, &[13.67])
        );
    }

    #[test]
    fn decimal_halves_round_away_from_zero() {
        let a = compute_daily_score(&AttendanceRubric::new(10.0, 10.0, 11.0).expect("rubric"));
        let b = compute_daily_score(&AttendanceRubric::new(10.0, 10.0, 10.0).expect("rubric"));
        assert_eq!(a, 10.33);
        assert_eq!(general_score(GeneralScoreMode::Cumulative, &[a, b]), Some(10.17));
        assert_eq!(round_2_decimals(0.3 * 12.15 + 0.4 * 12.0 + 0.3 * 12.0), 12.05);
        assert_eq!(round_2_decimals(1.005), 1.01);
        assert_eq!(round_2_decimals(-10.165), -10.17);
        assert_eq!(round_2_decimals(10.164), 10.16);
        assert_eq!(round_2_decimals(15.456), 15.46);
        assert_eq!(round_2_decimals(0.0), 0.0);
    }

    #[test]
    fn jury_grade_matches_reference_scenario_and_is_bounded() {
        let r = JuryRubric::new(16.0, 14.0, 18.0, 20.0).expect("rubric");
        assert_eq!(compute_jury_grade(&r), 17.0);

        let swapped = JuryRubric::new(20.0, 18.0, 14.0, 16.0).expect("rubric");
        assert_eq!(compute_jury_grade(&r), compute_jury_grade(&swapped));

        let top = JuryRubric::new(20.0, 20.0, 20.0, 20.0).expect("rubric");
        let bottom = JuryRubric::new(0.0, 0.0, 0.0, 0.0).expect("rubric");
        assert_eq!(compute_jury_grade(&top), 20.0);
        assert_eq!(compute_jury_grade(&bottom), 0.0);

        let half = JuryRubric::new(15.5, 14.5, 17.5, 13.0).expect("rubric");
        assert_eq!(compute_jury_grade(&half), 15.13);

        assert_eq!(
            JuryRubric::new(16.0, 20.5, 18.0, 20.0).unwrap_err().code(),
            "invalid_score_range"
        );
    }

    #[test]
    fn second_jury_submission_is_rejected() {
        let mut ledger: Vec<JuryEvaluation> = Vec::new();
        let scores = JuryRubric::new(16.0, 14.0, 18.0, 20.0).expect("rubric");

        let first = submit_jury_evaluation(ledger.as_slice(), "j1", "p1", scores, " Solid defense ")
            .expect("first submission");
        assert_eq!(first.grade, 17.0);
        assert_eq!(first.remarks, "Solid defense");
        ledger.push(first);

        let second = submit_jury_evaluation(ledger.as_slice(), "j1", "p1", scores, "again")
            .unwrap_err();
        assert_eq!(second.code(), "duplicate_evaluation");

        // Another jury member on the same practice is fine.
        submit_jury_evaluation(ledger.as_slice(), "j2", "p1", scores, "ok").expect("other jury");
    }

    #[test]
    fn jury_remarks_are_required() {
        let ledger: HashSet<(String, String)> = HashSet::new();
        let scores = JuryRubric::new(10.0, 10.0, 10.0, 10.0).expect("rubric");
        let e = submit_jury_evaluation(&ledger, "j1", "p1", scores, "   ").unwrap_err();
        assert!(matches!(e, ScoreError::EmptyRemarks));
    }

    #[test]
    fn jury_aggregate_waits_for_every_assigned_member() {
        assert_eq!(aggregate_jury_grades(&[], 0), None);
        assert_eq!(aggregate_jury_grades(&[17.0], 2), None);
        assert_eq!(aggregate_jury_grades(&[17.0, 14.5], 2), Some(15.75));
        assert_eq!(aggregate_jury_grades(&[12.0], 0), Some(12.0));
    }

    #[test]
    fn final_grade_reference_scenarios() {
        assert_eq!(
            compute_final_grade(Some(14.0), Some(17.0), None).expect("pending"),
            FinalGrade::Pending
        );
        assert_eq!(
            compute_final_grade(Some(14.0), Some(17.0), Some(16.0)).expect("graded"),
            FinalGrade::Graded(15.8)
        );
        assert_eq!(
            compute_final_grade(None, None, None).expect("pending"),
            FinalGrade::Pending
        );
    }

    #[test]
    fn final_grade_is_bounded_and_validates_present_inputs() {
        assert_eq!(
            compute_final_grade(Some(20.0), Some(20.0), Some(20.0)).expect("max"),
            FinalGrade::Graded(20.0)
        );
        assert_eq!(
            compute_final_grade(Some(0.0), Some(0.0), Some(0.0)).expect("min"),
            FinalGrade::Graded(0.0)
        );
        let e = compute_final_grade(Some(25.0), None, None).unwrap_err();
        assert_eq!(e.code(), "invalid_score_range");
    }

    #[test]
    fn final_grade_serializes_pending_marker() {
        assert_eq!(
            serde_json::to_value(FinalGrade::Pending).expect("json"),
            serde_json::json!("PENDING")
        );
        assert_eq!(
            serde_json::to_value(FinalGrade::Graded(15.8)).expect("json"),
            serde_json::json!(15.8)
        );
    }

    #[test]
    fn custom_weights_must_sum_to_one() {
        let w = ComponentWeights {
            attendance: 0.5,
            jury: 0.5,
            report: 0.5,
        };
        assert_eq!(w.validate().unwrap_err().code(), "invalid_weights");

        let w = ComponentWeights {
            attendance: 0.2,
            jury: 0.5,
            report: 0.3,
        };
        assert_eq!(
            compute_final_grade_weighted(&w, Some(10.0), Some(20.0), Some(10.0)).expect("graded"),
            FinalGrade::Graded(15.0)
        );
    }

    #[test]
    fn report_grade_is_write_once() {
        let submitted = ReportGrade::default();
        let evaluated = evaluate_report(Some(&submitted), 16.5, "  Buen informe ").expect("grade");
        assert_eq!(evaluated.grade, 16.5);
        assert_eq!(evaluated.remarks, "Buen informe");

        let graded = ReportGrade {
            grade: Some(evaluated.grade),
            remarks: Some(evaluated.remarks),
        };
        assert!(matches!(
            evaluate_report(Some(&graded), 18.0, "").unwrap_err(),
            ScoreError::AlreadyEvaluated
        ));
        assert!(matches!(
            evaluate_report(None, 18.0, "").unwrap_err(),
            ScoreError::ReportNotSubmitted
        ));
        assert_eq!(
            evaluate_report(Some(&submitted), 20.1, "").unwrap_err().code(),
            "invalid_score_range"
        );
    }

    #[test]
    fn bands_follow_thresholds() {
        let cfg = GradingConfig::default();
        assert_eq!(cfg.band(14.0), GradeBand::Outstanding);
        assert_eq!(cfg.band(13.99), GradeBand::Passing);
        assert_eq!(cfg.band(10.5), GradeBand::Passing);
        assert_eq!(cfg.band(10.49), GradeBand::Failing);
    }

    #[test]
    fn grading_config_partial_json_keeps_defaults() {
        let cfg: GradingConfig =
            serde_json::from_value(serde_json::json!({ "passingGrade": 11 })).expect("parse");
        assert_eq!(cfg.passing_grade, 11.0);
        assert_eq!(cfg.weights, ComponentWeights::default());
        assert_eq!(cfg.general_score_mode, GeneralScoreMode::Cumulative);

        let bad = GradingConfig {
            passing_grade: 15.0,
            outstanding_grade: 14.0,
            ..GradingConfig::default()
        };
        assert_eq!(bad.validate().unwrap_err().code(), "invalid_thresholds");
    }
}
