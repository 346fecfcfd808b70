use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::aggregate::{self, AggregationInput};
use crate::db;
use crate::error::{GradeError, Result};
use crate::models::{
    CalcOutput, CalculatedGrade, Course, GradeRecord, GradeType, GradeValue, Weight,
};
use crate::scale;

/// A per-course grade calculation function. Calculators are user code:
/// they may fail or panic, and the engine isolates either per student.
pub type CalculatorFn = Box<dyn Fn(&[GradeRecord]) -> anyhow::Result<CalcOutput>>;

/// Stable lookup key for a course's calculator: the course number with
/// every non-alphanumeric character replaced, then semester and year.
/// `Phil 25A` in Fall 2025 becomes `Phil_25A_fall2025`.
pub fn calculator_key(number: &str, semester: &str, year: i32) -> String {
    let safe: String = number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}{}", safe, semester.to_lowercase(), year)
}

#[derive(Default)]
pub struct CalculatorRegistry {
    calculators: HashMap<String, CalculatorFn>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, calculator: CalculatorFn) {
        self.calculators.insert(key.into(), calculator);
    }

    pub fn get(&self, key: &str) -> Option<&CalculatorFn> {
        self.calculators.get(key)
    }
}

#[derive(Debug, Clone)]
pub struct SkippedStudent {
    pub student_id: Uuid,
    pub name: String,
    pub reason: String,
}

/// Outcome of one course recalculation run, reported back to the caller
/// instead of printed.
#[derive(Debug, Default)]
pub struct CalcSummary {
    pub students: usize,
    pub grades_written: usize,
    pub skipped: Vec<SkippedStudent>,
}

/// Run the course's registered calculator for every enrolled student.
///
/// Each student sees only their entered grades: rows whose weight is the
/// `CALC` sentinel are produced by earlier runs and are excluded, so
/// recalculation never feeds on its own output. A failing or panicking
/// calculator skips that student and the run continues; persistence
/// failures are likewise confined to the student they hit.
pub async fn calculate_course(
    pool: &SqlitePool,
    registry: &CalculatorRegistry,
    course: &Course,
) -> Result<CalcSummary> {
    let key = calculator_key(&course.number, &course.semester, course.year);
    let calculator = registry
        .get(&key)
        .ok_or(GradeError::CalculatorNotFound { key })?;

    let students = db::select_students(pool, course.id).await?;
    let all_grades = db::select_grades_for_course_members(pool, course.id, None).await?;

    let mut summary = CalcSummary {
        students: students.len(),
        ..Default::default()
    };

    for student in &students {
        let entered: Vec<GradeRecord> = all_grades
            .iter()
            .filter(|r| r.student_id == student.id && !r.is_calculated())
            .cloned()
            .collect();

        let proposals = match invoke_calculator(calculator, &entered) {
            Ok(output) => output.into_proposals(),
            Err(reason) => {
                tracing::warn!(sid = %student.sid, %reason, "grade calculation failed; skipping student");
                summary.skipped.push(SkippedStudent {
                    student_id: student.id,
                    name: format!("{}, {}", student.last_name, student.first_name),
                    reason,
                });
                continue;
            }
        };

        match persist_proposals(pool, course.id, student.id, proposals).await {
            Ok(written) => summary.grades_written += written,
            Err(err) => {
                tracing::warn!(sid = %student.sid, error = %err, "could not save calculated grades; skipping student");
                summary.skipped.push(SkippedStudent {
                    student_id: student.id,
                    name: format!("{}, {}", student.last_name, student.first_name),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

fn invoke_calculator(
    calculator: &CalculatorFn,
    entered: &[GradeRecord],
) -> std::result::Result<CalcOutput, String> {
    match catch_unwind(AssertUnwindSafe(|| calculator(entered))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_reason(payload)),
    }
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("calculator panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("calculator panicked: {s}")
    } else {
        "calculator panicked".to_string()
    }
}

async fn persist_proposals(
    pool: &SqlitePool,
    course_id: Uuid,
    student_id: Uuid,
    proposals: Vec<CalculatedGrade>,
) -> Result<usize> {
    let mut written = 0;
    for proposal in proposals {
        save_calculated_grade(pool, course_id, student_id, proposal).await?;
        written += 1;
    }
    Ok(written)
}

/// Persist one proposal. Mirrors the validation order relied on by
/// calculators: a present value first (zero and `F` are valid, absent is
/// not), then some way to identify where the grade goes.
async fn save_calculated_grade(
    pool: &SqlitePool,
    course_id: Uuid,
    student_id: Uuid,
    proposal: CalculatedGrade,
) -> Result<Uuid> {
    let Some(value) = proposal.value else {
        return Err(GradeError::MissingValue {
            name: proposal.name.unwrap_or_default(),
        });
    };

    if let Some(grade_id) = proposal.grade_id {
        db::update_grade(pool, grade_id, &value).await?;
        return Ok(grade_id);
    }

    let assignment_id = match proposal.assignment_id {
        Some(id) => id,
        None => {
            let Some(name) = proposal.name.as_deref() else {
                return Err(GradeError::MissingIdentifier);
            };
            match db::ensure_unique(db::select_assignments(pool, course_id, Some(name)).await?) {
                Ok(assignment) => assignment.id,
                Err(GradeError::NoRecordsFound) => {
                    db::create_assignment(
                        pool,
                        course_id,
                        name,
                        Some(
                            proposal
                                .description
                                .as_deref()
                                .unwrap_or("(Assignment for calculated grade)"),
                        ),
                        proposal
                            .due_date
                            .unwrap_or_else(|| Utc::now().date_naive()),
                        proposal.grade_type.map(|t| t.as_str()),
                        proposal.weight.unwrap_or(Weight::Calc),
                    )
                    .await?
                }
                Err(GradeError::MultipleRecordsFound(_)) => {
                    return Err(GradeError::AmbiguousAssignment {
                        name: name.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    };

    // reuse any existing grade row so reruns never accumulate duplicates
    let existing = match db::ensure_unique(
        db::select_grades(pool, Some(student_id), Some(assignment_id)).await?,
    ) {
        Ok(grade) => Some(grade.id),
        Err(GradeError::NoRecordsFound) => None,
        Err(err) => return Err(err),
    };

    db::create_or_update_grade(pool, existing, assignment_id, student_id, &value).await
}

/// Example calculator for a letter-graded course: the weighted 4.0-scale
/// average of the entered paper grades, returned in the mapping form.
pub fn weighted_letter_average(rows: &[GradeRecord]) -> anyhow::Result<CalcOutput> {
    let input = AggregationInput::from_records(rows);
    let points: Vec<f64> = input
        .values
        .iter()
        .map(|v| scale::letter_to_points(&v.to_string()))
        .collect();
    let weights: Vec<f64> = input.weights.iter().map(Weight::points).collect();

    let average = aggregate::weighted_average(&points, &weights, true)?;
    let letter = scale::points_to_letter(average)?;

    let mut grades = std::collections::BTreeMap::new();
    grades.insert("Paper average".to_string(), GradeValue::Number(average));
    grades.insert("Final grade".to_string(), GradeValue::Text(letter.to_string()));
    Ok(CalcOutput::Grades(grades))
}

/// Example calculator for a points-graded course: each score as a share
/// of its point total, combined by point weight into one percentage and
/// letter. Returned in the proposal form so the calculated assignments
/// carry grade types.
pub fn points_share_percentage(rows: &[GradeRecord]) -> anyhow::Result<CalcOutput> {
    let input = AggregationInput::from_records(rows);
    let possible: Vec<f64> = input.weights.iter().map(Weight::points).collect();
    let percents: Vec<f64> = input
        .values
        .iter()
        .zip(&possible)
        .map(|(v, p)| {
            if *p == 0.0 {
                f64::NAN
            } else {
                v.as_f64() / p * 100.0
            }
        })
        .collect();

    let shares = aggregate::weights_from_points(&possible);
    let average = aggregate::weighted_average(&percents, &shares, true)?;
    let letter = scale::percentage_to_letter(average)?;

    Ok(CalcOutput::Proposals(vec![
        CalculatedGrade {
            name: Some("Homework percentage".to_string()),
            value: Some(GradeValue::Number(average)),
            description: Some("Point-weighted homework percentage".to_string()),
            grade_type: Some(GradeType::Percentage),
            ..Default::default()
        },
        CalculatedGrade {
            name: Some("Final grade".to_string()),
            value: Some(GradeValue::Text(letter.to_string())),
            grade_type: Some(GradeType::Letter),
            ..Default::default()
        },
    ]))
}
