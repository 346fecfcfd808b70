use std::fmt::Write;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::aggregate::{self, AggregationInput};
use crate::db;
use crate::error::{GradeError, Result};
use crate::models::{Course, GradeRecord, GradeType, GradeValue, Student};
use crate::scale::{self, GradeScale};

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBin {
    pub label: String,
    pub count: usize,
}

/// Summary statistics for one assignment. When the statistics cannot be
/// computed the numeric fields are empty and `error` names the reason;
/// a mean of NaN is rendered as absent rather than zero.
#[derive(Debug, Serialize)]
pub struct AssignmentStats {
    pub assignment_id: Uuid,
    pub assignment_name: String,
    pub min: Option<GradeValue>,
    pub max: Option<GradeValue>,
    pub mean: Option<GradeValue>,
    pub histogram: Vec<HistogramBin>,
    pub missing_students: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GradeReport {
    pub course: Course,
    pub stats: Vec<AssignmentStats>,
    #[serde(skip)]
    pub students: Vec<Student>,
}

/// Build per-assignment statistics for a course. A failure on one
/// assignment (say, an unknown grade type in the store) degrades that
/// assignment to an unavailable entry instead of aborting the report.
pub async fn grade_report(pool: &SqlitePool, course: &Course) -> Result<GradeReport> {
    let assignments = db::select_assignments(pool, course.id, None).await?;
    let all_grades = db::select_grades_for_course_members(pool, course.id, None).await?;
    let students = db::select_students(pool, course.id).await?;

    let mut stats = Vec::new();
    for assignment in &assignments {
        let rows: Vec<&GradeRecord> = all_grades
            .iter()
            .filter(|g| g.assignment_id == assignment.id)
            .collect();
        let missing_students: Vec<Uuid> = rows
            .iter()
            .filter(|g| g.grade_id.is_none())
            .map(|g| g.student_id)
            .collect();

        let entry = match assignment_stats(&rows) {
            Ok((min, max, mean, histogram)) => AssignmentStats {
                assignment_id: assignment.id,
                assignment_name: assignment.name.clone(),
                min,
                max,
                mean,
                histogram,
                missing_students,
                error: None,
            },
            Err(err) => AssignmentStats {
                assignment_id: assignment.id,
                assignment_name: assignment.name.clone(),
                min: None,
                max: None,
                mean: None,
                histogram: Vec::new(),
                missing_students,
                error: Some(err.to_string()),
            },
        };
        stats.push(entry);
    }

    Ok(GradeReport {
        course: course.clone(),
        stats,
        students,
    })
}

type Stats = (
    Option<GradeValue>,
    Option<GradeValue>,
    Option<GradeValue>,
    Vec<HistogramBin>,
);

fn assignment_stats(rows: &[&GradeRecord]) -> Result<Stats> {
    let input = AggregationInput::from_records(rows.iter().copied());
    if input.is_empty() {
        // grades without a declared type cannot be aggregated; no grades
        // at all is an ordinary blank entry
        if rows.iter().any(|r| r.value.is_some() && r.grade_type.is_none()) {
            return Err(GradeError::MissingGradeType);
        }
        return Ok((None, None, None, Vec::new()));
    }

    let raw_type = input.types.first().cloned().unwrap_or_default();
    let grade_type: GradeType = raw_type.parse()?;

    let min = aggregate::min_for_type(&input.values, grade_type);
    let max = aggregate::max_for_type(&input.values, grade_type);
    let mean_value = aggregate::mean_for_type(&input.values, grade_type, true);
    let mean = if mean_value.is_nan() {
        None
    } else if grade_type == GradeType::Letter {
        // a letter is more useful than a 4.0-scale number here
        Some(GradeValue::Text(
            scale::points_to_letter(mean_value)?.to_string(),
        ))
    } else {
        Some(GradeValue::Number(mean_value))
    };

    Ok((min, max, mean, histogram(&input.values, grade_type)))
}

/// Count grades into the scale's bands, preserving the scale's descending
/// band order. Letter grades bin by label (Incomplete included); numeric
/// grades bin by range, labeled as a half-open interval `[lower,upper)`,
/// with the sentinel left out. Values outside every band are not counted.
pub fn histogram(values: &[GradeValue], grade_type: GradeType) -> Vec<HistogramBin> {
    match grade_type {
        GradeType::Letter => scale::POINTS
            .bands
            .iter()
            .map(|band| HistogramBin {
                label: band.label.to_string(),
                count: values
                    .iter()
                    .filter(|v| v.to_string().trim().to_ascii_uppercase() == band.label)
                    .count(),
            })
            .collect(),
        GradeType::FourPoints => numeric_histogram(values, &scale::POINTS),
        // raw point scores behave like percentages; the wide top band
        // absorbs anything above 100
        GradeType::Points | GradeType::Percentage => numeric_histogram(values, &scale::PERCENTS),
    }
}

fn numeric_histogram(values: &[GradeValue], scale: &GradeScale) -> Vec<HistogramBin> {
    let nums: Vec<f64> = values.iter().map(GradeValue::as_f64).collect();
    scale
        .graded_bands()
        .iter()
        .map(|band| HistogramBin {
            label: format!("[{},{})", band.lower, band.upper),
            count: nums
                .iter()
                .filter(|n| band.lower <= **n && **n < band.upper)
                .count(),
        })
        .collect()
}

impl GradeReport {
    pub fn as_text(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "GRADE REPORT: {}: {}, {} {}",
            self.course.number, self.course.name, self.course.semester, self.course.year
        );

        for s in &self.stats {
            let _ = writeln!(
                output,
                "{:<25} Average: {:<8} Minimum: {:<8} Maximum: {:<8}",
                s.assignment_name,
                display(&s.mean),
                display(&s.min),
                display(&s.max),
            );
            if let Some(reason) = &s.error {
                let _ = writeln!(output, "  statistics unavailable ({reason})");
            }
            let counted: Vec<&HistogramBin> = s.histogram.iter().filter(|b| b.count > 0).collect();
            if !counted.is_empty() {
                let line = counted
                    .iter()
                    .map(|b| format!("{} {}", b.label, b.count))
                    .collect::<Vec<String>>()
                    .join(" | ");
                let _ = writeln!(output, "  distribution: {line}");
            }
            if !s.missing_students.is_empty() {
                let _ = writeln!(
                    output,
                    "  {} students do not have a grade for this assignment:",
                    s.missing_students.len()
                );
                for student in self
                    .students
                    .iter()
                    .filter(|stu| s.missing_students.contains(&stu.id))
                {
                    let _ = writeln!(
                        output,
                        "    {}, {} (SID: {})",
                        student.last_name, student.first_name, student.sid
                    );
                }
            }
        }

        output
    }
}

fn display(value: &Option<GradeValue>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{memory_pool, seeded_course};
    use crate::models::Weight;

    fn stat<'a>(report: &'a GradeReport, name: &str) -> &'a AssignmentStats {
        report
            .stats
            .iter()
            .find(|s| s.assignment_name == name)
            .unwrap_or_else(|| panic!("no stats for {name}"))
    }

    #[tokio::test]
    async fn letter_statistics_report_letters() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "25A", "Fall", 2025).await;
        let report = grade_report(&pool, &course).await.unwrap();
        assert_eq!(report.stats.len(), 4);

        // Paper 1 holds a C- and an A; letters order by scale position,
        // so the A is the minimum
        let paper1 = stat(&report, "Paper 1");
        assert_eq!(paper1.min, Some(GradeValue::Text("A".into())));
        assert_eq!(paper1.max, Some(GradeValue::Text("C-".into())));
        // (1.7 + 4.0) / 2 = 2.85, the bottom edge of the B band
        assert_eq!(paper1.mean, Some(GradeValue::Text("B".into())));
        assert!(paper1.error.is_none());
        assert!(paper1.missing_students.is_empty());

        let a_bin = paper1.histogram.iter().find(|b| b.label == "A").unwrap();
        assert_eq!(a_bin.count, 1);
        let c_minus = paper1.histogram.iter().find(|b| b.label == "C-").unwrap();
        assert_eq!(c_minus.count, 1);
        assert_eq!(paper1.histogram.first().map(|b| b.label.as_str()), Some("A+"));
        assert_eq!(paper1.histogram.last().map(|b| b.label.as_str()), Some("I"));
    }

    #[tokio::test]
    async fn numeric_statistics_use_raw_values() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;
        let report = grade_report(&pool, &course).await.unwrap();

        let hw1 = stat(&report, "HW1");
        assert_eq!(hw1.min, Some(GradeValue::Number(104.0)));
        assert_eq!(hw1.max, Some(GradeValue::Number(104.0)));
        assert_eq!(hw1.mean, Some(GradeValue::Number(104.0)));
        // 104 lands in the wide top band
        let top = hw1.histogram.first().unwrap();
        assert_eq!(top.label, "[97,200)");
        assert_eq!(top.count, 1);
    }

    #[tokio::test]
    async fn missing_grades_are_listed_not_averaged() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;

        // enroll a second student with no grades
        let ancient = seeded_course(&pool, "25A", "Fall", 2025).await;
        let students = db::select_students(&pool, ancient.id).await.unwrap();
        let newcomer = students.iter().find(|s| s.sid == "12345678").unwrap();
        db::create_membership(&pool, course.id, newcomer.id)
            .await
            .unwrap();

        let report = grade_report(&pool, &course).await.unwrap();
        let hw1 = stat(&report, "HW1");
        assert_eq!(hw1.missing_students, vec![newcomer.id]);
        // the entered grade still averages; the missing one is only listed
        assert_eq!(hw1.mean, Some(GradeValue::Number(104.0)));

        let text = report.as_text();
        assert!(text.contains("1 students do not have a grade"));
        assert!(text.contains("Okafor, Jules (SID: 12345678)"));
    }

    #[tokio::test]
    async fn unknown_grade_type_degrades_one_assignment_only() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;
        let students = db::select_students(&pool, course.id).await.unwrap();

        let odd = db::create_assignment(
            &pool,
            course.id,
            "Oral exam",
            None,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
            Some("rubric"),
            Weight::Points(1.0),
        )
        .await
        .unwrap();
        db::create_or_update_grade(&pool, None, odd, students[0].id, &GradeValue::Number(3.0))
            .await
            .unwrap();

        let report = grade_report(&pool, &course).await.unwrap();
        let oral = stat(&report, "Oral exam");
        assert!(oral
            .error
            .as_deref()
            .unwrap()
            .contains("unknown grade type: rubric"));
        assert!(oral.mean.is_none());
        // the healthy assignments still have statistics
        assert!(stat(&report, "HW1").mean.is_some());

        let text = report.as_text();
        assert!(text.contains("statistics unavailable"));
    }

    #[tokio::test]
    async fn assignment_without_entered_grades_is_blank() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;
        db::create_assignment(
            &pool,
            course.id,
            "HW3",
            None,
            chrono::NaiveDate::from_ymd_opt(2026, 2, 12).unwrap(),
            Some("points"),
            Weight::Points(100.0),
        )
        .await
        .unwrap();

        let report = grade_report(&pool, &course).await.unwrap();
        let hw3 = stat(&report, "HW3");
        assert!(hw3.min.is_none());
        assert!(hw3.max.is_none());
        assert!(hw3.mean.is_none());
        assert!(hw3.error.is_none());
        assert_eq!(hw3.missing_students.len(), 1);
    }

    #[tokio::test]
    async fn typed_calculated_columns_get_statistics() {
        use crate::calc;

        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;
        let mut registry = calc::CalculatorRegistry::new();
        registry.register(
            calc::calculator_key("12A", "Spring", 2026),
            Box::new(calc::points_share_percentage),
        );
        calc::calculate_course(&pool, &registry, &course)
            .await
            .unwrap();

        let report = grade_report(&pool, &course).await.unwrap();
        let pct = stat(&report, "Homework percentage");
        assert!(pct.error.is_none());
        assert!(matches!(pct.mean, Some(GradeValue::Number(_))));
        let final_grade = stat(&report, "Final grade");
        assert_eq!(final_grade.mean, Some(GradeValue::Text("A".into())));
    }

    #[tokio::test]
    async fn untyped_calculated_columns_report_a_reason() {
        use crate::calc;

        let pool = memory_pool().await;
        let course = seeded_course(&pool, "25A", "Fall", 2025).await;
        let mut registry = calc::CalculatorRegistry::new();
        registry.register(
            calc::calculator_key("25A", "Fall", 2025),
            // the mapping output form declares no grade types
            Box::new(calc::weighted_letter_average),
        );
        calc::calculate_course(&pool, &registry, &course)
            .await
            .unwrap();

        let report = grade_report(&pool, &course).await.unwrap();
        let average = stat(&report, "Paper average");
        assert!(average
            .error
            .as_deref()
            .unwrap()
            .contains("no declared grade type"));
        // entered assignments are unaffected
        assert!(stat(&report, "Paper 1").error.is_none());
    }

    #[test]
    fn letter_histogram_counts_by_label_in_scale_order() {
        let values = vec![
            GradeValue::Text("A".into()),
            GradeValue::Text("A".into()),
            GradeValue::Text("b+".into()),
            GradeValue::Text("I".into()),
        ];
        let bins = histogram(&values, GradeType::Letter);
        let labels: Vec<&str> = bins.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels[0], "A+");
        assert_eq!(labels[labels.len() - 1], "I");
        assert_eq!(bins.iter().find(|b| b.label == "A").unwrap().count, 2);
        assert_eq!(bins.iter().find(|b| b.label == "B+").unwrap().count, 1);
        assert_eq!(bins.iter().find(|b| b.label == "I").unwrap().count, 1);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 4);
    }

    #[test]
    fn four_point_histogram_bins_on_the_point_bands() {
        let values = vec![
            GradeValue::Number(4.0),
            GradeValue::Number(2.9),
            GradeValue::Number(2.86),
        ];
        let bins = histogram(&values, GradeType::FourPoints);
        assert_eq!(
            bins.iter().find(|b| b.label == "[3.85,4.2)").unwrap().count,
            1
        );
        assert_eq!(
            bins.iter().find(|b| b.label == "[2.85,3.15)").unwrap().count,
            2
        );
    }

    #[test]
    fn out_of_band_values_are_not_counted() {
        let values = vec![GradeValue::Number(-3.0), GradeValue::Number(50.0)];
        let bins = histogram(&values, GradeType::Percentage);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 1);
    }
}
