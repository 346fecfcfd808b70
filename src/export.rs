use std::collections::HashMap;
use std::path::Path;

use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::error::Result;
use crate::models::Course;

/// Export a course's grades to CSV: one row per student, one column per
/// assignment in due-date order. Missing grades stay blank. When a
/// student somehow has two grades for one assignment, the first wins and
/// the duplicate is logged.
pub async fn export_grades(pool: &SqlitePool, course: &Course, out: &Path) -> Result<usize> {
    let assignments = db::select_assignments(pool, course.id, None).await?;
    let students = db::select_students(pool, course.id).await?;
    let all_grades = db::select_grades_for_course_members(pool, course.id, None).await?;

    let mut writer = csv::Writer::from_path(out)?;
    let mut header = vec!["Name".to_string(), "SID".to_string()];
    header.extend(assignments.iter().map(|a| a.name.clone()));
    writer.write_record(&header)?;

    let mut written = 0usize;
    for student in &students {
        let mut cells: HashMap<Uuid, String> = HashMap::new();
        for record in all_grades.iter().filter(|g| g.student_id == student.id) {
            let Some(value) = &record.value else {
                continue;
            };
            if cells.contains_key(&record.assignment_id) {
                tracing::warn!(
                    sid = %student.sid,
                    assignment = %record.assignment_name,
                    "multiple grades found; only exporting the first"
                );
                continue;
            }
            cells.insert(record.assignment_id, value.to_string());
        }

        let mut row = vec![
            format!("{}, {}", student.last_name, student.first_name),
            student.sid.clone(),
        ];
        for assignment in &assignments {
            row.push(cells.get(&assignment.id).cloned().unwrap_or_default());
        }
        writer.write_record(&row)?;
        written += 1;
    }

    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{memory_pool, seeded_course};
    use crate::models::GradeValue;

    async fn export_to_string(pool: &SqlitePool, course: &Course) -> (usize, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grades.csv");
        let written = export_grades(pool, course, &path).await.unwrap();
        (written, std::fs::read_to_string(&path).unwrap())
    }

    #[tokio::test]
    async fn header_lists_assignments_in_due_date_order() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "25A", "Fall", 2025).await;
        let (written, text) = export_to_string(&pool, &course).await;

        assert_eq!(written, 2);
        let header = text.lines().next().unwrap();
        assert_eq!(header, "Name,SID,Paper 1,Paper 2,Paper 3,Exam grade");
        assert!(text.contains("\"Nakamura, Avery\",98765432,C-,B-,A,B+"));
        assert!(text.contains("\"Okafor, Jules\",12345678,A,A,A,A"));
    }

    #[tokio::test]
    async fn missing_grades_export_as_blank_cells() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;

        // Jules joins the course but has no homework grades
        let ancient = seeded_course(&pool, "25A", "Fall", 2025).await;
        let students = db::select_students(&pool, ancient.id).await.unwrap();
        let jules = students.iter().find(|s| s.sid == "12345678").unwrap();
        db::create_membership(&pool, course.id, jules.id).await.unwrap();

        let (written, text) = export_to_string(&pool, &course).await;
        assert_eq!(written, 2);
        assert!(text.contains("\"Nakamura, Avery\",98765432,104,90"));
        assert!(text.contains("\"Okafor, Jules\",12345678,,"));
    }

    #[tokio::test]
    async fn duplicate_grades_keep_the_first_value() {
        let pool = memory_pool().await;
        let course = seeded_course(&pool, "12A", "Spring", 2026).await;
        let hw1 = db::ensure_unique(
            db::select_assignments(&pool, course.id, Some("HW1")).await.unwrap(),
        )
        .unwrap();
        let students = db::select_students(&pool, course.id).await.unwrap();

        // second grade row for the same assignment and student
        db::create_or_update_grade(&pool, None, hw1.id, students[0].id, &GradeValue::Number(1.0))
            .await
            .unwrap();

        let (_, text) = export_to_string(&pool, &course).await;
        let row = text.lines().find(|l| l.contains("Nakamura")).unwrap();
        // exactly one value made it into the HW1 cell
        let cells: Vec<&str> = row.split(',').collect();
        assert_eq!(cells.len(), 5);
        assert!(cells[3] == "104" || cells[3] == "1");
        assert_eq!(cells[4], "90");
    }
}
