use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{GradeError, Result};
use crate::models::{Assignment, Course, Grade, GradeRecord, GradeValue, Student, Weight};

pub async fn connect(database: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database)?.create_if_missing(true);
    // single connection: every operation is sequential anyway
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &SqlitePool) -> Result<()> {
    let ancient = upsert_course(pool, "Ancient philosophy", "25A", "Fall", 2025).await?;
    let logic = upsert_course(pool, "Introduction to logic", "12A", "Spring", 2026).await?;

    let avery =
        upsert_student(pool, "Avery", "Nakamura", "98765432", Some("avery@example.com")).await?;
    let jules =
        upsert_student(pool, "Jules", "Okafor", "12345678", Some("jules@example.com")).await?;

    create_membership(pool, ancient, avery).await?;
    create_membership(pool, ancient, jules).await?;
    create_membership(pool, logic, avery).await?;

    let papers = [
        ("Paper 1", "Socrates paper", "2025-09-17"),
        ("Paper 2", "Plato paper", "2025-10-30"),
        ("Paper 3", "Aristotle paper", "2025-11-26"),
        ("Exam grade", "Final exam", "2025-12-14"),
    ];
    let mut paper_ids = Vec::new();
    for (name, description, due) in papers {
        let id = seed_assignment(
            pool,
            ancient,
            name,
            description,
            due,
            Some("letter"),
            Weight::Points(0.25),
        )
        .await?;
        paper_ids.push(id);
    }

    let hw1 = seed_assignment(
        pool,
        logic,
        "HW1",
        "problem set",
        "2026-01-29",
        Some("points"),
        Weight::Points(105.0),
    )
    .await?;
    let hw2 = seed_assignment(
        pool,
        logic,
        "HW2",
        "problem set",
        "2026-02-05",
        Some("points"),
        Weight::Points(96.0),
    )
    .await?;

    let entered = [
        (paper_ids[0], avery, "C-"),
        (paper_ids[1], avery, "B-"),
        (paper_ids[2], avery, "A"),
        (paper_ids[3], avery, "B+"),
        (paper_ids[0], jules, "A"),
        (paper_ids[1], jules, "A"),
        (paper_ids[2], jules, "A"),
        (paper_ids[3], jules, "A"),
        (hw1, avery, "104"),
        (hw2, avery, "90"),
    ];
    for (assignment_id, student_id, value) in entered {
        seed_grade(pool, assignment_id, student_id, value).await?;
    }

    Ok(())
}

async fn upsert_course(
    pool: &SqlitePool,
    name: &str,
    number: &str,
    semester: &str,
    year: i32,
) -> Result<Uuid> {
    let row = sqlx::query(
        r#"
        INSERT INTO courses (id, name, number, semester, year)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (number, semester, year) DO UPDATE SET name = excluded.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(number)
    .bind(semester)
    .bind(year)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

async fn upsert_student(
    pool: &SqlitePool,
    first_name: &str,
    last_name: &str,
    sid: &str,
    email: Option<&str>,
) -> Result<Uuid> {
    let row = sqlx::query(
        r#"
        INSERT INTO students (id, first_name, last_name, sid, email)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (sid) DO UPDATE
        SET first_name = excluded.first_name,
            last_name = excluded.last_name,
            email = excluded.email
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(first_name)
    .bind(last_name)
    .bind(sid)
    .bind(email)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

async fn seed_assignment(
    pool: &SqlitePool,
    course_id: Uuid,
    name: &str,
    description: &str,
    due: &str,
    grade_type: Option<&str>,
    weight: Weight,
) -> Result<Uuid> {
    let existing = select_assignments(pool, course_id, Some(name)).await?;
    if let Some(a) = existing.first() {
        return Ok(a.id);
    }
    let due_date: NaiveDate = due.parse()?;
    create_assignment(pool, course_id, name, Some(description), due_date, grade_type, weight).await
}

async fn seed_grade(
    pool: &SqlitePool,
    assignment_id: Uuid,
    student_id: Uuid,
    value: &str,
) -> Result<()> {
    let existing = select_grades(pool, Some(student_id), Some(assignment_id)).await?;
    if existing.is_empty() {
        create_or_update_grade(pool, None, assignment_id, student_id, &GradeValue::parse(value))
            .await?;
    }
    Ok(())
}

pub async fn select_courses(
    pool: &SqlitePool,
    course_id: Option<Uuid>,
    number: Option<&str>,
    semester: Option<&str>,
    year: Option<i32>,
) -> Result<Vec<Course>> {
    let mut query =
        String::from("SELECT id, name, number, semester, year FROM courses WHERE 1 = 1");
    if course_id.is_some() {
        query.push_str(" AND id = ?");
    }
    if number.is_some() {
        query.push_str(" AND number = ?");
    }
    if semester.is_some() {
        query.push_str(" AND semester = ?");
    }
    if year.is_some() {
        query.push_str(" AND year = ?");
    }
    query.push_str(" ORDER BY year, semester, number");

    let mut q = sqlx::query(&query);
    if let Some(id) = course_id {
        q = q.bind(id);
    }
    if let Some(number) = number {
        q = q.bind(number);
    }
    if let Some(semester) = semester {
        q = q.bind(semester);
    }
    if let Some(year) = year {
        q = q.bind(year);
    }

    let rows = q.fetch_all(pool).await?;
    let mut courses = Vec::new();
    for row in rows {
        courses.push(Course {
            id: row.get("id"),
            name: row.get("name"),
            number: row.get("number"),
            semester: row.get("semester"),
            year: row.get("year"),
        });
    }
    Ok(courses)
}

pub async fn select_students(pool: &SqlitePool, course_id: Uuid) -> Result<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.first_name, s.last_name, s.sid, s.email
        FROM students s
        JOIN course_memberships m ON m.student_id = s.id
        WHERE m.course_id = ?
        ORDER BY s.last_name, s.first_name
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let mut students = Vec::new();
    for row in rows {
        students.push(Student {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            sid: row.get("sid"),
            email: row.get("email"),
        });
    }
    Ok(students)
}

/// Assignments for a course, ordered by due date. Export and reporting
/// rely on this ordering for their column order.
pub async fn select_assignments(
    pool: &SqlitePool,
    course_id: Uuid,
    name: Option<&str>,
) -> Result<Vec<Assignment>> {
    let mut query = String::from(
        "SELECT id, course_id, name, description, due_date, grade_type, weight
         FROM assignments WHERE course_id = ?",
    );
    if name.is_some() {
        query.push_str(" AND name = ?");
    }
    query.push_str(" ORDER BY due_date, name");

    let mut q = sqlx::query(&query).bind(course_id);
    if let Some(name) = name {
        q = q.bind(name);
    }

    let rows = q.fetch_all(pool).await?;
    let mut assignments = Vec::new();
    for row in rows {
        let weight: String = row.get("weight");
        assignments.push(Assignment {
            id: row.get("id"),
            course_id: row.get("course_id"),
            name: row.get("name"),
            description: row.get("description"),
            due_date: row.get("due_date"),
            grade_type: row.get("grade_type"),
            weight: Weight::parse(&weight)?,
        });
    }
    Ok(assignments)
}

pub async fn select_grades(
    pool: &SqlitePool,
    student_id: Option<Uuid>,
    assignment_id: Option<Uuid>,
) -> Result<Vec<Grade>> {
    let mut query = String::from(
        "SELECT id, assignment_id, student_id, value, timestamp FROM grades WHERE 1 = 1",
    );
    if student_id.is_some() {
        query.push_str(" AND student_id = ?");
    }
    if assignment_id.is_some() {
        query.push_str(" AND assignment_id = ?");
    }

    let mut q = sqlx::query(&query);
    if let Some(id) = student_id {
        q = q.bind(id);
    }
    if let Some(id) = assignment_id {
        q = q.bind(id);
    }

    let rows = q.fetch_all(pool).await?;
    let mut grades = Vec::new();
    for row in rows {
        let value: String = row.get("value");
        grades.push(Grade {
            id: row.get("id"),
            assignment_id: row.get("assignment_id"),
            student_id: row.get("student_id"),
            value: GradeValue::parse(&value),
            timestamp: row.get("timestamp"),
        });
    }
    Ok(grades)
}

/// Every (member, assignment) pair of a course, with the grade columns
/// NULL where no grade has been entered. Those placeholder rows are how
/// reports and calculators see missing grades.
pub async fn select_grades_for_course_members(
    pool: &SqlitePool,
    course_id: Uuid,
    student_id: Option<Uuid>,
) -> Result<Vec<GradeRecord>> {
    let mut query = String::from(
        r#"
        SELECT g.id AS grade_id, a.id AS assignment_id, m.student_id AS student_id,
               a.name AS assignment_name, a.grade_type AS grade_type, a.weight AS weight,
               g.value AS value, g.timestamp AS timestamp
        FROM course_memberships m
        JOIN assignments a ON a.course_id = m.course_id
        LEFT JOIN grades g ON g.assignment_id = a.id AND g.student_id = m.student_id
        WHERE m.course_id = ?
        "#,
    );
    if student_id.is_some() {
        query.push_str(" AND m.student_id = ?");
    }
    query.push_str(" ORDER BY a.due_date, a.name");

    let mut q = sqlx::query(&query).bind(course_id);
    if let Some(id) = student_id {
        q = q.bind(id);
    }

    let rows = q.fetch_all(pool).await?;
    let mut records = Vec::new();
    for row in rows {
        let weight: String = row.get("weight");
        let value: Option<String> = row.get("value");
        records.push(GradeRecord {
            grade_id: row.get("grade_id"),
            assignment_id: row.get("assignment_id"),
            student_id: row.get("student_id"),
            assignment_name: row.get("assignment_name"),
            grade_type: row.get("grade_type"),
            weight: Weight::parse(&weight)?,
            value: value.as_deref().map(GradeValue::parse),
            timestamp: row.get("timestamp"),
        });
    }
    Ok(records)
}

pub async fn create_course(
    pool: &SqlitePool,
    name: &str,
    number: &str,
    semester: &str,
    year: i32,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO courses (id, name, number, semester, year) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(number)
        .bind(semester)
        .bind(year)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn create_membership(pool: &SqlitePool, course_id: Uuid, student_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO course_memberships (id, student_id, course_id)
        VALUES (?, ?, ?)
        ON CONFLICT (student_id, course_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(course_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_assignment(
    pool: &SqlitePool,
    course_id: Uuid,
    name: &str,
    description: Option<&str>,
    due_date: NaiveDate,
    grade_type: Option<&str>,
    weight: Weight,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO assignments (id, course_id, name, description, due_date, grade_type, weight)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(course_id)
    .bind(name)
    .bind(description)
    .bind(due_date)
    .bind(grade_type)
    .bind(weight.to_string())
    .execute(pool)
    .await?;
    Ok(id)
}

/// Insert a grade, or overwrite value and timestamp when `grade_id` names
/// an existing row.
pub async fn create_or_update_grade(
    pool: &SqlitePool,
    grade_id: Option<Uuid>,
    assignment_id: Uuid,
    student_id: Uuid,
    value: &GradeValue,
) -> Result<Uuid> {
    let id = grade_id.unwrap_or_else(Uuid::new_v4);
    sqlx::query(
        r#"
        INSERT INTO grades (id, assignment_id, student_id, value, timestamp)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE
        SET value = excluded.value, timestamp = excluded.timestamp
        "#,
    )
    .bind(id)
    .bind(assignment_id)
    .bind(student_id)
    .bind(value.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn update_grade(pool: &SqlitePool, grade_id: Uuid, value: &GradeValue) -> Result<()> {
    sqlx::query("UPDATE grades SET value = ?, timestamp = ? WHERE id = ?")
        .bind(value.to_string())
        .bind(Utc::now())
        .bind(grade_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exactly one row, or a lookup error naming the miss.
pub fn ensure_unique<T>(mut rows: Vec<T>) -> Result<T> {
    match rows.len() {
        0 => Err(GradeError::NoRecordsFound),
        1 => Ok(rows.remove(0)),
        n => Err(GradeError::MultipleRecordsFound(n)),
    }
}

pub async fn import_roster(pool: &SqlitePool, course_id: Uuid, csv_path: &Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct RosterRow {
        last_name: String,
        first_name: String,
        sid: String,
        email: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut enrolled = 0usize;

    for result in reader.deserialize::<RosterRow>() {
        let row = result?;
        let student_id = upsert_student(
            pool,
            &row.first_name,
            &row.last_name,
            &row.sid,
            row.email.as_deref(),
        )
        .await?;
        create_membership(pool, course_id, student_id).await?;
        enrolled += 1;
    }

    Ok(enrolled)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory store for tests. One connection with no idle reaping,
    /// otherwise the memory database vanishes between queries.
    pub(crate) async fn memory_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    pub(crate) async fn seeded_course(
        pool: &SqlitePool,
        number: &str,
        semester: &str,
        year: i32,
    ) -> Course {
        seed(pool).await.unwrap();
        ensure_unique(
            select_courses(pool, None, Some(number), Some(semester), Some(year))
                .await
                .unwrap(),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{memory_pool, seeded_course};
    use super::*;

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = memory_pool().await;
        seed(&pool).await.unwrap();
        seed(&pool).await.unwrap();

        let courses = select_courses(&pool, None, None, None, None).await.unwrap();
        assert_eq!(courses.len(), 2);

        let ancient = seeded_course(&pool, "25A", "Fall", 2025).await;
        assert_eq!(select_students(&pool, ancient.id).await.unwrap().len(), 2);
        assert_eq!(
            select_assignments(&pool, ancient.id, None).await.unwrap().len(),
            4
        );
        assert_eq!(select_grades(&pool, None, None).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn assignments_come_back_in_due_date_order() {
        let pool = memory_pool().await;
        let ancient = seeded_course(&pool, "25A", "Fall", 2025).await;
        let names: Vec<String> = select_assignments(&pool, ancient.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ["Paper 1", "Paper 2", "Paper 3", "Exam grade"]);
    }

    #[tokio::test]
    async fn member_grade_join_includes_missing_grades() {
        let pool = memory_pool().await;
        let logic = seeded_course(&pool, "12A", "Spring", 2026).await;

        let records = select_grades_for_course_members(&pool, logic.id, None)
            .await
            .unwrap();
        // one member, two assignments, both graded
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.grade_id.is_some()));

        // a second member joins; their rows appear with NULL grade columns
        let ancient = seeded_course(&pool, "25A", "Fall", 2025).await;
        let students = select_students(&pool, ancient.id).await.unwrap();
        let newcomer = students
            .iter()
            .find(|s| s.sid == "12345678")
            .expect("seeded student");
        create_membership(&pool, logic.id, newcomer.id).await.unwrap();

        let records = select_grades_for_course_members(&pool, logic.id, None)
            .await
            .unwrap();
        assert_eq!(records.len(), 4);
        let missing: Vec<&GradeRecord> = records.iter().filter(|r| r.grade_id.is_none()).collect();
        assert_eq!(missing.len(), 2);
        assert!(missing.iter().all(|r| r.value.is_none()));
        assert!(missing.iter().all(|r| r.student_id == newcomer.id));
    }

    #[tokio::test]
    async fn create_or_update_overwrites_by_grade_id() {
        let pool = memory_pool().await;
        let logic = seeded_course(&pool, "12A", "Spring", 2026).await;
        let hw1 = ensure_unique(select_assignments(&pool, logic.id, Some("HW1")).await.unwrap())
            .unwrap();
        let grade =
            ensure_unique(select_grades(&pool, None, Some(hw1.id)).await.unwrap()).unwrap();

        let id = create_or_update_grade(
            &pool,
            Some(grade.id),
            grade.assignment_id,
            grade.student_id,
            &GradeValue::Number(99.0),
        )
        .await
        .unwrap();
        assert_eq!(id, grade.id);

        let grades = select_grades(&pool, None, Some(hw1.id)).await.unwrap();
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].value, GradeValue::Number(99.0));
    }

    #[tokio::test]
    async fn ensure_unique_distinguishes_zero_one_many() {
        assert!(matches!(
            ensure_unique(Vec::<u8>::new()),
            Err(GradeError::NoRecordsFound)
        ));
        assert_eq!(ensure_unique(vec![7]).unwrap(), 7);
        assert!(matches!(
            ensure_unique(vec![1, 2]),
            Err(GradeError::MultipleRecordsFound(2))
        ));
    }

    #[tokio::test]
    async fn roster_import_upserts_by_sid() {
        use std::io::Write;

        let pool = memory_pool().await;
        let logic = seeded_course(&pool, "12A", "Spring", 2026).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "last_name,first_name,sid,email").unwrap();
        writeln!(file, "Okafor,Jules,12345678,jules@example.com").unwrap();
        writeln!(file, "Reyes,Sam,55555555,sam@example.com").unwrap();
        drop(file);

        let enrolled = import_roster(&pool, logic.id, &path).await.unwrap();
        assert_eq!(enrolled, 2);
        let students = select_students(&pool, logic.id).await.unwrap();
        // Avery from the seed plus the two imported; Jules not duplicated
        assert_eq!(students.len(), 3);

        // importing again changes nothing
        import_roster(&pool, logic.id, &path).await.unwrap();
        assert_eq!(select_students(&pool, logic.id).await.unwrap().len(), 3);
    }
}
