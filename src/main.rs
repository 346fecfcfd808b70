use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use sqlx::sqlite::SqlitePool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gradekeeper::error::GradeError;
use gradekeeper::models::{self, Course, GradeValue, Weight};
use gradekeeper::{calc, db, export, report};

#[derive(Parser)]
#[command(name = "gradekeeper")]
#[command(about = "Personal grade tracker with per-course calculation functions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Course selector shared by every per-course command.
#[derive(Args)]
struct CourseArgs {
    #[arg(long)]
    number: String,
    #[arg(long)]
    semester: String,
    #[arg(long)]
    year: i32,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic sample data
    Seed,
    /// Create a course
    AddCourse {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        course: CourseArgs,
    },
    /// Create an assignment in a course
    AddAssignment {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Due date, e.g. 2026-03-15
        #[arg(long)]
        due: NaiveDate,
        /// One of: letter, points, 4points, percentage
        #[arg(long)]
        grade_type: String,
        /// A decimal weight, a point total, or CALC
        #[arg(long)]
        weight: String,
    },
    /// Enroll students from a roster CSV (last_name,first_name,sid,email)
    ImportRoster {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Enter or overwrite one student's grade for an assignment
    EnterGrade {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        sid: String,
        #[arg(long)]
        assignment: String,
        #[arg(long)]
        value: String,
    },
    /// Run the course's registered grade calculation function
    Calculate {
        #[command(flatten)]
        course: CourseArgs,
    },
    /// Per-assignment grade statistics
    Report {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export course grades to a CSV file
    Export {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        out: PathBuf,
    },
}

/// Course calculation functions live here, one registration per course,
/// keyed by sanitized course number plus term. Add yours alongside the
/// examples.
fn build_registry() -> calc::CalculatorRegistry {
    let mut registry = calc::CalculatorRegistry::new();
    registry.register(
        calc::calculator_key("25A", "Fall", 2025),
        Box::new(calc::weighted_letter_average),
    );
    registry.register(
        calc::calculator_key("12A", "Spring", 2026),
        Box::new(calc::points_share_percentage),
    );
    registry
}

async fn resolve_course(pool: &SqlitePool, args: &CourseArgs) -> anyhow::Result<Course> {
    let courses = db::select_courses(
        pool,
        None,
        Some(&args.number),
        Some(&args.semester),
        Some(args.year),
    )
    .await?;
    db::ensure_unique(courses).with_context(|| {
        format!(
            "course {} {} {} not found",
            args.number, args.semester, args.year
        )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gradekeeper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let database = std::env::var("GRADEKEEPER_DB")
        .unwrap_or_else(|_| "sqlite://gradekeeper.db".to_string());
    let pool = db::connect(&database)
        .await
        .with_context(|| format!("failed to open grade database {database}"))?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::init_db(&pool).await?;
            db::seed(&pool).await?;
            println!("Sample data inserted.");
        }
        Commands::AddCourse { name, course } => {
            let id = db::create_course(
                &pool,
                &name,
                &course.number,
                &course.semester,
                course.year,
            )
            .await?;
            println!("Created course {} ({id}).", course.number);
        }
        Commands::AddAssignment {
            course,
            name,
            description,
            due,
            grade_type,
            weight,
        } => {
            let grade_type: models::GradeType = grade_type.parse()?;
            let weight = Weight::parse(&weight)?;
            let course = resolve_course(&pool, &course).await?;
            let id = db::create_assignment(
                &pool,
                course.id,
                &name,
                description.as_deref(),
                due,
                Some(grade_type.as_str()),
                weight,
            )
            .await?;
            println!("Created assignment {name} ({id}).");
        }
        Commands::ImportRoster { course, csv } => {
            let course = resolve_course(&pool, &course).await?;
            let enrolled = db::import_roster(&pool, course.id, &csv).await?;
            println!("Enrolled {enrolled} students from {}.", csv.display());
        }
        Commands::EnterGrade {
            course,
            sid,
            assignment,
            value,
        } => {
            let course = resolve_course(&pool, &course).await?;
            let students = db::select_students(&pool, course.id).await?;
            let student = students
                .into_iter()
                .find(|s| s.sid == sid)
                .with_context(|| format!("no student with SID {sid} in this course"))?;
            let assignment = db::ensure_unique(
                db::select_assignments(&pool, course.id, Some(&assignment)).await?,
            )
            .with_context(|| format!("assignment {assignment} not found or ambiguous"))?;

            // overwrite any existing grade instead of stacking a second one
            let existing = match db::ensure_unique(
                db::select_grades(&pool, Some(student.id), Some(assignment.id)).await?,
            ) {
                Ok(grade) => Some(grade.id),
                Err(GradeError::NoRecordsFound) => None,
                Err(err) => return Err(err.into()),
            };
            db::create_or_update_grade(
                &pool,
                existing,
                assignment.id,
                student.id,
                &GradeValue::parse(&value),
            )
            .await?;
            println!(
                "Recorded {value} for {}, {} on {}.",
                student.last_name, student.first_name, assignment.name
            );
        }
        Commands::Calculate { course } => {
            let course = resolve_course(&pool, &course).await?;
            let registry = build_registry();
            match calc::calculate_course(&pool, &registry, &course).await {
                Ok(summary) => {
                    println!(
                        "Calculated {} grades for {} students.",
                        summary.grades_written, summary.students
                    );
                    for skip in &summary.skipped {
                        println!("Skipped {}: {}.", skip.name, skip.reason);
                    }
                }
                Err(GradeError::CalculatorNotFound { key }) => {
                    println!(
                        "Could not locate grade calculation function {key}. \
                         Have you written it?"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Report { course, json, out } => {
            let course = resolve_course(&pool, &course).await?;
            let report = report::grade_report(&pool, &course).await?;
            let rendered = if json {
                serde_json::to_string_pretty(&report)?
            } else {
                report.as_text()
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Export { course, out } => {
            let course = resolve_course(&pool, &course).await?;
            let written = export::export_grades(&pool, &course, &out).await?;
            println!("Exported {written} students to {}.", out.display());
        }
    }

    Ok(())
}
