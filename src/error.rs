use thiserror::Error;

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("value {value} not on scale with max={max} and min={min}")]
    ScaleRange { value: f64, max: f64, min: f64 },

    #[error("unknown grade type: {0}")]
    UnknownGradeType(String),

    #[error("assignment has no declared grade type")]
    MissingGradeType,

    #[error("invalid assignment weight: {0}")]
    InvalidWeight(String),

    #[error("values and weights differ in length ({values} vs {weights})")]
    MismatchedLengths { values: usize, weights: usize },

    #[error("no value given for calculated grade {name}")]
    MissingValue { name: String },

    #[error("no assignment name, assignment id, or grade id given for calculated grade")]
    MissingIdentifier,

    #[error("multiple assignments named {name} in course")]
    AmbiguousAssignment { name: String },

    #[error("no grade calculation function registered under {key}")]
    CalculatorNotFound { key: String },

    #[error("no records found")]
    NoRecordsFound,

    #[error("multiple records found ({0})")]
    MultipleRecordsFound(usize),

    #[error("invalid date: {0}")]
    Date(#[from] chrono::ParseError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GradeError>;
