use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::GradeError;

/// Storage spelling of the weight sentinel marking machine-computed grades.
pub const CALC_SENTINEL: &str = "CALC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeType {
    Letter,
    Points,
    #[serde(rename = "4points")]
    FourPoints,
    Percentage,
}

impl GradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeType::Letter => "letter",
            GradeType::Points => "points",
            GradeType::FourPoints => "4points",
            GradeType::Percentage => "percentage",
        }
    }
}

impl FromStr for GradeType {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "letter" => Ok(GradeType::Letter),
            "points" => Ok(GradeType::Points),
            "4points" => Ok(GradeType::FourPoints),
            "percentage" => Ok(GradeType::Percentage),
            other => Err(GradeError::UnknownGradeType(other.to_string())),
        }
    }
}

impl fmt::Display for GradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An assignment weight: either a numeric value (a fraction of the course
/// grade, or a raw point total) or the `CALC` sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Weight {
    Calc,
    Points(f64),
}

impl Weight {
    pub fn is_calc(&self) -> bool {
        matches!(self, Weight::Calc)
    }

    pub fn points(&self) -> f64 {
        match self {
            Weight::Calc => f64::NAN,
            Weight::Points(p) => *p,
        }
    }

    pub fn parse(s: &str) -> Result<Weight, GradeError> {
        if s == CALC_SENTINEL {
            return Ok(Weight::Calc);
        }
        s.parse::<f64>()
            .map(Weight::Points)
            .map_err(|_| GradeError::InvalidWeight(s.to_string()))
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weight::Calc => f.write_str(CALC_SENTINEL),
            Weight::Points(p) => write!(f, "{}", p),
        }
    }
}

/// A grade value as entered or calculated. Letter grades are text, every
/// numeric grade type is a number. Values are stored as text and numeric
/// text becomes `Number` again on read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GradeValue {
    Number(f64),
    Text(String),
}

impl GradeValue {
    pub fn parse(s: &str) -> GradeValue {
        match s.parse::<f64>() {
            Ok(n) => GradeValue::Number(n),
            Err(_) => GradeValue::Text(s.to_string()),
        }
    }

    /// Numeric view of the value; non-numeric text reads as NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            GradeValue::Number(n) => *n,
            GradeValue::Text(s) => s.parse::<f64>().unwrap_or(f64::NAN),
        }
    }
}

impl fmt::Display for GradeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeValue::Number(n) => write!(f, "{}", n),
            GradeValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub sid: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub number: String,
    pub semester: String,
    pub year: i32,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub due_date: NaiveDate,
    pub grade_type: Option<String>,
    pub weight: Weight,
}

/// A stored grade row.
#[derive(Debug, Clone)]
pub struct Grade {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub value: GradeValue,
    pub timestamp: DateTime<Utc>,
}

/// One row of the course-member grade join. `grade_id` is `None` for
/// assignments the student has no entered grade for; such rows mark a
/// missing grade rather than a value.
#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub grade_id: Option<Uuid>,
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub assignment_name: String,
    pub grade_type: Option<String>,
    pub weight: Weight,
    pub value: Option<GradeValue>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl GradeRecord {
    pub fn is_calculated(&self) -> bool {
        self.weight.is_calc()
    }
}

/// One calculated grade proposed by a calculation function. `value` is
/// required; at least one of `name`, `grade_id`, `assignment_id` must be
/// given. The remaining fields only apply when a new assignment has to be
/// created for the grade.
#[derive(Debug, Clone, Default)]
pub struct CalculatedGrade {
    pub name: Option<String>,
    pub value: Option<GradeValue>,
    pub grade_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub grade_type: Option<GradeType>,
    pub weight: Option<Weight>,
}

impl CalculatedGrade {
    pub fn named(name: impl Into<String>, value: GradeValue) -> Self {
        CalculatedGrade {
            name: Some(name.into()),
            value: Some(value),
            ..Default::default()
        }
    }
}

/// What a calculation function returns: either a name-to-value mapping or
/// full proposal records. The mapping form is transposed into proposals
/// before persistence.
#[derive(Debug)]
pub enum CalcOutput {
    Grades(std::collections::BTreeMap<String, GradeValue>),
    Proposals(Vec<CalculatedGrade>),
}

impl CalcOutput {
    pub fn into_proposals(self) -> Vec<CalculatedGrade> {
        match self {
            CalcOutput::Grades(map) => map
                .into_iter()
                .map(|(name, value)| CalculatedGrade::named(name, value))
                .collect(),
            CalcOutput::Proposals(proposals) => proposals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_type_round_trips_storage_spellings() {
        for spelling in ["letter", "points", "4points", "percentage"] {
            let ty: GradeType = spelling.parse().unwrap();
            assert_eq!(ty.as_str(), spelling);
        }
    }

    #[test]
    fn grade_type_rejects_unknown_spellings() {
        let err = "Letter".parse::<GradeType>().unwrap_err();
        assert!(matches!(err, GradeError::UnknownGradeType(s) if s == "Letter"));
    }

    #[test]
    fn weight_parses_sentinel_and_numbers() {
        assert!(Weight::parse("CALC").unwrap().is_calc());
        assert_eq!(Weight::parse("0.25").unwrap(), Weight::Points(0.25));
        assert!(Weight::parse("heavy").is_err());
    }

    #[test]
    fn grade_value_distinguishes_letters_from_numbers() {
        assert_eq!(GradeValue::parse("B+"), GradeValue::Text("B+".into()));
        assert_eq!(GradeValue::parse("92.5"), GradeValue::Number(92.5));
        assert!(GradeValue::Text("B+".into()).as_f64().is_nan());
    }

    #[test]
    fn mapping_output_transposes_to_proposals() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("Final grade".to_string(), GradeValue::Text("A-".into()));
        let proposals = CalcOutput::Grades(map).into_proposals();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].name.as_deref(), Some("Final grade"));
        assert_eq!(proposals[0].value, Some(GradeValue::Text("A-".into())));
        assert!(proposals[0].grade_id.is_none());
    }
}
