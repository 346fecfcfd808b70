use crate::error::{GradeError, Result};
use crate::models::{GradeRecord, GradeType, GradeValue, Weight};
use crate::scale::{self, GradeScale};

/// Co-indexed value/weight/type/name columns extracted from grade rows,
/// the shape calculation functions work with. Rows without a value or a
/// declared grade type carry nothing to aggregate and are left out;
/// filtering previously calculated (`CALC`) rows is the recalculation
/// engine's job, not done here.
#[derive(Debug, Default)]
pub struct AggregationInput {
    pub values: Vec<GradeValue>,
    pub weights: Vec<Weight>,
    pub types: Vec<String>,
    pub names: Vec<String>,
}

impl AggregationInput {
    pub fn from_records<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a GradeRecord>,
    {
        let mut input = AggregationInput::default();
        for r in rows {
            let (Some(value), Some(grade_type)) = (&r.value, &r.grade_type) else {
                continue;
            };
            input.values.push(value.clone());
            input.weights.push(r.weight);
            input.types.push(grade_type.clone());
            input.names.push(r.assignment_name.clone());
        }
        input
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Arithmetic mean. Empty input (after filtering) is NaN, never an error.
pub fn unweighted_average(values: &[f64], filter_missing: bool) -> f64 {
    let values = filtered(values, filter_missing);
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sum of `value * weight` pairs. Weights are taken as given: no check
/// that they sum to 1 and no normalization, so point totals can be used
/// as weights directly. Empty input is NaN.
pub fn weighted_average(values: &[f64], weights: &[f64], filter_missing: bool) -> Result<f64> {
    if values.len() != weights.len() {
        return Err(GradeError::MismatchedLengths {
            values: values.len(),
            weights: weights.len(),
        });
    }
    let pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .filter(|(v, _)| !filter_missing || !v.is_nan())
        .map(|(v, w)| (*v, *w))
        .collect();
    if pairs.is_empty() {
        return Ok(f64::NAN);
    }
    Ok(pairs.iter().map(|(v, w)| v * w).sum())
}

/// Convert absolute point values into fractions of their sum. A zero sum
/// yields all-NaN weights instead of dividing into infinity.
pub fn weights_from_points(points: &[f64]) -> Vec<f64> {
    let total: f64 = points.iter().sum();
    if total == 0.0 {
        return vec![f64::NAN; points.len()];
    }
    points.iter().map(|p| p / total).collect()
}

/// The single policy point routing an aggregation to the numeric or the
/// letter implementation. Numeric grade types run `numeric_op` on the raw
/// values. Letter grades run `letter_op` when given; otherwise each letter
/// is converted on `scale` and `numeric_op` runs on the conversions.
pub fn calculation_for_type<R>(
    values: &[GradeValue],
    grade_type: GradeType,
    scale: &GradeScale,
    filter_missing: bool,
    numeric_op: impl Fn(&[f64]) -> R,
    letter_op: Option<&dyn Fn(&[GradeValue]) -> R>,
) -> R {
    match grade_type {
        GradeType::Points | GradeType::FourPoints | GradeType::Percentage => {
            numeric_op(&numeric_values(values, filter_missing))
        }
        GradeType::Letter => match letter_op {
            Some(op) => op(values),
            None => {
                let mut converted: Vec<f64> = values
                    .iter()
                    .map(|v| scale::letter_to_number(&v.to_string(), scale))
                    .collect();
                if filter_missing {
                    converted.retain(|n| !n.is_nan());
                }
                numeric_op(&converted)
            }
        },
    }
}

/// Minimum grade for the type. Numeric values order naturally; letters
/// order by scale position, so the minimum letter is the one highest on
/// the scale (`min` of B, A, C is A, as with the labels themselves).
/// Letters are compared on the 4.0 scale and reported by their original
/// label; ties keep the first occurrence.
pub fn min_for_type(values: &[GradeValue], grade_type: GradeType) -> Option<GradeValue> {
    extremum_for_type(values, grade_type, false)
}

/// Maximum grade for the type; see `min_for_type` (the maximum letter is
/// the one lowest on the scale).
pub fn max_for_type(values: &[GradeValue], grade_type: GradeType) -> Option<GradeValue> {
    extremum_for_type(values, grade_type, true)
}

fn extremum_for_type(
    values: &[GradeValue],
    grade_type: GradeType,
    prefer_higher: bool,
) -> Option<GradeValue> {
    calculation_for_type(
        values,
        grade_type,
        &scale::POINTS,
        false,
        |nums| extremum(nums, prefer_higher).map(GradeValue::Number),
        Some(&|letters| {
            let points: Vec<f64> = letters
                .iter()
                .map(|v| scale::letter_to_points(&v.to_string()))
                .collect();
            // scale position inverts the point comparison: A+ sits at
            // the top of the table with the most points
            extremum_index(&points, !prefer_higher).map(|i| letters[i].clone())
        }),
    )
}

/// Mean grade for the type: numeric types average raw values, letter
/// grades are averaged on the 4.0 scale and the numeric mean is returned.
pub fn mean_for_type(values: &[GradeValue], grade_type: GradeType, filter_missing: bool) -> f64 {
    calculation_for_type(
        values,
        grade_type,
        &scale::POINTS,
        filter_missing,
        |nums| unweighted_average(nums, false),
        None,
    )
}

fn numeric_values(values: &[GradeValue], filter_missing: bool) -> Vec<f64> {
    let mut nums: Vec<f64> = values.iter().map(GradeValue::as_f64).collect();
    if filter_missing {
        nums.retain(|n| !n.is_nan());
    }
    nums
}

fn filtered(values: &[f64], filter_missing: bool) -> Vec<f64> {
    if filter_missing {
        values.iter().copied().filter(|v| !v.is_nan()).collect()
    } else {
        values.to_vec()
    }
}

fn extremum(nums: &[f64], prefer_higher: bool) -> Option<f64> {
    extremum_index(nums, prefer_higher).map(|i| nums[i])
}

fn extremum_index(nums: &[f64], prefer_higher: bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &n) in nums.iter().enumerate() {
        if n.is_nan() {
            continue;
        }
        match best {
            None => best = Some((i, n)),
            Some((_, b)) if (prefer_higher && n > b) || (!prefer_higher && n < b) => {
                best = Some((i, n))
            }
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}
