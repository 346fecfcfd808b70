use crate::error::{GradeError, Result};

/// Label of the sentinel band that absorbs missing (NaN) grades.
pub const INCOMPLETE: &str = "I";

/// One band of a grading scale: `upper` is exclusive, `lower` inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub label: &'static str,
    pub value: f64,
    pub upper: f64,
    pub lower: f64,
}

const fn band(label: &'static str, value: f64, upper: f64, lower: f64) -> Band {
    Band {
        label,
        value,
        upper,
        lower,
    }
}

/// An ordered band table. Bands are scanned in declared (descending)
/// order, so a value sitting on the boundary of two adjacent bands maps
/// to the higher grade. The final band is the Incomplete sentinel, whose
/// inverted bounds match no finite value.
#[derive(Debug, Clone, Copy)]
pub struct GradeScale {
    pub name: &'static str,
    pub bands: &'static [Band],
}

impl GradeScale {
    /// Exclusive upper bound of the whole scale.
    pub fn max(&self) -> f64 {
        self.bands[0].upper
    }

    /// Inclusive lower bound of the whole scale.
    pub fn min(&self) -> f64 {
        self.bands[self.bands.len() - 2].lower
    }

    /// The bands carrying real grades, without the Incomplete sentinel.
    pub fn graded_bands(&self) -> &'static [Band] {
        &self.bands[..self.bands.len() - 1]
    }
}

// format: (letter grade, point value, exclusive max, inclusive min)
pub const POINTS: GradeScale = GradeScale {
    name: "4.0-point",
    bands: &[
        band("A+", 4.2, 5.0, 4.2),
        band("A", 4.0, 4.2, 3.85),
        band("A-", 3.7, 3.85, 3.5),
        band("B+", 3.3, 3.5, 3.15),
        band("B", 3.0, 3.15, 2.85),
        band("B-", 2.7, 2.85, 2.5),
        band("C+", 2.3, 2.5, 2.15),
        band("C", 2.0, 2.15, 1.85),
        band("C-", 1.7, 1.85, 1.5),
        band("D+", 1.3, 1.5, 1.15),
        band("D", 1.0, 1.15, 0.85),
        band("D-", 0.7, 0.85, 0.3),
        band("F", 0.0, 0.3, -1.0),
        band(INCOMPLETE, f64::NAN, f64::NEG_INFINITY, f64::INFINITY),
    ],
};

// The A+ band is deliberately wide so extra credit above 100 still maps
// to a letter instead of falling off the scale.
pub const PERCENTS: GradeScale = GradeScale {
    name: "percentage",
    bands: &[
        band("A+", 100.0, 200.0, 97.0),
        band("A", 95.0, 97.0, 94.0),
        band("A-", 92.0, 94.0, 90.0),
        band("B+", 88.0, 90.0, 87.0),
        band("B", 85.0, 87.0, 84.0),
        band("B-", 82.0, 84.0, 80.0),
        band("C+", 78.0, 80.0, 77.0),
        band("C", 75.0, 77.0, 74.0),
        band("C-", 72.0, 74.0, 70.0),
        band("D+", 68.0, 70.0, 67.0),
        band("D", 65.0, 67.0, 64.0),
        band("D-", 62.0, 64.0, 60.0),
        band("F", 58.0, 60.0, 0.0),
        band(INCOMPLETE, f64::NAN, f64::NEG_INFINITY, f64::INFINITY),
    ],
};

/// Convert a letter grade to a number on the given scale. Unknown
/// letters convert to NaN rather than an error.
pub fn letter_to_number(letter: &str, scale: &GradeScale) -> f64 {
    let canonical = letter.trim().to_ascii_uppercase();
    for b in scale.bands {
        if b.label == canonical {
            return b.value;
        }
    }
    f64::NAN
}

/// Convert a number to the letter of the band it falls in. NaN maps to
/// the Incomplete label; finite values outside every band are an error.
pub fn number_to_letter(n: f64, scale: &GradeScale) -> Result<&'static str> {
    if n.is_nan() {
        return Ok(INCOMPLETE);
    }
    for b in scale.bands {
        if b.lower <= n && n < b.upper {
            return Ok(b.label);
        }
    }
    Err(GradeError::ScaleRange {
        value: n,
        max: scale.max(),
        min: scale.min(),
    })
}

pub fn letter_to_points(letter: &str) -> f64 {
    letter_to_number(letter, &POINTS)
}

pub fn letter_to_percentage(letter: &str) -> f64 {
    letter_to_number(letter, &PERCENTS)
}

pub fn points_to_letter(p: f64) -> Result<&'static str> {
    number_to_letter(p, &POINTS)
}

pub fn percentage_to_letter(p: f64) -> Result<&'static str> {
    number_to_letter(p, &PERCENTS)
}
