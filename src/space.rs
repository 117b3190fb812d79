//! Search space dimensions and parameter values.
//!
//! The space is intentionally small: it knows the name and prior of each
//! dimension, can draw a uniform sample, and can check that a point fits.
//! Richer transformations belong to the algorithms that consume it.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
    /// A categorical value, stored as the chosen label.
    Categorical(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Categorical(v) => f.write_str(v),
        }
    }
}

/// An ordered set of values, one per dimension of the space.
pub type Point = Vec<ParamValue>;

/// Prior for floating-point dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloatPrior {
    /// Lower bound (inclusive).
    pub low: f64,
    /// Upper bound (inclusive).
    pub high: f64,
    /// Whether to sample in log space.
    #[serde(default)]
    pub log_scale: bool,
}

/// Prior for integer dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntPrior {
    /// Lower bound (inclusive).
    pub low: i64,
    /// Upper bound (inclusive).
    pub high: i64,
}

/// Prior for categorical dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoricalPrior {
    /// The available labels.
    pub choices: Vec<String>,
}

/// The prior of one dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Prior {
    /// Real-valued dimension.
    Real(FloatPrior),
    /// Integer dimension.
    Integer(IntPrior),
    /// Categorical dimension.
    Categorical(CategoricalPrior),
}

impl Prior {
    /// The type label recorded on trial parameters.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Real(_) => "real",
            Self::Integer(_) => "integer",
            Self::Categorical(_) => "categorical",
        }
    }

    /// Returns `true` if `value` lies within this prior.
    #[must_use]
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (Self::Real(p), ParamValue::Float(v)) => (p.low..=p.high).contains(v),
            (Self::Integer(p), ParamValue::Int(v)) => (p.low..=p.high).contains(v),
            (Self::Categorical(p), ParamValue::Categorical(v)) => p.choices.contains(v),
            _ => false,
        }
    }

    /// Checks that values can be drawn from this prior.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBounds`] if `low > high` (or a bound is NaN),
    /// [`Error::InvalidLogBounds`] for a log-scaled prior with `low <= 0`, and
    /// [`Error::EmptyChoices`] for a categorical prior without choices.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Real(p) => {
                if p.low.is_nan() || p.high.is_nan() || p.low > p.high {
                    return Err(Error::InvalidBounds {
                        low: p.low,
                        high: p.high,
                    });
                }
                if p.log_scale && p.low <= 0.0 {
                    return Err(Error::InvalidLogBounds);
                }
            }
            Self::Integer(p) => {
                if p.low > p.high {
                    return Err(Error::InvalidBounds {
                        low: p.low as f64,
                        high: p.high as f64,
                    });
                }
            }
            Self::Categorical(p) => {
                if p.choices.is_empty() {
                    return Err(Error::EmptyChoices);
                }
            }
        }
        Ok(())
    }

    fn sample(&self, rng: &mut fastrand::Rng) -> Result<ParamValue> {
        self.validate()?;
        let value = match self {
            Self::Real(p) => {
                let value = if p.log_scale {
                    f64_range(rng, p.low.ln(), p.high.ln()).exp()
                } else {
                    f64_range(rng, p.low, p.high)
                };
                ParamValue::Float(value.clamp(p.low, p.high))
            }
            Self::Integer(p) => ParamValue::Int(rng.i64(p.low..=p.high)),
            Self::Categorical(p) => {
                ParamValue::Categorical(p.choices[rng.usize(0..p.choices.len())].clone())
            }
        };
        Ok(value)
    }
}

/// A named dimension of the search space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// The parameter name passed to the evaluated program.
    pub name: String,
    /// The prior values are drawn from.
    pub prior: Prior,
}

/// An ordered collection of dimensions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Space {
    dimensions: Vec<Dimension>,
}

impl Space {
    /// Creates an empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a real-valued dimension.
    #[must_use]
    pub fn real(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.with(
            name,
            Prior::Real(FloatPrior {
                low,
                high,
                log_scale: false,
            }),
        )
    }

    /// Adds a log-uniform real dimension. `low` must be positive.
    #[must_use]
    pub fn log_real(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.with(
            name,
            Prior::Real(FloatPrior {
                low,
                high,
                log_scale: true,
            }),
        )
    }

    /// Adds an integer dimension.
    #[must_use]
    pub fn integer(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.with(name, Prior::Integer(IntPrior { low, high }))
    }

    /// Adds a categorical dimension.
    #[must_use]
    pub fn categorical<S: Into<String>>(
        self,
        name: impl Into<String>,
        choices: impl IntoIterator<Item = S>,
    ) -> Self {
        let choices = choices.into_iter().map(Into::into).collect();
        self.with(name, Prior::Categorical(CategoricalPrior { choices }))
    }

    fn with(mut self, name: impl Into<String>, prior: Prior) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            prior,
        });
        self
    }

    /// The dimensions, in order.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    /// Returns `true` if the space has no dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Returns `true` if `point` has one in-range value per dimension.
    #[must_use]
    pub fn contains(&self, point: &[ParamValue]) -> bool {
        point.len() == self.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(point)
                .all(|(dim, value)| dim.prior.contains(value))
    }

    /// Checks every dimension's prior, see [`Prior::validate`].
    ///
    /// # Errors
    ///
    /// Returns the first invalid prior's error.
    pub fn validate(&self) -> Result<()> {
        self.dimensions.iter().try_for_each(|d| d.prior.validate())
    }

    /// Draws one point uniformly from the space.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a dimension has no values to draw from.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> Result<Point> {
        self.dimensions.iter().map(|d| d.prior.sample(rng)).collect()
    }
}

/// Generate a random `f64` in the range `[low, high)`.
#[inline]
fn f64_range(rng: &mut fastrand::Rng, low: f64, high: f64) -> f64 {
    low + rng.f64() * (high - low)
}
