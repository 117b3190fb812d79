//! Trial model: identity, lifecycle status, parameters and results.

use core::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::space::{ParamValue, Point, Space};

/// The state of a trial in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    /// Registered, waiting for a consumer.
    New,
    /// Owned by a consumer, possibly running.
    Reserved,
    /// Put on hold by the algorithm.
    Suspended,
    /// Execution was aborted from outside; may be reserved again.
    Interrupted,
    /// The evaluation finished and reported an objective.
    Completed,
    /// The evaluation failed.
    Broken,
}

impl TrialStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::New,
        Self::Reserved,
        Self::Suspended,
        Self::Interrupted,
        Self::Completed,
        Self::Broken,
    ];

    /// Statuses a consumer may reserve from.
    pub const RESERVABLE: [Self; 2] = [Self::New, Self::Interrupted];

    /// Returns `true` for `Completed` and `Broken`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Broken)
    }

    /// Returns `true` if a consumer may reserve a trial in this status.
    #[must_use]
    pub fn is_reservable(self) -> bool {
        Self::RESERVABLE.contains(&self)
    }

    /// The lowercase name used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reserved => "reserved",
            Self::Suspended => "suspended",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Broken => "broken",
        }
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a result entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// The value being optimized.
    Objective,
    /// A constraint value.
    Constraint,
    /// A gradient component.
    Gradient,
    /// Free-form statistic reported by the program.
    Statistic,
    /// A provisional value synthesized for a trial still in flight.
    Lie,
}

/// A named, typed result reported for a trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Name chosen by the evaluated program.
    pub name: String,
    /// The kind of value.
    #[serde(rename = "type")]
    pub kind: ResultType,
    /// The reported value.
    pub value: f64,
}

impl TrialResult {
    /// Creates a result entry.
    pub fn new(name: impl Into<String>, kind: ResultType, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
        }
    }

    /// Creates an objective result entry.
    pub fn objective(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, ResultType::Objective, value)
    }
}

/// One parameter of a trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Dimension name.
    pub name: String,
    /// Prior type label (`real`, `integer`, `categorical`).
    #[serde(rename = "type")]
    pub kind: String,
    /// The value.
    pub value: ParamValue,
}

/// A single configuration submitted for evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Identity derived from the experiment and the params.
    pub id: String,
    /// Name of the owning experiment.
    pub experiment: String,
    /// Ordered parameters, one per dimension of the space.
    pub params: Vec<Param>,
    /// Lifecycle status.
    pub status: TrialStatus,
    /// Reported (or synthesized) results.
    #[serde(default)]
    pub results: Vec<TrialResult>,
    /// Lineage frontier the trial was produced from.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Directory assigned at execution time.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// When the trial was registered.
    #[serde(default)]
    pub submit_time: Option<DateTime<Utc>>,
    /// When the trial was last reserved.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the trial reached a terminal status.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Last pacemaker heartbeat.
    #[serde(default)]
    pub heartbeat: Option<DateTime<Utc>>,
    /// Token of the consumer holding the reservation. Only set while the
    /// trial is `reserved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl Trial {
    /// Creates a new trial from ordered params. The id is derived from
    /// `experiment` and `params`.
    #[must_use]
    pub fn new(experiment: impl Into<String>, params: Vec<Param>) -> Self {
        let experiment = experiment.into();
        let id = compute_id(&experiment, &params);
        Self {
            id,
            experiment,
            params,
            status: TrialStatus::New,
            results: Vec::new(),
            parents: Vec::new(),
            working_dir: None,
            submit_time: None,
            start_time: None,
            end_time: None,
            heartbeat: None,
            owner: None,
        }
    }

    /// Converts a point of `space` into a new trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlgorithmInvariant`] if the point does not fit the space.
    pub fn from_point(experiment: &str, space: &Space, point: &[ParamValue]) -> Result<Self> {
        if !space.contains(point) {
            return Err(Error::AlgorithmInvariant(format!(
                "point {point:?} does not belong to the search space"
            )));
        }
        let params = space
            .dimensions()
            .iter()
            .zip(point)
            .map(|(dim, value)| Param {
                name: dim.name.clone(),
                kind: dim.prior.type_name().to_owned(),
                value: value.clone(),
            })
            .collect();
        Ok(Self::new(experiment, params))
    }

    /// Converts the trial back into a point, ordered like `space`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlgorithmInvariant`] if a dimension has no matching param.
    pub fn to_point(&self, space: &Space) -> Result<Point> {
        space
            .dimensions()
            .iter()
            .map(|dim| {
                self.params
                    .iter()
                    .find(|p| p.name == dim.name)
                    .map(|p| p.value.clone())
                    .ok_or_else(|| {
                        Error::AlgorithmInvariant(format!(
                            "trial {} has no value for dimension '{}'",
                            self.id, dim.name
                        ))
                    })
            })
            .collect()
    }

    /// The objective value, falling back to a lying result when the trial
    /// has not reported one.
    #[must_use]
    pub fn objective(&self) -> Option<&TrialResult> {
        self.results
            .iter()
            .find(|r| r.kind == ResultType::Objective)
            .or_else(|| self.results.iter().find(|r| r.kind == ResultType::Lie))
    }

    /// Returns the parameter value with the given name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

impl fmt::Display for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trial({}, status={}, params=", self.id, self.status)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", param.name, param.value)?;
        }
        f.write_str(")")
    }
}

fn compute_id(experiment: &str, params: &[Param]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(experiment.as_bytes());
    for param in params {
        hasher.update(b"|");
        hasher.update(param.name.as_bytes());
        hasher.update(b":");
        hasher.update(param.kind.as_bytes());
        hasher.update(b"=");
        // Debug keeps the full precision and distinguishes 1 from 1.0.
        hasher.update(format!("{:?}", param.value).as_bytes());
    }
    format!("{:064x}", hasher.finalize())
}
