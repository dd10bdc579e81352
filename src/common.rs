use portable_atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::datum::StandardUnit;
use crate::syntax::NameError;

/// Errors that could occur while building or installing a CloudWatch recorder/exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No CloudWatch namespace was configured.
    #[error("a CloudWatch namespace is required")]
    MissingNamespace,

    /// No client was configured to submit metric data with.
    #[error("a client to submit metric data with is required")]
    MissingClient,

    /// The global dimensions are not a valid encoded name.
    #[error("invalid global dimensions: {0}")]
    InvalidGlobalDimensions(#[from] NameError),

    /// Creating the networking event loop did not succeed.
    #[error("failed to spawn Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// Installing the recorder did not succeed.
    #[error("failed to install exporter as global recorder: {0}")]
    FailedToSetGlobalRecorder(String),
}

/// Matches a metric identifier in a specific way.
///
/// Used to pick which metrics of the registry get reported.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum Matcher {
    /// Matches the entire metric identifier.
    Full(String),
    /// Matches the beginning of the metric identifier.
    Prefix(String),
    /// Matches the end of the metric identifier.
    Suffix(String),
}

impl Matcher {
    /// Checks if the given identifier matches this matcher.
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) => input.starts_with(prefix),
            Matcher::Suffix(suffix) => input.ends_with(suffix),
            Matcher::Full(full) => input == full,
        }
    }
}

/// Identity of a metric instance in the registry.
///
/// Every storage cell gets its own id when it is created, so a metric which is removed and
/// registered again under the same name is a different metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u64);

static NEXT_METRIC_ID: AtomicU64 = AtomicU64::new(0);

impl MetricId {
    /// Hands out an id no other metric of this process has.
    pub fn next() -> Self {
        MetricId(NEXT_METRIC_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cumulative count of a counter, meter, histogram or timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counting {
    pub id: MetricId,
    pub count: u64,
}

/// Samples recorded by a histogram or timer since the previous poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    values: Vec<f64>,
}

impl SampleSet {
    pub fn new(values: Vec<f64>) -> Self {
        SampleSet { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Smallest sample, or 0 when there are none.
    pub fn min(&self) -> f64 {
        self.values.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    /// Largest sample, or 0 when there are none.
    pub fn max(&self) -> f64 {
        self.values.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }
}

/// A histogram or timer as seen at one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub counting: Counting,
    pub samples: SampleSet,
    /// Multiplier applied to the sum, minimum and maximum of the samples.
    pub rescale: f64,
    /// Unit of the rescaled statistics.
    pub unit: Option<StandardUnit>,
}

/// Everything the registry held at one poll, as (encoded identifier, metric) pairs.
///
/// Distinct registry keys may encode to the same identifier, so an identifier can show up
/// more than once. Every entry is reported on its own.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub gauges: Vec<(String, Option<f64>)>,
    pub counters: Vec<(String, Counting)>,
    pub meters: Vec<(String, Counting)>,
    pub histograms: Vec<(String, Sampling)>,
    pub timers: Vec<(String, Sampling)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.gauges.len()
            + self.counters.len()
            + self.meters.len()
            + self.histograms.len()
            + self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
