use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::trace;

use crate::common::{Counting, MetricId, Sampling, Snapshot};
use crate::datum::{Dimension, MetricDatum, StandardUnit, StatisticSet};
use crate::demux::DemuxedKey;
use crate::syntax::Syntax;

/// Predicate applied to every expanded datum right before submission. Returning `false`
/// drops the datum.
pub type ReporterFilter = Arc<dyn Fn(&MetricDatum) -> bool + Send + Sync + 'static>;

/// The kinds of submission a registry metric turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Submission {
    Gauge,
    CounterCount,
    MeterCount,
    HistoSamples,
    HistoStats,
    TimerSamples,
    TimerStats,
}

/// Name of the dimension identifying the kind of submission, and its value for each kind.
///
/// CloudWatch indexes on these, so they can be changed to stay compatible with data submitted
/// by other reporters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDimensions {
    pub name: String,
    pub gauge: String,
    /// "counterCount" rather than "count" so that it never is a substring of "meterCount".
    pub counter_count: String,
    pub meter_count: String,
    pub histo_samples: String,
    pub histo_stats: String,
    pub timer_samples: String,
    pub timer_stats: String,
}

impl Default for TypeDimensions {
    fn default() -> Self {
        TypeDimensions {
            name: "metricType".to_string(),
            gauge: "gauge".to_string(),
            counter_count: "counterCount".to_string(),
            meter_count: "meterCount".to_string(),
            histo_samples: "histoSamples".to_string(),
            histo_stats: "histoStats".to_string(),
            timer_samples: "timerSamples".to_string(),
            timer_stats: "timerStats".to_string(),
        }
    }
}

impl TypeDimensions {
    pub fn value(&self, submission: Submission) -> &str {
        match submission {
            Submission::Gauge => &self.gauge,
            Submission::CounterCount => &self.counter_count,
            Submission::MeterCount => &self.meter_count,
            Submission::HistoSamples => &self.histo_samples,
            Submission::HistoStats => &self.histo_stats,
            Submission::TimerSamples => &self.timer_samples,
            Submission::TimerStats => &self.timer_stats,
        }
    }

    pub fn set_value<V: Into<String>>(&mut self, submission: Submission, value: V) {
        let slot = match submission {
            Submission::Gauge => &mut self.gauge,
            Submission::CounterCount => &mut self.counter_count,
            Submission::MeterCount => &mut self.meter_count,
            Submission::HistoSamples => &mut self.histo_samples,
            Submission::HistoStats => &mut self.histo_stats,
            Submission::TimerSamples => &mut self.timer_samples,
            Submission::TimerStats => &mut self.timer_stats,
        };
        *slot = value.into();
    }

    pub fn dimension(&self, submission: Submission) -> Dimension {
        Dimension::new(self.name.clone(), self.value(submission))
    }
}

/// Turns registry snapshots into CloudWatch metric data.
///
/// Counting metrics are reported as the difference to the previous poll, so a translator
/// remembers the last count it saw for every metric. Each reporter owns its own translator.
pub struct Translator {
    syntax: Syntax,
    type_dimensions: TypeDimensions,
    global_dimensions: Option<String>,
    timestamp_local: bool,
    reporter_filter: Option<ReporterFilter>,
    last_polled_counts: HashMap<MetricId, u64>,
}

impl Default for Translator {
    fn default() -> Self {
        Translator::new(Syntax::default(), TypeDimensions::default())
    }
}

impl fmt::Debug for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Translator")
            .field("syntax", &self.syntax)
            .field("type_dimensions", &self.type_dimensions)
            .field("global_dimensions", &self.global_dimensions)
            .field("timestamp_local", &self.timestamp_local)
            .field("reporter_filter", &self.reporter_filter.is_some())
            .field("last_polled_counts", &self.last_polled_counts.len())
            .finish()
    }
}

impl Translator {
    pub fn new(syntax: Syntax, type_dimensions: TypeDimensions) -> Self {
        Translator {
            syntax,
            type_dimensions,
            global_dimensions: None,
            timestamp_local: false,
            reporter_filter: None,
            last_polled_counts: HashMap::new(),
        }
    }

    /// Appends `dimensions`, an encoded name, to every metric identifier.
    #[must_use]
    pub fn with_global_dimensions(mut self, dimensions: Option<String>) -> Self {
        self.global_dimensions = dimensions.filter(|d| !d.trim().is_empty());
        self
    }

    /// Stamps every datum with the wall-clock time of the poll, instead of letting
    /// CloudWatch stamp it on receipt.
    #[must_use]
    pub fn with_timestamp_local(mut self, timestamp_local: bool) -> Self {
        self.timestamp_local = timestamp_local;
        self
    }

    #[must_use]
    pub fn with_reporter_filter(mut self, filter: Option<ReporterFilter>) -> Self {
        self.reporter_filter = filter;
        self
    }

    /// Translates one snapshot of the registry.
    ///
    /// Gauges without a finite value, counters which did not change and statistic sets
    /// without samples produce nothing.
    pub fn translate(&mut self, snapshot: &Snapshot) -> Vec<MetricDatum> {
        let mut data = Vec::with_capacity(
            snapshot.len() + snapshot.histograms.len() + snapshot.timers.len(),
        );

        for (identifier, value) in snapshot.gauges.iter() {
            self.report_gauge(identifier, *value, &mut data);
        }

        for (identifier, counting) in snapshot.counters.iter() {
            self.report_counting(identifier, counting, Submission::CounterCount, &mut data);
        }

        for (identifier, counting) in snapshot.meters.iter() {
            self.report_counting(identifier, counting, Submission::MeterCount, &mut data);
        }

        for (identifier, sampling) in snapshot.histograms.iter() {
            self.report_counting(
                identifier,
                &sampling.counting,
                Submission::HistoSamples,
                &mut data,
            );
            self.report_sampling(identifier, sampling, Submission::HistoStats, &mut data);
        }

        for (identifier, sampling) in snapshot.timers.iter() {
            self.report_counting(
                identifier,
                &sampling.counting,
                Submission::TimerSamples,
                &mut data,
            );
            self.report_sampling(identifier, sampling, Submission::TimerStats, &mut data);
        }

        // CloudWatch rejects statistic sets with a sample count of 0.
        data.retain(|datum| !datum.is_empty_statistic_set());

        if let Some(filter) = self.reporter_filter.as_ref() {
            data.retain(|datum| filter(datum));
        }

        if self.timestamp_local {
            let now = SystemTime::now();
            for datum in data.iter_mut() {
                datum.timestamp = Some(now);
            }
        }

        data
    }

    fn report_gauge(&self, identifier: &str, value: Option<f64>, data: &mut Vec<MetricDatum>) {
        let value = match value {
            Some(value) if value.is_finite() => value,
            Some(value) => {
                trace!(identifier, value, "skipping gauge without a numeric value");
                return;
            }
            None => return,
        };

        self.demux(identifier, Submission::Gauge, data, |datum| {
            datum.with_value(value)
        });
    }

    fn report_counting(
        &mut self,
        identifier: &str,
        counting: &Counting,
        submission: Submission,
        data: &mut Vec<MetricDatum>,
    ) {
        let diff = self.diff_last(counting);
        if diff == 0 {
            // Unchanged metrics are not submitted: there is no need to keep them alive and
            // every datum costs.
            return;
        }

        self.demux(identifier, submission, data, |datum| {
            datum
                .with_value(diff as f64)
                .with_unit(StandardUnit::Count)
        });
    }

    fn report_sampling(
        &self,
        identifier: &str,
        sampling: &Sampling,
        submission: Submission,
        data: &mut Vec<MetricDatum>,
    ) {
        let samples = &sampling.samples;
        let unit = sampling.unit;
        let statistics = StatisticSet {
            sum: samples.sum() * sampling.rescale,
            sample_count: samples.len() as f64,
            minimum: samples.min() * sampling.rescale,
            maximum: samples.max() * sampling.rescale,
        };

        self.demux(identifier, submission, data, |datum| {
            let datum = datum.with_statistic_values(statistics);
            match unit {
                Some(unit) => datum.with_unit(unit),
                None => datum,
            }
        });
    }

    fn demux<F>(&self, identifier: &str, submission: Submission, data: &mut Vec<MetricDatum>, specify: F)
    where
        F: FnMut(MetricDatum) -> MetricDatum,
    {
        let identifier = self.append_global_dimensions(identifier);
        let key = DemuxedKey::parse_with(&self.syntax, &identifier);
        data.extend(key.expand(self.type_dimensions.dimension(submission), specify));
    }

    /// Difference between the count of a metric and the count it had at the previous poll.
    ///
    /// A count that went down means the metric was reset, and the new count is the
    /// difference.
    fn diff_last(&mut self, counting: &Counting) -> u64 {
        let last = self
            .last_polled_counts
            .insert(counting.id, counting.count)
            .unwrap_or(0);
        counting.count.checked_sub(last).unwrap_or(counting.count)
    }

    fn append_global_dimensions<'a>(&self, identifier: &'a str) -> Cow<'a, str> {
        match self.global_dimensions.as_deref() {
            Some(dimensions) => {
                let mut out = String::with_capacity(identifier.len() + dimensions.len() + 1);
                out.push_str(identifier);
                out.push(self.syntax.delimiter);
                out.push_str(dimensions);
                Cow::Owned(out)
            }
            None => Cow::Borrowed(identifier),
        }
    }
}
