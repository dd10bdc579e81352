use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::common::{Matcher, Snapshot};
use crate::datum::{MetricDatum, StandardUnit};
use crate::publisher::{PublishSummary, Publisher};
use crate::registry::GenerationalCellStorage;
use crate::syntax::Syntax;
use crate::translator::Translator;

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{Recency, Registry};
use tracing::error;

pub(crate) struct Inner {
    pub registry: Registry<Key, GenerationalCellStorage>,
    pub recency: Recency<Key>,
    pub counter_units: RwLock<HashMap<String, Unit>>,
    pub histogram_units: RwLock<HashMap<String, Unit>>,
    pub syntax: Syntax,
    pub metric_filters: Vec<Matcher>,
    pub translator: Mutex<Translator>,
}

impl Inner {
    fn get_recent_metrics(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();

        let counter_handles = self.registry.get_counter_handles();
        for (key, counter) in counter_handles {
            let gen = counter.get_generation();
            if !self.recency.should_store_counter(&key, gen, &self.registry) {
                continue;
            }
            let Some(identifier) = self.identifier(&key) else {
                continue;
            };

            let counting = counter.get_inner().counting();
            if self.unit_of(&self.counter_units, &key) == Some(Unit::CountPerSecond) {
                snapshot.meters.push((identifier, counting));
            } else {
                snapshot.counters.push((identifier, counting));
            }
        }

        let gauge_handles = self.registry.get_gauge_handles();
        for (key, gauge) in gauge_handles {
            let gen = gauge.get_generation();
            if !self.recency.should_store_gauge(&key, gen, &self.registry) {
                continue;
            }
            let Some(identifier) = self.identifier(&key) else {
                continue;
            };

            snapshot
                .gauges
                .push((identifier, gauge.get_inner().value()));
        }

        let histogram_handles = self.registry.get_histogram_handles();
        for (key, histogram) in histogram_handles {
            let gen = histogram.get_generation();
            if !self
                .recency
                .should_store_histogram(&key, gen, &self.registry)
            {
                continue;
            }
            let Some(identifier) = self.identifier(&key) else {
                continue;
            };

            let unit = self.unit_of(&self.histogram_units, &key);
            match unit.and_then(to_milliseconds) {
                Some(rescale) => {
                    let sampling = histogram
                        .get_inner()
                        .drain(rescale, Some(StandardUnit::Milliseconds));
                    snapshot.timers.push((identifier, sampling));
                }
                None => {
                    let sampling = histogram
                        .get_inner()
                        .drain(1.0, unit.map(StandardUnit::from_metrics_unit));
                    snapshot.histograms.push((identifier, sampling));
                }
            }
        }

        snapshot
    }

    /// Encoded identifier of `key`, or `None` when the metric filters reject it.
    fn identifier(&self, key: &Key) -> Option<String> {
        let identifier = key_to_identifier(&self.syntax, key);
        if self.metric_filters.is_empty()
            || self.metric_filters.iter().any(|m| m.matches(&identifier))
        {
            Some(identifier)
        } else {
            None
        }
    }

    fn unit_of(&self, units: &RwLock<HashMap<String, Unit>>, key: &Key) -> Option<Unit> {
        units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.name())
            .copied()
    }

    fn describe(&self, units: &RwLock<HashMap<String, Unit>>, key: KeyName, unit: Option<Unit>) {
        let mut units = units.write().unwrap_or_else(PoisonError::into_inner);
        match unit {
            Some(unit) => units.insert(key.as_str().to_string(), unit),
            None => units.remove(key.as_str()),
        };
    }

    fn collect(&self) -> Vec<MetricDatum> {
        let collected = panic::catch_unwind(AssertUnwindSafe(|| {
            let snapshot = self.get_recent_metrics();
            let mut translator = self
                .translator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            translator.translate(&snapshot)
        }));

        match collected {
            Ok(data) => data,
            Err(_) => {
                error!("error marshalling CloudWatch metrics, nothing is reported this cycle");
                Vec::new()
            }
        }
    }
}

/// Multiplier turning samples recorded in `unit` into milliseconds, if `unit` is a time.
fn to_milliseconds(unit: Unit) -> Option<f64> {
    match unit {
        Unit::Nanoseconds => Some(0.000_001),
        Unit::Microseconds => Some(0.001),
        Unit::Milliseconds => Some(1.0),
        Unit::Seconds => Some(1000.0),
        _ => None,
    }
}

/// Writes a registry key as an encoded identifier.
///
/// The key name is taken as is, it usually is an encoded identifier already. Every label is
/// appended as a dimension, with reserved characters in its key and value replaced. A label
/// value ending in the permute marker keeps it, making the dimension permutable.
pub(crate) fn key_to_identifier(syntax: &Syntax, key: &Key) -> String {
    let mut identifier = key.name().to_string();
    for label in key.labels() {
        let (value, permute) = syntax.strip_permute_marker(label.value());

        if !identifier.is_empty() {
            identifier.push(syntax.delimiter);
        }
        identifier.push_str(&syntax.sanitize_dimension_part(label.key()));
        identifier.push(syntax.separator);
        identifier.push_str(&syntax.sanitize_dimension_part(value));
        if permute {
            identifier.push(syntax.permute_marker);
        }
    }
    identifier
}

/// A [`Recorder`] keeping metrics in memory until they are reported to CloudWatch.
///
/// Counters are reported as counters, or as meters when described with
/// [`Unit::CountPerSecond`]. Histograms are reported as histograms, or as timers in
/// milliseconds when described with a unit of time.
pub struct CloudWatchRecorder {
    inner: Arc<Inner>,
}

impl CloudWatchRecorder {
    /// Gets a [`CloudWatchHandle`] to this recorder.
    pub fn handle(&self) -> CloudWatchHandle {
        CloudWatchHandle {
            inner: self.inner.clone(),
        }
    }
}

impl From<Inner> for CloudWatchRecorder {
    fn from(inner: Inner) -> Self {
        CloudWatchRecorder {
            inner: Arc::new(inner),
        }
    }
}

impl Recorder for CloudWatchRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, _: SharedString) {
        self.inner.describe(&self.inner.counter_units, key, unit);
    }

    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, _: SharedString) {
        self.inner.describe(&self.inner.histogram_units, key, unit);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.inner
            .registry
            .get_or_create_counter(key, |c| c.clone().into())
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.inner
            .registry
            .get_or_create_gauge(key, |c| c.clone().into())
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.inner
            .registry
            .get_or_create_histogram(key, |c| c.clone().into())
    }
}

/// Handle for driving report cycles of a [`CloudWatchRecorder`].
///
/// The exporter future built by [`CloudWatchBuilder`](crate::CloudWatchBuilder) runs a cycle
/// every interval. A handle allows running one at any other time, or collecting the data of a
/// cycle without submitting it. Counts are reported as the change since the previous cycle,
/// whichever way it was run.
#[derive(Clone)]
pub struct CloudWatchHandle {
    inner: Arc<Inner>,
}

impl CloudWatchHandle {
    /// Takes a snapshot of the recorder and translates it into CloudWatch metric data.
    pub fn collect(&self) -> Vec<MetricDatum> {
        self.inner.collect()
    }

    /// Runs one report cycle: collects and submits through `publisher`.
    pub async fn report(&self, publisher: &Publisher) -> PublishSummary {
        let data = self.collect();
        if data.is_empty() {
            return PublishSummary::default();
        }
        publisher.publish(data).await
    }
}
