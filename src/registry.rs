use std::sync::Arc;

use metrics::{CounterFn, GaugeFn, HistogramFn};
use metrics_util::registry::{GenerationalStorage, Storage};
use metrics_util::AtomicBucket;
use portable_atomic::{AtomicBool, AtomicF64, AtomicU64, Ordering};

use crate::common::{Counting, MetricId, SampleSet, Sampling};
use crate::datum::StandardUnit;

/// Cumulative count of a counter or meter.
#[derive(Debug)]
pub(crate) struct CountingCell {
    id: MetricId,
    count: AtomicU64,
}

impl CountingCell {
    fn new() -> Self {
        CountingCell {
            id: MetricId::next(),
            count: AtomicU64::new(0),
        }
    }

    pub fn counting(&self) -> Counting {
        Counting {
            id: self.id,
            count: self.count.load(Ordering::Acquire),
        }
    }
}

impl CounterFn for CountingCell {
    fn increment(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Release);
    }

    fn absolute(&self, value: u64) {
        self.count.fetch_max(value, Ordering::AcqRel);
    }
}

/// Latest value of a gauge. A gauge which was never touched has no value.
#[derive(Debug)]
pub(crate) struct GaugeCell {
    value: AtomicF64,
    touched: AtomicBool,
}

impl GaugeCell {
    fn new() -> Self {
        GaugeCell {
            value: AtomicF64::new(0.0),
            touched: AtomicBool::new(false),
        }
    }

    pub fn value(&self) -> Option<f64> {
        if self.touched.load(Ordering::Acquire) {
            Some(self.value.load(Ordering::Acquire))
        } else {
            None
        }
    }
}

impl GaugeFn for GaugeCell {
    fn increment(&self, value: f64) {
        self.value.fetch_add(value, Ordering::AcqRel);
        self.touched.store(true, Ordering::Release);
    }

    fn decrement(&self, value: f64) {
        self.value.fetch_sub(value, Ordering::AcqRel);
        self.touched.store(true, Ordering::Release);
    }

    fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
        self.touched.store(true, Ordering::Release);
    }
}

/// Samples of a histogram or timer. The samples are drained at every poll, the count of
/// samples is cumulative.
pub(crate) struct SamplingCell {
    counting: CountingCell,
    samples: AtomicBucket<f64>,
}

impl SamplingCell {
    fn new() -> Self {
        SamplingCell {
            counting: CountingCell::new(),
            samples: AtomicBucket::new(),
        }
    }

    /// Takes the samples recorded since the previous call.
    pub fn drain(&self, rescale: f64, unit: Option<StandardUnit>) -> Sampling {
        let mut values = Vec::new();
        self.samples
            .clear_with(|block| values.extend_from_slice(block));

        Sampling {
            counting: self.counting.counting(),
            samples: SampleSet::new(values),
            rescale,
            unit,
        }
    }
}

impl HistogramFn for SamplingCell {
    fn record(&self, value: f64) {
        self.samples.push(value);
        self.counting.increment(1);
    }
}

/// Storage handing out a fresh, uniquely identified cell for every metric registered.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CellStorage;

impl<K> Storage<K> for CellStorage {
    type Counter = Arc<CountingCell>;
    type Gauge = Arc<GaugeCell>;
    type Histogram = Arc<SamplingCell>;

    fn counter(&self, _: &K) -> Self::Counter {
        Arc::new(CountingCell::new())
    }

    fn gauge(&self, _: &K) -> Self::Gauge {
        Arc::new(GaugeCell::new())
    }

    fn histogram(&self, _: &K) -> Self::Histogram {
        Arc::new(SamplingCell::new())
    }
}

pub(crate) type GenerationalCellStorage = GenerationalStorage<CellStorage>;

#[cfg(test)]
mod tests {
    use super::{CountingCell, GaugeCell, SamplingCell};
    use crate::datum::StandardUnit;
    use metrics::{CounterFn, GaugeFn, HistogramFn};

    #[test]
    fn test_counting_cell() {
        let cell = CountingCell::new();
        cell.increment(3);
        cell.increment(2);
        assert_eq!(cell.counting().count, 5);
        cell.absolute(4);
        assert_eq!(cell.counting().count, 5);
        cell.absolute(9);
        assert_eq!(cell.counting().count, 9);

        assert_ne!(cell.counting().id, CountingCell::new().counting().id);
    }

    #[test]
    fn test_gauge_cell() {
        let cell = GaugeCell::new();
        assert_eq!(cell.value(), None);
        cell.increment(2.5);
        assert_eq!(cell.value(), Some(2.5));
        cell.decrement(1.0);
        assert_eq!(cell.value(), Some(1.5));
        cell.set(-3.44);
        assert_eq!(cell.value(), Some(-3.44));
    }

    #[test]
    fn test_sampling_cell() {
        let cell = SamplingCell::new();
        cell.record(1.0);
        cell.record(4.0);

        let sampling = cell.drain(2.0, Some(StandardUnit::Bytes));
        assert_eq!(sampling.counting.count, 2);
        assert_eq!(sampling.samples.values(), [1.0, 4.0]);
        assert_eq!(sampling.rescale, 2.0);
        assert_eq!(sampling.unit, Some(StandardUnit::Bytes));

        // samples are drained, the count is kept
        let sampling = cell.drain(1.0, None);
        assert_eq!(sampling.counting.count, 2);
        assert!(sampling.samples.is_empty());
    }
}
