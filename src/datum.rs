use std::fmt;
use std::time::SystemTime;

use indexmap::IndexSet;
use metrics::Unit;

/// A CloudWatch dimension: a name/value attribute attached to a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Dimension {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Units understood by CloudWatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardUnit {
    Seconds,
    Microseconds,
    Milliseconds,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
    Bits,
    Kilobits,
    Megabits,
    Gigabits,
    Terabits,
    Percent,
    Count,
    BytesPerSecond,
    KilobytesPerSecond,
    MegabytesPerSecond,
    GigabytesPerSecond,
    TerabytesPerSecond,
    BitsPerSecond,
    KilobitsPerSecond,
    MegabitsPerSecond,
    GigabitsPerSecond,
    TerabitsPerSecond,
    CountPerSecond,
    None,
}

impl StandardUnit {
    /// The wire name of the unit.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds => "Seconds",
            Self::Microseconds => "Microseconds",
            Self::Milliseconds => "Milliseconds",
            Self::Bytes => "Bytes",
            Self::Kilobytes => "Kilobytes",
            Self::Megabytes => "Megabytes",
            Self::Gigabytes => "Gigabytes",
            Self::Terabytes => "Terabytes",
            Self::Bits => "Bits",
            Self::Kilobits => "Kilobits",
            Self::Megabits => "Megabits",
            Self::Gigabits => "Gigabits",
            Self::Terabits => "Terabits",
            Self::Percent => "Percent",
            Self::Count => "Count",
            Self::BytesPerSecond => "Bytes/Second",
            Self::KilobytesPerSecond => "Kilobytes/Second",
            Self::MegabytesPerSecond => "Megabytes/Second",
            Self::GigabytesPerSecond => "Gigabytes/Second",
            Self::TerabytesPerSecond => "Terabytes/Second",
            Self::BitsPerSecond => "Bits/Second",
            Self::KilobitsPerSecond => "Kilobits/Second",
            Self::MegabitsPerSecond => "Megabits/Second",
            Self::GigabitsPerSecond => "Gigabits/Second",
            Self::TerabitsPerSecond => "Terabits/Second",
            Self::CountPerSecond => "Count/Second",
            Self::None => "None",
        }
    }

    /// Maps a unit of the `metrics` facade onto its CloudWatch counterpart.
    ///
    /// Nanoseconds and the binary byte multiples (kibibytes and up) have no CloudWatch
    /// equivalent and map to [`StandardUnit::None`].
    pub fn from_metrics_unit(unit: Unit) -> Self {
        match unit {
            Unit::Count => Self::Count,
            Unit::Percent => Self::Percent,
            Unit::Seconds => Self::Seconds,
            Unit::Milliseconds => Self::Milliseconds,
            Unit::Microseconds => Self::Microseconds,
            Unit::Bytes => Self::Bytes,
            Unit::BitsPerSecond => Self::BitsPerSecond,
            Unit::KilobitsPerSecond => Self::KilobitsPerSecond,
            Unit::MegabitsPerSecond => Self::MegabitsPerSecond,
            Unit::GigabitsPerSecond => Self::GigabitsPerSecond,
            Unit::TerabitsPerSecond => Self::TerabitsPerSecond,
            Unit::CountPerSecond => Self::CountPerSecond,
            _ => Self::None,
        }
    }
}

impl fmt::Display for StandardUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a set of samples, submitted in place of a single value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticSet {
    pub sum: f64,
    pub sample_count: f64,
    pub minimum: f64,
    pub maximum: f64,
}

/// One submission record for the `PutMetricData` API.
///
/// Dimensions form a set: two datums whose dimensions were inserted in a different order are
/// equal.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDatum {
    pub metric_name: String,
    pub dimensions: IndexSet<Dimension>,
    pub value: Option<f64>,
    pub unit: Option<StandardUnit>,
    pub statistic_values: Option<StatisticSet>,
    pub timestamp: Option<SystemTime>,
}

impl MetricDatum {
    pub fn new<N>(metric_name: N, dimensions: IndexSet<Dimension>) -> Self
    where
        N: Into<String>,
    {
        MetricDatum {
            metric_name: metric_name.into(),
            dimensions,
            value: None,
            unit: None,
            statistic_values: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: StandardUnit) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    pub fn with_statistic_values(mut self, statistics: StatisticSet) -> Self {
        self.statistic_values = Some(statistics);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Looks up the value of a dimension by name.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }

    /// Whether CloudWatch would reject this datum as carrying no information.
    pub(crate) fn is_empty_statistic_set(&self) -> bool {
        matches!(self.statistic_values, Some(stats) if stats.sample_count <= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dimension, MetricDatum, StandardUnit, StatisticSet};
    use indexmap::IndexSet;
    use metrics::Unit;

    #[test]
    fn test_dimension_order_is_irrelevant() {
        let a: IndexSet<_> = [Dimension::new("type", "gauge"), Dimension::new("color", "red")]
            .into_iter()
            .collect();
        let b: IndexSet<_> = [Dimension::new("color", "red"), Dimension::new("type", "gauge")]
            .into_iter()
            .collect();

        assert_eq!(
            MetricDatum::new("Name", a).with_value(1.0),
            MetricDatum::new("Name", b).with_value(1.0)
        );
    }

    #[test]
    fn test_empty_statistic_set() {
        let stats = StatisticSet {
            sum: 0.0,
            sample_count: 0.0,
            minimum: 0.0,
            maximum: 0.0,
        };
        let datum = MetricDatum::new("Name", IndexSet::new()).with_statistic_values(stats);
        assert!(datum.is_empty_statistic_set());

        let datum = MetricDatum::new("Name", IndexSet::new()).with_value(0.0);
        assert!(!datum.is_empty_statistic_set());
    }

    #[test]
    fn test_units() {
        assert_eq!(StandardUnit::from_metrics_unit(Unit::Count).as_str(), "Count");
        assert_eq!(
            StandardUnit::from_metrics_unit(Unit::CountPerSecond).to_string(),
            "Count/Second"
        );
        assert_eq!(
            StandardUnit::from_metrics_unit(Unit::Nanoseconds),
            StandardUnit::None
        );
    }
}
