//! A [`metrics`]-compatible exporter for sending metrics to AWS CloudWatch.
//!
//! ## Basics
//!
//! `metrics-exporter-cloudwatch` periodically takes a snapshot of every metric recorded through
//! the [`metrics`] macros and submits it to CloudWatch through a [`MetricDataClient`].
//!
//! CloudWatch does not aggregate custom metrics across dimensions: a metric submitted with
//! dimensions `host` and `route` can't be queried by `route` alone. This exporter makes up for
//! it by submitting each metric once for every combination of its optional name parts.
//!
//! ## Encoded names
//!
//! Metric names are written as whitespace separated segments:
//!
//! - `token` is part of the CloudWatch metric name,
//! - `key=value` is a dimension,
//! - a trailing `*` on either kind makes it optional.
//!
//! `"Requests route* host=web-1*"` is submitted four times: as `Requests route` and as
//! `Requests`, each with and without the `host` dimension. A name made only of optional
//! tokens is never submitted without any token. Labels of a metric key are appended as
//! dimensions; a label value ending in `*` makes the dimension optional.
//!
//! Every datum also carries a type dimension (`metricType` by default) telling what it
//! was reported from:
//!
//! - gauges submit their value (`gauge`),
//! - counters submit the change since the previous report (`counterCount`), or
//!   `meterCount` when described with [`Unit::CountPerSecond`](metrics::Unit::CountPerSecond),
//! - histograms submit the change in sample count (`histoSamples`) and a statistic set of the
//!   samples since the previous report (`histoStats`),
//! - histograms described with a unit of time are timers, reported in milliseconds
//!   (`timerSamples`, `timerStats`).
//!
//! Unchanged counts and statistic sets without samples are not submitted.
//!
//! ## Usage
//!
//! ```ignore
//! // The client is whatever submits `PutMetricData` requests, usually a thin wrapper around
//! // an AWS SDK client.
//! let builder = CloudWatchBuilder::new()
//!     .with_namespace("MyService")
//!     .with_client(client)
//!     .with_global_dimensions("env=prod")?;
//!
//! // Installs the recorder globally and spawns a task reporting every minute. Outside of a
//! // Tokio runtime, a background thread running its own runtime is spawned.
//! builder.install()?;
//!
//! metrics::counter!("Requests route* status=200*").increment(1);
//!
//! // Alternatively, get the recorder and the exporter future to run them yourself.
//! let (recorder, exporter) = builder.build()?;
//! ```
mod common;
pub use self::common::{BuildError, Counting, Matcher, MetricId, SampleSet, Sampling, Snapshot};

mod datum;
pub use self::datum::{Dimension, MetricDatum, StandardUnit, StatisticSet};

mod syntax;
pub use self::syntax::{
    NameError, Syntax, NAME_DIMENSION_SEPARATOR, NAME_PERMUTE_MARKER, NAME_TOKEN_DELIMITER,
};

mod demux;
pub use self::demux::{permutations, DemuxedKey, Expansion, Permutable, Permutations};

mod name;
pub use self::name::MetricNameBuilder;

mod translator;
pub use self::translator::{ReporterFilter, Submission, Translator, TypeDimensions};

mod publisher;
pub use self::publisher::{
    ClientError, MetricDataClient, PublishSummary, Publisher, PutMetricDataRequest,
    MAX_DATA_PER_REQUEST,
};

mod builder;
pub use self::builder::CloudWatchBuilder;

mod recorder;

mod registry;

pub use self::recorder::{CloudWatchHandle, CloudWatchRecorder};
