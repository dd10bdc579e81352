use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use metrics_util::{
    registry::{GenerationalStorage, Recency, Registry},
    MetricKindMask,
};

use crate::common::{BuildError, Matcher};
use crate::datum::MetricDatum;
use crate::demux::DemuxedKey;
use crate::name::MetricNameBuilder;
use crate::publisher::{MetricDataClient, Publisher};
use crate::recorder::{CloudWatchRecorder, Inner};
use crate::registry::CellStorage;
use crate::syntax::{NameError, Syntax};
use crate::translator::{ReporterFilter, Submission, Translator, TypeDimensions};

use quanta::Clock;
use tokio::runtime;
use tracing::debug;

type ExporterFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SUBMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for creating and installing a CloudWatch recorder/exporter.
///
/// A builder can be cloned, so that several reporters can be configured from a common base.
#[derive(Clone)]
pub struct CloudWatchBuilder {
    namespace: Option<String>,
    client: Option<Arc<dyn MetricDataClient>>,
    interval: Duration,
    syntax: Syntax,
    global_dimensions: Option<String>,
    timestamp_local: bool,
    type_dimensions: TypeDimensions,
    reporter_filter: Option<ReporterFilter>,
    metric_filters: Vec<Matcher>,
    submission_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    recency_mask: MetricKindMask,
}

impl CloudWatchBuilder {
    /// Creates a new [`CloudWatchBuilder`].
    pub fn new() -> Self {
        Self {
            namespace: None,
            client: None,
            interval: DEFAULT_INTERVAL,
            syntax: Syntax::default(),
            global_dimensions: None,
            timestamp_local: false,
            type_dimensions: TypeDimensions::default(),
            reporter_filter: None,
            metric_filters: Vec::new(),
            submission_timeout: Some(DEFAULT_SUBMISSION_TIMEOUT),
            idle_timeout: None,
            recency_mask: MetricKindMask::NONE,
        }
    }

    /// Sets the CloudWatch namespace all metric data is submitted under. Required.
    #[must_use]
    pub fn with_namespace<N>(mut self, namespace: N) -> Self
    where
        N: Into<String>,
    {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the client metric data is submitted with. Required.
    #[must_use]
    pub fn with_client<C>(mut self, client: C) -> Self
    where
        C: MetricDataClient + 'static,
    {
        self.client = Some(Arc::new(client));
        self
    }

    /// Sets how often the exporter reports.
    ///
    /// Defaults to 60 seconds, the finest resolution of standard CloudWatch metrics.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the characters of the encoded name syntax.
    ///
    /// Global dimensions already given are written again in the new syntax.
    ///
    /// ## Errors
    ///
    /// If the global dimensions hold a character reserved by the new syntax.
    pub fn set_syntax(mut self, syntax: Syntax) -> Result<Self, BuildError> {
        if let Some(dimensions) = self.global_dimensions.take() {
            let key = DemuxedKey::parse_with(&self.syntax, &dimensions);
            self.global_dimensions = Some(reencode(&key, syntax)?);
        }
        self.syntax = syntax;
        Ok(self)
    }

    /// Sets dimensions appended to every metric, written as an encoded name such as
    /// `"env=prod service=api*"`. Blank input clears them.
    ///
    /// ## Errors
    ///
    /// If `dimensions` is not a valid encoded name.
    pub fn with_global_dimensions(mut self, dimensions: &str) -> Result<Self, BuildError> {
        let builder = MetricNameBuilder::with_syntax(self.syntax).add(dimensions)?;
        self.global_dimensions = if builder.is_empty() {
            None
        } else {
            Some(builder.build())
        };
        Ok(self)
    }

    /// Stamps metric data with the local time they were collected at. When off, CloudWatch
    /// stamps them on receipt.
    #[must_use]
    pub fn with_timestamp_local(mut self, timestamp_local: bool) -> Self {
        self.timestamp_local = timestamp_local;
        self
    }

    /// Replaces the name and all values of the type dimension.
    #[must_use]
    pub fn set_type_dimensions(mut self, type_dimensions: TypeDimensions) -> Self {
        self.type_dimensions = type_dimensions;
        self
    }

    /// Sets the name of the type dimension. Defaults to `metricType`.
    #[must_use]
    pub fn with_type_dimension_name<N>(mut self, name: N) -> Self
    where
        N: Into<String>,
    {
        self.type_dimensions.name = name.into();
        self
    }

    /// Sets the type dimension value of one kind of submission.
    #[must_use]
    pub fn set_type_dimension_value<V>(mut self, submission: Submission, value: V) -> Self
    where
        V: Into<String>,
    {
        self.type_dimensions.set_value(submission, value);
        self
    }

    /// Sets a predicate every expanded metric datum must pass to be submitted.
    #[must_use]
    pub fn with_reporter_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&MetricDatum) -> bool + Send + Sync + 'static,
    {
        self.reporter_filter = Some(Arc::new(filter));
        self
    }

    /// Adds a matcher on encoded identifiers.
    ///
    /// Once a matcher is added, only metrics matching at least one of them are reported.
    #[must_use]
    pub fn add_metric_filter(mut self, matcher: Matcher) -> Self {
        self.metric_filters.push(matcher);
        self
    }

    /// Bounds how long a single submission may take. `None` waits indefinitely.
    ///
    /// Defaults to 30 seconds.
    #[must_use]
    pub fn with_submission_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.submission_timeout = timeout;
        self
    }

    /// Sets the idle timeout for metrics.
    ///
    /// If a metric hasn't been updated within this timeout, it will be removed from the registry.
    /// Removal happens during report cycles, so metrics are only removed as often as the
    /// exporter reports.
    ///
    /// The metric kind "mask" configures which metrics will be considered by the idle
    /// timeout. Refer to the documentation for [`MetricKindMask`](metrics_util::MetricKindMask)
    /// for more information on defining a metric kind mask.
    #[must_use]
    pub fn idle_timeout(mut self, mask: MetricKindMask, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self.recency_mask = if self.idle_timeout.is_none() {
            MetricKindMask::NONE
        } else {
            mask
        };
        self
    }

    /// Builds the recorder and exporter and installs them globally.
    ///
    /// When called from within a Tokio runtime, the exporter future is spawned directly
    /// into the runtime.  Otherwise, a new single-threaded Tokio runtime is created
    /// on a background thread, and the exporter is spawned there.
    ///
    /// ## Errors
    ///
    /// If there is an error while either building the recorder and exporter, or installing the
    /// recorder and exporter, an error variant will be returned describing the error.
    pub fn install(self) -> Result<(), BuildError> {
        let recorder = if let Ok(handle) = runtime::Handle::try_current() {
            let (recorder, exporter) = {
                let _g = handle.enter();
                self.build()?
            };

            handle.spawn(exporter);

            recorder
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let (recorder, exporter) = {
                let _g = runtime.enter();
                self.build()?
            };

            thread::Builder::new()
                .name("metrics-exporter-cloudwatch-push".to_string())
                .spawn(move || runtime.block_on(exporter))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            recorder
        };

        metrics::set_global_recorder(recorder)
            .map_err(|e| BuildError::FailedToSetGlobalRecorder(e.to_string()))?;

        Ok(())
    }

    /// Builds the recorder and exporter and returns them both.
    ///
    /// The exporter future reports once every interval, starting one interval after it is
    /// first polled. It never completes. It must be run on a Tokio runtime with the time
    /// driver enabled.
    ///
    /// In most cases, users should prefer to use [`install`][CloudWatchBuilder::install] to
    /// create and install the recorder and exporter automatically for them.
    ///
    /// ## Errors
    ///
    /// If no namespace or no client was configured.
    pub fn build(self) -> Result<(CloudWatchRecorder, ExporterFuture), BuildError> {
        let namespace = self
            .namespace
            .clone()
            .filter(|namespace| !namespace.trim().is_empty())
            .ok_or(BuildError::MissingNamespace)?;
        let client = self.client.clone().ok_or(BuildError::MissingClient)?;
        let interval = self.interval;
        let publisher = Publisher::from_shared(namespace, client)
            .with_timeout(self.submission_timeout);

        let recorder = self.build_recorder();
        let handle = recorder.handle();

        let exporter = async move {
            loop {
                // Sleep for `interval` amount of time, and then report.
                tokio::time::sleep(interval).await;

                let summary = handle.report(&publisher).await;
                debug!(
                    namespace = publisher.namespace(),
                    requests_failed = summary.requests_failed,
                    data_failed = summary.data_failed,
                    "report cycle finished"
                );
            }
        };

        Ok((recorder, Box::pin(exporter)))
    }

    /// Builds the recorder and returns it.
    ///
    /// Nothing is reported unless cycles are run through its
    /// [`CloudWatchHandle`](crate::CloudWatchHandle).
    pub fn build_recorder(self) -> CloudWatchRecorder {
        self.build_with_clock(Clock::new())
    }

    pub(crate) fn build_with_clock(self, clock: Clock) -> CloudWatchRecorder {
        let translator = Translator::new(self.syntax, self.type_dimensions)
            .with_global_dimensions(self.global_dimensions)
            .with_timestamp_local(self.timestamp_local)
            .with_reporter_filter(self.reporter_filter);

        let inner = Inner {
            registry: Registry::new(GenerationalStorage::new(CellStorage)),
            recency: Recency::new(clock, self.recency_mask, self.idle_timeout),
            counter_units: RwLock::new(HashMap::new()),
            histogram_units: RwLock::new(HashMap::new()),
            syntax: self.syntax,
            metric_filters: self.metric_filters,
            translator: Mutex::new(translator),
        };

        CloudWatchRecorder::from(inner)
    }
}

fn reencode(key: &DemuxedKey, syntax: Syntax) -> Result<String, NameError> {
    let mut builder = MetricNameBuilder::with_syntax(syntax);
    for name in key.names() {
        builder = builder.add_name_token_permuted(&name.value, name.permutable)?;
    }
    for dimension in key.dimensions() {
        builder = builder.add_dimension(
            &dimension.value.name,
            &dimension.value.value,
            dimension.permutable,
        )?;
    }
    Ok(builder.build())
}

impl Default for CloudWatchBuilder {
    fn default() -> Self {
        CloudWatchBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use metrics::{Key, Level, Metadata, Recorder};

    use super::CloudWatchBuilder;
    use crate::common::BuildError;
    use crate::publisher::{ClientError, MetricDataClient, PutMetricDataRequest};
    use crate::syntax::{NameError, Syntax};
    use crate::translator::Submission;

    static METADATA: Metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

    #[derive(Default)]
    struct RecordingClient {
        requests: Mutex<Vec<PutMetricDataRequest>>,
    }

    #[async_trait]
    impl MetricDataClient for RecordingClient {
        async fn put_metric_data(&self, request: PutMetricDataRequest) -> Result<(), ClientError> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    #[test]
    fn test_missing_configuration() {
        let result = CloudWatchBuilder::new()
            .with_client(RecordingClient::default())
            .build();
        assert!(matches!(result, Err(BuildError::MissingNamespace)));

        let result = CloudWatchBuilder::new()
            .with_namespace("  ")
            .with_client(RecordingClient::default())
            .build();
        assert!(matches!(result, Err(BuildError::MissingNamespace)));

        let result = CloudWatchBuilder::new().with_namespace("App").build();
        assert!(matches!(result, Err(BuildError::MissingClient)));

        let result = CloudWatchBuilder::new()
            .with_namespace("App")
            .with_client(RecordingClient::default())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_global_dimensions() {
        let result = CloudWatchBuilder::new().with_global_dimensions("env=prod=eu");
        assert!(matches!(
            result,
            Err(BuildError::InvalidGlobalDimensions(NameError::InvalidDimensionPart(_)))
        ));

        assert!(CloudWatchBuilder::new()
            .with_global_dimensions("env=prod**")
            .is_err());
    }

    #[test]
    fn test_global_dimensions() {
        let recorder = CloudWatchBuilder::new()
            .with_global_dimensions("env=prod service=api*")
            .unwrap()
            .build_recorder();

        recorder
            .register_gauge(&Key::from_name("Memory"), &METADATA)
            .set(512.0);

        let data = recorder.handle().collect();
        assert_eq!(data.len(), 2);
        assert!(data.iter().all(|d| d.dimension("env") == Some("prod")));
        assert_eq!(
            data.iter()
                .filter(|d| d.dimension("service") == Some("api"))
                .count(),
            1
        );
    }

    #[test]
    fn test_custom_syntax_and_type_dimensions() {
        let syntax = Syntax {
            delimiter: ';',
            separator: ':',
            permute_marker: '?',
        };
        let recorder = CloudWatchBuilder::new()
            .set_syntax(syntax)
            .unwrap()
            .with_global_dimensions("env:prod")
            .unwrap()
            .with_type_dimension_name("kind")
            .set_type_dimension_value(Submission::Gauge, "level")
            .build_recorder();

        recorder
            .register_gauge(&Key::from_name("Memory;host:a1?"), &METADATA)
            .set(1.0);

        let data = recorder.handle().collect();
        assert_eq!(data.len(), 2);
        assert!(data.iter().all(|d| d.dimension("kind") == Some("level")));
        assert!(data.iter().all(|d| d.dimension("env") == Some("prod")));
        assert!(data.iter().all(|d| d.dimension("metricType").is_none()));
    }

    #[test]
    fn test_syntax_set_after_global_dimensions() {
        let syntax = Syntax {
            delimiter: ';',
            separator: ':',
            permute_marker: '?',
        };
        let recorder = CloudWatchBuilder::new()
            .with_global_dimensions("env=prod service=api*")
            .unwrap()
            .set_syntax(syntax)
            .unwrap()
            .build_recorder();

        recorder
            .register_gauge(&Key::from_name("Memory;host:a1?"), &METADATA)
            .set(1.0);

        let data = recorder.handle().collect();
        assert_eq!(data.len(), 4);
        assert!(data.iter().all(|d| d.metric_name == "Memory"));
        assert!(data.iter().all(|d| d.dimension("env") == Some("prod")));
        assert_eq!(
            data.iter()
                .filter(|d| d.dimension("service") == Some("api"))
                .count(),
            2
        );

        // a value holding the new separator can't be carried over
        let result = CloudWatchBuilder::new()
            .with_global_dimensions("time=12:30")
            .unwrap()
            .set_syntax(syntax);
        assert!(matches!(
            result,
            Err(BuildError::InvalidGlobalDimensions(NameError::InvalidDimensionPart(_)))
        ));
    }

    #[test]
    fn test_builder_is_cloneable() {
        let base = CloudWatchBuilder::new()
            .with_client(RecordingClient::default())
            .with_timestamp_local(true);

        let first = base.clone().with_namespace("First").build_recorder();
        let second = base.with_namespace("Second").build_recorder();

        // each reporter keeps its own counts
        let key = Key::from_name("Requests");
        first.register_counter(&key, &METADATA).increment(2);
        second.register_counter(&key, &METADATA).increment(5);

        let data = first.handle().collect();
        assert_eq!(data[0].value, Some(2.0));
        assert!(data[0].timestamp.is_some());
        assert_eq!(second.handle().collect()[0].value, Some(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exporter_reports_every_interval() {
        let client = Arc::new(RecordingClient::default());
        let (recorder, exporter) = CloudWatchBuilder::new()
            .with_namespace("App")
            .with_client(client.clone())
            .with_interval(Duration::from_secs(60))
            .build()
            .unwrap();

        let counter = recorder.register_counter(&Key::from_name("Requests"), &METADATA);
        counter.increment(3);

        let exporter = tokio::spawn(exporter);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(client.requests.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        {
            let requests = client.requests.lock().unwrap();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].namespace, "App");
            assert_eq!(requests[0].metric_data.len(), 1);
            assert_eq!(requests[0].metric_data[0].value, Some(3.0));
        }

        // an unchanged counter sends nothing
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.requests.lock().unwrap().len(), 1);

        counter.increment(4);
        tokio::time::sleep(Duration::from_secs(60)).await;
        {
            let requests = client.requests.lock().unwrap();
            assert_eq!(requests.len(), 2);
            assert_eq!(requests[1].metric_data[0].value, Some(4.0));
        }

        exporter.abort();
    }
}
