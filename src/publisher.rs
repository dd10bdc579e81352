use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::datum::MetricDatum;

/// Maximum number of data CloudWatch accepts in a single `PutMetricData` request.
pub const MAX_DATA_PER_REQUEST: usize = 20;

/// Failure reported by a [`MetricDataClient`].
pub type ClientError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One `PutMetricData` request.
#[derive(Debug, Clone, PartialEq)]
pub struct PutMetricDataRequest {
    pub namespace: String,
    pub metric_data: Vec<MetricDatum>,
}

/// The remote end metric data is submitted to.
#[async_trait]
pub trait MetricDataClient: Send + Sync {
    /// Submits one request holding at most [`MAX_DATA_PER_REQUEST`] data.
    async fn put_metric_data(&self, request: PutMetricDataRequest) -> Result<(), ClientError>;
}

#[async_trait]
impl<T> MetricDataClient for Arc<T>
where
    T: MetricDataClient + ?Sized,
{
    async fn put_metric_data(&self, request: PutMetricDataRequest) -> Result<(), ClientError> {
        (**self).put_metric_data(request).await
    }
}

/// Outcome of one [`Publisher::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub requests_sent: usize,
    pub requests_failed: usize,
    pub data_sent: usize,
    pub data_failed: usize,
}

/// Submits metric data in batches to a [`MetricDataClient`].
#[derive(Clone)]
pub struct Publisher {
    namespace: String,
    client: Arc<dyn MetricDataClient>,
    timeout: Option<Duration>,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new<N, C>(namespace: N, client: C) -> Self
    where
        N: Into<String>,
        C: MetricDataClient + 'static,
    {
        Self::from_shared(namespace, Arc::new(client))
    }

    pub(crate) fn from_shared<N>(namespace: N, client: Arc<dyn MetricDataClient>) -> Self
    where
        N: Into<String>,
    {
        Publisher {
            namespace: namespace.into(),
            client,
            timeout: None,
        }
    }

    /// Bounds how long a single request may take before it is given up on.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Submits `data` in requests of at most [`MAX_DATA_PER_REQUEST`].
    ///
    /// Every request is in flight before any of them is waited on. A failed request is
    /// logged and its data is lost; it never fails the whole publish, so a periodic caller
    /// keeps running.
    pub async fn publish(&self, data: Vec<MetricDatum>) -> PublishSummary {
        let total = data.len();
        let mut requests = JoinSet::new();

        for metric_data in partition(data, MAX_DATA_PER_REQUEST) {
            let client = self.client.clone();
            let timeout = self.timeout;
            let request = PutMetricDataRequest {
                namespace: self.namespace.clone(),
                metric_data,
            };

            requests.spawn(async move {
                let size = request.metric_data.len();
                let result = match timeout {
                    Some(timeout) => {
                        match tokio::time::timeout(timeout, client.put_metric_data(request)).await
                        {
                            Ok(result) => result,
                            Err(_) => Err(ClientError::from(format!(
                                "no response within {:?}",
                                timeout
                            ))),
                        }
                    }
                    None => client.put_metric_data(request).await,
                };
                (size, result)
            });
        }

        let mut summary = PublishSummary::default();
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((size, Ok(()))) => {
                    summary.requests_sent += 1;
                    summary.data_sent += size;
                }
                Ok((size, Err(e))) => {
                    summary.requests_failed += 1;
                    error!(
                        namespace = %self.namespace,
                        data = size,
                        "error reporting metrics to CloudWatch, the data sent in this request may have been discarded: {}",
                        e
                    );
                }
                Err(e) => {
                    summary.requests_failed += 1;
                    error!(
                        namespace = %self.namespace,
                        "request to CloudWatch did not complete, its data may have been discarded: {}",
                        e
                    );
                }
            }
        }
        summary.data_failed = total - summary.data_sent;

        debug!(
            "sent {} metric data to CloudWatch in {} requests ({} failed), namespace: {}",
            summary.data_sent, summary.requests_sent, summary.requests_failed, self.namespace
        );

        summary
    }
}

fn partition<T>(data: Vec<T>, size: usize) -> Vec<Vec<T>> {
    debug_assert!(size > 0);
    let mut chunks = Vec::with_capacity((data.len() + size - 1) / size);
    let mut data = data.into_iter().peekable();
    while data.peek().is_some() {
        chunks.push(data.by_ref().take(size).collect());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use indexmap::IndexSet;

    use super::{
        partition, ClientError, MetricDataClient, PublishSummary, Publisher, PutMetricDataRequest,
    };
    use crate::datum::MetricDatum;

    #[derive(Default)]
    struct RecordingClient {
        requests: Mutex<Vec<PutMetricDataRequest>>,
    }

    impl RecordingClient {
        fn sizes(&self) -> Vec<usize> {
            let mut sizes: Vec<_> = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.metric_data.len())
                .collect();
            sizes.sort_unstable_by(|a, b| b.cmp(a));
            sizes
        }
    }

    #[async_trait]
    impl MetricDataClient for RecordingClient {
        async fn put_metric_data(&self, request: PutMetricDataRequest) -> Result<(), ClientError> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    /// Fails every request holding a datum with the given name.
    struct FailingClient {
        poison: &'static str,
        panic: bool,
    }

    #[async_trait]
    impl MetricDataClient for FailingClient {
        async fn put_metric_data(&self, request: PutMetricDataRequest) -> Result<(), ClientError> {
            if request
                .metric_data
                .iter()
                .any(|d| d.metric_name == self.poison)
            {
                if self.panic {
                    panic!("client blew up");
                }
                return Err("throttled".into());
            }
            Ok(())
        }
    }

    /// Completes requests only once as many are waiting as the barrier has parties.
    struct GatheringClient {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl MetricDataClient for GatheringClient {
        async fn put_metric_data(&self, _: PutMetricDataRequest) -> Result<(), ClientError> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    struct StalledClient;

    #[async_trait]
    impl MetricDataClient for StalledClient {
        async fn put_metric_data(&self, _: PutMetricDataRequest) -> Result<(), ClientError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn data(names: &[&str]) -> Vec<MetricDatum> {
        names
            .iter()
            .map(|n| MetricDatum::new(*n, IndexSet::new()).with_value(1.0))
            .collect()
    }

    fn numbered(count: usize) -> Vec<MetricDatum> {
        (0..count)
            .map(|i| MetricDatum::new(format!("Metric{}", i), IndexSet::new()).with_value(1.0))
            .collect()
    }

    #[test]
    fn test_partition() {
        let chunks = partition((0..45).collect::<Vec<_>>(), 20);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, [20, 20, 5]);
        assert_eq!(chunks[2], [40, 41, 42, 43, 44]);

        assert_eq!(partition((0..40).collect::<Vec<_>>(), 20).len(), 2);
        assert!(partition(Vec::<u8>::new(), 20).is_empty());
    }

    #[tokio::test]
    async fn test_publish_in_batches() {
        let client = Arc::new(RecordingClient::default());
        let publisher = Publisher::new("TestNamespace", client.clone());

        let summary = publisher.publish(numbered(45)).await;
        assert_eq!(
            summary,
            PublishSummary {
                requests_sent: 3,
                requests_failed: 0,
                data_sent: 45,
                data_failed: 0,
            }
        );
        assert_eq!(client.sizes(), [20, 20, 5]);
        assert!(client
            .requests
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.namespace == "TestNamespace"));
    }

    #[tokio::test]
    async fn test_requests_are_in_flight_together() {
        let client = GatheringClient {
            barrier: tokio::sync::Barrier::new(3),
        };
        let publisher =
            Publisher::new("TestNamespace", client).with_timeout(Some(Duration::from_secs(1)));

        let summary = publisher.publish(numbered(45)).await;
        assert_eq!(summary.requests_sent, 3);
        assert_eq!(summary.requests_failed, 0);
    }

    #[tokio::test]
    async fn test_publish_nothing() {
        let client = Arc::new(RecordingClient::default());
        let publisher = Publisher::new("TestNamespace", client.clone());

        let summary = publisher.publish(Vec::new()).await;
        assert_eq!(summary, PublishSummary::default());
        assert!(client.sizes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_request_does_not_abort_publish() {
        let publisher = Publisher::new(
            "TestNamespace",
            FailingClient {
                poison: "Metric25",
                panic: false,
            },
        );

        let summary = publisher.publish(numbered(45)).await;
        assert_eq!(summary.requests_sent, 2);
        assert_eq!(summary.requests_failed, 1);
        assert_eq!(summary.data_sent, 25);
        assert_eq!(summary.data_failed, 20);
    }

    #[tokio::test]
    async fn test_panicking_request_does_not_abort_publish() {
        let publisher = Publisher::new(
            "TestNamespace",
            FailingClient {
                poison: "Bad",
                panic: true,
            },
        );

        let mut batch = data(&["Bad"]);
        batch.extend(numbered(40));
        let summary = publisher.publish(batch).await;
        assert_eq!(summary.requests_sent, 2);
        assert_eq!(summary.requests_failed, 1);
        assert_eq!(summary.data_sent, 21);
        assert_eq!(summary.data_failed, 20);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let publisher =
            Publisher::new("TestNamespace", StalledClient).with_timeout(Some(Duration::from_millis(10)));

        let summary = publisher.publish(numbered(3)).await;
        assert_eq!(summary.requests_failed, 1);
        assert_eq!(summary.data_failed, 3);
    }
}
