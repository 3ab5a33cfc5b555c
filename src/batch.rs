//! Batch API: run many independent uploads, emitting results as they finish.
//!
//! Each job is its own request with its own sequential workflow; jobs only
//! share the pipeline's transport and configuration, neither of which is
//! mutated. Results arrive in completion order, tagged with the index of the
//! job that produced them.

use crate::error::PhotoError;
use crate::output::ProcessingOutput;
use crate::params::ProcessingParams;
use crate::pipeline::input::ImageUpload;
use crate::process::PhotoPipeline;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::{info, warn};

/// One unit of batch work.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub image: ImageUpload,
    pub params: ProcessingParams,
}

/// Outcome of one [`BatchJob`].
#[derive(Debug)]
pub struct BatchItem {
    /// Position of the job in the input list.
    pub index: usize,
    pub filename: String,
    pub outcome: Result<ProcessingOutput, PhotoError>,
}

/// A boxed stream of batch outcomes.
pub type BatchStream = Pin<Box<dyn Stream<Item = BatchItem> + Send>>;

/// Process `jobs` with at most `concurrency` requests in flight.
///
/// # Example
/// ```rust,no_run
/// use idphoto_pipeline::{process_batch, BatchJob, ImageUpload, PhotoPipeline, ProcessingParams, ServiceConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = PhotoPipeline::new(ServiceConfig::from_env()?);
/// let jobs = vec![BatchJob {
///     image: ImageUpload::from_path("alice.jpg")?,
///     params: ProcessingParams::new().with("backgroundColor", "#FFFFFF"),
/// }];
/// let mut results = process_batch(&pipeline, jobs, 4);
/// while let Some(item) = results.next().await {
///     match item.outcome {
///         Ok(out) => println!("{}: {} attempts", item.filename, out.stats.total_attempts()),
///         Err(e) => eprintln!("{}: {e}", item.filename),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn process_batch(
    pipeline: &PhotoPipeline,
    jobs: Vec<BatchJob>,
    concurrency: usize,
) -> BatchStream {
    info!("Starting batch of {} job(s), concurrency {}", jobs.len(), concurrency.max(1));
    let pipeline = pipeline.clone();

    let s = stream::iter(jobs.into_iter().enumerate().map(move |(index, job)| {
        let pipeline = pipeline.clone();
        async move {
            let outcome = pipeline.process(&job.image, &job.params).await;
            if let Err(ref e) = outcome {
                warn!("Job {} ('{}') failed: {}", index, job.image.filename, e);
            }
            BatchItem {
                index,
                filename: job.image.filename,
                outcome,
            }
        }
    }))
    .buffer_unordered(concurrency.max(1));

    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::error::TransportError;
    use crate::pipeline::transport::{AiTransport, FormPayload};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers every stage with a usable image and tracks peak concurrency.
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AiTransport for Gauge {
        async fn post_form(
            &self,
            _url: &str,
            _payload: FormPayload,
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({"status": true, "image_base64": "aGk=", "image_base64_hd": "aGk="}))
        }
    }

    fn job(name: &str) -> BatchJob {
        BatchJob {
            image: ImageUpload::new(vec![1, 2, 3], "image/png", name),
            params: ProcessingParams::new(),
        }
    }

    fn pipeline(transport: Arc<Gauge>) -> PhotoPipeline {
        let config = ServiceConfig::builder().host("ai.test").build().unwrap();
        PhotoPipeline::with_transport(transport, config)
    }

    #[test]
    fn empty_batch_yields_nothing() {
        let pipeline = pipeline(Arc::new(Gauge::default()));
        let items: Vec<BatchItem> =
            tokio_test::block_on(process_batch(&pipeline, Vec::new(), 4).collect());
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_and_every_job_reported() {
        let gauge = Arc::new(Gauge::default());
        let pipeline = pipeline(gauge.clone());
        let jobs = (0..6).map(|i| job(&format!("p{i}.png"))).collect();

        let mut items: Vec<BatchItem> = process_batch(&pipeline, jobs, 2).collect().await;
        items.sort_by_key(|i| i.index);

        assert_eq!(items.len(), 6);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.index, i);
            assert_eq!(item.filename, format!("p{i}.png"));
            assert!(item.outcome.is_ok(), "{:?}", item.outcome);
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn zero_concurrency_still_runs() {
        let pipeline = pipeline(Arc::new(Gauge::default()));
        let items: Vec<BatchItem> = process_batch(&pipeline, vec![job("a.png")], 0)
            .collect()
            .await;
        assert_eq!(items.len(), 1);
    }
}
