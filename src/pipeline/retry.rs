//! Retrying client: bounded exponential back-off around one transport call.
//!
//! ## Retry Strategy
//!
//! Only failures whose [`FailureKind`](crate::error::FailureKind) is
//! retryable (network errors and timeouts) earn another attempt. An HTTP
//! error status or an unparseable body is returned at once: re-sending the
//! same multipart body to a service that rejected it gains nothing. With the
//! default 100 ms base and 2 retries the waits are 200 ms then 400 ms.
//!
//! A 2xx body carrying `"status": false` is checked here too, after the
//! retry loop, and becomes [`PhotoError::ServiceDeclined`].

use crate::config::RetryPolicy;
use crate::error::PhotoError;
use crate::pipeline::stages::Stage;
use crate::pipeline::transport::{AiTransport, FormPayload};
use crate::progress::ProgressCallback;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

/// A successful call together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub body: Value,
    pub attempts: u32,
}

/// Sends one form with the given [`RetryPolicy`].
///
/// Holds no state beyond borrowed references: a fresh client is built for
/// every stage call, so the policy is never shared between requests.
pub struct RetryingClient<'a> {
    transport: &'a dyn AiTransport,
    policy: RetryPolicy,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> RetryingClient<'a> {
    pub fn new(transport: &'a dyn AiTransport, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// POST `payload` to `url` on behalf of `stage`.
    pub async fn post(
        &self,
        stage: Stage,
        url: &str,
        payload: &FormPayload,
    ) -> Result<Reply, PhotoError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        let body = loop {
            match self
                .transport
                .post_form(url, payload.clone(), self.policy.timeout)
                .await
            {
                Ok(body) => break body,
                Err(e) => {
                    let kind = e.kind();
                    if !kind.is_retryable() || attempt >= max_attempts {
                        return Err(PhotoError::Transport {
                            endpoint: stage.endpoint(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let backoff = self.policy.delay_for(attempt);
                    warn!(
                        "{}: attempt {}/{} failed ({:?}): {}; retrying in {}ms",
                        stage,
                        attempt,
                        max_attempts,
                        kind,
                        e,
                        backoff.as_millis()
                    );
                    attempt += 1;
                    if let Some(cb) = self.progress {
                        cb.on_retry(stage, attempt, backoff.as_millis() as u64);
                    }
                    sleep(backoff).await;
                }
            }
        };

        if body.get("status") == Some(&Value::Bool(false)) {
            return Err(PhotoError::ServiceDeclined {
                endpoint: stage.endpoint(),
            });
        }

        Ok(Reply {
            body,
            attempts: attempt,
        })
    }
}
