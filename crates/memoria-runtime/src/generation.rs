//! Generation service seam and the bounded client around it.
//!
//! The core never talks to a language model directly: it hands the rendered
//! context and the new turn to a [`GenerationService`]. Each call is bounded
//! by a timeout and retried at most once.

use std::time::Duration;

use async_trait::async_trait;
use memoria_core::ConversationId;
use memoria_core::retry::RetryConfig;
use memoria_settings::GenerationSettings;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the generation service is asked to continue.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Serialized context, oldest material first.
    pub context: String,
    /// Text of the turn being answered.
    pub message: String,
}

/// Generation failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The call exceeded its timeout.
    #[error("generation timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The service reported an error.
    #[error("generation service error: {message}")]
    Service {
        /// Description.
        message: String,
        /// Whether a retry may succeed.
        retryable: bool,
    },
}

impl GenerationError {
    /// Whether a retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Service { retryable, .. } => *retryable,
        }
    }
}

/// External text generator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce a reply for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Why [`GenerationClient::generate`] gave up.
#[derive(Debug)]
pub enum GenerationFailure {
    /// Every attempt failed; carries the count and the last error.
    Failed {
        /// Calls made.
        attempts: u32,
        /// Last error.
        error: GenerationError,
    },
    /// The owning conversation was cancelled.
    Cancelled,
}

/// Timeout and single-retry policy around a [`GenerationService`].
#[derive(Clone, Debug)]
pub struct GenerationClient {
    timeout: Duration,
    max_retries: u32,
    retry: RetryConfig,
}

impl GenerationClient {
    /// Build from settings. More than one retry is never attempted.
    #[must_use]
    pub fn new(settings: &GenerationSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms.max(1)),
            max_retries: settings.max_retries.min(1),
            retry: RetryConfig::default(),
        }
    }

    /// Call `service`, retrying once on a retryable failure.
    pub async fn generate(
        &self,
        service: &dyn GenerationService,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationFailure> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(GenerationFailure::Cancelled),
                r = tokio::time::timeout(self.timeout, service.generate(request)) => r,
            };
            let error = match outcome {
                Ok(Ok(text)) => {
                    debug!(conversation_id = %request.conversation_id, attempt, "generation succeeded");
                    return Ok(text);
                }
                Ok(Err(e)) => e,
                Err(_) => GenerationError::Timeout { timeout_ms },
            };
            if !error.is_retryable() || attempt >= max_attempts {
                return Err(GenerationFailure::Failed {
                    attempts: attempt,
                    error,
                });
            }
            let delay = self.retry.delay_ms(attempt - 1, rand::random::<f64>());
            warn!(
                conversation_id = %request.conversation_id,
                attempt,
                delay_ms = delay,
                error = %error,
                "retrying generation"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(GenerationFailure::Cancelled),
                () = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request() -> GenerationRequest {
        GenerationRequest {
            conversation_id: ConversationId::from("c1"),
            context: "user: hello".into(),
            message: "hello".into(),
        }
    }

    fn client(timeout_ms: u64, max_retries: u32) -> GenerationClient {
        GenerationClient::new(&GenerationSettings {
            timeout_ms,
            max_retries,
            ..GenerationSettings::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_then_succeeds() {
        let mut mock = MockGenerationService::new();
        let mut calls = 0;
        let _ = mock.expect_generate().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(GenerationError::Service {
                    message: "overloaded".into(),
                    retryable: true,
                })
            } else {
                Ok("hi there".into())
            }
        });
        let text = client(1_000, 1)
            .generate(&mock, &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test(start_paused = true)]
    async fn never_retries_more_than_once() {
        let mut mock = MockGenerationService::new();
        let _ = mock.expect_generate().times(2).returning(|_| {
            Err(GenerationError::Service {
                message: "overloaded".into(),
                retryable: true,
            })
        });
        let err = client(1_000, 5)
            .generate(&mock, &request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, GenerationFailure::Failed { attempts: 2, .. });
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut mock = MockGenerationService::new();
        let _ = mock.expect_generate().times(1).returning(|_| {
            Err(GenerationError::Service {
                message: "bad request".into(),
                retryable: false,
            })
        });
        let err = client(1_000, 1)
            .generate(&mock, &request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GenerationFailure::Failed { attempts: 1, error: GenerationError::Service { retryable: false, .. } }
        );
    }

    struct Stalled;

    #[async_trait]
    impl GenerationService for Stalled {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let err = client(50, 1)
            .generate(&Stalled, &request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GenerationFailure::Failed { attempts: 2, error: GenerationError::Timeout { timeout_ms: 50 } }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(50, 1)
            .generate(&Stalled, &request(), &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, GenerationFailure::Cancelled);
    }
}
