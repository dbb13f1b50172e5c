use crate::transport::{Transport, TransportError};
use crate::types::ChartId;
use crate::vendor::chart_query_path;
use http::{Method, StatusCode};
use std::sync::Arc;

/// A chart confirmed to exist in the configured project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedChart {
    pub id: ChartId,
    /// Transport attempts spent on the lookup.
    pub attempts: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid chart id: {0:?}")]
    InvalidFormat(String),
    #[error("chart not found")]
    NotFound { attempts: u32 },
    #[error("credentials rejected ({status})")]
    Unauthorized { status: StatusCode, attempts: u32 },
    #[error("chart lookup failed: {0}")]
    Transient(TransportError),
}

impl ValidationError {
    /// Bad credentials make every further call futile, so the run stops.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ValidationError::Unauthorized { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ValidationError::InvalidFormat(_) => 0,
            ValidationError::NotFound { attempts }
            | ValidationError::Unauthorized { attempts, .. } => *attempts,
            ValidationError::Transient(err) => err.attempts(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ValidationError::InvalidFormat(_) => None,
            ValidationError::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            ValidationError::Unauthorized { status, .. } => Some(*status),
            ValidationError::Transient(err) => err.status(),
        }
    }

    /// Reason recorded on the skipped outcome.
    pub fn skip_reason(&self) -> String {
        match self {
            ValidationError::InvalidFormat(_) => "invalid chart id".into(),
            ValidationError::NotFound { .. } => "not found".into(),
            ValidationError::Unauthorized { .. } => crate::report::ABORTED_AUTH.into(),
            ValidationError::Transient(err) => format!("lookup failed: {}", err.explanation()),
        }
    }
}

/// Confirms chart identifiers against the vendor before anything is written.
#[derive(Clone)]
pub struct ChartValidator {
    transport: Arc<Transport>,
}

impl ChartValidator {
    pub fn new(transport: Arc<Transport>) -> Self {
        ChartValidator { transport }
    }

    pub async fn validate(&self, identifier: &str) -> Result<ValidatedChart, ValidationError> {
        // Malformed ids never reach the vendor and never count against rate limits.
        let id = ChartId::parse(identifier)
            .map_err(|_| ValidationError::InvalidFormat(identifier.to_string()))?;

        let result = self
            .transport
            .execute(Method::GET, &chart_query_path(&id), &[], None)
            .await;

        match result {
            Ok(response) => {
                tracing::debug!(chart_id = %id, attempts = response.attempts, "chart exists");
                Ok(ValidatedChart {
                    id,
                    attempts: response.attempts,
                })
            }
            Err(err) => {
                let attempts = err.attempts();
                let classified = match err.status() {
                    Some(StatusCode::NOT_FOUND) => ValidationError::NotFound { attempts },
                    Some(status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)) => {
                        ValidationError::Unauthorized { status, attempts }
                    }
                    _ => ValidationError::Transient(err),
                };
                tracing::debug!(chart_id = %id, error = %classified, "chart validation failed");
                Err(classified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ScriptedBackend, raw, test_transport};
    use crate::transport::BackendError;

    fn validator(backend: Arc<ScriptedBackend>) -> ChartValidator {
        let (transport, _clock) = test_transport(backend);
        ChartValidator::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn existing_chart_is_validated() {
        let backend = ScriptedBackend::new(|_| Ok(raw(200, r#"{"data":{}}"#)));
        let validator = validator(backend.clone());

        let chart = validator.validate("ez25o7zy").await.unwrap();
        assert_eq!(chart.id.as_str(), "ez25o7zy");
        assert_eq!(chart.attempts, 1);
        assert_eq!(backend.calls()[0].path, "/api/3/chart/ez25o7zy/query");
        assert_eq!(backend.calls()[0].method, Method::GET);
    }

    #[tokio::test]
    async fn malformed_id_makes_no_call() {
        let backend = ScriptedBackend::new(|_| Ok(raw(200, "")));
        let validator = validator(backend.clone());

        let err = validator.validate("ab").await.unwrap_err();
        assert_eq!(err, ValidationError::InvalidFormat("ab".into()));
        assert_eq!(err.skip_reason(), "invalid chart id");
        assert!(validator.validate("../etc").await.is_err());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn classification_is_stable() {
        let backend = ScriptedBackend::new(|req| {
            if req.url.path().contains("badid") {
                Ok(raw(404, r#"{"error":"not found"}"#))
            } else {
                Ok(raw(200, ""))
            }
        });
        let validator = validator(backend);

        let first = validator.validate("badid").await.unwrap_err();
        let second = validator.validate("badid").await.unwrap_err();
        assert_eq!(first, ValidationError::NotFound { attempts: 1 });
        assert_eq!(first, second);
        assert_eq!(first.skip_reason(), "not found");
    }

    #[tokio::test]
    async fn unauthorized_is_fatal() {
        for code in [401, 403] {
            let backend = ScriptedBackend::new(move |_| Ok(raw(code, "")));
            let err = validator(backend).validate("abc123").await.unwrap_err();
            assert!(err.is_fatal());
            assert_eq!(err.skip_reason(), "aborted: authentication failure");
        }
    }

    #[tokio::test]
    async fn other_failures_are_transient() {
        let backend = ScriptedBackend::new(|_| Ok(raw(500, "")));
        let err = validator(backend.clone()).validate("abc123").await.unwrap_err();
        assert!(matches!(err, ValidationError::Transient(_)));
        assert!(!err.is_fatal());
        assert_eq!(err.attempts(), 4);
        assert_eq!(err.skip_reason(), "lookup failed: vendor service error");

        let backend = ScriptedBackend::new(|_| Err(BackendError::Network("reset".into())));
        let err = validator(backend).validate("abc123").await.unwrap_err();
        assert_eq!(err.skip_reason(), "lookup failed: network error");

        let backend = ScriptedBackend::new(|_| Ok(raw(400, "")));
        let err = validator(backend).validate("abc123").await.unwrap_err();
        assert!(matches!(err, ValidationError::Transient(_)));
    }
}
