use crate::report::SubmissionOutcome;
use crate::transport::{Transport, TransportError};
use crate::types::{AnnotationRequest, ChartId};
use crate::validator::ValidatedChart;
use crate::vendor::{ANNOTATIONS_PATH, AnnotationCreated};
use http::{Method, StatusCode};
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("{}", .0.explanation())]
    Transport(#[from] TransportError),
    #[error("vendor rejected annotation")]
    Rejected { status: StatusCode, attempts: u32 },
}

impl SubmissionError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SubmissionError::Transport(err) => err.status(),
            SubmissionError::Rejected { status, .. } => Some(*status),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SubmissionError::Transport(err) => err.attempts(),
            SubmissionError::Rejected { attempts, .. } => *attempts,
        }
    }
}

/// Proof that the vendor created an annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationReceipt {
    pub status: StatusCode,
    pub attempts: u32,
    pub annotation_id: Option<String>,
}

/// Creates the annotation on one chart per call. The vendor API has no batch
/// form, so a run issues exactly one creation call per validated chart.
#[derive(Clone)]
pub struct AnnotationSubmitter {
    transport: Arc<Transport>,
}

impl AnnotationSubmitter {
    pub fn new(transport: Arc<Transport>) -> Self {
        AnnotationSubmitter { transport }
    }

    pub async fn submit(
        &self,
        chart: &ValidatedChart,
        request: &AnnotationRequest,
    ) -> SubmissionOutcome {
        let mut outcome = SubmissionOutcome::pending(chart.id.as_str());
        outcome.mark_validated(chart.attempts);

        match self.create(&chart.id, request).await {
            Ok(receipt) => {
                tracing::info!(
                    chart_id = %chart.id,
                    attempts = receipt.attempts,
                    annotation_id = receipt.annotation_id.as_deref().unwrap_or("-"),
                    "annotation created"
                );
                outcome.mark_submitted(
                    receipt.status.as_u16(),
                    receipt.attempts,
                    receipt.annotation_id,
                );
            }
            Err(err) => {
                tracing::warn!(chart_id = %chart.id, error = %err, "annotation failed");
                outcome.mark_failed(
                    err.to_string(),
                    err.status().map(|s| s.as_u16()),
                    err.attempts(),
                );
            }
        }
        outcome
    }

    /// Issues the creation call for one chart.
    pub async fn create(
        &self,
        chart: &ChartId,
        request: &AnnotationRequest,
    ) -> Result<AnnotationReceipt, SubmissionError> {
        let params = annotation_params(self.transport.credentials().project_id(), chart, request);
        let response = self
            .transport
            .execute(Method::POST, ANNOTATIONS_PATH, &params, None)
            .await?;

        // Bodies that are not JSON count as success; only an explicit
        // `"success": false` is a rejection.
        let body: AnnotationCreated = response.json().unwrap_or_default();
        if body.success == Some(false) {
            return Err(SubmissionError::Rejected {
                status: response.status,
                attempts: response.attempts,
            });
        }

        Ok(AnnotationReceipt {
            status: response.status,
            attempts: response.attempts,
            annotation_id: body.annotation_id(),
        })
    }
}

/// Query parameters of the annotation creation endpoint.
pub fn annotation_params(
    project_id: u64,
    chart: &ChartId,
    request: &AnnotationRequest,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("app_id", project_id.to_string()),
        ("date", request.date().format("%Y-%m-%d").to_string()),
        ("label", request.name().to_string()),
        ("chart_id", chart.to_string()),
    ];
    if let Some(description) = request.description() {
        params.push(("details", description.to_string()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::OutcomeStatus;
    use crate::testutils::{ScriptedBackend, raw, test_transport};
    use crate::transport::BackendError;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(description: Option<&str>) -> AnnotationRequest {
        AnnotationRequest::new(
            NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(),
            "Pricing page launch",
            description,
        )
        .unwrap()
    }

    fn chart(id: &str) -> ValidatedChart {
        ValidatedChart {
            id: ChartId::parse(id).unwrap(),
            attempts: 1,
        }
    }

    fn submitter(backend: Arc<ScriptedBackend>) -> AnnotationSubmitter {
        let (transport, _clock) = test_transport(backend);
        AnnotationSubmitter::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn builds_vendor_params() {
        let backend = ScriptedBackend::new(|_| {
            Ok(raw(200, r#"{"success":true,"annotation":{"id":501}}"#))
        });
        let outcome = submitter(backend.clone())
            .submit(&chart("ez25o7zy"), &request(Some("v2 pricing")))
            .await;

        assert_eq!(outcome.status(), OutcomeStatus::Submitted);
        assert_eq!(outcome.annotation_id(), Some("501"));

        let call = &backend.calls()[0];
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.path, "/api/2/annotations");
        assert_eq!(call.query_value("app_id"), Some("187520"));
        assert_eq!(call.query_value("date"), Some("2024-01-09"));
        assert_eq!(call.query_value("label"), Some("Pricing page launch"));
        assert_eq!(call.query_value("chart_id"), Some("ez25o7zy"));
        assert_eq!(call.query_value("details"), Some("v2 pricing"));
    }

    #[tokio::test]
    async fn details_omitted_without_description() {
        let backend = ScriptedBackend::new(|_| Ok(raw(201, "")));
        let outcome = submitter(backend.clone())
            .submit(&chart("abc123"), &request(None))
            .await;

        assert_eq!(outcome.status(), OutcomeStatus::Submitted);
        assert_eq!(outcome.http_status(), Some(201));
        assert_eq!(backend.calls()[0].query_value("details"), None);
    }

    #[tokio::test]
    async fn rate_limited_twice_then_created() {
        let counter = AtomicU32::new(0);
        let backend = ScriptedBackend::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(raw(429, ""))
            } else {
                Ok(raw(201, r#"{"success":true}"#))
            }
        });
        let outcome = submitter(backend.clone())
            .submit(&chart("ez25o7zy"), &request(None))
            .await;

        assert_eq!(outcome.status(), OutcomeStatus::Submitted);
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn persistent_503_fails_after_max_attempts() {
        let backend = ScriptedBackend::new(|_| Ok(raw(503, "")));
        let outcome = submitter(backend.clone())
            .submit(&chart("ez25o7zy"), &request(None))
            .await;

        assert_eq!(outcome.status(), OutcomeStatus::Failed);
        assert_eq!(outcome.http_status(), Some(503));
        assert_eq!(outcome.attempt_count(), 4);
        assert_eq!(outcome.error_detail(), Some("vendor service error"));
        assert_eq!(backend.calls().len(), 4);
    }

    #[tokio::test]
    async fn failure_explanations() {
        let cases = [
            (401, "authentication failed"),
            (403, "insufficient permissions"),
            (404, "chart no longer exists"),
            (429, "rate limited"),
            (422, "request rejected by vendor"),
        ];
        for (code, detail) in cases {
            let backend = ScriptedBackend::new(move |_| Ok(raw(code, "")));
            let outcome = submitter(backend)
                .submit(&chart("abc123"), &request(None))
                .await;
            assert_eq!(outcome.status(), OutcomeStatus::Failed);
            assert_eq!(outcome.http_status(), Some(code));
            assert_eq!(outcome.error_detail(), Some(detail));
        }

        let backend = ScriptedBackend::new(|_| Err(BackendError::Timeout));
        let outcome = submitter(backend)
            .submit(&chart("abc123"), &request(None))
            .await;
        assert_eq!(outcome.error_detail(), Some("request timed out"));
        assert_eq!(outcome.http_status(), None);
    }

    #[tokio::test]
    async fn explicit_rejection_fails() {
        let backend = ScriptedBackend::new(|_| Ok(raw(200, r#"{"success":false}"#)));
        let outcome = submitter(backend)
            .submit(&chart("abc123"), &request(None))
            .await;

        assert_eq!(outcome.status(), OutcomeStatus::Failed);
        assert_eq!(outcome.error_detail(), Some("vendor rejected annotation"));
        assert_eq!(outcome.http_status(), Some(200));
    }
}
