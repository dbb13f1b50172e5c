//! Vendor endpoints and the connection check.

use crate::transport::{Transport, TransportError};
use crate::types::ChartId;
use http::{Method, StatusCode};
use serde::Deserialize;

pub const ANNOTATIONS_PATH: &str = "api/2/annotations";

/// Read endpoint used to confirm a chart exists in the project.
pub fn chart_query_path(chart: &ChartId) -> String {
    format!("api/3/chart/{chart}/query")
}

/// Body returned by the annotation creation endpoint.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct AnnotationCreated {
    pub success: Option<bool>,
    pub annotation: Option<CreatedAnnotation>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct CreatedAnnotation {
    // Numeric in practice, but treated as opaque.
    pub id: Option<serde_json::Value>,
}

impl AnnotationCreated {
    pub fn annotation_id(&self) -> Option<String> {
        match self.annotation.as_ref()?.id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("authentication failed - check your API keys")]
    AuthenticationFailed,
    #[error("API error: {0}")]
    Api(StatusCode),
    #[error("connection error: {0}")]
    Transport(TransportError),
}

/// Verifies that the credentials are accepted by listing annotations.
pub async fn check_connection(transport: &Transport) -> Result<(), ConnectionError> {
    match transport
        .execute(Method::GET, ANNOTATIONS_PATH, &[], None)
        .await
    {
        Ok(response) if response.status == StatusCode::OK => {
            tracing::info!(region = %transport.credentials().region(), "connection successful");
            Ok(())
        }
        Ok(response) => Err(ConnectionError::Api(response.status)),
        Err(err) => match err.status() {
            Some(StatusCode::UNAUTHORIZED) => Err(ConnectionError::AuthenticationFailed),
            Some(status) => Err(ConnectionError::Api(status)),
            None => Err(ConnectionError::Transport(err)),
        },
    }
}
