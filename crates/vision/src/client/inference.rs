//! HTTP client for the detection server and typed `/process` outcomes.

use std::time::Duration;

use image::RgbaImage;
use reqwest::{
    blocking::Client,
    header::{CONTENT_TYPE, HeaderMap},
};
use serde::Deserialize;

use crate::client::{data::DetectionCounts, error::ClientError};

/// Response header carrying the JSON detection counts.
pub const DETECTIONS_HEADER: &str = "X-Detections";

/// Body of `GET /status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    pub model_ready: bool,
}

/// `/process` response before interpretation.
#[derive(Clone, Debug, Default)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub content_type: Option<String>,
    pub detections: Option<String>,
    pub body: Vec<u8>,
}

/// JSON body of a successful non-image `/process` reply.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerNotice {
    /// `{"status": "busy" | "error", "message": ...}` as sent by the server
    /// when it cannot take the frame.
    Status {
        status: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// Any other JSON body.
    Other(serde_json::Value),
}

impl ServerNotice {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerNotice::Status { status, .. } if status == "error")
    }
}

/// Remote side of the capture loop.
pub trait InferenceApi: Send + Sync {
    fn status(&self) -> Result<StatusReport, ClientError>;
    fn process(&self, jpeg: Vec<u8>) -> Result<RawResponse, ClientError>;
}

/// Result of one submission, as applied by the session.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// Annotated frame plus the counts parsed from its header.
    Annotated {
        image: RgbaImage,
        detections: DetectionCounts,
    },
    /// Successful non-image reply.
    Notice(ServerNotice),
    /// Non-success HTTP status.
    Rejected { status: u16, reason: String },
    /// Transport, encode, decode or parse failure.
    Failed(String),
}

impl SubmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Annotated { .. } => "annotated",
            SubmissionOutcome::Notice(_) => "notice",
            SubmissionOutcome::Rejected { .. } => "rejected",
            SubmissionOutcome::Failed(_) => "failed",
        }
    }
}

/// Interpret a `/process` response.
pub fn classify_response(raw: RawResponse) -> SubmissionOutcome {
    if !(200..300).contains(&raw.status) {
        return SubmissionOutcome::Rejected {
            status: raw.status,
            reason: raw.reason,
        };
    }

    let is_image = raw
        .content_type
        .as_deref()
        .is_some_and(|value| value.contains("image"));

    if is_image {
        let detections = DetectionCounts::from_header(raw.detections.as_deref());
        return match image::load_from_memory(&raw.body) {
            Ok(decoded) => SubmissionOutcome::Annotated {
                image: decoded.into_rgba8(),
                detections,
            },
            Err(err) => SubmissionOutcome::Failed(ClientError::Decode(err).to_string()),
        };
    }

    match serde_json::from_slice::<ServerNotice>(&raw.body) {
        Ok(notice) => SubmissionOutcome::Notice(notice),
        Err(err) => SubmissionOutcome::Failed(
            ClientError::InvalidResponse(format!("unparseable server reply: {err}")).to_string(),
        ),
    }
}

/// [`InferenceApi`] over a blocking `reqwest` client.
pub struct HttpInferenceClient {
    client: Client,
    base_url: String,
}

impl HttpInferenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl InferenceApi for HttpInferenceClient {
    fn status(&self) -> Result<StatusReport, ClientError> {
        let response = self
            .client
            .get(self.url("/status"))
            .send()?
            .error_for_status()?;
        let report = response.json::<StatusReport>()?;
        Ok(report)
    }

    fn process(&self, jpeg: Vec<u8>) -> Result<RawResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/process"))
            .header(CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();
        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            content_type: header_value(&headers, CONTENT_TYPE.as_str()),
            detections: header_value(&headers, DETECTIONS_HEADER),
            body,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
