//! HTTP client for the external face analysis service.
//!
//! `POST {base}/faces` with a PNG body; the service answers
//! `{"faces": [{"box": {"x":..,"y":..,"width":..,"height":..}, "encoding": [..]}]}`.
//! Uses the blocking reqwest client, so it must not be created or dropped
//! inside an async runtime.

use std::time::Duration;

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::frame::Frame;
use crate::types::DetectedFace;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

pub struct HttpAnalyzer {
    client: Client,
    endpoint: String,
}

impl HttpAnalyzer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AnalyzerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/faces", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FaceAnalyzer for HttpAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let png = frame
            .to_png()
            .map_err(|e| AnalyzerError::Failed(format!("encode frame: {e}")))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| AnalyzerError::Failed(e.to_string()))?;

        let body = response
            .text()
            .map_err(|e| AnalyzerError::BadResponse(e.to_string()))?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Vec<DetectedFace>, AnalyzerError> {
    let parsed: FacesResponse =
        serde_json::from_str(body).map_err(|e| AnalyzerError::BadResponse(e.to_string()))?;
    Ok(parsed.faces)
}
