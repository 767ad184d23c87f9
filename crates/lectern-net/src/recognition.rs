//! Client for the remote face-recognition service.
//!
//! The service accepts a JPEG frame and returns, per detected face, a
//! bounding box and identity candidates ranked by similarity. Request
//! options mirror the service's recognize endpoint parameters.

use std::time::Duration;

use lectern_core::Detection;
use reqwest::blocking::multipart;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("recognition service returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Source of face detections for an encoded frame. Seam between the
/// decision loop and the network.
pub trait Recognizer {
    fn recognize(&self, frame_jpeg: &[u8]) -> Result<Vec<Detection>, RecognitionError>;
}

/// Options forwarded with every recognize request.
#[derive(Debug, Clone)]
pub struct RecognitionOptions {
    /// Maximum faces returned per frame; 0 means no limit.
    pub limit: u32,
    /// Minimum detector probability for a face to be returned.
    pub det_prob_threshold: f32,
    /// Identity candidates returned per face.
    pub prediction_count: u32,
    /// Extra per-face plugins to run, comma-separated.
    pub face_plugins: String,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            det_prob_threshold: 0.8,
            prediction_count: 1,
            face_plugins: "age,gender".to_string(),
        }
    }
}

/// Envelope the service wraps its detections in.
#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    result: Vec<Detection>,
}

/// HTTP recognizer against a CompreFace-compatible recognize endpoint.
pub struct HttpRecognizer {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    options: RecognitionOptions,
}

impl HttpRecognizer {
    pub fn new(
        base_url: &str,
        api_key: &str,
        options: RecognitionOptions,
        timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/api/v1/recognition/recognize",
                base_url.trim_end_matches('/')
            ),
            api_key: api_key.to_string(),
            options,
        })
    }
}

impl Recognizer for HttpRecognizer {
    fn recognize(&self, frame_jpeg: &[u8]) -> Result<Vec<Detection>, RecognitionError> {
        let part = multipart::Part::bytes(frame_jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .query(&[
                ("limit", self.options.limit.to_string()),
                (
                    "det_prob_threshold",
                    self.options.det_prob_threshold.to_string(),
                ),
                ("prediction_count", self.options.prediction_count.to_string()),
                ("face_plugins", self.options.face_plugins.clone()),
            ])
            .multipart(form)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RecognitionError::Rejected { status, body });
        }

        let parsed: RecognizeResponse = response.json()?;
        tracing::trace!(faces = parsed.result.len(), "recognition response");
        Ok(parsed.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_envelope_parses() {
        let json = r#"{
            "result": [
                {
                    "box": {"probability": 0.999, "x_min": 50, "y_min": 40, "x_max": 150, "y_max": 180},
                    "subjects": [{"subject": "S3310", "similarity": 0.88}],
                    "gender": {"probability": 0.93, "value": "male"}
                },
                {
                    "box": {"probability": 0.91, "x_min": 300, "y_min": 60, "x_max": 380, "y_max": 170}
                }
            ]
        }"#;
        let parsed: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.result.len(), 2);
        assert_eq!(parsed.result[0].subjects[0].subject_id, "S3310");
        // face with no enrolled match: empty subjects
        assert!(parsed.result[1].subjects.is_empty());
    }

    #[test]
    fn test_empty_result_and_missing_key() {
        let parsed: RecognizeResponse = serde_json::from_str(r#"{"result": []}"#).unwrap();
        assert!(parsed.result.is_empty());
        // some deployments omit "result" entirely when no face is found
        let parsed: RecognizeResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.result.is_empty());
    }

    #[test]
    fn test_url_normalizes_trailing_slash() {
        let r = HttpRecognizer::new(
            "http://localhost:8000/",
            "key",
            RecognitionOptions::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(r.url, "http://localhost:8000/api/v1/recognition/recognize");
    }
}
