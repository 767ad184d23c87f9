//! Client for the remote anti-spoofing classifier.
//!
//! Takes a cropped face JPEG and returns a `(live, spoof)` score pair;
//! the verdict is live only when the live score wins outright. One call
//! per detection — the voting window in the engine absorbs the noise.

use std::time::Duration;

use lectern_core::Verdict;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("liveness request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("liveness service returned {status}")]
    Rejected { status: reqwest::StatusCode },
    #[error("malformed liveness response: expected two scores, got {0}")]
    BadScores(usize),
}

/// Liveness classifier seam; the engine only sees verdicts.
pub trait LivenessGate {
    fn classify(&self, face_jpeg: &[u8]) -> Result<Verdict, LivenessError>;
}

#[derive(Debug, Deserialize)]
struct LivenessResponse {
    /// `[live_score, spoof_score]`.
    scores: Vec<f32>,
}

impl LivenessResponse {
    fn verdict(&self) -> Result<Verdict, LivenessError> {
        if self.scores.len() < 2 {
            return Err(LivenessError::BadScores(self.scores.len()));
        }
        Ok(Verdict::from_scores(self.scores[0], self.scores[1]))
    }
}

/// HTTP liveness gate against the classifier service.
pub struct HttpLivenessGate {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpLivenessGate {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, LivenessError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl LivenessGate for HttpLivenessGate {
    fn classify(&self, face_jpeg: &[u8]) -> Result<Verdict, LivenessError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(face_jpeg.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(LivenessError::Rejected { status });
        }

        let parsed: LivenessResponse = response.json()?;
        parsed.verdict()
    }
}
