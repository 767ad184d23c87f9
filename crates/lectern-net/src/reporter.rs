//! Fire-and-forget reporting to the attendance backend.
//!
//! A report is a single JSON POST with a short timeout. Delivery failures
//! are logged and dropped; nothing is surfaced back into the decision
//! loop and there is no retry queue.

use std::time::Duration;

use chrono::SecondsFormat;
use lectern_core::Report;
use serde::Serialize;
use thiserror::Error;

const REPORT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("reporter setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Destination for presence reports. Fire-and-forget by contract.
pub trait ReportSink {
    fn submit(&self, report: &Report);
}

/// Wire payload for the attendance API. `duration` is whole seconds;
/// `time_stamp` is null on resume, where only the accumulated duration
/// changes.
#[derive(Debug, Serialize)]
struct AttendancePayload<'a> {
    student_id: &'a str,
    time_stamp: Option<String>,
    duration: i64,
    venue: &'a str,
}

/// HTTP reporter for the attendance API.
pub struct AttendanceReporter {
    client: reqwest::blocking::Client,
    url: String,
    venue: String,
    token: Option<String>,
}

impl AttendanceReporter {
    pub fn new(url: &str, venue: &str, token: Option<String>) -> Result<Self, ReporterError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            venue: venue.to_string(),
            token,
        })
    }

    fn payload_for<'a>(&'a self, report: &'a Report) -> AttendancePayload<'a> {
        match report {
            Report::Entry { subject_id, at } => AttendancePayload {
                student_id: subject_id,
                time_stamp: Some(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                duration: 0,
                venue: &self.venue,
            },
            Report::Resume {
                subject_id,
                duration,
            } => AttendancePayload {
                student_id: subject_id,
                time_stamp: None,
                duration: duration.num_seconds(),
                venue: &self.venue,
            },
            Report::Exit {
                subject_id,
                at,
                duration,
            } => AttendancePayload {
                student_id: subject_id,
                time_stamp: Some(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                duration: duration.num_seconds(),
                venue: &self.venue,
            },
        }
    }
}

impl ReportSink for AttendanceReporter {
    fn submit(&self, report: &Report) {
        let payload = self.payload_for(report);
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send() {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(subject = report.subject_id(), "attendance report delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    subject = report.subject_id(),
                    status = %response.status(),
                    "attendance API rejected report"
                );
            }
            Err(err) => {
                tracing::warn!(
                    subject = report.subject_id(),
                    error = %err,
                    "attendance report dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};

    fn reporter() -> AttendanceReporter {
        AttendanceReporter::new("http://localhost:9/api/mark-attendance/", "LT-2", None).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_entry_payload() {
        let r = reporter();
        let report = Report::Entry {
            subject_id: "S1001".into(),
            at: ts(1_700_000_000),
        };
        let payload = r.payload_for(&report);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["student_id"], "S1001");
        assert_eq!(json["duration"], 0);
        assert_eq!(json["venue"], "LT-2");
        assert_eq!(json["time_stamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_resume_payload_has_null_timestamp() {
        let r = reporter();
        let report = Report::Resume {
            subject_id: "S1001".into(),
            duration: TimeDelta::seconds(42),
        };
        let payload = r.payload_for(&report);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["time_stamp"].is_null());
        assert_eq!(json["duration"], 42);
    }

    #[test]
    fn test_exit_payload_truncates_to_whole_seconds() {
        let r = reporter();
        let report = Report::Exit {
            subject_id: "S1001".into(),
            at: ts(1_700_000_100),
            duration: TimeDelta::milliseconds(30_900),
        };
        let payload = r.payload_for(&report);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["duration"], 30);
        assert_eq!(json["time_stamp"], "2023-11-14T22:15:00Z");
    }
}
