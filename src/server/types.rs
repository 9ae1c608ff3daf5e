//! Wire schemas for the snapshot test protocol.
//!
//! Every endpoint answers with [`ApiResponse`]; request bodies are validated
//! at the boundary and shape mismatches become `{result: "ERROR"}` responses
//! instead of propagating missing fields into the handlers.

use serde::{Deserialize, Serialize};

use crate::report::TestCase;

/// Uniform response body for all protocol endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiResponse {
    pub result: ResponseStatus,

    /// Failure description, present only on errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            result: ResponseStatus::Ok,
            info: None,
        }
    }

    pub fn error(info: impl Into<String>) -> Self {
        Self {
            result: ResponseStatus::Error,
            info: Some(info.into()),
        }
    }
}

/// Body of `POST /reportTest`: the final outcome of one snapshot test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTestRequest {
    pub name: String,

    #[serde(default)]
    pub failure: Option<String>,

    /// Execution time in milliseconds
    pub time: u64,

    /// Render time in milliseconds
    #[serde(default)]
    pub render_time: Option<u64>,

    #[serde(default)]
    pub is_skipped: Option<bool>,
}

impl From<ReportTestRequest> for TestCase {
    fn from(req: ReportTestRequest) -> Self {
        TestCase {
            name: req.name,
            failure: req.failure,
            is_skipped: req.is_skipped.unwrap_or(false),
            time_ms: req.time,
            render_time_ms: req.render_time,
        }
    }
}

/// Body of `POST /log`: a log record forwarded from the app under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub tag: String,

    /// One of `v`, `d`, `i`, `w`, `e`; defaults to `v`
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ok_response_serializes_without_info() {
        let json = serde_json::to_string(&ApiResponse::ok()).unwrap();
        assert_eq!(json, r#"{"result":"OK"}"#);
    }

    #[test]
    fn error_response_carries_info() {
        let json = serde_json::to_string(&ApiResponse::error("nope")).unwrap();
        assert_eq!(json, r#"{"result":"ERROR","info":"nope"}"#);
    }

    #[test]
    fn report_request_converts_to_test_case() {
        let req: ReportTestRequest = serde_json::from_str(
            r#"{"name":"home_screen","time":120,"renderTime":45}"#,
        )
        .unwrap();
        let case = TestCase::from(req);

        assert_eq!(case.name, "home_screen");
        assert_eq!(case.time_ms, 120);
        assert_eq!(case.render_time_ms, Some(45));
        assert!(!case.is_skipped);
        assert_eq!(case.failure, None);
    }

    #[test]
    fn report_request_optional_fields() {
        let req: ReportTestRequest = serde_json::from_str(
            r#"{"name":"a","failure":"boom","time":1,"isSkipped":true}"#,
        )
        .unwrap();
        let case = TestCase::from(req);

        assert!(case.is_skipped);
        assert_eq!(case.failure.as_deref(), Some("boom"));
    }
}
