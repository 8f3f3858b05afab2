//! IPC protocol types and validation for lockboxd.
//!
//! This crate is shared by the daemon and its clients to prevent schema
//! drift. The daemon remains the authority on validation, but clients can
//! reuse the same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024; // 64KB
pub const MAX_REASON_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    StartLock,
    RequestOverride,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartLockParams {
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideParams {
    pub reason: String,
}

/// Parses and validates `start_lock` params. The daemon re-checks the
/// duration; rejecting obvious garbage here keeps error messages precise.
pub fn parse_start_lock(params: Value) -> Result<StartLockParams, ErrorInfo> {
    let parsed: StartLockParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("start_lock params are invalid: {}", err),
        )
    })?;
    if parsed.duration_minutes <= 0 {
        return Err(ErrorInfo::new(
            "invalid_params",
            "duration_minutes must be positive",
        ));
    }
    Ok(parsed)
}

/// Parses and validates `request_override` params: a non-empty reason of
/// bounded length. The reason is stored verbatim in the audit log, so the
/// cap guards the log, not the classifier.
pub fn parse_override(params: Value) -> Result<OverrideParams, ErrorInfo> {
    let parsed: OverrideParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("request_override params are invalid: {}", err),
        )
    })?;
    if parsed.reason.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_params", "reason is required"));
    }
    if parsed.reason.chars().count() > MAX_REASON_CHARS {
        return Err(ErrorInfo::new(
            "invalid_params",
            format!("reason must be {} characters or fewer", MAX_REASON_CHARS),
        ));
    }
    Ok(parsed)
}
