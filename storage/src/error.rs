// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use serde::Serialize;

/// Structured diagnostics attached to a [`StorageError::DriverContract`] violation: which
/// methods were missing and which capabilities were advertised but not actually implemented.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ContractDetails {
    pub missing_methods: Vec<String>,
    pub advertised_capabilities: Vec<String>,
    pub detected_capabilities: Vec<String>,
    pub note: Option<String>,
}

/// The error taxonomy used throughout the driver registry, contract enforcer, range streaming
/// service, and quota engine. Kinds map onto HTTP status at the `storagehub` boundary via
/// [`StorageError::http_status`]/[`StorageError::code`]; nothing in this crate depends on an
/// HTTP framework directly.
#[derive(Debug)]
pub enum StorageError {
    /// Bad input: malformed config, invalid path, admission-guard rejection. 400.
    Validation(String),
    /// Resource does not exist. 404.
    NotFound(String),
    /// Caller is not permitted to perform this operation. 403.
    Forbidden(String),
    /// Refused because a conflicting operation is already in flight (e.g. a second index
    /// rebuild for the same mount). 409.
    Busy(String),
    /// A driver violated its contract (§4.1): wrong `getType()`, missing methods implied by
    /// its capabilities, or a malformed return shape. Always a bug in a driver, never in the
    /// caller; non-retryable.
    DriverContract {
        storage_type: String,
        message: String,
        details: ContractDetails,
    },
    /// An error raised by the driver itself (upstream failure, auth failure, ...). Carries the
    /// status the driver recommends; defaults to 502 if the driver does not know.
    Driver { status: u16, message: String },
    /// The response body stream closed unexpectedly (client disconnect, upstream abort) while
    /// bytes were still outstanding. 500.
    StreamClosed(String),
}

impl StorageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StorageError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StorageError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        StorageError::Forbidden(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        StorageError::Busy(msg.into())
    }

    pub fn driver(status: u16, msg: impl Into<String>) -> Self {
        StorageError::Driver {
            status,
            message: msg.into(),
        }
    }

    /// A capability-implied method the driver did not implement.
    pub fn missing_methods(storage_type: &str, methods: Vec<String>) -> Self {
        StorageError::DriverContract {
            storage_type: storage_type.to_owned(),
            message: format!("driver `{storage_type}` is missing required methods"),
            details: ContractDetails {
                missing_methods: methods,
                ..ContractDetails::default()
            },
        }
    }

    /// A method that a capability was never supposed to need; matches the teacher's
    /// not-yet-supported default contract methods (e.g. a `READER`-only driver asked to write).
    pub fn not_supported(method: &str) -> Self {
        StorageError::Validation(format!("method `{method}` is not supported by this driver"))
    }

    /// Stable machine-readable code surfaced to callers; mirrors the `code` field named in §7.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Validation(_) => "VALIDATION",
            StorageError::NotFound(_) => "NOT_FOUND",
            StorageError::Forbidden(_) => "FORBIDDEN",
            StorageError::Busy(_) => "BUSY",
            StorageError::DriverContract { .. } => "DRIVER_CONTRACT",
            StorageError::Driver { .. } => "DRIVER_ERROR",
            StorageError::StreamClosed(_) => "STREAM_CLOSED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            StorageError::Validation(_) => 400,
            StorageError::NotFound(_) => 404,
            StorageError::Forbidden(_) => 403,
            StorageError::Busy(_) => 409,
            StorageError::DriverContract { .. } => 500,
            StorageError::Driver { status, .. } => *status,
            StorageError::StreamClosed(_) => 500,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Validation(msg) => write!(f, "validation error: {msg}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            StorageError::Busy(msg) => write!(f, "busy: {msg}"),
            StorageError::DriverContract {
                storage_type,
                message,
                ..
            } => write!(f, "driver contract violation ({storage_type}): {message}"),
            StorageError::Driver { status, message } => {
                write!(f, "driver error ({status}): {message}")
            }
            StorageError::StreamClosed(msg) => write!(f, "stream closed: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::StorageError;

    #[test]
    fn maps_to_expected_http_status() {
        assert_eq!(StorageError::validation("x").http_status(), 400);
        assert_eq!(StorageError::not_found("x").http_status(), 404);
        assert_eq!(StorageError::forbidden("x").http_status(), 403);
        assert_eq!(StorageError::busy("x").http_status(), 409);
        assert_eq!(StorageError::driver(502, "x").http_status(), 502);
        assert_eq!(
            StorageError::missing_methods("S3", vec!["uploadFile".to_owned()]).http_status(),
            500
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(StorageError::validation("x").code(), "VALIDATION");
        assert_eq!(
            StorageError::missing_methods("S3", vec![]).code(),
            "DRIVER_CONTRACT"
        );
    }
}
