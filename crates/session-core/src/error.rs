// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the realtime core.
//!
//! Every failure carries a stable machine-readable `code`, a category that
//! drives connection-handling policy (close vs. keep-open vs. retry), a
//! PII-free message, and an optional `retry_after` hint.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error classes. The category determines how the connection task reacts:
/// Validation frames are dropped (with a malformed-traffic counter),
/// Authorization/Liveness-heartbeat failures close the connection, Resource
/// failures are reported in-band without unwinding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Validation,
    Authorization,
    Resource,
    Liveness,
    Internal,
}

/// Wire-level and admission-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreError {
    InvalidMessage,
    InvalidFormat,
    InvalidVersion,
    ChecksumMismatch,
    MessageTooLarge,
    RateLimited,
    Unauthorized,
    Forbidden,
    ChannelNotFound,
    SubscriptionFailed,
    PublishFailed,
    Timeout,
    InternalError,
    TenantNotFound,
    TenantSuspended,
    TenantAccessDenied,
    LimitExceeded,
    QuotaExceeded,
    RateLimitExceeded,
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMessage
            | Self::InvalidFormat
            | Self::InvalidVersion
            | Self::ChecksumMismatch => ErrorCategory::Validation,
            Self::Unauthorized
            | Self::Forbidden
            | Self::TenantNotFound
            | Self::TenantSuspended
            | Self::TenantAccessDenied => ErrorCategory::Authorization,
            Self::RateLimited
            | Self::LimitExceeded
            | Self::QuotaExceeded
            | Self::RateLimitExceeded
            | Self::MessageTooLarge => ErrorCategory::Resource,
            Self::Timeout => ErrorCategory::Liveness,
            Self::ChannelNotFound | Self::SubscriptionFailed | Self::PublishFailed => {
                ErrorCategory::Resource
            }
            Self::InternalError => ErrorCategory::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidVersion => "INVALID_VERSION",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
            Self::TenantNotFound => "TENANT_NOT_FOUND",
            Self::TenantSuspended => "TENANT_SUSPENDED",
            Self::TenantAccessDenied => "TENANT_ACCESS_DENIED",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }

    /// Should the connection be closed after this error is reported?
    pub fn closes_connection(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authorization)
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn to_error_body_with_retry(
        &self,
        message: impl Into<String>,
        retry_after: Duration,
    ) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: message.into(),
            retry_after_ms: Some(retry_after.as_millis() as u64),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for CoreError {}

/// Wire-format error body: machine-readable code, safe message, optional
/// retry hint. Never carries internal details ("do not leak
/// details on the wire").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

pub type Result<T> = std::result::Result<T, CoreError>;
