//! Unified error handling for the run tracker.
//!
//! Every failure the tracking core can surface collapses into one flat
//! taxonomy ([`ErrorKind`]). Platform errors carry no structured codes, so
//! [`classify_platform_error`] inspects their text on a best-effort basis and
//! degrades to [`ErrorKind::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Flat classification of tracking failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    ServicesDisabled,
    ProviderUnavailable,
    Timeout,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::ServicesDisabled => "SERVICES_DISABLED",
            ErrorKind::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// What the host app should offer the user after a failure.
///
/// The core never renders anything itself; this is the contract the
/// surrounding UI is expected to honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserGuidance {
    /// Permission was permanently denied: deep-link to system settings.
    OpenSettings,
    /// Situational denial: asking again may succeed.
    Retry,
    /// Device location is switched off entirely.
    EnableLocationServices,
    /// Provider failure, timeout or anything unclassified.
    GenericRetry,
}

/// Error type for tracking operations.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TrackingError {
    /// The user refused foreground location access.
    /// `can_ask_again == false` means the OS will no longer show the dialog.
    #[error("Location permission denied{}", permanence_suffix(.can_ask_again))]
    PermissionDenied { can_ask_again: bool },

    /// Location services are disabled device-wide.
    #[error("Location services are disabled")]
    ServicesDisabled,

    /// Hardware or driver failure independent of permission.
    #[error("Location provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    /// The platform gave up waiting on the location subsystem.
    #[error("Location request timed out: {message}")]
    Timeout { message: String },

    /// Anything the classifier could not place.
    #[error("Location error: {message}")]
    Unknown { message: String },
}

impl TrackingError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackingError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            TrackingError::ServicesDisabled => ErrorKind::ServicesDisabled,
            TrackingError::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            TrackingError::Timeout { .. } => ErrorKind::Timeout,
            TrackingError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// UX guidance the host should present for this error.
    pub fn guidance(&self) -> UserGuidance {
        match self {
            TrackingError::PermissionDenied {
                can_ask_again: false,
            } => UserGuidance::OpenSettings,
            TrackingError::PermissionDenied {
                can_ask_again: true,
            } => UserGuidance::Retry,
            TrackingError::ServicesDisabled => UserGuidance::EnableLocationServices,
            TrackingError::ProviderUnavailable { .. }
            | TrackingError::Timeout { .. }
            | TrackingError::Unknown { .. } => UserGuidance::GenericRetry,
        }
    }
}

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Raw error reported by the host's location service.
///
/// Only a free-form message is guaranteed; `code` is whatever the platform
/// happened to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub message: String,
    pub code: Option<i32>,
}

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Map a platform error onto the tracking taxonomy by inspecting its text.
///
/// Order matters: "permission" wins over "disabled" so that messages like
/// "permission disabled by policy" are treated as a denial.
pub fn classify_platform_error(error: &PlatformError) -> TrackingError {
    let text = error.message.to_lowercase();
    let message = error.to_string();

    if contains_any(&text, &["permission", "denied", "unauthori", "not authorized"]) {
        TrackingError::PermissionDenied {
            can_ask_again: !contains_any(&text, &["permanent", "never ask", "don't ask", "blocked"]),
        }
    } else if contains_any(
        &text,
        &["services disabled", "service disabled", "location disabled", "location is off", "location off", "gps disabled"],
    ) {
        TrackingError::ServicesDisabled
    } else if contains_any(&text, &["timeout", "timed out", "time out"]) {
        TrackingError::Timeout { message }
    } else if contains_any(
        &text,
        &["unavailable", "provider", "hardware", "not available", "no gps", "sensor"],
    ) {
        TrackingError::ProviderUnavailable { message }
    } else {
        TrackingError::Unknown { message }
    }
}

fn permanence_suffix(can_ask_again: &bool) -> &'static str {
    if *can_ask_again {
        ""
    } else {
        " permanently"
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}
