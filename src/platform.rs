//! Interfaces the tracking core consumes from the host app.
//!
//! The host implements these in Kotlin/Swift (or in Rust for tests and
//! replays). Fixes flow back into the core through a [`FixSink`] handed to
//! [`LocationPlatform::subscribe`].

use futures::future::BoxFuture;

use crate::config::UpdateConfig;
use crate::error::PlatformError;

pub use crate::session::FixSink;

/// OS answer to a foreground location authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub granted: bool,
    /// False when the OS will not show the permission dialog again.
    pub can_ask_again: bool,
}

impl AuthorizationResponse {
    pub fn granted() -> Self {
        Self {
            granted: true,
            can_ask_again: true,
        }
    }

    pub fn denied(can_ask_again: bool) -> Self {
        Self {
            granted: false,
            can_ask_again,
        }
    }
}

/// Platform location service.
///
/// Only foreground authorization is ever requested.
pub trait LocationPlatform: Send + Sync {
    /// Whether device-wide location services are switched on.
    fn has_services_enabled(&self) -> bool;

    /// Ask the OS for foreground location access. May show a dialog and
    /// suspend until the user answers.
    fn request_foreground_authorization(
        &self,
    ) -> BoxFuture<'_, Result<AuthorizationResponse, PlatformError>>;

    /// Open a continuous update stream. Fixes and fatal errors are delivered
    /// to `sink` from whatever thread the platform uses.
    fn subscribe(
        &self,
        config: &UpdateConfig,
        sink: FixSink,
    ) -> Result<Box<dyn Subscription>, PlatformError>;
}

/// Handle to an open location update stream.
pub trait Subscription: Send {
    /// Stop delivering updates. Called at most once.
    fn cancel(&mut self);
}

/// Receives run progress after every accepted fix.
///
/// Implemented by the surrounding run controller for its activity summary.
pub trait RunProgressListener: Send + Sync {
    fn on_progress(&self, total_distance_m: f64, elapsed_seconds: u64);
}

/// Deep-links the user to the system location settings. Fire-and-forget.
pub trait SettingsLauncher: Send + Sync {
    fn open_location_settings(&self);
}
