//! Location permission gate.
//!
//! Runs once per session start: checks that location services are on,
//! requests foreground-only authorization and classifies any failure into
//! the tracking taxonomy together with the UX guidance the host must show.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{classify_platform_error, TrackingError, UserGuidance};
use crate::platform::{LocationPlatform, SettingsLauncher};

/// Current location authorization as seen by the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PermissionStatus {
    #[default]
    Undetermined,
    Granted,
    Denied,
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionCheck {
    pub status: PermissionStatus,
    /// Set whenever `status` is `Denied`.
    pub error: Option<TrackingError>,
}

impl PermissionCheck {
    fn granted() -> Self {
        Self {
            status: PermissionStatus::Granted,
            error: None,
        }
    }

    fn denied(error: TrackingError) -> Self {
        Self {
            status: PermissionStatus::Denied,
            error: Some(error),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.status == PermissionStatus::Granted
    }

    /// Guidance for the host UI, `None` when granted.
    pub fn guidance(&self) -> Option<UserGuidance> {
        self.error.as_ref().map(TrackingError::guidance)
    }
}

/// Gate in front of the platform location service.
pub struct PermissionGate {
    platform: Arc<dyn LocationPlatform>,
    settings: Option<Arc<dyn SettingsLauncher>>,
}

impl PermissionGate {
    pub fn new(platform: Arc<dyn LocationPlatform>) -> Self {
        Self {
            platform,
            settings: None,
        }
    }

    /// Attach the host's settings deep-link.
    pub fn with_settings_launcher(mut self, settings: Arc<dyn SettingsLauncher>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Check services, then request foreground authorization.
    ///
    /// Never errors: every failure is folded into a `Denied` check carrying
    /// a classified [`TrackingError`]. Permission is re-queried on every call
    /// since the user may have revoked it outside the app.
    pub async fn check_and_request(&self) -> PermissionCheck {
        if !self.platform.has_services_enabled() {
            warn!("[PermissionGate] Location services disabled");
            return PermissionCheck::denied(TrackingError::ServicesDisabled);
        }

        match self.platform.request_foreground_authorization().await {
            Ok(response) if response.granted => {
                info!("[PermissionGate] Foreground location granted");
                PermissionCheck::granted()
            }
            Ok(response) => {
                warn!(
                    "[PermissionGate] Foreground location denied (can ask again: {})",
                    response.can_ask_again
                );
                PermissionCheck::denied(TrackingError::PermissionDenied {
                    can_ask_again: response.can_ask_again,
                })
            }
            Err(e) => {
                let error = classify_platform_error(&e);
                warn!(
                    "[PermissionGate] Authorization request failed: {} -> {}",
                    e,
                    error.kind()
                );
                PermissionCheck::denied(error)
            }
        }
    }

    /// Send the user to system settings. Returns false when the host did
    /// not provide a launcher.
    pub fn open_settings(&self) -> bool {
        match &self.settings {
            Some(settings) => {
                info!("[PermissionGate] Opening location settings");
                settings.open_location_settings();
                true
            }
            None => false,
        }
    }
}
