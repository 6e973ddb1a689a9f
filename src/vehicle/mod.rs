//! Flight-controller vehicle abstraction.
//!
//! [`Vehicle`] is the narrow view of a connected flight controller that the
//! streaming layer needs: application activation, firmware identity, and
//! access to the camera endpoint. Stream controllers hold the vehicle
//! through a [`std::sync::Weak`] handle, so implementations decide their own
//! ownership and teardown order.

use std::fmt;

use thiserror::Error;

use crate::stream::StreamSource;

pub mod mock;

/// Errors surfaced by a vehicle link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VehicleError {
    /// The flight controller refused the activation request.
    #[error("activation rejected by flight controller (code {code})")]
    ActivationRejected {
        /// Vendor status code carried by the rejection.
        code: u32,
    },
    /// The serial or network link to the flight controller is down.
    #[error("flight-controller link unavailable")]
    LinkUnavailable,
}

/// Developer credentials presented during activation.
///
/// The key and license are secrets; the `Debug` impl redacts them so
/// credentials can appear in logs and error context without leaking.
#[derive(Clone)]
pub struct AppCredentials {
    /// Registered application id.
    pub app_id: u32,
    /// Application key bound to `app_id`.
    pub app_key: String,
    /// Optional feature license blob.
    pub app_license: Option<String>,
    /// Serial device the flight controller is attached to.
    pub serial_device: String,
    /// Serial link speed in baud.
    pub baud_rate: u32,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .field("app_license", &self.app_license.as_ref().map(|_| "<redacted>"))
            .field("serial_device", &self.serial_device)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

/// Firmware version reported by the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
    /// Build number.
    pub build: u8,
}

impl FirmwareVersion {
    /// Builds a version from its four components.
    pub const fn new(major: u8, minor: u8, patch: u8, build: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

/// A connected flight controller, as seen by the streaming layer.
pub trait Vehicle: Send + Sync {
    /// Activates the application against the flight controller.
    ///
    /// Activation must succeed before the camera endpoint accepts stream
    /// requests. Activating an already-activated vehicle is a no-op success.
    fn activate(&self, credentials: &AppCredentials) -> Result<(), VehicleError>;

    /// Firmware version of the connected flight controller, once known.
    fn firmware_version(&self) -> Option<FirmwareVersion>;

    /// The vehicle's camera endpoint, if it has one.
    fn camera(&self) -> Option<&dyn StreamSource>;
}
