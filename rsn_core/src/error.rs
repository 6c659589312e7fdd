//! Error types for the rsn_audio workspace.
//!
//! A single error taxonomy is shared by every crate in the workspace so
//! that backend codes can propagate through the device layer verbatim.

use core::fmt;

/// Error codes for rsn_audio operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsnError {
    /// An invalid argument value was provided.
    InvalidArgs,
    /// The operation is not valid in the object's current state.
    InvalidOperation,
    /// Memory allocation failed or a size calculation overflowed.
    OutOfMemory,
    /// The requested capability is not implemented by this object.
    NotImplemented,
    /// No usable backend could be initialized.
    NoBackend,
    /// The backend does not support the requested device type.
    DeviceTypeNotSupported,
    /// The device has not been initialized.
    DeviceNotInitialized,
    /// The device is not started.
    DeviceNotStarted,
    /// The device is already started.
    DeviceAlreadyStarted,
    /// The backend failed to open the physical device.
    FailedToOpenBackendDevice,
    /// A finite data source has been exhausted.
    AtEnd,
    /// The object is busy servicing another thread's request.
    Busy,
    /// The operation was cancelled before it completed.
    Cancelled,
    /// The operation timed out.
    Timeout,
}

impl fmt::Display for RsnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RsnError::InvalidArgs => write!(f, "invalid argument"),
            RsnError::InvalidOperation => write!(f, "invalid operation"),
            RsnError::OutOfMemory => write!(f, "out of memory"),
            RsnError::NotImplemented => write!(f, "not implemented"),
            RsnError::NoBackend => write!(f, "no usable backend"),
            RsnError::DeviceTypeNotSupported => write!(f, "device type not supported"),
            RsnError::DeviceNotInitialized => write!(f, "device not initialized"),
            RsnError::DeviceNotStarted => write!(f, "device not started"),
            RsnError::DeviceAlreadyStarted => write!(f, "device already started"),
            RsnError::FailedToOpenBackendDevice => write!(f, "failed to open backend device"),
            RsnError::AtEnd => write!(f, "end of data"),
            RsnError::Busy => write!(f, "busy"),
            RsnError::Cancelled => write!(f, "cancelled"),
            RsnError::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for RsnError {}

/// Result type alias for rsn_audio operations.
pub type Result<T> = core::result::Result<T, RsnError>;
