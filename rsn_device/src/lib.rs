//! # RSN Device
//!
//! The device layer of the rsn_audio workspace: a pluggable backend
//! contract, the context that probes and owns one backend, and the
//! device object with its lifecycle state machine and fixed-size
//! real-time data callback.

pub mod backend;
pub mod backends;
pub mod context;
pub mod device;
pub mod engine;

pub use backend::{
    Backend, BackendDevice, BackendInfo, DeviceDescriptor, DeviceId, DeviceInfo, DeviceType,
    Notification, ShareMode, DEFAULT_PERIOD_COUNT, DEFAULT_PERIOD_SIZE_IN_MS,
};
pub use context::{BackendKind, Context, ContextConfig};
pub use device::{Device, DeviceConfig, DeviceDirectionConfig, DeviceShared, DeviceState};
pub use engine::{CaptureEngine, DataCallback, DeviceIo, NotificationCallback, PlaybackEngine};
