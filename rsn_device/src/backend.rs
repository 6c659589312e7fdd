//! The backend contract.
//!
//! A backend adapts one native audio API to the engine. It enumerates
//! devices and opens them; an opened device negotiates its descriptors
//! in place and is then driven either by the device worker thread
//! (blocking backends implement `read`/`write`) or by the native API's
//! own audio thread (async backends accept the prepared engines and
//! call them from their callbacks).

use std::sync::Arc;

use rsn_core::{Result, RsnError};
use rsn_dsp::channel::ChannelMap;
use rsn_dsp::format::Format;

use crate::device::DeviceShared;
use crate::engine::{CaptureEngine, PlaybackEngine};

/// Default period length when the config specifies neither frames nor
/// milliseconds.
pub const DEFAULT_PERIOD_SIZE_IN_MS: u32 = 10;

/// Default number of periods in the backend buffer.
pub const DEFAULT_PERIOD_COUNT: u32 = 3;

/// The role a device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Render to an output endpoint.
    Playback,
    /// Record from an input endpoint.
    Capture,
    /// Playback and capture tied to one callback with synchronized
    /// frame counts.
    Duplex,
    /// Capture the output of a playback endpoint. Only valid on
    /// backends that advertise support.
    Loopback,
}

impl DeviceType {
    /// Whether this role renders audio.
    pub fn has_playback(self) -> bool {
        matches!(self, DeviceType::Playback | DeviceType::Duplex)
    }

    /// Whether this role records audio (loopback records the render
    /// path).
    pub fn has_capture(self) -> bool {
        matches!(self, DeviceType::Capture | DeviceType::Duplex | DeviceType::Loopback)
    }
}

/// How the hardware is shared with other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareMode {
    /// Mix with other clients through the system mixer.
    #[default]
    Shared,
    /// Exclusive hardware access, where the backend offers it.
    Exclusive,
}

/// Backend-scoped device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

/// An enumerated device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub is_default: bool,
}

/// Per-direction device descriptor.
///
/// The caller fills in what it wants (zero meaning "backend default");
/// `Backend::open_device` overwrites every field with what was
/// actually obtained.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub device_id: Option<DeviceId>,
    pub format: Format,
    pub channels: usize,
    pub sample_rate: u32,
    pub channel_map: Option<ChannelMap>,
    pub period_size_in_frames: u32,
    pub period_size_in_ms: u32,
    pub period_count: u32,
    pub share_mode: ShareMode,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            device_id: None,
            format: Format::Unknown,
            channels: 0,
            sample_rate: 0,
            channel_map: None,
            period_size_in_frames: 0,
            period_size_in_ms: 0,
            period_count: DEFAULT_PERIOD_COUNT,
            share_mode: ShareMode::Shared,
        }
    }
}

impl DeviceDescriptor {
    /// Resolve the period size against a sample rate: explicit frames
    /// win, then explicit milliseconds, then the 10 ms default.
    pub fn resolve_period_size_in_frames(&self, sample_rate: u32) -> u32 {
        if self.period_size_in_frames != 0 {
            return self.period_size_in_frames;
        }
        let ms = if self.period_size_in_ms != 0 {
            self.period_size_in_ms
        } else {
            DEFAULT_PERIOD_SIZE_IN_MS
        };
        (ms as u64 * sample_rate as u64 / 1000).max(1) as u32
    }
}

/// Static facts about a backend.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: &'static str,
    /// Audio is delivered on the native API's own thread; the device
    /// attaches its engines instead of spawning a worker.
    pub is_async: bool,
    pub supports_loopback: bool,
}

/// Out-of-band device events, delivered on a backend thread. Handlers
/// must not block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Started,
    Stopped,
    Rerouted,
    InterruptionBegan,
    InterruptionEnded,
}

/// A native audio API adapter.
pub trait Backend: Send + Sync {
    /// Static facts about this backend.
    fn info(&self) -> BackendInfo;

    /// Call `callback` once per device of the given role.
    fn enumerate_devices(
        &self,
        device_type: DeviceType,
        callback: &mut dyn FnMut(&DeviceInfo),
    ) -> Result<()>;

    /// Open a device. The descriptors carry the request on entry and
    /// must describe what was obtained on success. On failure every
    /// partially acquired resource must be released before returning.
    fn open_device(
        &self,
        device_type: DeviceType,
        descriptor_playback: Option<&mut DeviceDescriptor>,
        descriptor_capture: Option<&mut DeviceDescriptor>,
        shared: Arc<DeviceShared>,
    ) -> Result<Box<dyn BackendDevice>>;
}

/// An opened backend device.
///
/// Blocking backends implement `read`/`write` and are driven by the
/// device worker thread. Async backends implement the `attach_*`
/// hooks and drive the engines from their own audio thread.
pub trait BackendDevice: Send {
    /// Start the underlying stream(s).
    fn start(&mut self) -> Result<()>;

    /// Stop the underlying stream(s). Returns once the backend no
    /// longer touches the engines.
    fn stop(&mut self) -> Result<()>;

    /// Unblock a `read`/`write` stuck in a backend wait.
    fn wakeup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Blocking capture of up to `frame_count` frames in the
    /// negotiated capture format. Blocking backends only.
    fn read(&mut self, _frames: &mut [u8], _frame_count: u32) -> Result<u32> {
        Err(RsnError::NotImplemented)
    }

    /// Blocking render of `frame_count` frames in the negotiated
    /// playback format. Blocking backends only.
    fn write(&mut self, _frames: &[u8], _frame_count: u32) -> Result<u32> {
        Err(RsnError::NotImplemented)
    }

    /// Hand the playback engine to an async backend.
    fn attach_playback_engine(&mut self, _engine: PlaybackEngine) -> Result<()> {
        Err(RsnError::NotImplemented)
    }

    /// Hand the capture engine to an async backend.
    fn attach_capture_engine(&mut self, _engine: CaptureEngine) -> Result<()> {
        Err(RsnError::NotImplemented)
    }
}
