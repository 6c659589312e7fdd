//! The null backend: no hardware, real time.
//!
//! Reads produce silence and writes are discarded, but both are paced
//! to the configured sample rate with a deadline timer, so devices on
//! this backend behave like real ones with respect to timing, state
//! transitions, and callback cadence. The pace wait listens on the
//! device's wakeup event, which is how a pending stop unblocks it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rsn_core::{Result, RsnError};
use rsn_dsp::channel::ChannelMap;
use rsn_dsp::format::Format;

use crate::backend::{
    Backend, BackendDevice, BackendInfo, DeviceDescriptor, DeviceId, DeviceInfo, DeviceType,
};
use crate::device::DeviceShared;

const PLAYBACK_ID: &str = "null-playback";
const CAPTURE_ID: &str = "null-capture";

const DEFAULT_FORMAT: Format = Format::F32;
const DEFAULT_CHANNELS: usize = 2;
const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// The null backend.
pub struct NullBackend {
    _private: (),
}

impl NullBackend {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill in backend defaults and finalize the period size.
fn negotiate(descriptor: &mut DeviceDescriptor, id: &str) -> Result<()> {
    if let Some(requested) = &descriptor.device_id {
        if requested.0 != id {
            return Err(RsnError::FailedToOpenBackendDevice);
        }
    } else {
        descriptor.device_id = Some(DeviceId(id.to_string()));
    }

    if descriptor.format == Format::Unknown {
        descriptor.format = DEFAULT_FORMAT;
    }
    if descriptor.channels == 0 {
        descriptor.channels = DEFAULT_CHANNELS;
    }
    if descriptor.sample_rate == 0 {
        descriptor.sample_rate = DEFAULT_SAMPLE_RATE;
    }
    if descriptor.channel_map.is_none() {
        descriptor.channel_map = Some(ChannelMap::default_for(descriptor.channels)?);
    }
    descriptor.period_size_in_frames =
        descriptor.resolve_period_size_in_frames(descriptor.sample_rate);
    Ok(())
}

impl Backend for NullBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "null",
            is_async: false,
            supports_loopback: false,
        }
    }

    fn enumerate_devices(
        &self,
        device_type: DeviceType,
        callback: &mut dyn FnMut(&DeviceInfo),
    ) -> Result<()> {
        let info = match device_type {
            DeviceType::Playback => DeviceInfo {
                id: DeviceId(PLAYBACK_ID.to_string()),
                name: "Null Playback Device".to_string(),
                is_default: true,
            },
            DeviceType::Capture | DeviceType::Duplex => DeviceInfo {
                id: DeviceId(CAPTURE_ID.to_string()),
                name: "Null Capture Device".to_string(),
                is_default: true,
            },
            DeviceType::Loopback => return Ok(()),
        };
        callback(&info);
        Ok(())
    }

    fn open_device(
        &self,
        device_type: DeviceType,
        descriptor_playback: Option<&mut DeviceDescriptor>,
        descriptor_capture: Option<&mut DeviceDescriptor>,
        shared: Arc<DeviceShared>,
    ) -> Result<Box<dyn BackendDevice>> {
        if device_type == DeviceType::Loopback {
            return Err(RsnError::DeviceTypeNotSupported);
        }

        let mut pace_rate = DEFAULT_SAMPLE_RATE;
        let mut capture_silence = 0u8;

        if let Some(descriptor) = descriptor_playback {
            negotiate(descriptor, PLAYBACK_ID)?;
            pace_rate = descriptor.sample_rate;
        }
        if let Some(descriptor) = descriptor_capture {
            negotiate(descriptor, CAPTURE_ID)?;
            capture_silence = descriptor.format.silence_byte();
            if device_type == DeviceType::Capture {
                pace_rate = descriptor.sample_rate;
            }
        }

        Ok(Box::new(NullDevice {
            shared,
            device_type,
            pace_rate,
            capture_silence,
            next_deadline: None,
        }))
    }
}

/// One opened null device.
struct NullDevice {
    shared: Arc<DeviceShared>,
    device_type: DeviceType,
    pace_rate: u32,
    capture_silence: u8,
    next_deadline: Option<Instant>,
}

impl NullDevice {
    /// Sleep until this period's deadline, or until the wakeup event
    /// fires (a pending stop).
    fn pace(&mut self, frame_count: u32) {
        let duration =
            Duration::from_secs_f64(frame_count as f64 / self.pace_rate.max(1) as f64);
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);

        if deadline > now {
            let _ = self.shared.wakeup_event.wait_timeout(deadline - now);
            self.next_deadline = Some(deadline + duration);
        } else {
            // Behind schedule (or just started); restart the cadence.
            self.next_deadline = Some(now + duration);
        }
    }
}

impl BackendDevice for NullDevice {
    fn start(&mut self) -> Result<()> {
        self.next_deadline = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.next_deadline = None;
        Ok(())
    }

    fn wakeup(&mut self) -> Result<()> {
        self.shared.wakeup();
        Ok(())
    }

    fn read(&mut self, frames: &mut [u8], frame_count: u32) -> Result<u32> {
        for byte in frames.iter_mut() {
            *byte = self.capture_silence;
        }
        // Only the capture side paces a capture-only device; duplex
        // and playback pace on the write side.
        if !self.device_type.has_playback() {
            self.pace(frame_count);
        }
        Ok(frame_count)
    }

    fn write(&mut self, _frames: &[u8], frame_count: u32) -> Result<u32> {
        self.pace(frame_count);
        Ok(frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_fills_defaults() {
        let mut descriptor = DeviceDescriptor::default();
        negotiate(&mut descriptor, PLAYBACK_ID).unwrap();
        assert_eq!(descriptor.format, Format::F32);
        assert_eq!(descriptor.channels, 2);
        assert_eq!(descriptor.sample_rate, 48_000);
        assert_eq!(descriptor.period_size_in_frames, 480); // 10 ms
        assert!(descriptor.channel_map.is_some());
        assert_eq!(descriptor.device_id.as_ref().unwrap().0, PLAYBACK_ID);
    }

    #[test]
    fn test_negotiation_honors_requests() {
        let mut descriptor = DeviceDescriptor {
            format: Format::S16,
            channels: 1,
            sample_rate: 8_000,
            period_size_in_frames: 160,
            ..Default::default()
        };
        negotiate(&mut descriptor, CAPTURE_ID).unwrap();
        assert_eq!(descriptor.format, Format::S16);
        assert_eq!(descriptor.channels, 1);
        assert_eq!(descriptor.sample_rate, 8_000);
        assert_eq!(descriptor.period_size_in_frames, 160);
    }

    #[test]
    fn test_unknown_device_id_rejected() {
        let mut descriptor = DeviceDescriptor {
            device_id: Some(DeviceId("hdmi-7".to_string())),
            ..Default::default()
        };
        assert_eq!(
            negotiate(&mut descriptor, PLAYBACK_ID),
            Err(RsnError::FailedToOpenBackendDevice)
        );
    }

    #[test]
    fn test_loopback_not_supported() {
        let backend = NullBackend::new();
        let shared = Arc::new(DeviceShared::new(None));
        let result = backend.open_device(DeviceType::Loopback, None, None, shared);
        assert!(matches!(result, Err(RsnError::DeviceTypeNotSupported)));
    }

    #[test]
    fn test_read_fills_format_silence() {
        let backend = NullBackend::new();
        let shared = Arc::new(DeviceShared::new(None));
        let mut descriptor = DeviceDescriptor {
            format: Format::U8,
            sample_rate: 48_000,
            ..Default::default()
        };
        let mut device = backend
            .open_device(DeviceType::Capture, None, Some(&mut descriptor), shared)
            .unwrap();

        let mut buffer = vec![0u8; 64];
        device.read(&mut buffer, 32).unwrap();
        assert!(buffer.iter().all(|b| *b == 128));
    }

    #[test]
    fn test_write_paces_to_real_time() {
        let backend = NullBackend::new();
        let shared = Arc::new(DeviceShared::new(None));
        let mut descriptor = DeviceDescriptor {
            sample_rate: 10_000,
            ..Default::default()
        };
        let mut device = backend
            .open_device(DeviceType::Playback, Some(&mut descriptor), None, shared)
            .unwrap();
        device.start().unwrap();

        // Writing 3 x 500 frames at 10 kHz must take at least ~100 ms
        // in total (the first write establishes the cadence).
        let buffer = vec![0u8; 500 * 8];
        let begin = Instant::now();
        for _ in 0..3 {
            device.write(&buffer, 500).unwrap();
        }
        assert!(begin.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_wakeup_unblocks_pace_early() {
        let backend = NullBackend::new();
        let shared = Arc::new(DeviceShared::new(None));
        let mut descriptor = DeviceDescriptor {
            sample_rate: 1_000,
            ..Default::default()
        };
        let mut device = backend
            .open_device(DeviceType::Playback, Some(&mut descriptor), None, Arc::clone(&shared))
            .unwrap();
        device.start().unwrap();

        let buffer = vec![0u8; 1_000 * 8];
        device.write(&buffer, 1_000).unwrap(); // establishes deadline 1s out

        shared.wakeup();
        let begin = Instant::now();
        device.write(&buffer, 1_000).unwrap();
        assert!(begin.elapsed() < Duration::from_millis(500));
    }
}
