//! Devices and their lifecycle.
//!
//! A device is created against a context, started and stopped any
//! number of times, and dropped. The state word is a single atomic:
//! `Uninitialized -> Stopped <-> Starting <-> Started <-> Stopping`,
//! with every transition driven by compare-and-swap so `start`,
//! `stop`, the worker thread, and `is_started` observers can never
//! disagree. `start` returns only after the data callback has run at
//! least once; `stop` returns only after the worker (or the backend)
//! has acknowledged the stop.
//!
//! Blocking backends get a dedicated worker thread that lives for the
//! device's lifetime and parks on the wakeup event between runs.
//! Async backends receive the prepared engines at init and are driven
//! by their own audio threads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use rsn_core::thread::{spawn_worker, Event, ThreadPriority};
use rsn_core::{Result, RsnError};
use rsn_dsp::channel::ChannelMap;
use rsn_dsp::format::Format;
use rsn_dsp::source::DataFormat;

use crate::backend::{
    BackendDevice, DeviceDescriptor, DeviceId, DeviceType, Notification, ShareMode,
    DEFAULT_PERIOD_COUNT,
};
use crate::context::Context;
use crate::engine::{CaptureEngine, DataCallback, NotificationCallback, PlaybackEngine};

/// Device lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceState {
    Uninitialized = 0,
    Stopped = 1,
    Starting = 2,
    Started = 3,
    Stopping = 4,
}

impl DeviceState {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => DeviceState::Stopped,
            2 => DeviceState::Starting,
            3 => DeviceState::Started,
            4 => DeviceState::Stopping,
            _ => DeviceState::Uninitialized,
        }
    }
}

/// State shared between the device handle, its worker thread, and the
/// backend's audio threads.
pub struct DeviceShared {
    state: AtomicU32,
    pub(crate) started_event: Event,
    pub(crate) stopped_event: Event,
    /// Wakes the worker thread out of its idle park or a backend wait.
    pub(crate) wakeup_event: Event,
    notification: Option<NotificationCallback>,
}

impl DeviceShared {
    pub(crate) fn new(notification: Option<NotificationCallback>) -> Self {
        Self {
            state: AtomicU32::new(DeviceState::Uninitialized as u32),
            started_event: Event::new(),
            stopped_event: Event::new(),
            wakeup_event: Event::new(),
            notification,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DeviceState {
        DeviceState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: DeviceState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub(crate) fn compare_exchange_state(&self, from: DeviceState, to: DeviceState) -> bool {
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver a notification, if a handler is registered.
    pub fn notify(&self, notification: Notification) {
        if let Some(handler) = &self.notification {
            handler(notification);
        }
    }

    /// Signal the wakeup event; used by backends to unblock waits.
    pub fn wakeup(&self) {
        self.wakeup_event.signal();
    }
}

/// Per-direction device settings. Zero / `Unknown` / `None` fields
/// adopt the backend's native values.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectionConfig {
    pub device_id: Option<DeviceId>,
    pub format: Format,
    pub channels: usize,
    pub channel_map: Option<ChannelMap>,
    pub share_mode: ShareMode,
}

/// Device configuration.
pub struct DeviceConfig {
    pub device_type: DeviceType,
    /// Sample rate seen by the data callback. Zero adopts the backend
    /// native rate.
    pub sample_rate: u32,
    pub period_size_in_frames: u32,
    pub period_size_in_ms: u32,
    pub period_count: u32,
    pub playback: DeviceDirectionConfig,
    pub capture: DeviceDirectionConfig,
    /// Worker thread priority. `None` inherits the context's.
    pub thread_priority: Option<ThreadPriority>,
    /// Skip zeroing the output buffer before each data callback.
    pub no_pre_zeroed_output_buffer: bool,
    /// Skip clamping f32 callback output to `[-1, +1]`.
    pub no_clip: bool,
    pub data_callback: Option<DataCallback>,
    pub notification_callback: Option<NotificationCallback>,
}

impl DeviceConfig {
    /// A config with backend-default everything.
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            sample_rate: 0,
            period_size_in_frames: 0,
            period_size_in_ms: 0,
            period_count: DEFAULT_PERIOD_COUNT,
            playback: DeviceDirectionConfig::default(),
            capture: DeviceDirectionConfig::default(),
            thread_priority: None,
            no_pre_zeroed_output_buffer: false,
            no_clip: false,
            data_callback: None,
            notification_callback: None,
        }
    }
}

/// An opened audio device.
pub struct Device {
    shared: Arc<DeviceShared>,
    device_type: DeviceType,
    name: String,
    playback_descriptor: Option<DeviceDescriptor>,
    capture_descriptor: Option<DeviceDescriptor>,
    /// Async backends keep the device handle here for start/stop.
    backend_device: Option<Box<dyn BackendDevice>>,
    /// Blocking backends move their device handle into this worker.
    worker: Option<JoinHandle<()>>,
}

impl Device {
    /// Open a device on the context's active backend.
    ///
    /// The descriptors are negotiated with the backend; the data
    /// callback then sees the configured user format (or the native
    /// format for any field left at its default), with conversion
    /// handled inside the device. Any failure unwinds everything
    /// acquired so far.
    pub fn new(context: &Context, mut config: DeviceConfig) -> Result<Device> {
        let backend = context.backend();
        let info = backend.info();

        if config.device_type == DeviceType::Loopback && !info.supports_loopback {
            return Err(RsnError::DeviceTypeNotSupported);
        }
        let callback = config
            .data_callback
            .take()
            .ok_or(RsnError::InvalidArgs)?;

        let shared = Arc::new(DeviceShared::new(config.notification_callback.take()));

        // Build the requested descriptors.
        let mut playback_descriptor = config.device_type.has_playback().then(|| DeviceDescriptor {
            device_id: config.playback.device_id.clone(),
            format: config.playback.format,
            channels: config.playback.channels,
            sample_rate: config.sample_rate,
            channel_map: config.playback.channel_map,
            period_size_in_frames: config.period_size_in_frames,
            period_size_in_ms: config.period_size_in_ms,
            period_count: config.period_count,
            share_mode: config.playback.share_mode,
        });
        let mut capture_descriptor = config.device_type.has_capture().then(|| DeviceDescriptor {
            device_id: config.capture.device_id.clone(),
            format: config.capture.format,
            channels: config.capture.channels,
            sample_rate: config.sample_rate,
            channel_map: config.capture.channel_map,
            period_size_in_frames: config.period_size_in_frames,
            period_size_in_ms: config.period_size_in_ms,
            period_count: config.period_count,
            share_mode: config.capture.share_mode,
        });

        let mut backend_device = backend.open_device(
            config.device_type,
            playback_descriptor.as_mut(),
            capture_descriptor.as_mut(),
            Arc::clone(&shared),
        )?;

        tracing::debug!(
            backend = info.name,
            device_type = ?config.device_type,
            "opened backend device"
        );

        // Resolve the user-facing formats: explicit config wins,
        // otherwise follow what the backend negotiated.
        let playback_formats = match &playback_descriptor {
            Some(descriptor) => Some(resolve_user_format(
                &config.playback,
                config.sample_rate,
                descriptor,
            )?),
            None => None,
        };
        let capture_formats = match &capture_descriptor {
            Some(descriptor) => Some(resolve_user_format(
                &config.capture,
                config.sample_rate,
                descriptor,
            )?),
            None => None,
        };

        // The callback period is resolved against the user rate.
        let user_rate = playback_formats
            .as_ref()
            .or(capture_formats.as_ref())
            .map(|(user, _)| user.sample_rate)
            .unwrap_or(48_000);
        let period_frames = DeviceDescriptor {
            period_size_in_frames: config.period_size_in_frames,
            period_size_in_ms: config.period_size_in_ms,
            ..Default::default()
        }
        .resolve_period_size_in_frames(user_rate);

        // Assemble the engines.
        let mut playback_engine = None;
        let mut capture_engine = None;
        match config.device_type {
            DeviceType::Playback => {
                let Some((user, native)) = playback_formats.as_ref() else {
                    return Err(RsnError::InvalidArgs);
                };
                playback_engine = Some(PlaybackEngine::new(
                    Arc::clone(&shared),
                    callback,
                    *user,
                    *native,
                    period_frames,
                    None,
                    !config.no_pre_zeroed_output_buffer,
                    !config.no_clip,
                )?);
            }
            DeviceType::Capture | DeviceType::Loopback => {
                let Some((user, native)) = capture_formats.as_ref() else {
                    return Err(RsnError::InvalidArgs);
                };
                capture_engine = Some(CaptureEngine::new(
                    Arc::clone(&shared),
                    Some(callback),
                    *user,
                    *native,
                    period_frames,
                    None,
                )?);
            }
            DeviceType::Duplex => {
                let (Some((capture_user, capture_native)), Some((playback_user, playback_native))) =
                    (capture_formats.as_ref(), playback_formats.as_ref())
                else {
                    return Err(RsnError::InvalidArgs);
                };

                let (duplex_tx, duplex_rx) = rsn_core::ring::pcm_ring_buffer(
                    capture_user.bytes_per_frame(),
                    period_frames as usize * 4,
                )?;
                capture_engine = Some(CaptureEngine::new(
                    Arc::clone(&shared),
                    None,
                    *capture_user,
                    *capture_native,
                    period_frames,
                    Some(duplex_tx),
                )?);
                playback_engine = Some(PlaybackEngine::new(
                    Arc::clone(&shared),
                    callback,
                    *playback_user,
                    *playback_native,
                    period_frames,
                    Some((duplex_rx, *capture_user)),
                    !config.no_pre_zeroed_output_buffer,
                    !config.no_clip,
                )?);
            }
        }

        let name = device_display_name(config.device_type, &playback_descriptor, &capture_descriptor, info.name);

        shared.set_state(DeviceState::Stopped);

        let mut device = Device {
            shared,
            device_type: config.device_type,
            name,
            playback_descriptor,
            capture_descriptor,
            backend_device: None,
            worker: None,
        };

        if info.is_async {
            if let Some(engine) = playback_engine {
                backend_device.attach_playback_engine(engine)?;
            }
            if let Some(engine) = capture_engine {
                backend_device.attach_capture_engine(engine)?;
            }
            device.backend_device = Some(backend_device);
        } else {
            let priority = config
                .thread_priority
                .unwrap_or_else(|| context.thread_priority());
            let worker = spawn_device_worker(
                Arc::clone(&device.shared),
                backend_device,
                playback_engine,
                capture_engine,
                device.playback_descriptor.clone(),
                device.capture_descriptor.clone(),
                priority,
            )
            .map_err(|_| RsnError::FailedToOpenBackendDevice)?;
            device.worker = Some(worker);
        }

        Ok(device)
    }

    /// The device's role.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// A human-readable device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The negotiated playback descriptor, if this device renders.
    pub fn playback_descriptor(&self) -> Option<&DeviceDescriptor> {
        self.playback_descriptor.as_ref()
    }

    /// The negotiated capture descriptor, if this device records.
    pub fn capture_descriptor(&self) -> Option<&DeviceDescriptor> {
        self.capture_descriptor.as_ref()
    }

    /// Whether the device is currently started. Observable from any
    /// thread.
    pub fn is_started(&self) -> bool {
        self.shared.state() == DeviceState::Started
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    /// Start the device. Returns after the data callback has been
    /// invoked at least once. Starting an already started device is a
    /// no-op; a device mid-transition reports `Busy`.
    pub fn start(&mut self) -> Result<()> {
        match self.shared.state() {
            DeviceState::Started => return Ok(()),
            DeviceState::Starting | DeviceState::Stopping => return Err(RsnError::Busy),
            DeviceState::Uninitialized => return Err(RsnError::DeviceNotInitialized),
            DeviceState::Stopped => {}
        }
        if !self
            .shared
            .compare_exchange_state(DeviceState::Stopped, DeviceState::Starting)
        {
            return Err(RsnError::Busy);
        }

        if let Some(backend_device) = &mut self.backend_device {
            // Async: the backend's audio thread performs the Starting
            // -> Started transition on its first callback.
            if let Err(e) = backend_device.start() {
                self.shared.set_state(DeviceState::Stopped);
                return Err(e);
            }
        } else {
            // Blocking: wake the worker; it starts the backend and
            // runs the first period.
            self.shared.wakeup_event.signal();
        }

        loop {
            self.shared.started_event.wait();
            match self.shared.state() {
                DeviceState::Started => return Ok(()),
                DeviceState::Stopped => return Err(RsnError::FailedToOpenBackendDevice),
                _ => {}
            }
        }
    }

    /// Stop the device. Synchronous: returns once the worker or the
    /// backend has acknowledged the stop. Stopping an already stopped
    /// device is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        match self.shared.state() {
            DeviceState::Stopped => return Ok(()),
            DeviceState::Starting | DeviceState::Stopping => return Err(RsnError::Busy),
            DeviceState::Uninitialized => return Err(RsnError::DeviceNotInitialized),
            DeviceState::Started => {}
        }
        if !self
            .shared
            .compare_exchange_state(DeviceState::Started, DeviceState::Stopping)
        {
            return Err(RsnError::Busy);
        }

        match &mut self.backend_device {
            Some(backend_device) => {
                // Async: pausing the backend stream is synchronous.
                let result = backend_device.stop();
                self.shared.set_state(DeviceState::Stopped);
                self.shared.notify(Notification::Stopped);
                result
            }
            None => {
                // Blocking: unblock the worker and wait for its ack.
                self.shared.wakeup_event.signal();
                loop {
                    self.shared.stopped_event.wait();
                    if self.shared.state() == DeviceState::Stopped {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.shared.state() == DeviceState::Started {
            let _ = self.stop();
        }
        self.shared.set_state(DeviceState::Uninitialized);

        if let Some(worker) = self.worker.take() {
            self.shared.wakeup_event.signal();
            let _ = worker.join();
        }
        // Async backend devices shut their stream thread down in
        // their own Drop.
        self.backend_device = None;
    }
}

/// Resolve `(user, native)` data formats for one direction from the
/// config and the negotiated descriptor.
fn resolve_user_format(
    direction: &DeviceDirectionConfig,
    requested_rate: u32,
    descriptor: &DeviceDescriptor,
) -> Result<(DataFormat, DataFormat)> {
    let native = DataFormat::new(descriptor.format, descriptor.channels, descriptor.sample_rate)?;

    let format = if direction.format == Format::Unknown {
        native.format
    } else {
        direction.format
    };
    let channels = if direction.channels == 0 {
        native.channels
    } else {
        direction.channels
    };
    let sample_rate = if requested_rate == 0 {
        native.sample_rate
    } else {
        requested_rate
    };

    let mut user = DataFormat::new(format, channels, sample_rate)?;
    if let Some(map) = direction.channel_map {
        if map.len() != channels {
            return Err(RsnError::InvalidArgs);
        }
        user.channel_map = map;
    }
    Ok((user, native))
}

fn device_display_name(
    device_type: DeviceType,
    playback: &Option<DeviceDescriptor>,
    capture: &Option<DeviceDescriptor>,
    backend_name: &str,
) -> String {
    let descriptor = if device_type.has_playback() {
        playback.as_ref()
    } else {
        capture.as_ref()
    };
    match descriptor.and_then(|d| d.device_id.as_ref()) {
        Some(id) => id.0.clone(),
        None => format!("{backend_name} default"),
    }
}

/// The worker thread body for blocking backends.
#[allow(clippy::too_many_arguments)]
fn spawn_device_worker(
    shared: Arc<DeviceShared>,
    mut backend_device: Box<dyn BackendDevice>,
    mut playback_engine: Option<PlaybackEngine>,
    mut capture_engine: Option<CaptureEngine>,
    playback_descriptor: Option<DeviceDescriptor>,
    capture_descriptor: Option<DeviceDescriptor>,
    priority: ThreadPriority,
) -> std::io::Result<JoinHandle<()>> {
    spawn_worker("rsn-device-worker", priority, move || {
        let playback_chunk = playback_descriptor.as_ref().map(|d| {
            let frames = d.resolve_period_size_in_frames(d.sample_rate) as usize;
            vec![0u8; frames * d.format.bytes_per_frame(d.channels)]
        });
        let capture_chunk = capture_descriptor.as_ref().map(|d| {
            let frames = d.resolve_period_size_in_frames(d.sample_rate) as usize;
            vec![0u8; frames * d.format.bytes_per_frame(d.channels)]
        });
        let playback_bpf = playback_descriptor
            .as_ref()
            .map(|d| d.format.bytes_per_frame(d.channels))
            .unwrap_or(1);
        let capture_bpf = capture_descriptor
            .as_ref()
            .map(|d| d.format.bytes_per_frame(d.channels))
            .unwrap_or(1);

        let mut playback_buf = playback_chunk.unwrap_or_default();
        let mut capture_buf = capture_chunk.unwrap_or_default();

        'life: loop {
            shared.wakeup_event.wait();
            match shared.state() {
                DeviceState::Uninitialized => break 'life,
                DeviceState::Starting => {}
                DeviceState::Stopping => {
                    // A stop raced the worker before it ever ran.
                    shared.set_state(DeviceState::Stopped);
                    shared.stopped_event.signal();
                    continue;
                }
                _ => continue,
            }

            if let Err(e) = backend_device.start() {
                tracing::warn!(error = %e, "backend device failed to start");
                shared.set_state(DeviceState::Stopped);
                shared.started_event.signal();
                continue;
            }

            // The period loop. The engines flip Starting -> Started on
            // the first data callback.
            loop {
                match shared.state() {
                    DeviceState::Starting | DeviceState::Started => {}
                    _ => break,
                }

                let io_result = run_one_period(
                    &mut backend_device,
                    &mut playback_engine,
                    &mut capture_engine,
                    &mut playback_buf,
                    &mut capture_buf,
                    playback_bpf,
                    capture_bpf,
                );
                if let Err(e) = io_result {
                    tracing::warn!(error = %e, "device i/o failed, stopping");
                    break;
                }
            }

            if let Err(e) = backend_device.stop() {
                tracing::warn!(error = %e, "backend device failed to stop");
            }

            match shared.state() {
                DeviceState::Uninitialized => break 'life,
                DeviceState::Stopping => {
                    shared.set_state(DeviceState::Stopped);
                    shared.stopped_event.signal();
                    shared.notify(Notification::Stopped);
                }
                _ => {
                    // Abnormal exit (i/o failure). Unblock any pending
                    // start and report the stop.
                    shared.set_state(DeviceState::Stopped);
                    shared.started_event.signal();
                    shared.stopped_event.signal();
                    shared.notify(Notification::Stopped);
                }
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn run_one_period(
    backend_device: &mut Box<dyn BackendDevice>,
    playback_engine: &mut Option<PlaybackEngine>,
    capture_engine: &mut Option<CaptureEngine>,
    playback_buf: &mut [u8],
    capture_buf: &mut [u8],
    playback_bpf: usize,
    capture_bpf: usize,
) -> Result<()> {
    // Capture first so a duplex callback sees this period's input.
    if let Some(engine) = capture_engine {
        let frames = (capture_buf.len() / capture_bpf) as u32;
        let read = backend_device.read(capture_buf, frames)?;
        engine.capture(&capture_buf[..read as usize * capture_bpf]);
    }

    if let Some(engine) = playback_engine {
        engine.render(playback_buf);
        let frames = (playback_buf.len() / playback_bpf) as u32;
        backend_device.write(playback_buf, frames)?;
    }

    Ok(())
}
