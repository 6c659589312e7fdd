//! The cpal backend.
//!
//! cpal delivers audio on its own thread and its stream handles are
//! not portable across threads, so an opened device spawns one control
//! thread that builds and owns the streams; `start`/`stop` are relayed
//! to it as commands and acknowledged through an event. The engines
//! move into the stream callbacks, which repack cpal's typed buffers
//! through byte scratch buffers.
//!
//! Negotiation adopts the endpoint's default configuration; bridging
//! to the user's requested format is the device converter's job.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use rsn_core::thread::Event;
use rsn_core::{Result, RsnError};
use rsn_dsp::channel::ChannelMap;
use rsn_dsp::format::Format;

use crate::backend::{
    Backend, BackendDevice, BackendInfo, DeviceDescriptor, DeviceId, DeviceInfo, DeviceType,
    Notification,
};
use crate::device::DeviceShared;
use crate::engine::{CaptureEngine, PlaybackEngine};

/// The cpal adapter.
pub struct CpalBackend {
    _private: (),
}

impl CpalBackend {
    /// Probe the default host.
    pub fn probe() -> Result<Self> {
        // Hosts are enumerable on every supported platform; device
        // availability is checked at open time.
        let _ = cpal::default_host();
        Ok(Self { _private: () })
    }
}

fn map_sample_format(format: cpal::SampleFormat) -> Option<Format> {
    match format {
        cpal::SampleFormat::F32 => Some(Format::F32),
        cpal::SampleFormat::I16 => Some(Format::S16),
        cpal::SampleFormat::U8 => Some(Format::U8),
        cpal::SampleFormat::I32 => Some(Format::S32),
        _ => None,
    }
}

fn find_device(
    host: &cpal::Host,
    device_type: DeviceType,
    id: Option<&DeviceId>,
) -> Result<cpal::Device> {
    let default = if device_type.has_playback() {
        host.default_output_device()
    } else {
        host.default_input_device()
    };

    match id {
        None => default.ok_or(RsnError::FailedToOpenBackendDevice),
        Some(wanted) => {
            let devices = if device_type.has_playback() {
                host.output_devices()
            } else {
                host.input_devices()
            }
            .map_err(|_| RsnError::FailedToOpenBackendDevice)?;

            for device in devices {
                if device.name().map(|n| n == wanted.0).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(RsnError::FailedToOpenBackendDevice)
        }
    }
}

/// Everything needed to build one stream on the control thread.
struct StreamSpec {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

fn negotiate(
    host: &cpal::Host,
    is_playback: bool,
    descriptor: &mut DeviceDescriptor,
) -> Result<StreamSpec> {
    let lookup_type = if is_playback {
        DeviceType::Playback
    } else {
        DeviceType::Capture
    };
    let device = find_device(host, lookup_type, descriptor.device_id.as_ref())?;

    let supported = if is_playback {
        device.default_output_config()
    } else {
        device.default_input_config()
    }
    .map_err(|_| RsnError::FailedToOpenBackendDevice)?;

    let format =
        map_sample_format(supported.sample_format()).ok_or(RsnError::FailedToOpenBackendDevice)?;
    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;

    let period = descriptor.resolve_period_size_in_frames(sample_rate);
    let buffer_size = match supported.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&period) => {
            cpal::BufferSize::Fixed(period)
        }
        _ => cpal::BufferSize::Default,
    };

    descriptor.device_id = Some(DeviceId(
        device
            .name()
            .unwrap_or_else(|_| "cpal default".to_string()),
    ));
    descriptor.format = format;
    descriptor.channels = channels;
    descriptor.sample_rate = sample_rate;
    descriptor.channel_map = Some(ChannelMap::default_for(channels)?);
    descriptor.period_size_in_frames = period;

    Ok(StreamSpec {
        device,
        config: cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size,
        },
        sample_format: supported.sample_format(),
    })
}

impl Backend for CpalBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "cpal",
            is_async: true,
            supports_loopback: false,
        }
    }

    fn enumerate_devices(
        &self,
        device_type: DeviceType,
        callback: &mut dyn FnMut(&DeviceInfo),
    ) -> Result<()> {
        if device_type == DeviceType::Loopback {
            return Ok(());
        }
        let host = cpal::default_host();

        let default_name = if device_type.has_playback() {
            host.default_output_device().and_then(|d| d.name().ok())
        } else {
            host.default_input_device().and_then(|d| d.name().ok())
        };

        let devices = if device_type.has_playback() {
            host.output_devices()
        } else {
            host.input_devices()
        }
        .map_err(|_| RsnError::FailedToOpenBackendDevice)?;

        for device in devices {
            let Ok(name) = device.name() else { continue };
            callback(&DeviceInfo {
                id: DeviceId(name.clone()),
                is_default: Some(&name) == default_name.as_ref(),
                name,
            });
        }
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
        let host = cpal::default_host();

        let playback = match descriptor_playback {
            Some(descriptor) => Some(negotiate(&host, true, descriptor)?),
            None => None,
        };
        let capture = match descriptor_capture {
            Some(descriptor) => Some(negotiate(&host, false, descriptor)?),
            None => None,
        };

        Ok(Box::new(CpalDevice {
            shared,
            playback,
            capture,
            playback_engine: None,
            capture_engine: None,
            control: None,
        }))
    }
}

enum Command {
    Play,
    Pause,
    Terminate,
}

struct ControlHandle {
    commands: mpsc::Sender<Command>,
    ack: Arc<Event>,
    last_error: Arc<Mutex<Option<RsnError>>>,
    thread: Option<JoinHandle<()>>,
}

struct CpalDevice {
    shared: Arc<DeviceShared>,
    playback: Option<StreamSpec>,
    capture: Option<StreamSpec>,
    playback_engine: Option<PlaybackEngine>,
    capture_engine: Option<CaptureEngine>,
    control: Option<ControlHandle>,
}

impl CpalDevice {
    fn spawn_stream_thread(&mut self) -> Result<()> {
        let playback = self.playback.take();
        let capture = self.capture.take();
        let playback_engine = self.playback_engine.take();
        let capture_engine = self.capture_engine.take();
        let shared = Arc::clone(&self.shared);

        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let ack = Arc::new(Event::new());
        let last_error = Arc::new(Mutex::new(None));

        let thread_ack = Arc::clone(&ack);
        let thread_error = Arc::clone(&last_error);

        let thread = std::thread::Builder::new()
            .name("rsn-cpal-stream".to_string())
            .spawn(move || {
                let mut streams: Vec<cpal::Stream> = Vec::new();

                if let (Some(spec), Some(engine)) = (playback, playback_engine) {
                    match build_output_stream(&spec, engine, Arc::clone(&shared)) {
                        Ok(stream) => streams.push(stream),
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    }
                }
                if let (Some(spec), Some(engine)) = (capture, capture_engine) {
                    match build_input_stream(&spec, engine, Arc::clone(&shared)) {
                        Ok(stream) => streams.push(stream),
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    }
                }

                // Some hosts run streams immediately after creation.
                for stream in &streams {
                    let _ = stream.pause();
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = command_rx.recv() {
                    match command {
                        Command::Play => {
                            let mut failed = None;
                            for stream in &streams {
                                if stream.play().is_err() {
                                    failed = Some(RsnError::FailedToOpenBackendDevice);
                                }
                            }
                            *thread_error.lock().unwrap() = failed;
                            thread_ack.signal();
                        }
                        Command::Pause => {
                            for stream in &streams {
                                let _ = stream.pause();
                            }
                            *thread_error.lock().unwrap() = None;
                            thread_ack.signal();
                        }
                        Command::Terminate => break,
                    }
                }
            })
            .map_err(|_| RsnError::FailedToOpenBackendDevice)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.control = Some(ControlHandle {
                    commands: command_tx,
                    ack,
                    last_error,
                    thread: Some(thread),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(RsnError::FailedToOpenBackendDevice),
        }
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or(RsnError::DeviceNotInitialized)?;
        control
            .commands
            .send(command)
            .map_err(|_| RsnError::DeviceNotInitialized)?;
        control.ack.wait();
        match control.last_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl BackendDevice for CpalDevice {
    fn start(&mut self) -> Result<()> {
        if self.control.is_none() {
            self.spawn_stream_thread()?;
        }
        self.send_command(Command::Play)
    }

    fn stop(&mut self) -> Result<()> {
        self.send_command(Command::Pause)
    }

    fn attach_playback_engine(&mut self, engine: PlaybackEngine) -> Result<()> {
        self.playback_engine = Some(engine);
        Ok(())
    }

    fn attach_capture_engine(&mut self, engine: CaptureEngine) -> Result<()> {
        self.capture_engine = Some(engine);
        Ok(())
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        if let Some(mut control) = self.control.take() {
            let _ = control.commands.send(Command::Terminate);
            if let Some(thread) = control.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn build_output_stream(
    spec: &StreamSpec,
    mut engine: PlaybackEngine,
    shared: Arc<DeviceShared>,
) -> Result<cpal::Stream> {
    let error_callback = move |err: cpal::StreamError| {
        tracing::warn!(error = %err, "cpal output stream error");
        shared.notify(Notification::Stopped);
    };

    let mut scratch: Vec<u8> = Vec::new();
    let stream = match spec.sample_format {
        cpal::SampleFormat::F32 => spec.device.build_output_stream(
            &spec.config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * 4, 0);
                engine.render(&mut scratch);
                for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(4)) {
                    *sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::I16 => spec.device.build_output_stream(
            &spec.config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * 2, 0);
                engine.render(&mut scratch);
                for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(2)) {
                    *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
                }
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::I32 => spec.device.build_output_stream(
            &spec.config,
            move |data: &mut [i32], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * 4, 0);
                engine.render(&mut scratch);
                for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(4)) {
                    *sample = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::U8 => spec.device.build_output_stream(
            &spec.config,
            move |data: &mut [u8], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0);
                engine.render(&mut scratch);
                data.copy_from_slice(&scratch);
            },
            error_callback,
            None,
        ),
        _ => return Err(RsnError::FailedToOpenBackendDevice),
    };
    stream.map_err(|_| RsnError::FailedToOpenBackendDevice)
}

fn build_input_stream(
    spec: &StreamSpec,
    mut engine: CaptureEngine,
    shared: Arc<DeviceShared>,
) -> Result<cpal::Stream> {
    let error_callback = move |err: cpal::StreamError| {
        tracing::warn!(error = %err, "cpal input stream error");
        shared.notify(Notification::Stopped);
    };

    let mut scratch: Vec<u8> = Vec::new();
    let stream = match spec.sample_format {
        cpal::SampleFormat::F32 => spec.device.build_input_stream(
            &spec.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                scratch.resize(data.len() * 4, 0);
                for (bytes, sample) in scratch.chunks_exact_mut(4).zip(data.iter()) {
                    bytes.copy_from_slice(&sample.to_le_bytes());
                }
                engine.capture(&scratch);
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::I16 => spec.device.build_input_stream(
            &spec.config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                scratch.resize(data.len() * 2, 0);
                for (bytes, sample) in scratch.chunks_exact_mut(2).zip(data.iter()) {
                    bytes.copy_from_slice(&sample.to_le_bytes());
                }
                engine.capture(&scratch);
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::I32 => spec.device.build_input_stream(
            &spec.config,
            move |data: &[i32], _: &cpal::InputCallbackInfo| {
                scratch.resize(data.len() * 4, 0);
                for (bytes, sample) in scratch.chunks_exact_mut(4).zip(data.iter()) {
                    bytes.copy_from_slice(&sample.to_le_bytes());
                }
                engine.capture(&scratch);
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::U8 => spec.device.build_input_stream(
            &spec.config,
            move |data: &[u8], _: &cpal::InputCallbackInfo| {
                engine.capture(data);
            },
            error_callback,
            None,
        ),
        _ => return Err(RsnError::FailedToOpenBackendDevice),
    };
    stream.map_err(|_| RsnError::FailedToOpenBackendDevice)
}
