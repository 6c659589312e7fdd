//! Device I/O test harness.
//!
//! Opens a playback, capture, duplex, or loopback device and runs it
//! for a few seconds. Playback renders a file, a waveform, or noise
//! through a mixer; capture and loopback record to a WAV file; duplex
//! echoes input to output. Exit code 0 on success, nonzero when the
//! context, device init, or start fails.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Parser, ValueEnum};

use rsn_device::{BackendKind, Context, ContextConfig, Device, DeviceConfig, DeviceType};
use rsn_dsp::format::Format;
use rsn_dsp::mixer::{Mixer, MixerConfig};
use rsn_dsp::noise::{Noise, NoiseConfig, NoiseType};
use rsn_dsp::source::{DataFormat, DataSource};
use rsn_dsp::waveform::{Waveform, WaveformConfig, WaveformType};
use rsn_file::{WavSink, WavSource};

const CHANNELS: usize = 2;
const SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Playback,
    Capture,
    Duplex,
    Loopback,
}

impl From<Mode> for DeviceType {
    fn from(mode: Mode) -> DeviceType {
        match mode {
            Mode::Playback => DeviceType::Playback,
            Mode::Capture => DeviceType::Capture,
            Mode::Duplex => DeviceType::Duplex,
            Mode::Loopback => DeviceType::Loopback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Signal {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    White,
    Pink,
    Brown,
}

#[derive(Parser)]
#[command(name = "test_deviceio")]
#[command(about = "Exercise playback, capture, duplex and loopback devices", long_about = None)]
struct Cli {
    /// WAV file to play (playback) or record into (capture/loopback).
    #[arg(long)]
    file: Option<String>,

    /// Device role to exercise.
    #[arg(long, value_enum, default_value = "playback")]
    mode: Mode,

    /// Backends to probe, in priority order.
    #[arg(long = "backend")]
    backends: Vec<String>,

    /// Generated signal for playback without a file.
    #[arg(long, value_enum, default_value = "sine")]
    waveform: Signal,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 3)]
    duration: u64,
}

fn build_source(signal: Signal, amplitude: f64) -> anyhow::Result<Box<dyn DataSource>> {
    let source: Box<dyn DataSource> = match signal {
        Signal::Sine | Signal::Square | Signal::Triangle | Signal::Sawtooth => {
            let waveform_type = match signal {
                Signal::Sine => WaveformType::Sine,
                Signal::Square => WaveformType::Square,
                Signal::Triangle => WaveformType::Triangle,
                Signal::Sawtooth => WaveformType::Sawtooth,
                _ => unreachable!(),
            };
            Box::new(Waveform::new(&WaveformConfig::new(
                Format::F32,
                CHANNELS,
                SAMPLE_RATE,
                waveform_type,
                amplitude,
                440.0,
            ))?)
        }
        Signal::White | Signal::Pink | Signal::Brown => {
            let noise_type = match signal {
                Signal::White => NoiseType::White,
                Signal::Pink => NoiseType::Pink,
                _ => NoiseType::Brownian,
            };
            Box::new(Noise::new(&NoiseConfig::new(
                Format::F32,
                CHANNELS,
                SAMPLE_RATE,
                noise_type,
                0,
                amplitude,
            ))?)
        }
    };
    Ok(source)
}

fn run_playback(context: &Context, cli: &Cli) -> anyhow::Result<()> {
    let mut source: Box<dyn DataSource> = match &cli.file {
        Some(path) => Box::new(WavSource::open(path).context("failed to open WAV file")?),
        None => build_source(cli.waveform, 0.25)?,
    };
    let source_rate = source.data_format().map(|f| f.sample_rate).unwrap_or(SAMPLE_RATE);

    let mut config = DeviceConfig::new(DeviceType::Playback);
    config.sample_rate = source_rate;
    config.playback.format = Format::F32;
    config.playback.channels = CHANNELS;

    let mut mixer = Mixer::new(MixerConfig::new(Format::F32, CHANNELS, 8_192))?;
    config.data_callback = Some(Box::new(move |io| {
        let Some(output) = io.output else { return };
        let mut frame_count_out = io.frame_count as u64;
        let mut frame_count_in = 0u64;
        if mixer.begin(None, &mut frame_count_out, &mut frame_count_in).is_ok() {
            let _ = mixer.mix_data_source(source.as_mut(), frame_count_in, 1.0, None, true);
            let _ = mixer.end(None, Some(output));
        }
    }));

    run_device(context, config, cli.duration)
}

fn run_capture(context: &Context, cli: &Cli, device_type: DeviceType) -> anyhow::Result<()> {
    let path = cli.file.clone().unwrap_or_else(|| "capture.wav".to_string());
    let sink_format = DataFormat::new(Format::F32, CHANNELS, SAMPLE_RATE)?;
    let sink = WavSink::create(&path, sink_format).context("failed to create WAV file")?;
    let sink = Arc::new(Mutex::new(Some(sink)));
    let sink_cb = Arc::clone(&sink);

    let mut config = DeviceConfig::new(device_type);
    config.sample_rate = SAMPLE_RATE;
    config.capture.format = Format::F32;
    config.capture.channels = CHANNELS;
    config.data_callback = Some(Box::new(move |io| {
        let Some(input) = io.input else { return };
        if let Some(sink) = sink_cb.lock().unwrap().as_mut() {
            let _ = sink.write_pcm_frames(input, io.frame_count as u64);
        }
    }));

    run_device(context, config, cli.duration)?;

    if let Some(sink) = sink.lock().unwrap().take() {
        println!("wrote {} frames to {path}", sink.frames_written());
        sink.finalize().context("failed to finalize WAV file")?;
    }
    Ok(())
}

fn run_duplex(context: &Context, cli: &Cli) -> anyhow::Result<()> {
    let mut config = DeviceConfig::new(DeviceType::Duplex);
    config.sample_rate = SAMPLE_RATE;
    config.playback.format = Format::F32;
    config.playback.channels = CHANNELS;
    config.capture.format = Format::F32;
    config.capture.channels = CHANNELS;
    config.data_callback = Some(Box::new(|io| {
        if let (Some(input), Some(output)) = (io.input, io.output) {
            let bytes = input.len().min(output.len());
            output[..bytes].copy_from_slice(&input[..bytes]);
        }
    }));

    run_device(context, config, cli.duration)
}

fn run_device(context: &Context, config: DeviceConfig, duration: u64) -> anyhow::Result<()> {
    let mut device = Device::new(context, config).context("device init failed")?;
    println!("device: {}", device.name());

    device.start().context("device start failed")?;
    std::thread::sleep(Duration::from_secs(duration));
    device.stop().context("device stop failed")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let kinds: Vec<BackendKind> = cli
        .backends
        .iter()
        .map(|name| {
            BackendKind::from_name(name)
                .with_context(|| format!("unknown backend: {name}"))
        })
        .collect::<anyhow::Result<_>>()?;

    let context = Context::new(&kinds, ContextConfig::default())
        .context("no usable backend")?;
    let info = context.backend_info();
    println!("backend: {}", info.name);

    for device in context.devices(DeviceType::Playback)? {
        let marker = if device.is_default { "*" } else { " " };
        println!("  playback {marker} {}", device.name);
    }
    for device in context.devices(DeviceType::Capture)? {
        let marker = if device.is_default { "*" } else { " " };
        println!("  capture  {marker} {}", device.name);
    }

    match cli.mode {
        Mode::Playback => run_playback(&context, &cli)?,
        Mode::Capture => run_capture(&context, &cli, DeviceType::Capture)?,
        Mode::Duplex => run_duplex(&context, &cli)?,
        Mode::Loopback => {
            if !info.supports_loopback {
                bail!("backend '{}' does not support loopback", info.name);
            }
            run_capture(&context, &cli, DeviceType::Loopback)?
        }
    }

    println!("done");
    Ok(())
}
