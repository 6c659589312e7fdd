//! Noise generators exposed as data sources.
//!
//! White noise is the scaled PRNG; pink noise is a Voss-McCartney
//! multi-octave sum; brownian noise integrates white noise with a
//! small leak so it cannot wander off. All three are infinite and not
//! seekable, except that seeking is accepted as a no-op so callers
//! that rewind sources indiscriminately keep working.

use rsn_core::random::XorShiftRng;
use rsn_core::{Result, RsnError};

use crate::format::{store_sample_f64, Format};
use crate::source::{DataFormat, DataSource};

/// Noise colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseType {
    /// Flat spectrum.
    White,
    /// 1/f spectrum via Voss-McCartney.
    Pink,
    /// 1/f^2 spectrum: leaky-integrated white noise.
    Brownian,
}

/// Configuration for a [`Noise`] source.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    pub format: Format,
    pub channels: usize,
    pub sample_rate: u32,
    pub noise_type: NoiseType,
    pub seed: u64,
    pub amplitude: f64,
}

impl NoiseConfig {
    pub fn new(
        format: Format,
        channels: usize,
        sample_rate: u32,
        noise_type: NoiseType,
        seed: u64,
        amplitude: f64,
    ) -> Self {
        Self {
            format,
            channels,
            sample_rate,
            noise_type,
            seed,
            amplitude,
        }
    }
}

const PINK_ROWS: usize = 16;
const BROWNIAN_LEAK: f64 = 0.995;
const BROWNIAN_STEP: f64 = 0.05;

struct PinkState {
    rows: [f64; PINK_ROWS],
    running_sum: f64,
    counter: u32,
}

impl PinkState {
    fn new() -> Self {
        Self {
            rows: [0.0; PINK_ROWS],
            running_sum: 0.0,
            counter: 1,
        }
    }

    fn next(&mut self, rng: &mut XorShiftRng) -> f64 {
        let row = (self.counter.trailing_zeros() as usize) % PINK_ROWS;
        self.counter = self.counter.wrapping_add(1).max(1);

        self.running_sum -= self.rows[row];
        self.rows[row] = rng.next_f64_signed();
        self.running_sum += self.rows[row];

        (self.running_sum + rng.next_f64_signed()) / (PINK_ROWS as f64 + 1.0)
    }
}

/// A noise data source.
pub struct Noise {
    data_format: DataFormat,
    noise_type: NoiseType,
    amplitude: f64,
    rng: XorShiftRng,
    pink: Vec<PinkState>,
    brownian: Vec<f64>,
}

impl Noise {
    /// Create a noise generator.
    pub fn new(config: &NoiseConfig) -> Result<Self> {
        let data_format = DataFormat::new(config.format, config.channels, config.sample_rate)?;
        Ok(Self {
            data_format,
            noise_type: config.noise_type,
            amplitude: config.amplitude,
            rng: XorShiftRng::new(config.seed),
            pink: (0..config.channels).map(|_| PinkState::new()).collect(),
            brownian: vec![0.0; config.channels],
        })
    }

    /// Change the amplitude.
    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = amplitude;
    }

    fn next_sample(&mut self, channel: usize) -> f64 {
        let value = match self.noise_type {
            NoiseType::White => self.rng.next_f64_signed(),
            NoiseType::Pink => self.pink[channel].next(&mut self.rng),
            NoiseType::Brownian => {
                let acc = self.brownian[channel] * BROWNIAN_LEAK
                    + self.rng.next_f64_signed() * BROWNIAN_STEP;
                self.brownian[channel] = acc;
                acc.clamp(-1.0, 1.0)
            }
        };
        value * self.amplitude
    }
}

impl DataSource for Noise {
    fn read_pcm_frames(&mut self, dst: &mut [u8], frame_count: u64) -> Result<u64> {
        let bpf = self.data_format.bytes_per_frame();
        let frames = frame_count.min((dst.len() / bpf) as u64);

        for frame in 0..frames as usize {
            for channel in 0..self.data_format.channels {
                let value = self.next_sample(channel);
                store_sample_f64(
                    dst,
                    frame * self.data_format.channels + channel,
                    self.data_format.format,
                    value,
                );
            }
        }
        Ok(frames)
    }

    fn seek_to_pcm_frame(&mut self, _frame: u64) -> Result<()> {
        // Noise has no timeline; accept and ignore.
        Ok(())
    }

    fn data_format(&self) -> Result<DataFormat> {
        Ok(self.data_format)
    }
}
