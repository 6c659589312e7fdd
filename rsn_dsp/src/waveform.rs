//! Waveform generators exposed as data sources.
//!
//! Each waveform tracks a normalized phase in `[0, 1)` advanced by
//! `frequency / sample_rate` per frame. A negative amplitude inverts
//! the waveform. Generators are infinite but restartable: seeking
//! recomputes the phase for the target frame.

use rsn_core::{Result, RsnError};

use crate::format::{store_sample_f64, Format};
use crate::source::{DataFormat, DataSource};

/// Standard waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformType {
    /// Pure tone with no harmonics.
    Sine,
    /// Odd harmonics, bright and buzzy.
    Square,
    /// Soft tone with odd harmonics.
    Triangle,
    /// All harmonics, bright and cutting.
    Sawtooth,
}

/// Configuration for a [`Waveform`].
#[derive(Debug, Clone)]
pub struct WaveformConfig {
    pub format: Format,
    pub channels: usize,
    pub sample_rate: u32,
    pub waveform_type: WaveformType,
    /// Peak amplitude. Negative values invert the waveform.
    pub amplitude: f64,
    /// Frequency in Hz.
    pub frequency: f64,
}

impl WaveformConfig {
    pub fn new(
        format: Format,
        channels: usize,
        sample_rate: u32,
        waveform_type: WaveformType,
        amplitude: f64,
        frequency: f64,
    ) -> Self {
        Self {
            format,
            channels,
            sample_rate,
            waveform_type,
            amplitude,
            frequency,
        }
    }
}

/// A waveform oscillator data source.
pub struct Waveform {
    data_format: DataFormat,
    waveform_type: WaveformType,
    amplitude: f64,
    frequency: f64,
    phase: f64,
    frames_read: u64,
}

impl Waveform {
    /// Create a waveform generator.
    pub fn new(config: &WaveformConfig) -> Result<Self> {
        if !(config.frequency > 0.0 && config.frequency.is_finite()) {
            return Err(RsnError::InvalidArgs);
        }
        Ok(Self {
            data_format: DataFormat::new(config.format, config.channels, config.sample_rate)?,
            waveform_type: config.waveform_type,
            amplitude: config.amplitude,
            frequency: config.frequency,
            phase: 0.0,
            frames_read: 0,
        })
    }

    /// Change the oscillator frequency without resetting the phase.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<()> {
        if !(frequency > 0.0 && frequency.is_finite()) {
            return Err(RsnError::InvalidArgs);
        }
        self.frequency = frequency;
        Ok(())
    }

    /// Change the amplitude. Negative values invert the waveform.
    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = amplitude;
    }

    fn phase_increment(&self) -> f64 {
        self.frequency / self.data_format.sample_rate as f64
    }

    fn sample_at(&self, phase: f64) -> f64 {
        let value = match self.waveform_type {
            WaveformType::Sine => (phase * std::f64::consts::TAU).sin(),
            WaveformType::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            WaveformType::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                }
            }
            WaveformType::Sawtooth => 2.0 * phase - 1.0,
        };
        value * self.amplitude
    }
}

impl DataSource for Waveform {
    fn read_pcm_frames(&mut self, dst: &mut [u8], frame_count: u64) -> Result<u64> {
        let bpf = self.data_format.bytes_per_frame();
        let frames = frame_count.min((dst.len() / bpf) as u64);
        let increment = self.phase_increment();

        for frame in 0..frames as usize {
            let value = self.sample_at(self.phase);
            for channel in 0..self.data_format.channels {
                store_sample_f64(
                    dst,
                    frame * self.data_format.channels + channel,
                    self.data_format.format,
                    value,
                );
            }
            self.phase = (self.phase + increment).rem_euclid(1.0);
        }

        self.frames_read += frames;
        Ok(frames)
    }

    fn seek_to_pcm_frame(&mut self, frame: u64) -> Result<()> {
        self.phase = (frame as f64 * self.phase_increment()).rem_euclid(1.0);
        self.frames_read = frame;
        Ok(())
    }

    fn data_format(&self) -> Result<DataFormat> {
        Ok(self.data_format)
    }

    fn cursor(&self) -> Result<u64> {
        Ok(self.frames_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_frames(waveform: &mut Waveform, frames: usize, channels: usize) -> Vec<f32> {
        let mut dst = vec![0u8; frames * channels * 4];
        let read = waveform.read_pcm_frames(&mut dst, frames as u64).unwrap();
        assert_eq!(read, frames as u64);
        dst.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn sine_config(amplitude: f64) -> WaveformConfig {
        WaveformConfig::new(Format::F32, 1, 48_000, WaveformType::Sine, amplitude, 440.0)
    }

    #[test]
    fn test_sine_matches_reference_phase() {
        let mut waveform = Waveform::new(&sine_config(1.0)).unwrap();
        let samples = f32_frames(&mut waveform, 64, 1);
        for (i, sample) in samples.iter().enumerate() {
            let expected = (i as f64 * 440.0 / 48_000.0 * std::f64::consts::TAU).sin();
            assert!((*sample as f64 - expected).abs() < 1e-6, "frame {i}");
        }
    }

    #[test]
    fn test_negative_amplitude_inverts() {
        let mut positive = Waveform::new(&sine_config(0.5)).unwrap();
        let mut negative = Waveform::new(&sine_config(-0.5)).unwrap();
        let a = f32_frames(&mut positive, 32, 1);
        let b = f32_frames(&mut negative, 32, 1);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(*x, -*y);
        }
    }

    #[test]
    fn test_square_toggles_at_half_period() {
        // 125 Hz at 1 kHz: an exactly representable 8-frame period.
        let config = WaveformConfig::new(
            Format::F32,
            1,
            1_000,
            WaveformType::Square,
            1.0,
            125.0,
        );
        let mut waveform = Waveform::new(&config).unwrap();
        let samples = f32_frames(&mut waveform, 8, 1);
        assert_eq!(&samples[..4], &[1.0; 4]);
        assert_eq!(&samples[4..], &[-1.0; 4]);
    }

    #[test]
    fn test_sawtooth_ramps_and_wraps() {
        let config = WaveformConfig::new(
            Format::F32,
            1,
            1_000,
            WaveformType::Sawtooth,
            1.0,
            125.0,
        );
        let mut waveform = Waveform::new(&config).unwrap();
        let samples = f32_frames(&mut waveform, 9, 1);
        assert_eq!(samples[0], -1.0);
        assert_eq!(samples[4], 0.0);
        assert_eq!(samples[8], -1.0); // wrapped
    }

    #[test]
    fn test_triangle_peaks_at_half_period() {
        let config = WaveformConfig::new(
            Format::F32,
            1,
            1_000,
            WaveformType::Triangle,
            1.0,
            125.0,
        );
        let mut waveform = Waveform::new(&config).unwrap();
        let samples = f32_frames(&mut waveform, 8, 1);
        assert_eq!(samples[0], -1.0);
        assert_eq!(samples[4], 1.0);
    }

    #[test]
    fn test_all_channels_carry_the_same_sample() {
        let config =
            WaveformConfig::new(Format::F32, 2, 48_000, WaveformType::Sine, 1.0, 440.0);
        let mut waveform = Waveform::new(&config).unwrap();
        let samples = f32_frames(&mut waveform, 16, 2);
        for frame in samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_seek_to_zero_restarts() {
        let mut waveform = Waveform::new(&sine_config(1.0)).unwrap();
        let first = f32_frames(&mut waveform, 32, 1);
        waveform.seek_to_pcm_frame(0).unwrap();
        let second = f32_frames(&mut waveform, 32, 1);
        assert_eq!(first, second);
        assert_eq!(waveform.cursor().unwrap(), 32);
    }

    #[test]
    fn test_length_is_not_implemented() {
        let waveform = Waveform::new(&sine_config(1.0)).unwrap();
        assert_eq!(waveform.length(), Err(RsnError::NotImplemented));
    }

    #[test]
    fn test_invalid_frequency_rejected() {
        let mut config = sine_config(1.0);
        config.frequency = 0.0;
        assert!(Waveform::new(&config).is_err());
    }

    #[test]
    fn test_s16_output() {
        let config =
            WaveformConfig::new(Format::S16, 1, 1_000, WaveformType::Square, 1.0, 125.0);
        let mut waveform = Waveform::new(&config).unwrap();
        let mut dst = vec![0u8; 8 * 2];
        waveform.read_pcm_frames(&mut dst, 8).unwrap();
        let first = i16::from_le_bytes([dst[0], dst[1]]);
        let last = i16::from_le_bytes([dst[14], dst[15]]);
        assert_eq!(first, 32767);
        assert_eq!(last, -32768);
    }
}
