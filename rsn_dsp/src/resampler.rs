//! Linear resampler with a Butterworth low-pass post-filter.
//!
//! The interpolation position advances by `rate_in / rate_out` input
//! frames per output frame, tracked as an integer part plus a fraction
//! over the (reduced) output rate, so the frame accounting is exact:
//! `required_input_frames` and `expected_output_frames` agree with the
//! counts reported by `process` for aligned calls.
//!
//! When downsampling the filter runs at the input rate before
//! interpolation; when upsampling it runs at the output rate after.
//! Either way the cutoff tracks the lower of the two Nyquist
//! frequencies. Dynamic rate changes preserve the interpolation and
//! filter state so the output stays continuous across the change.

use rsn_core::{Result, RsnError};

use crate::biquad::{LowPassFilter, MAX_FILTER_ORDER};
use crate::format::Format;

/// Default order of the low-pass post-filter.
pub const DEFAULT_LPF_ORDER: usize = 4;

const RATIO_DENOMINATOR: u32 = 65536;

/// Configuration for a [`LinearResampler`].
#[derive(Debug, Clone)]
pub struct ResamplerConfig {
    /// Stream format. `F32` and `S16` are supported.
    pub format: Format,
    pub channels: usize,
    pub sample_rate_in: u32,
    pub sample_rate_out: u32,
    /// Low-pass post-filter order, 0 (bypass) to 8.
    pub lpf_order: usize,
}

impl ResamplerConfig {
    /// A config with the default filter order.
    pub fn new(
        format: Format,
        channels: usize,
        sample_rate_in: u32,
        sample_rate_out: u32,
    ) -> Self {
        Self {
            format,
            channels,
            sample_rate_in,
            sample_rate_out,
            lpf_order: DEFAULT_LPF_ORDER,
        }
    }
}

/// Converts a stream between two sample rates by linear interpolation.
pub struct LinearResampler {
    format: Format,
    channels: usize,
    sample_rate_in: u32,
    sample_rate_out: u32,
    lpf_order: usize,

    // Advance per output frame, in input frames, over the reduced
    // output rate.
    rate_out_reduced: u64,
    advance_int: u64,
    advance_frac: u64,

    // Position of the next output frame relative to x1.
    in_time_int: u64,
    in_time_frac: u64,

    x0: Vec<f32>,
    x1: Vec<f32>,
    lpf: LowPassFilter,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl LinearResampler {
    /// Create a resampler.
    pub fn new(config: &ResamplerConfig) -> Result<Self> {
        if config.channels == 0
            || config.sample_rate_in == 0
            || config.sample_rate_out == 0
            || config.lpf_order > MAX_FILTER_ORDER
        {
            return Err(RsnError::InvalidArgs);
        }
        if !matches!(config.format, Format::F32 | Format::S16) {
            return Err(RsnError::InvalidArgs);
        }

        let divisor = gcd(config.sample_rate_in as u64, config.sample_rate_out as u64);
        let rate_in_reduced = config.sample_rate_in as u64 / divisor;
        let rate_out_reduced = config.sample_rate_out as u64 / divisor;

        let lpf_rate = config.sample_rate_in.min(config.sample_rate_out);
        let lpf = LowPassFilter::new(
            config.channels,
            lpf_sample_rate(config.sample_rate_in, config.sample_rate_out),
            lpf_rate as f64 * 0.5,
            config.lpf_order,
        )?;

        Ok(Self {
            format: config.format,
            channels: config.channels,
            sample_rate_in: config.sample_rate_in,
            sample_rate_out: config.sample_rate_out,
            lpf_order: config.lpf_order,
            rate_out_reduced,
            advance_int: rate_in_reduced / rate_out_reduced,
            advance_frac: rate_in_reduced % rate_out_reduced,
            // Prime the window: the first output consumes one input
            // frame into x1.
            in_time_int: 1,
            in_time_frac: 0,
            x0: vec![0.0; config.channels],
            x1: vec![0.0; config.channels],
            lpf,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate_in(&self) -> u32 {
        self.sample_rate_in
    }

    pub fn sample_rate_out(&self) -> u32 {
        self.sample_rate_out
    }

    /// Change the conversion rates, preserving interpolation and
    /// filter state.
    pub fn set_rate(&mut self, sample_rate_in: u32, sample_rate_out: u32) -> Result<()> {
        if sample_rate_in == 0 || sample_rate_out == 0 {
            return Err(RsnError::InvalidArgs);
        }

        let divisor = gcd(sample_rate_in as u64, sample_rate_out as u64);
        let rate_in_reduced = sample_rate_in as u64 / divisor;
        let rate_out_reduced = sample_rate_out as u64 / divisor;

        // Rescale the fractional position to the new denominator.
        let old_denominator = self.rate_out_reduced;
        self.in_time_frac = self.in_time_frac * rate_out_reduced / old_denominator;

        self.sample_rate_in = sample_rate_in;
        self.sample_rate_out = sample_rate_out;
        self.rate_out_reduced = rate_out_reduced;
        self.advance_int = rate_in_reduced / rate_out_reduced;
        self.advance_frac = rate_in_reduced % rate_out_reduced;

        let cutoff = sample_rate_in.min(sample_rate_out) as f64 * 0.5;
        self.lpf
            .reinit(lpf_sample_rate(sample_rate_in, sample_rate_out), cutoff)
    }

    /// Change the conversion ratio `rate_in / rate_out` directly.
    pub fn set_rate_ratio(&mut self, ratio: f32) -> Result<()> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(RsnError::InvalidArgs);
        }
        let rate_in = (ratio * RATIO_DENOMINATOR as f32) as u32;
        if rate_in == 0 {
            return Err(RsnError::InvalidArgs);
        }
        self.set_rate(rate_in, RATIO_DENOMINATOR)
    }

    /// Input frames needed from the current state to produce
    /// `output_frame_count` output frames.
    pub fn required_input_frame_count(&self, output_frame_count: u64) -> u64 {
        if output_frame_count == 0 {
            return 0;
        }
        let r = self.rate_out_reduced;
        let t0 = self.in_time_int * r + self.in_time_frac;
        let advance = self.advance_int * r + self.advance_frac;
        (t0 + (output_frame_count - 1) * advance) / r
    }

    /// Output frames the current state will produce from
    /// `input_frame_count` input frames.
    pub fn expected_output_frame_count(&self, input_frame_count: u64) -> u64 {
        let r = self.rate_out_reduced;
        let t0 = self.in_time_int * r + self.in_time_frac;
        let advance = self.advance_int * r + self.advance_frac;
        let limit = (input_frame_count + 1) * r;
        if limit <= t0 {
            return 0;
        }
        (limit - t0 - 1) / advance + 1
    }

    /// Resample. On input the counts hold the frames available and the
    /// frames requested; on return they hold the frames actually
    /// consumed and produced. Fewer frames than supplied may be
    /// consumed and fewer than requested may be produced.
    pub fn process(
        &mut self,
        input: &[u8],
        frame_count_in: &mut u64,
        output: &mut [u8],
        frame_count_out: &mut u64,
    ) -> Result<()> {
        let bpf = self.format.bytes_per_frame(self.channels);
        let max_in = *frame_count_in;
        let max_out = *frame_count_out;
        if input.len() < max_in as usize * bpf || output.len() < max_out as usize * bpf {
            return Err(RsnError::InvalidArgs);
        }

        let downsampling = self.sample_rate_out < self.sample_rate_in;
        let mut consumed: u64 = 0;
        let mut produced: u64 = 0;

        while produced < max_out {
            // Pull pending whole input frames into the window.
            while self.in_time_int > 0 && consumed < max_in {
                for channel in 0..self.channels {
                    self.x0[channel] = self.x1[channel];
                    let mut sample =
                        read_sample(input, self.format, consumed as usize, self.channels, channel);
                    if downsampling {
                        sample = self.lpf.process_sample(channel, sample);
                    }
                    self.x1[channel] = sample;
                }
                consumed += 1;
                self.in_time_int -= 1;
            }
            if self.in_time_int > 0 {
                break; // Starved for input.
            }

            let frac = self.in_time_frac as f32 / self.rate_out_reduced as f32;
            for channel in 0..self.channels {
                let mut sample =
                    self.x0[channel] + (self.x1[channel] - self.x0[channel]) * frac;
                if !downsampling {
                    sample = self.lpf.process_sample(channel, sample);
                }
                write_sample(
                    output,
                    self.format,
                    produced as usize,
                    self.channels,
                    channel,
                    sample,
                );
            }
            produced += 1;

            self.in_time_int += self.advance_int;
            self.in_time_frac += self.advance_frac;
            if self.in_time_frac >= self.rate_out_reduced {
                self.in_time_frac -= self.rate_out_reduced;
                self.in_time_int += 1;
            }
        }

        *frame_count_in = consumed;
        *frame_count_out = produced;
        Ok(())
    }
}

fn lpf_sample_rate(sample_rate_in: u32, sample_rate_out: u32) -> u32 {
    // The filter runs on the input side when downsampling, on the
    // output side when upsampling.
    if sample_rate_out < sample_rate_in {
        sample_rate_in
    } else {
        sample_rate_out
    }
}

#[inline]
fn read_sample(buffer: &[u8], format: Format, frame: usize, channels: usize, channel: usize) -> f32 {
    let index = frame * channels + channel;
    match format {
        Format::F32 => {
            let o = index * 4;
            f32::from_le_bytes([buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3]])
        }
        Format::S16 => {
            let o = index * 2;
            i16::from_le_bytes([buffer[o], buffer[o + 1]]) as f32 / 32768.0
        }
        _ => 0.0,
    }
}

#[inline]
fn write_sample(
    buffer: &mut [u8],
    format: Format,
    frame: usize,
    channels: usize,
    channel: usize,
    sample: f32,
) {
    let index = frame * channels + channel;
    match format {
        Format::F32 => {
            let o = index * 4;
            buffer[o..o + 4].copy_from_slice(&sample.to_le_bytes());
        }
        Format::S16 => {
            let o = index * 2;
            let q = ((sample * 32768.0) as i32).clamp(-32768, 32767) as i16;
            buffer[o..o + 2].copy_from_slice(&q.to_le_bytes());
        }
        _ => {}
    }
}
