//! Effects and effect chains.
//!
//! An effect transforms PCM frames and declares its input and output
//! formats plus frame-count math, so callers can negotiate formats and
//! budget buffers. A chain is an owning composite: effects are moved
//! in, which makes cycles unrepresentable and forces a detach (by
//! move) before an effect can join another chain.

use rsn_core::{Result, RsnError};

use crate::converter::Converter;
use crate::format::Format;
use crate::source::DataFormat;

/// A PCM frame transformer.
pub trait Effect: Send {
    /// Process frames. On input the counts hold the frames available
    /// and requested; on return they hold the actuals. An effect may
    /// consume fewer frames than supplied and produce fewer than
    /// requested.
    fn process_pcm_frames(
        &mut self,
        input: &[u8],
        frame_count_in: &mut u64,
        output: &mut [u8],
        frame_count_out: &mut u64,
    ) -> Result<()>;

    /// Input frames needed to produce `output_frame_count` frames.
    fn required_input_frame_count(&self, output_frame_count: u64) -> u64 {
        output_frame_count
    }

    /// Output frames produced from `input_frame_count` frames.
    fn expected_output_frame_count(&self, input_frame_count: u64) -> u64 {
        input_frame_count
    }

    /// The format this effect consumes.
    fn input_data_format(&self) -> Result<DataFormat>;

    /// The format this effect produces.
    fn output_data_format(&self) -> Result<DataFormat>;
}

impl Effect for Converter {
    fn process_pcm_frames(
        &mut self,
        input: &[u8],
        frame_count_in: &mut u64,
        output: &mut [u8],
        frame_count_out: &mut u64,
    ) -> Result<()> {
        Converter::process(self, input, frame_count_in, output, frame_count_out)
    }

    fn required_input_frame_count(&self, output_frame_count: u64) -> u64 {
        Converter::required_input_frame_count(self, output_frame_count)
    }

    fn expected_output_frame_count(&self, input_frame_count: u64) -> u64 {
        Converter::expected_output_frame_count(self, input_frame_count)
    }

    fn input_data_format(&self) -> Result<DataFormat> {
        DataFormat::new(self.format_in(), self.channels_in(), self.sample_rate_in())
    }

    fn output_data_format(&self) -> Result<DataFormat> {
        DataFormat::new(self.format_out(), self.channels_out(), self.sample_rate_out())
    }
}

/// An ordered list of effects applied back to back.
///
/// Adjacent effects must agree on format: appending an effect whose
/// input format differs from the chain's current output format fails
/// with `InvalidArgs` (insert a [`Converter`] to bridge). The chain
/// itself implements [`Effect`].
#[derive(Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    scratch_a: Vec<u8>,
    scratch_b: Vec<u8>,
}

impl EffectChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an effect at the tail.
    pub fn append(&mut self, effect: Box<dyn Effect>) -> Result<()> {
        if let Some(last) = self.effects.last() {
            let tail = last.output_data_format()?;
            let head = effect.input_data_format()?;
            if tail.format != head.format || tail.channels != head.channels {
                return Err(RsnError::InvalidArgs);
            }
        }
        self.effects.push(effect);
        Ok(())
    }

    /// Prepend an effect at the head.
    pub fn prepend(&mut self, effect: Box<dyn Effect>) -> Result<()> {
        if let Some(first) = self.effects.first() {
            let head = first.input_data_format()?;
            let tail = effect.output_data_format()?;
            if tail.format != head.format || tail.channels != head.channels {
                return Err(RsnError::InvalidArgs);
            }
        }
        self.effects.insert(0, effect);
        Ok(())
    }

    /// Detach and return the effect at `index`.
    pub fn detach(&mut self, index: usize) -> Result<Box<dyn Effect>> {
        if index >= self.effects.len() {
            return Err(RsnError::InvalidArgs);
        }
        Ok(self.effects.remove(index))
    }

    /// Number of effects in the chain.
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

impl Effect for EffectChain {
    fn process_pcm_frames(
        &mut self,
        input: &[u8],
        frame_count_in: &mut u64,
        output: &mut [u8],
        frame_count_out: &mut u64,
    ) -> Result<()> {
        if self.effects.is_empty() {
            return Err(RsnError::InvalidOperation);
        }
        if self.effects.len() == 1 {
            return self.effects[0].process_pcm_frames(
                input,
                frame_count_in,
                output,
                frame_count_out,
            );
        }

        let max_in = *frame_count_in;
        let max_out = *frame_count_out;

        // Walk the first stage from the input, the last stage into the
        // output, and everything between through ping-pong scratch.
        let mut stage_frames = max_in;
        let mut consumed_first = 0u64;
        let last = self.effects.len() - 1;

        for (index, effect) in self.effects.iter_mut().enumerate() {
            let out_format = effect.output_data_format()?;

            let stage_out_budget = if index == last {
                max_out
            } else {
                effect.expected_output_frame_count(stage_frames)
            };

            let src_is_input = index == 0;
            let dst_is_output = index == last;

            let out_bytes = stage_out_budget as usize * out_format.bytes_per_frame();
            if !dst_is_output {
                self.scratch_b.resize(out_bytes, 0);
            }

            let mut in_frames = stage_frames;
            let mut out_frames = stage_out_budget;
            {
                let src: &[u8] = if src_is_input { input } else { &self.scratch_a };
                let dst: &mut [u8] = if dst_is_output {
                    output
                } else {
                    &mut self.scratch_b
                };
                effect.process_pcm_frames(src, &mut in_frames, dst, &mut out_frames)?;
            }

            if index == 0 {
                consumed_first = in_frames;
            }
            stage_frames = out_frames;
            if !dst_is_output {
                core::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
            }
        }

        *frame_count_in = consumed_first;
        *frame_count_out = stage_frames;
        Ok(())
    }

    fn required_input_frame_count(&self, output_frame_count: u64) -> u64 {
        self.effects
            .iter()
            .rev()
            .fold(output_frame_count, |frames, effect| {
                effect.required_input_frame_count(frames)
            })
    }

    fn expected_output_frame_count(&self, input_frame_count: u64) -> u64 {
        self.effects.iter().fold(input_frame_count, |frames, effect| {
            effect.expected_output_frame_count(frames)
        })
    }

    fn input_data_format(&self) -> Result<DataFormat> {
        match self.effects.first() {
            Some(effect) => effect.input_data_format(),
            None => Err(RsnError::InvalidOperation),
        }
    }

    fn output_data_format(&self) -> Result<DataFormat> {
        match self.effects.last() {
            Some(effect) => effect.output_data_format(),
            None => Err(RsnError::InvalidOperation),
        }
    }
}

/// An equal-power stereo panner.
///
/// `pan` runs from -1 (hard left) to +1 (hard right) and maps to the
/// gains `cos((pan + 1) * PI / 4)` on the left and
/// `sin((pan + 1) * PI / 4)` on the right.
pub struct Panner {
    data_format: DataFormat,
    pan: f32,
}

impl Panner {
    /// Create a stereo f32 panner.
    pub fn new(sample_rate: u32, pan: f32) -> Result<Self> {
        Ok(Self {
            data_format: DataFormat::new(Format::F32, 2, sample_rate)?,
            pan: pan.clamp(-1.0, 1.0),
        })
    }

    /// Set the pan position, clamped to `[-1, +1]`.
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    /// The current pan position.
    pub fn pan(&self) -> f32 {
        self.pan
    }

    fn gains(&self) -> (f32, f32) {
        let angle = (self.pan + 1.0) * std::f32::consts::FRAC_PI_4;
        (angle.cos(), angle.sin())
    }
}

impl Effect for Panner {
    fn process_pcm_frames(
        &mut self,
        input: &[u8],
        frame_count_in: &mut u64,
        output: &mut [u8],
        frame_count_out: &mut u64,
    ) -> Result<()> {
        let bpf = self.data_format.bytes_per_frame();
        let frames = (*frame_count_in)
            .min(*frame_count_out)
            .min((input.len() / bpf) as u64)
            .min((output.len() / bpf) as u64) as usize;

        let (gain_l, gain_r) = self.gains();
        for frame in 0..frames {
            let offset = frame * bpf;
            let l = f32::from_le_bytes([
                input[offset],
                input[offset + 1],
                input[offset + 2],
                input[offset + 3],
            ]) * gain_l;
            let r = f32::from_le_bytes([
                input[offset + 4],
                input[offset + 5],
                input[offset + 6],
                input[offset + 7],
            ]) * gain_r;
            output[offset..offset + 4].copy_from_slice(&l.to_le_bytes());
            output[offset + 4..offset + 8].copy_from_slice(&r.to_le_bytes());
        }

        *frame_count_in = frames as u64;
        *frame_count_out = frames as u64;
        Ok(())
    }

    fn input_data_format(&self) -> Result<DataFormat> {
        Ok(self.data_format)
    }

    fn output_data_format(&self) -> Result<DataFormat> {
        Ok(self.data_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterConfig;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn bytes_f32(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_panner_center_is_equal_power() {
        let mut panner = Panner::new(48_000, 0.0).unwrap();
        let input = f32_bytes(&[1.0, 1.0]);
        let mut output = vec![0u8; 8];
        let mut in_frames = 1u64;
        let mut out_frames = 1u64;
        panner
            .process_pcm_frames(&input, &mut in_frames, &mut output, &mut out_frames)
            .unwrap();

        let samples = bytes_f32(&output);
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((samples[0] - expected).abs() < 1e-6);
        assert!((samples[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_panner_hard_left_silences_right() {
        let mut panner = Panner::new(48_000, -1.0).unwrap();
        let input = f32_bytes(&[0.5, 0.5]);
        let mut output = vec![0u8; 8];
        let mut in_frames = 1u64;
        let mut out_frames = 1u64;
        panner
            .process_pcm_frames(&input, &mut in_frames, &mut output, &mut out_frames)
            .unwrap();

        let samples = bytes_f32(&output);
        assert!((samples[0] - 0.5).abs() < 1e-6);
        assert!(samples[1].abs() < 1e-6);
    }

    #[test]
    fn test_pan_clamped() {
        let mut panner = Panner::new(48_000, 3.0).unwrap();
        assert_eq!(panner.pan(), 1.0);
        panner.set_pan(-7.0);
        assert_eq!(panner.pan(), -1.0);
    }

    #[test]
    fn test_empty_chain_is_invalid() {
        let mut chain = EffectChain::new();
        let mut in_frames = 1u64;
        let mut out_frames = 1u64;
        assert_eq!(
            chain.process_pcm_frames(&[0u8; 8], &mut in_frames, &mut [0u8; 8], &mut out_frames),
            Err(RsnError::InvalidOperation)
        );
        assert!(chain.input_data_format().is_err());
    }

    #[test]
    fn test_chain_of_two_panners_multiplies_gains() {
        let mut chain = EffectChain::new();
        chain.append(Box::new(Panner::new(48_000, 0.0).unwrap())).unwrap();
        chain.append(Box::new(Panner::new(48_000, 0.0).unwrap())).unwrap();
        assert_eq!(chain.len(), 2);

        let input = f32_bytes(&[1.0, 1.0, 1.0, 1.0]);
        let mut output = vec![0u8; 16];
        let mut in_frames = 2u64;
        let mut out_frames = 2u64;
        chain
            .process_pcm_frames(&input, &mut in_frames, &mut output, &mut out_frames)
            .unwrap();
        assert_eq!(out_frames, 2);

        // Two passes at 1/sqrt(2) give 1/2.
        for sample in bytes_f32(&output) {
            assert!((sample - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_chain_rejects_format_mismatch() {
        let mut chain = EffectChain::new();
        chain.append(Box::new(Panner::new(48_000, 0.0).unwrap())).unwrap();

        // A converter that consumes mono cannot follow a stereo tail.
        let config =
            ConverterConfig::new(Format::F32, Format::F32, 1, 2, 48_000, 48_000).unwrap();
        let converter = Converter::new(&config).unwrap();
        assert_eq!(
            chain.append(Box::new(converter)),
            Err(RsnError::InvalidArgs)
        );
    }

    #[test]
    fn test_detach_then_reattach_elsewhere() {
        let mut chain = EffectChain::new();
        chain.append(Box::new(Panner::new(48_000, 0.25).unwrap())).unwrap();
        let effect = chain.detach(0).unwrap();
        assert!(chain.is_empty());

        let mut other = EffectChain::new();
        other.append(effect).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_chain_accounting_with_resampling_member() {
        let config =
            ConverterConfig::new(Format::F32, Format::F32, 2, 2, 48_000, 24_000).unwrap();
        let converter = Converter::new(&config).unwrap();

        let mut chain = EffectChain::new();
        chain.append(Box::new(Panner::new(48_000, 0.0).unwrap())).unwrap();
        chain.append(Box::new(converter)).unwrap();

        // The chain's required input must fold through the resampler.
        let required = chain.required_input_frame_count(100);
        assert_eq!(required, 199);
        assert_eq!(chain.expected_output_frame_count(199), 100);
    }

    #[test]
    fn test_chain_processes_through_resampler() {
        let config =
            ConverterConfig::new(Format::F32, Format::F32, 2, 2, 48_000, 24_000).unwrap();
        let converter = Converter::new(&config).unwrap();

        let mut chain = EffectChain::new();
        chain.append(Box::new(Panner::new(48_000, 0.0).unwrap())).unwrap();
        chain.append(Box::new(converter)).unwrap();

        let frames_in = 200usize;
        let input = f32_bytes(&vec![0.5f32; frames_in * 2]);
        let mut output = vec![0u8; 200 * 2 * 4];
        let mut in_count = frames_in as u64;
        let mut out_count = 200u64;
        chain
            .process_pcm_frames(&input, &mut in_count, &mut output, &mut out_count)
            .unwrap();

        assert!(out_count > 0);
        assert!(out_count <= 101);
    }

    #[test]
    fn test_converter_as_effect_reports_formats() {
        let config =
            ConverterConfig::new(Format::S16, Format::F32, 1, 2, 44_100, 48_000).unwrap();
        let converter = Converter::new(&config).unwrap();
        let effect: &dyn Effect = &converter;

        let input = effect.input_data_format().unwrap();
        assert_eq!(input.format, Format::S16);
        assert_eq!(input.channels, 1);
        assert_eq!(input.sample_rate, 44_100);

        let output = effect.output_data_format().unwrap();
        assert_eq!(output.format, Format::F32);
        assert_eq!(output.channels, 2);
        assert_eq!(output.sample_rate, 48_000);
    }
}
