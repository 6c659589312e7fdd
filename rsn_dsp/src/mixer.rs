//! The accumulation-buffer mixer.
//!
//! Sounds are mixed by summing volume-scaled samples into an
//! accumulation buffer kept one integer width above the output format
//! (u8 sums in i16, s16 in i32, s24/s32 in i64, f32 in f32), so
//! intermediate sums cannot wrap. Clipping happens once, at the end of
//! the mix.
//!
//! A mix runs between `begin` and `end`. `begin` reports how many
//! frames to request from each source (the input count differs from
//! the output count only when the attached effect resamples); the
//! `mix_*` calls accumulate; `end` applies the mixer volume, clips,
//! runs the effect if one is attached, and either writes the result to
//! an output buffer (master mix) or adds it to the parent's
//! accumulation buffer (submix). A submix must open and close entirely
//! within its parent's begin/end window and must produce exactly the
//! parent's input frame count.

use rsn_core::{Result, RsnError};

use crate::converter::convert_frames_format_and_channels;
use crate::effect::Effect;
use crate::format::{
    apply_volume_q8_s16, apply_volume_q8_u8, apply_volume_q8_wide, silence_pcm_frames,
    volume_to_q8, Dither, DitherMode, Format,
};
use crate::source::{read_pcm_frames_with_loop, DataFormat, DataSource, RingBufferSource};

/// Typed storage for the widened accumulation samples.
pub enum AccumulationBuffer {
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
}

impl AccumulationBuffer {
    /// Allocate an accumulation buffer for `sample_count` samples of
    /// the given output format.
    pub fn for_format(format: Format, sample_count: usize) -> Result<Self> {
        match format {
            Format::U8 => Ok(Self::I16(vec![0; sample_count])),
            Format::S16 => Ok(Self::I32(vec![0; sample_count])),
            Format::S24 | Format::S32 => Ok(Self::I64(vec![0; sample_count])),
            Format::F32 => Ok(Self::F32(vec![0.0; sample_count])),
            Format::Unknown => Err(RsnError::InvalidArgs),
        }
    }

    fn sample_count(&self) -> usize {
        match self {
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    fn matches(&self, format: Format) -> bool {
        matches!(
            (self, format),
            (Self::I16(_), Format::U8)
                | (Self::I32(_), Format::S16)
                | (Self::I64(_), Format::S24)
                | (Self::I64(_), Format::S32)
                | (Self::F32(_), Format::F32)
        )
    }

    fn zero(&mut self, sample_count: usize) {
        match self {
            Self::I16(v) => v[..sample_count].fill(0),
            Self::I32(v) => v[..sample_count].fill(0),
            Self::I64(v) => v[..sample_count].fill(0),
            Self::F32(v) => v[..sample_count].fill(0.0),
        }
    }
}

/// Configuration for a [`Mixer`].
pub struct MixerConfig {
    /// Output sample format, also selecting the accumulation width.
    pub format: Format,
    pub channels: usize,
    /// Fixed capacity of the accumulation buffer in frames.
    pub accumulation_buffer_size_in_frames: u64,
    /// Output volume in linear scale.
    pub volume: f32,
    /// Bring-your-own accumulation storage. Must match the format's
    /// accumulation type and hold at least the configured capacity.
    pub preallocated_accumulation_buffer: Option<AccumulationBuffer>,
}

impl MixerConfig {
    pub fn new(
        format: Format,
        channels: usize,
        accumulation_buffer_size_in_frames: u64,
    ) -> Self {
        Self {
            format,
            channels,
            accumulation_buffer_size_in_frames,
            volume: 1.0,
            preallocated_accumulation_buffer: None,
        }
    }
}

#[derive(Default)]
struct MixingState {
    frame_count_in: u64,
    frame_count_out: u64,
    inside_begin_end: bool,
}

/// Mixes and layers sounds into an accumulation buffer.
pub struct Mixer {
    format: Format,
    channels: usize,
    capacity_in_frames: u64,
    accumulation: AccumulationBuffer,
    volume: f32,
    effect: Option<Box<dyn Effect>>,
    state: MixingState,
    dither: Dither,
    scratch_wire: Vec<u8>,
    scratch_effect: Vec<u8>,
    scratch_source: Vec<u8>,
}

impl Mixer {
    /// Create a mixer. The accumulation buffer capacity must be
    /// nonzero; a pre-allocated buffer must match the format's
    /// accumulation type and be large enough.
    pub fn new(config: MixerConfig) -> Result<Self> {
        if config.format == Format::Unknown
            || config.channels == 0
            || config.accumulation_buffer_size_in_frames == 0
        {
            return Err(RsnError::InvalidArgs);
        }

        let samples = config.accumulation_buffer_size_in_frames as usize * config.channels;
        let accumulation = match config.preallocated_accumulation_buffer {
            Some(buffer) => {
                if !buffer.matches(config.format) || buffer.sample_count() < samples {
                    return Err(RsnError::InvalidArgs);
                }
                buffer
            }
            None => AccumulationBuffer::for_format(config.format, samples)?,
        };

        Ok(Self {
            format: config.format,
            channels: config.channels,
            capacity_in_frames: config.accumulation_buffer_size_in_frames,
            accumulation,
            volume: config.volume,
            effect: None,
            state: MixingState::default(),
            dither: Dither::new(DitherMode::None),
            scratch_wire: Vec::new(),
            scratch_effect: Vec::new(),
            scratch_source: Vec::new(),
        })
    }

    /// The format written by `end`.
    pub fn output_data_format(&self) -> (Format, usize) {
        (self.format, self.channels)
    }

    /// The format accepted by the `mix_*` calls without conversion.
    pub fn input_data_format(&self) -> (Format, usize) {
        (self.format, self.channels)
    }

    /// Linear output volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Set the output volume. Fails with `InvalidArgs` for negative or
    /// non-finite values.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !(volume.is_finite() && volume >= 0.0) {
            return Err(RsnError::InvalidArgs);
        }
        self.volume = volume;
        Ok(())
    }

    /// Attach the output effect. Fails with `InvalidOperation` inside
    /// a begin/end pair.
    pub fn set_effect(&mut self, effect: Box<dyn Effect>) -> Result<()> {
        if self.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }
        self.effect = Some(effect);
        Ok(())
    }

    /// Detach and return the output effect.
    pub fn take_effect(&mut self) -> Result<Option<Box<dyn Effect>>> {
        if self.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }
        Ok(self.effect.take())
    }

    /// Begin a mix.
    ///
    /// For a master mix, `frame_count_out` holds the desired output
    /// frame count on input and the granted count on return (the
    /// request is clamped to the accumulation capacity). For a submix
    /// pass the parent; the output count is then dictated by the
    /// parent's input count. Either way `frame_count_in` receives the
    /// count every `mix_*` call in this window must use.
    pub fn begin(
        &mut self,
        parent: Option<&Mixer>,
        frame_count_out: &mut u64,
        frame_count_in: &mut u64,
    ) -> Result<()> {
        if self.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }

        let mut out_frames = match parent {
            Some(parent_mixer) => {
                if !parent_mixer.state.inside_begin_end {
                    return Err(RsnError::InvalidOperation);
                }
                parent_mixer.state.frame_count_in
            }
            None => (*frame_count_out).min(self.capacity_in_frames),
        };

        let in_frames = match &self.effect {
            Some(effect) => {
                let mut required = effect.required_input_frame_count(out_frames);
                if required > self.capacity_in_frames {
                    out_frames = effect.expected_output_frame_count(self.capacity_in_frames);
                    required = self.capacity_in_frames;
                }
                required
            }
            None => out_frames,
        };

        // A submix must match its parent exactly; if the effect math
        // shrank the window there is no way to reconcile them.
        if let Some(parent_mixer) = parent {
            if out_frames != parent_mixer.state.frame_count_in {
                return Err(RsnError::InvalidOperation);
            }
        }

        self.state.inside_begin_end = true;
        self.state.frame_count_out = out_frames;
        self.state.frame_count_in = in_frames;
        self.accumulation.zero(in_frames as usize * self.channels);

        *frame_count_out = out_frames;
        *frame_count_in = in_frames;
        Ok(())
    }

    /// End a mix, finalizing into `output` (master) or the parent's
    /// accumulation buffer (submix). Exactly one destination must be
    /// given.
    pub fn end(&mut self, parent: Option<&mut Mixer>, output: Option<&mut [u8]>) -> Result<()> {
        match (&parent, &output) {
            (None, None) => return Err(RsnError::InvalidArgs),
            (Some(_), Some(_)) => return Err(RsnError::InvalidArgs),
            _ => {}
        }
        if !self.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }

        let result = match parent {
            Some(parent_mixer) => self.end_into_parent(parent_mixer),
            None => self.end_into_buffer(output.unwrap()),
        };

        self.state.inside_begin_end = false;
        self.state.frame_count_in = 0;
        self.state.frame_count_out = 0;
        result
    }

    /// Accumulate interleaved frames, volume-scaled, starting at the
    /// beginning of the accumulation buffer. Frames in a different
    /// format or channel count are converted first.
    pub fn mix_pcm_frames(
        &mut self,
        frames: &[u8],
        frame_count: u64,
        volume: f32,
        format_in: Format,
        channels_in: usize,
    ) -> Result<()> {
        self.mix_pcm_frames_at(0, frames, frame_count, volume, format_in, channels_in)
    }

    /// Mix from a data source, preferring the zero-copy `map` path and
    /// falling back to `read`. An optional per-source effect is
    /// applied before accumulation. Returns the frames mixed.
    pub fn mix_data_source(
        &mut self,
        source: &mut dyn DataSource,
        frame_count: u64,
        volume: f32,
        effect: Option<&mut dyn Effect>,
        looping: bool,
    ) -> Result<u64> {
        if !self.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }
        if frame_count > self.state.frame_count_in {
            return Err(RsnError::InvalidArgs);
        }

        let source_format = source.data_format()?;
        match effect {
            Some(effect) => {
                self.mix_data_source_through_effect(source, source_format, frame_count, volume, effect, looping)
            }
            None => self.mix_data_source_direct(source, source_format, frame_count, volume, looping),
        }
    }

    /// Mix directly from a ring buffer's readable span.
    pub fn mix_ring_buffer(
        &mut self,
        source: &mut RingBufferSource,
        frame_count: u64,
        volume: f32,
        effect: Option<&mut dyn Effect>,
    ) -> Result<u64> {
        self.mix_data_source(source, frame_count, volume, effect, false)
    }

    fn mix_data_source_direct(
        &mut self,
        source: &mut dyn DataSource,
        source_format: DataFormat,
        frame_count: u64,
        volume: f32,
        looping: bool,
    ) -> Result<u64> {
        let bpf = source_format.bytes_per_frame();
        let mut mixed: u64 = 0;

        // Zero-copy path first.
        loop {
            if mixed == frame_count {
                return Ok(mixed);
            }
            let remaining = frame_count - mixed;
            match source.map(remaining) {
                Ok(span) => {
                    let frames = (span.len() / bpf) as u64;
                    if frames == 0 {
                        return Ok(mixed);
                    }
                    self.mix_pcm_frames_at(
                        mixed,
                        span,
                        frames,
                        volume,
                        source_format.format,
                        source_format.channels,
                    )?;
                    source.unmap(frames)?;
                    mixed += frames;
                }
                Err(RsnError::NotImplemented) => break,
                Err(RsnError::AtEnd) => {
                    if !looping {
                        return Ok(mixed);
                    }
                    source.seek_to_pcm_frame(0)?;
                }
                Err(e) => return Err(e),
            }
        }

        // Fallback: read into scratch, then accumulate.
        let remaining = frame_count - mixed;
        self.scratch_source.resize(remaining as usize * bpf, 0);
        let mut scratch = core::mem::take(&mut self.scratch_source);
        let read = read_pcm_frames_with_loop(source, &mut scratch, remaining, looping);
        let result = match read {
            Ok(read_frames) => {
                self.mix_pcm_frames_at(
                    mixed,
                    &scratch,
                    read_frames,
                    volume,
                    source_format.format,
                    source_format.channels,
                )?;
                Ok(mixed + read_frames)
            }
            Err(e) => Err(e),
        };
        self.scratch_source = scratch;
        result
    }

    fn mix_data_source_through_effect(
        &mut self,
        source: &mut dyn DataSource,
        source_format: DataFormat,
        frame_count: u64,
        volume: f32,
        effect: &mut dyn Effect,
        looping: bool,
    ) -> Result<u64> {
        let fx_in = effect.input_data_format()?;
        let fx_out = effect.output_data_format()?;
        if fx_in.format != source_format.format || fx_in.channels != source_format.channels {
            return Err(RsnError::InvalidArgs);
        }

        let in_bpf = fx_in.bytes_per_frame();
        let out_bpf = fx_out.bytes_per_frame();

        let needed = effect.required_input_frame_count(frame_count);
        self.scratch_source.resize(needed as usize * in_bpf, 0);
        let mut source_buf = core::mem::take(&mut self.scratch_source);
        let read = read_pcm_frames_with_loop(source, &mut source_buf, needed, looping)?;

        self.scratch_effect.resize(frame_count as usize * out_bpf, 0);
        let mut effect_buf = core::mem::take(&mut self.scratch_effect);

        let mut in_frames = read;
        let mut out_frames = frame_count;
        let process =
            effect.process_pcm_frames(&source_buf, &mut in_frames, &mut effect_buf, &mut out_frames);

        let result = match process {
            Ok(()) => {
                self.mix_pcm_frames_at(
                    0,
                    &effect_buf,
                    out_frames,
                    volume,
                    fx_out.format,
                    fx_out.channels,
                )?;
                Ok(out_frames)
            }
            Err(e) => Err(e),
        };

        self.scratch_source = source_buf;
        self.scratch_effect = effect_buf;
        result
    }

    /// Accumulate at a frame offset; internal workhorse behind every
    /// `mix_*` entry point.
    fn mix_pcm_frames_at(
        &mut self,
        frame_offset: u64,
        frames: &[u8],
        frame_count: u64,
        volume: f32,
        format_in: Format,
        channels_in: usize,
    ) -> Result<()> {
        if !self.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }
        if frame_offset + frame_count > self.state.frame_count_in {
            return Err(RsnError::InvalidArgs);
        }
        if frames.len() < frame_count as usize * format_in.bytes_per_frame(channels_in) {
            return Err(RsnError::InvalidArgs);
        }

        let converted: &[u8] = if format_in == self.format && channels_in == self.channels {
            frames
        } else {
            let bytes = frame_count as usize * self.format.bytes_per_frame(self.channels);
            self.scratch_wire.resize(bytes, 0);
            convert_frames_format_and_channels(
                &mut self.scratch_wire,
                self.format,
                self.channels,
                frames,
                format_in,
                channels_in,
                frame_count as usize,
                &mut self.dither,
            )?;
            &self.scratch_wire
        };

        let sample_offset = frame_offset as usize * self.channels;
        let sample_count = frame_count as usize * self.channels;
        accumulate_wire(
            &mut self.accumulation,
            sample_offset,
            converted,
            sample_count,
            self.format,
            volume,
        );
        Ok(())
    }

    fn end_into_buffer(&mut self, output: &mut [u8]) -> Result<()> {
        let out_frames = self.state.frame_count_out as usize;
        let out_bytes = out_frames * self.format.bytes_per_frame(self.channels);
        if output.len() < out_bytes {
            return Err(RsnError::InvalidArgs);
        }

        match self.effect.take() {
            None => {
                volume_and_clip(
                    &self.accumulation,
                    &mut output[..out_bytes],
                    out_frames * self.channels,
                    self.format,
                    self.volume,
                );
                Ok(())
            }
            Some(mut effect) => {
                let result = self.run_output_effect(&mut *effect, output);
                self.effect = Some(effect);
                result
            }
        }
    }

    fn end_into_parent(&mut self, parent: &mut Mixer) -> Result<()> {
        if !parent.state.inside_begin_end {
            return Err(RsnError::InvalidOperation);
        }
        debug_assert_eq!(self.state.frame_count_out, parent.state.frame_count_in);

        match self.effect.take() {
            None => {
                if self.format == parent.format && self.channels == parent.channels {
                    // Wide-to-wide accumulate; no clipping on the way
                    // into a parent.
                    accumulate_acc(
                        &mut parent.accumulation,
                        &self.accumulation,
                        self.state.frame_count_out as usize * self.channels,
                        self.volume,
                    );
                    return Ok(());
                }

                // Differing formats go through the wire domain.
                let frames = self.state.frame_count_out;
                let bytes = frames as usize * self.format.bytes_per_frame(self.channels);
                self.scratch_wire.resize(bytes, 0);
                volume_and_clip(
                    &self.accumulation,
                    &mut self.scratch_wire,
                    frames as usize * self.channels,
                    self.format,
                    self.volume,
                );
                let scratch = core::mem::take(&mut self.scratch_wire);
                let result =
                    parent.mix_pcm_frames_at(0, &scratch, frames, 1.0, self.format, self.channels);
                self.scratch_wire = scratch;
                result
            }
            Some(mut effect) => {
                let frames = self.state.frame_count_out;
                let out_format = effect.output_data_format()?;
                let bytes = frames as usize * out_format.bytes_per_frame();
                self.scratch_effect.resize(bytes, 0);
                let mut effect_out = core::mem::take(&mut self.scratch_effect);

                let result = self
                    .run_effect_into_raw(&mut *effect, &mut effect_out)
                    .and_then(|produced| {
                        parent.mix_pcm_frames_at(
                            0,
                            &effect_out,
                            produced,
                            1.0,
                            out_format.format,
                            out_format.channels,
                        )
                    });

                self.scratch_effect = effect_out;
                self.effect = Some(effect);
                result
            }
        }
    }

    /// Volume, clip, effect, and write to the master output buffer.
    fn run_output_effect(&mut self, effect: &mut dyn Effect, output: &mut [u8]) -> Result<()> {
        let out_format = effect.output_data_format()?;
        let out_frames = self.state.frame_count_out as usize;

        if out_format.format == self.format && out_format.channels == self.channels {
            let produced = self.run_effect_into_raw(effect, output)?;
            let out_bytes = out_frames * self.format.bytes_per_frame(self.channels);
            let produced_bytes = produced as usize * self.format.bytes_per_frame(self.channels);
            silence_pcm_frames(
                &mut output[produced_bytes..out_bytes],
                out_frames - produced as usize,
                self.format,
                self.channels,
            );
            return Ok(());
        }

        // Effect output format differs from the mixer's: convert as a
        // final step.
        let bytes = out_frames * out_format.bytes_per_frame();
        self.scratch_effect.resize(bytes, 0);
        let mut effect_out = core::mem::take(&mut self.scratch_effect);
        let result = self.run_effect_into_raw(effect, &mut effect_out).and_then(|produced| {
            convert_frames_format_and_channels(
                output,
                self.format,
                self.channels,
                &effect_out,
                out_format.format,
                out_format.channels,
                produced as usize,
                &mut self.dither,
            )
        });
        self.scratch_effect = effect_out;
        result
    }

    /// Clip the accumulator and run the effect, writing the effect's
    /// native output format into `dst`. Returns frames produced.
    fn run_effect_into_raw(&mut self, effect: &mut dyn Effect, dst: &mut [u8]) -> Result<u64> {
        let in_frames = self.state.frame_count_in;
        let fx_in = effect.input_data_format()?;

        // Volume and clip the accumulator into the mixer's wire format.
        let wire_bytes = in_frames as usize * self.format.bytes_per_frame(self.channels);
        self.scratch_wire.resize(wire_bytes, 0);
        volume_and_clip(
            &self.accumulation,
            &mut self.scratch_wire,
            in_frames as usize * self.channels,
            self.format,
            self.volume,
        );

        // Negotiate the effect's input format.
        let staged: &[u8] = if fx_in.format == self.format && fx_in.channels == self.channels {
            &self.scratch_wire
        } else {
            let bytes = in_frames as usize * fx_in.bytes_per_frame();
            self.scratch_source.resize(bytes, 0);
            let (wire, staged) = (&self.scratch_wire, &mut self.scratch_source);
            convert_frames_format_and_channels(
                staged,
                fx_in.format,
                fx_in.channels,
                wire,
                self.format,
                self.channels,
                in_frames as usize,
                &mut self.dither,
            )?;
            &self.scratch_source
        };

        let mut frames_in = in_frames;
        let mut frames_out = self.state.frame_count_out;
        effect.process_pcm_frames(staged, &mut frames_in, dst, &mut frames_out)?;
        Ok(frames_out)
    }
}

/// Accumulate wire-format samples into the widened buffer.
fn accumulate_wire(
    accumulation: &mut AccumulationBuffer,
    sample_offset: usize,
    src: &[u8],
    sample_count: usize,
    format: Format,
    volume: f32,
) {
    match (accumulation, format) {
        (AccumulationBuffer::I16(acc), Format::U8) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in src.iter().take(sample_count).enumerate() {
                acc[sample_offset + i] +=
                    apply_volume_q8_u8(*s as i16 - 128, volume_q8);
            }
        }
        (AccumulationBuffer::I32(acc), Format::S16) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in src.chunks_exact(2).take(sample_count).enumerate() {
                let x = i16::from_le_bytes([s[0], s[1]]) as i32;
                acc[sample_offset + i] += apply_volume_q8_s16(x, volume_q8);
            }
        }
        (AccumulationBuffer::I64(acc), Format::S24) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in src.chunks_exact(3).take(sample_count).enumerate() {
                let x = (i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8) as i64;
                acc[sample_offset + i] += apply_volume_q8_wide(x, volume_q8);
            }
        }
        (AccumulationBuffer::I64(acc), Format::S32) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in src.chunks_exact(4).take(sample_count).enumerate() {
                let x = i32::from_le_bytes([s[0], s[1], s[2], s[3]]) as i64;
                acc[sample_offset + i] += apply_volume_q8_wide(x, volume_q8);
            }
        }
        (AccumulationBuffer::F32(acc), Format::F32) => {
            for (i, s) in src.chunks_exact(4).take(sample_count).enumerate() {
                let x = f32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                acc[sample_offset + i] += x * volume;
            }
        }
        _ => debug_assert!(false, "accumulation type mismatch"),
    }
}

/// Accumulate one widened buffer into another, volume-scaled. Both
/// sides must share the accumulation type.
fn accumulate_acc(
    dst: &mut AccumulationBuffer,
    src: &AccumulationBuffer,
    sample_count: usize,
    volume: f32,
) {
    match (dst, src) {
        (AccumulationBuffer::I16(dst), AccumulationBuffer::I16(src)) => {
            let volume_q8 = volume_to_q8(volume);
            for (d, s) in dst.iter_mut().zip(src.iter()).take(sample_count) {
                *d += apply_volume_q8_u8(*s, volume_q8);
            }
        }
        (AccumulationBuffer::I32(dst), AccumulationBuffer::I32(src)) => {
            let volume_q8 = volume_to_q8(volume);
            for (d, s) in dst.iter_mut().zip(src.iter()).take(sample_count) {
                *d += apply_volume_q8_s16(*s, volume_q8);
            }
        }
        (AccumulationBuffer::I64(dst), AccumulationBuffer::I64(src)) => {
            let volume_q8 = volume_to_q8(volume);
            for (d, s) in dst.iter_mut().zip(src.iter()).take(sample_count) {
                *d += apply_volume_q8_wide(*s, volume_q8);
            }
        }
        (AccumulationBuffer::F32(dst), AccumulationBuffer::F32(src)) => {
            for (d, s) in dst.iter_mut().zip(src.iter()).take(sample_count) {
                *d += *s * volume;
            }
        }
        _ => debug_assert!(false, "accumulation type mismatch"),
    }
}

/// Apply volume to the accumulator and clip into the wire format.
fn volume_and_clip(
    accumulation: &AccumulationBuffer,
    dst: &mut [u8],
    sample_count: usize,
    format: Format,
    volume: f32,
) {
    match (accumulation, format) {
        (AccumulationBuffer::I16(acc), Format::U8) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in acc.iter().take(sample_count).enumerate() {
                let scaled = apply_volume_q8_u8(*s, volume_q8);
                dst[i] = (scaled.clamp(-128, 127) + 128) as u8;
            }
        }
        (AccumulationBuffer::I32(acc), Format::S16) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in acc.iter().take(sample_count).enumerate() {
                let scaled = apply_volume_q8_s16(*s, volume_q8);
                let clipped = scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                dst[i * 2..i * 2 + 2].copy_from_slice(&clipped.to_le_bytes());
            }
        }
        (AccumulationBuffer::I64(acc), Format::S24) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in acc.iter().take(sample_count).enumerate() {
                let scaled = apply_volume_q8_wide(*s, volume_q8);
                let clipped = scaled.clamp(-8_388_608, 8_388_607) as i32;
                let bytes = clipped.to_le_bytes();
                dst[i * 3] = bytes[0];
                dst[i * 3 + 1] = bytes[1];
                dst[i * 3 + 2] = bytes[2];
            }
        }
        (AccumulationBuffer::I64(acc), Format::S32) => {
            let volume_q8 = volume_to_q8(volume);
            for (i, s) in acc.iter().take(sample_count).enumerate() {
                let scaled = apply_volume_q8_wide(*s, volume_q8);
                let clipped = scaled.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                dst[i * 4..i * 4 + 4].copy_from_slice(&clipped.to_le_bytes());
            }
        }
        (AccumulationBuffer::F32(acc), Format::F32) => {
            for (i, s) in acc.iter().take(sample_count).enumerate() {
                let clipped = (*s * volume).clamp(-1.0, 1.0);
                dst[i * 4..i * 4 + 4].copy_from_slice(&clipped.to_le_bytes());
            }
        }
        _ => debug_assert!(false, "accumulation type mismatch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Panner;
    use crate::source::PcmBuffer;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn bytes_f32(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn f32_mixer(channels: usize, capacity: u64) -> Mixer {
        Mixer::new(MixerConfig::new(Format::F32, channels, capacity)).unwrap()
    }

    #[test]
    fn test_two_unit_sources_at_half_volume_hit_full_scale() {
        // (1.0 + 1.0) * 0.5 == 1.0 on every sample after the clip.
        let mut mixer = f32_mixer(2, 64);
        mixer.set_volume(0.5).unwrap();

        let mut out_frames = 64u64;
        let mut in_frames = 0u64;
        mixer.begin(None, &mut out_frames, &mut in_frames).unwrap();
        assert_eq!(out_frames, 64);
        assert_eq!(in_frames, 64);

        let source = f32_bytes(&vec![1.0f32; 64 * 2]);
        mixer.mix_pcm_frames(&source, 64, 1.0, Format::F32, 2).unwrap();
        mixer.mix_pcm_frames(&source, 64, 1.0, Format::F32, 2).unwrap();

        let mut output = vec![0u8; 64 * 2 * 4];
        mixer.end(None, Some(&mut output)).unwrap();
        for sample in bytes_f32(&output) {
            assert_eq!(sample, 1.0);
        }
    }

    #[test]
    fn test_output_is_clipped_to_full_scale() {
        let mut mixer = f32_mixer(1, 16);

        let mut out_frames = 16u64;
        let mut in_frames = 0u64;
        mixer.begin(None, &mut out_frames, &mut in_frames).unwrap();

        let source = f32_bytes(&vec![0.8f32; 16]);
        mixer.mix_pcm_frames(&source, 16, 1.0, Format::F32, 1).unwrap();
        mixer.mix_pcm_frames(&source, 16, 1.0, Format::F32, 1).unwrap();

        let mut output = vec![0u8; 16 * 4];
        mixer.end(None, Some(&mut output)).unwrap();
        for sample in bytes_f32(&output) {
            assert_eq!(sample, 1.0); // 1.6 clipped
        }
    }

    #[test]
    fn test_s16_accumulation_saturates_only_at_end() {
        let mut mixer = Mixer::new(MixerConfig::new(Format::S16, 1, 8)).unwrap();

        let mut out_frames = 8u64;
        let mut in_frames = 0u64;
        mixer.begin(None, &mut out_frames, &mut in_frames).unwrap();

        let loud: Vec<u8> = std::iter::repeat(30_000i16)
            .take(8)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        mixer.mix_pcm_frames(&loud, 8, 1.0, Format::S16, 1).unwrap();
        mixer.mix_pcm_frames(&loud, 8, 1.0, Format::S16, 1).unwrap();

        let mut output = vec![0u8; 8 * 2];
        mixer.end(None, Some(&mut output)).unwrap();
        for chunk in output.chunks_exact(2) {
            assert_eq!(i16::from_le_bytes([chunk[0], chunk[1]]), 32767);
        }
    }

    #[test]
    fn test_mix_outside_begin_end_is_invalid() {
        let mut mixer = f32_mixer(1, 8);
        let frames = f32_bytes(&[0.0; 8]);
        assert_eq!(
            mixer.mix_pcm_frames(&frames, 8, 1.0, Format::F32, 1),
            Err(RsnError::InvalidOperation)
        );
    }

    #[test]
    fn test_nested_begin_is_invalid() {
        let mut mixer = f32_mixer(1, 8);
        let mut out = 8u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        assert_eq!(
            mixer.begin(None, &mut out, &mut inn),
            Err(RsnError::InvalidOperation)
        );
    }

    #[test]
    fn test_end_requires_exactly_one_destination() {
        let mut mixer = f32_mixer(1, 8);
        let mut out = 8u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        assert_eq!(mixer.end(None, None), Err(RsnError::InvalidArgs));
    }

    #[test]
    fn test_set_effect_inside_window_is_invalid() {
        let mut mixer = f32_mixer(2, 8);
        let mut out = 8u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        let panner = Panner::new(48_000, 0.0).unwrap();
        assert_eq!(
            mixer.set_effect(Box::new(panner)),
            Err(RsnError::InvalidOperation)
        );
    }

    #[test]
    fn test_requested_frames_clamped_to_capacity() {
        let mut mixer = f32_mixer(1, 32);
        let mut out = 1000u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        assert_eq!(out, 32);
        assert_eq!(inn, 32);
    }

    #[test]
    fn test_submix_sum_reaches_master() {
        // Master begins for 512 frames; two submixes each mix one
        // constant source; the master output is their clipped sum.
        let mut master = f32_mixer(2, 512);
        let mut sub_a = f32_mixer(2, 512);
        let mut sub_b = f32_mixer(2, 512);

        let mut out = 512u64;
        let mut inn = 0u64;
        master.begin(None, &mut out, &mut inn).unwrap();

        let source_a = f32_bytes(&vec![0.25f32; 512 * 2]);
        let source_b = f32_bytes(&vec![0.5f32; 512 * 2]);

        let mut sub_out = 0u64;
        let mut sub_in = 0u64;
        sub_a.begin(Some(&master), &mut sub_out, &mut sub_in).unwrap();
        assert_eq!(sub_out, 512);
        sub_a.mix_pcm_frames(&source_a, 512, 1.0, Format::F32, 2).unwrap();
        sub_a.end(Some(&mut master), None).unwrap();

        sub_b.begin(Some(&master), &mut sub_out, &mut sub_in).unwrap();
        sub_b.mix_pcm_frames(&source_b, 512, 1.0, Format::F32, 2).unwrap();
        sub_b.end(Some(&mut master), None).unwrap();

        let mut output = vec![0u8; 512 * 2 * 4];
        master.end(None, Some(&mut output)).unwrap();
        for sample in bytes_f32(&output) {
            assert!((sample - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn test_submix_outside_parent_window_is_invalid() {
        let master = f32_mixer(2, 64);
        let mut sub = f32_mixer(2, 64);
        let mut out = 0u64;
        let mut inn = 0u64;
        assert_eq!(
            sub.begin(Some(&master), &mut out, &mut inn),
            Err(RsnError::InvalidOperation)
        );
    }

    #[test]
    fn test_mix_data_source_uses_map_path() {
        let mut mixer = f32_mixer(1, 16);
        let format = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut buffer =
            PcmBuffer::new(format, f32_bytes(&vec![0.5f32; 16])).unwrap();

        let mut out = 16u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        let mixed = mixer
            .mix_data_source(&mut buffer, 16, 1.0, None, false)
            .unwrap();
        assert_eq!(mixed, 16);

        let mut output = vec![0u8; 16 * 4];
        mixer.end(None, Some(&mut output)).unwrap();
        for sample in bytes_f32(&output) {
            assert_eq!(sample, 0.5);
        }
    }

    #[test]
    fn test_mix_data_source_loops_short_source() {
        let mut mixer = f32_mixer(1, 8);
        let format = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut buffer =
            PcmBuffer::new(format, f32_bytes(&[0.1, 0.2, 0.3])).unwrap();

        let mut out = 8u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        let mixed = mixer
            .mix_data_source(&mut buffer, 8, 1.0, None, true)
            .unwrap();
        assert_eq!(mixed, 8);

        let mut output = vec![0u8; 8 * 4];
        mixer.end(None, Some(&mut output)).unwrap();
        let samples = bytes_f32(&output);
        let expected = [0.1f32, 0.2, 0.3, 0.1, 0.2, 0.3, 0.1, 0.2];
        for (got, want) in samples.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mix_from_ring_buffer() {
        use rsn_core::pcm_ring_buffer;

        let (mut writer, reader) = pcm_ring_buffer(4, 32).unwrap();
        let format = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut source = RingBufferSource::new(reader, format).unwrap();

        let payload = f32_bytes(&vec![0.25f32; 8]);
        writer.acquire(8).copy_from_slice(&payload);
        writer.commit(8).unwrap();

        let mut mixer = f32_mixer(1, 8);
        let mut out = 8u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        let mixed = mixer.mix_ring_buffer(&mut source, 8, 1.0, None).unwrap();
        assert_eq!(mixed, 8);

        let mut output = vec![0u8; 8 * 4];
        mixer.end(None, Some(&mut output)).unwrap();
        for sample in bytes_f32(&output) {
            assert_eq!(sample, 0.25);
        }
    }

    #[test]
    fn test_format_conversion_during_mix() {
        // s16 source into an f32 mixer.
        let mut mixer = f32_mixer(1, 4);
        let mut out = 4u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();

        let source: Vec<u8> = [16384i16, -16384, 32767, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        mixer.mix_pcm_frames(&source, 4, 1.0, Format::S16, 1).unwrap();

        let mut output = vec![0u8; 4 * 4];
        mixer.end(None, Some(&mut output)).unwrap();
        let samples = bytes_f32(&output);
        assert!((samples[0] - 0.5).abs() < 1e-4);
        assert!((samples[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_output_effect_changes_frame_math() {
        use crate::converter::{Converter, ConverterConfig};

        // A 2:1 downsampling effect doubles the mixer's input frame
        // requirement.
        let config =
            ConverterConfig::new(Format::F32, Format::F32, 2, 2, 48_000, 24_000).unwrap();
        let converter = Converter::new(&config).unwrap();

        let mut mixer = f32_mixer(2, 1024);
        mixer.set_effect(Box::new(converter)).unwrap();

        let mut out = 100u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();
        assert_eq!(out, 100);
        assert_eq!(inn, 199);

        let source = f32_bytes(&vec![0.5f32; 199 * 2]);
        mixer.mix_pcm_frames(&source, 199, 1.0, Format::F32, 2).unwrap();

        let mut output = vec![0u8; 100 * 2 * 4];
        mixer.end(None, Some(&mut output)).unwrap();

        // The downsampled plateau still sits at 0.5.
        let samples = bytes_f32(&output);
        for sample in &samples[40..] {
            assert!((sample - 0.5).abs() < 0.05, "plateau drifted: {sample}");
        }
    }

    #[test]
    fn test_volume_validation() {
        let mut mixer = f32_mixer(1, 8);
        assert!(mixer.set_volume(-0.5).is_err());
        assert!(mixer.set_volume(f32::NAN).is_err());
        mixer.set_volume(0.0).unwrap();
        assert_eq!(mixer.volume(), 0.0);
    }

    #[test]
    fn test_u8_mixing_round_trip() {
        let mut mixer = Mixer::new(MixerConfig::new(Format::U8, 1, 4)).unwrap();
        let mut out = 4u64;
        let mut inn = 0u64;
        mixer.begin(None, &mut out, &mut inn).unwrap();

        let source = [192u8, 64, 128, 255]; // +0.5, -0.5, 0, ~+1
        mixer.mix_pcm_frames(&source, 4, 1.0, Format::U8, 1).unwrap();

        let mut output = [0u8; 4];
        mixer.end(None, Some(&mut output)).unwrap();
        assert_eq!(output, source);
    }

    #[test]
    fn test_preallocated_buffer_is_used() {
        let buffer = AccumulationBuffer::for_format(Format::F32, 16 * 2).unwrap();
        let mut config = MixerConfig::new(Format::F32, 2, 16);
        config.preallocated_accumulation_buffer = Some(buffer);
        assert!(Mixer::new(config).is_ok());

        // Too small.
        let buffer = AccumulationBuffer::for_format(Format::F32, 8).unwrap();
        let mut config = MixerConfig::new(Format::F32, 2, 16);
        config.preallocated_accumulation_buffer = Some(buffer);
        assert!(Mixer::new(config).is_err());

        // Wrong accumulation type.
        let buffer = AccumulationBuffer::for_format(Format::S16, 16 * 2).unwrap();
        let mut config = MixerConfig::new(Format::F32, 2, 16);
        config.preallocated_accumulation_buffer = Some(buffer);
        assert!(Mixer::new(config).is_err());
    }
}
