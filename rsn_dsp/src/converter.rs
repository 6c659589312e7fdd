//! The data converter: format conversion, channel routing, and
//! resampling composed into a single stage.
//!
//! Stage ordering follows two rules: channel routing happens before
//! resampling when the channel count shrinks (fewer channels are
//! cheaper to resample) and after otherwise, and format conversion is
//! deferred so the middle stages run in a single working format (`S16`
//! when both endpoints are `S16`, `F32` otherwise). Resampling is
//! skipped entirely when the rates match, unless dynamic rate changes
//! are requested, in which case the resampler must stay in the chain
//! so a later `set_rate` cannot glitch.

use rsn_core::{Result, RsnError};

use crate::channel::{ChannelMap, ChannelRouter, ChannelRouterConfig, MixMode};
use crate::format::{
    convert_pcm_frames_format, copy_pcm_frames, Dither, DitherMode, Format, MAX_CHANNELS,
};
use crate::resampler::{LinearResampler, ResamplerConfig, DEFAULT_LPF_ORDER};

/// Configuration for a [`Converter`].
#[derive(Clone)]
pub struct ConverterConfig {
    pub format_in: Format,
    pub format_out: Format,
    pub channels_in: usize,
    pub channels_out: usize,
    pub sample_rate_in: u32,
    pub sample_rate_out: u32,
    pub channel_map_in: ChannelMap,
    pub channel_map_out: ChannelMap,
    pub mix_mode: MixMode,
    pub dither_mode: DitherMode,
    /// Keep a resampler in the chain even when the rates match, so
    /// `set_rate` works glitch-free later.
    pub allow_dynamic_sample_rate: bool,
    /// Order of the resampler's low-pass post-filter.
    pub lpf_order: usize,
}

impl ConverterConfig {
    /// A config with default channel maps, mix mode, and filter order.
    pub fn new(
        format_in: Format,
        format_out: Format,
        channels_in: usize,
        channels_out: usize,
        sample_rate_in: u32,
        sample_rate_out: u32,
    ) -> Result<Self> {
        Ok(Self {
            format_in,
            format_out,
            channels_in,
            channels_out,
            sample_rate_in,
            sample_rate_out,
            channel_map_in: ChannelMap::default_for(channels_in)?,
            channel_map_out: ChannelMap::default_for(channels_out)?,
            mix_mode: MixMode::default(),
            dither_mode: DitherMode::default(),
            allow_dynamic_sample_rate: false,
            lpf_order: DEFAULT_LPF_ORDER,
        })
    }
}

/// Converts PCM frames between two data formats in one call.
pub struct Converter {
    format_in: Format,
    format_out: Format,
    channels_in: usize,
    channels_out: usize,
    sample_rate_in: u32,
    sample_rate_out: u32,
    working_format: Format,
    route_before_resample: bool,
    is_passthrough: bool,
    router: Option<ChannelRouter>,
    resampler: Option<LinearResampler>,
    dither: Dither,
    scratch_in: Vec<u8>,
    scratch_route: Vec<u8>,
    scratch_resample: Vec<u8>,
    scratch_post: Vec<u8>,
}

impl Converter {
    /// Build a converter. Fails with `InvalidArgs` when any descriptor
    /// field is zero or unknown.
    pub fn new(config: &ConverterConfig) -> Result<Self> {
        if config.format_in == Format::Unknown
            || config.format_out == Format::Unknown
            || config.channels_in == 0
            || config.channels_in > MAX_CHANNELS
            || config.channels_out == 0
            || config.channels_out > MAX_CHANNELS
            || config.sample_rate_in == 0
            || config.sample_rate_out == 0
            || config.channel_map_in.len() != config.channels_in
            || config.channel_map_out.len() != config.channels_out
        {
            return Err(RsnError::InvalidArgs);
        }

        let working_format = if config.format_in == Format::S16 && config.format_out == Format::S16
        {
            Format::S16
        } else {
            Format::F32
        };

        let router = {
            let router = ChannelRouter::new(&ChannelRouterConfig {
                channels_in: config.channels_in,
                channels_out: config.channels_out,
                channel_map_in: config.channel_map_in,
                channel_map_out: config.channel_map_out,
                mix_mode: config.mix_mode,
                weights: None,
            })?;
            if router.is_passthrough() {
                None
            } else {
                Some(router)
            }
        };

        let needs_resampler =
            config.sample_rate_in != config.sample_rate_out || config.allow_dynamic_sample_rate;
        let route_before_resample = config.channels_out < config.channels_in;
        let resampler_channels = if route_before_resample {
            config.channels_out
        } else {
            config.channels_in
        };
        let resampler = if needs_resampler {
            Some(LinearResampler::new(&ResamplerConfig {
                format: working_format,
                channels: resampler_channels,
                sample_rate_in: config.sample_rate_in,
                sample_rate_out: config.sample_rate_out,
                lpf_order: config.lpf_order,
            })?)
        } else {
            None
        };

        let is_passthrough =
            config.format_in == config.format_out && router.is_none() && resampler.is_none();

        Ok(Self {
            format_in: config.format_in,
            format_out: config.format_out,
            channels_in: config.channels_in,
            channels_out: config.channels_out,
            sample_rate_in: config.sample_rate_in,
            sample_rate_out: config.sample_rate_out,
            working_format,
            route_before_resample,
            is_passthrough,
            router,
            resampler,
            dither: Dither::new(config.dither_mode),
            scratch_in: Vec::new(),
            scratch_route: Vec::new(),
            scratch_resample: Vec::new(),
            scratch_post: Vec::new(),
        })
    }

    /// Whether all three stages are identity and `process` reduces to
    /// a copy.
    pub fn is_passthrough(&self) -> bool {
        self.is_passthrough
    }

    pub fn format_in(&self) -> Format {
        self.format_in
    }

    pub fn format_out(&self) -> Format {
        self.format_out
    }

    pub fn channels_in(&self) -> usize {
        self.channels_in
    }

    pub fn channels_out(&self) -> usize {
        self.channels_out
    }

    pub fn sample_rate_in(&self) -> u32 {
        self.sample_rate_in
    }

    pub fn sample_rate_out(&self) -> u32 {
        self.sample_rate_out
    }

    /// Change the conversion rates. Fails with `InvalidOperation` when
    /// no resampler is present (matching rates without
    /// `allow_dynamic_sample_rate`).
    pub fn set_rate(&mut self, sample_rate_in: u32, sample_rate_out: u32) -> Result<()> {
        let resampler = self
            .resampler
            .as_mut()
            .ok_or(RsnError::InvalidOperation)?;
        resampler.set_rate(sample_rate_in, sample_rate_out)?;
        self.sample_rate_in = sample_rate_in;
        self.sample_rate_out = sample_rate_out;
        Ok(())
    }

    /// Change the conversion ratio `rate_in / rate_out` directly.
    pub fn set_rate_ratio(&mut self, ratio: f32) -> Result<()> {
        let resampler = self
            .resampler
            .as_mut()
            .ok_or(RsnError::InvalidOperation)?;
        resampler.set_rate_ratio(ratio)
    }

    /// Input frames needed to produce `output_frame_count` frames.
    pub fn required_input_frame_count(&self, output_frame_count: u64) -> u64 {
        match &self.resampler {
            Some(resampler) => resampler.required_input_frame_count(output_frame_count),
            None => output_frame_count,
        }
    }

    /// Output frames produced from `input_frame_count` frames.
    pub fn expected_output_frame_count(&self, input_frame_count: u64) -> u64 {
        match &self.resampler {
            Some(resampler) => resampler.expected_output_frame_count(input_frame_count),
            None => input_frame_count,
        }
    }

    /// Convert frames. On input the counts hold the frames available
    /// and requested; on return they hold the actuals.
    pub fn process(
        &mut self,
        input: &[u8],
        frame_count_in: &mut u64,
        output: &mut [u8],
        frame_count_out: &mut u64,
    ) -> Result<()> {
        let max_in = *frame_count_in as usize;
        let max_out = *frame_count_out as usize;

        if input.len() < max_in * self.format_in.bytes_per_frame(self.channels_in)
            || output.len() < max_out * self.format_out.bytes_per_frame(self.channels_out)
        {
            return Err(RsnError::InvalidArgs);
        }

        if self.is_passthrough {
            let frames = max_in.min(max_out);
            copy_pcm_frames(output, input, frames, self.format_out, self.channels_out)?;
            *frame_count_in = frames as u64;
            *frame_count_out = frames as u64;
            return Ok(());
        }

        let working = self.working_format;

        // Stage 1: input format -> working format.
        let staged_in: &[u8] = if self.format_in == working {
            &input[..max_in * working.bytes_per_frame(self.channels_in)]
        } else {
            let bytes = max_in * working.bytes_per_frame(self.channels_in);
            self.scratch_in.resize(bytes, 0);
            convert_pcm_frames_format(
                &mut self.scratch_in,
                working,
                input,
                self.format_in,
                max_in,
                self.channels_in,
                &mut self.dither,
            )?;
            &self.scratch_in
        };

        // Stage 2: channel routing before the resampler when the
        // channel count shrinks.
        let (pre_resample, mid_channels): (&[u8], usize) = match (&self.router, self.route_before_resample) {
            (Some(router), true) => {
                let bytes = max_in * working.bytes_per_frame(self.channels_out);
                self.scratch_route.resize(bytes, 0);
                router.process_pcm_frames(&mut self.scratch_route, staged_in, working, max_in)?;
                (&self.scratch_route, self.channels_out)
            }
            _ => (staged_in, self.channels_in),
        };

        // Stage 3: resample.
        let mut consumed = max_in as u64;
        let mut produced;
        let resampled: &[u8] = match &mut self.resampler {
            Some(resampler) => {
                produced = max_out as u64;
                let bytes = max_out * working.bytes_per_frame(mid_channels);
                self.scratch_resample.resize(bytes, 0);
                resampler.process(
                    pre_resample,
                    &mut consumed,
                    &mut self.scratch_resample,
                    &mut produced,
                )?;
                &self.scratch_resample[..produced as usize * working.bytes_per_frame(mid_channels)]
            }
            None => {
                let frames = max_in.min(max_out);
                consumed = frames as u64;
                produced = frames as u64;
                &pre_resample[..frames * working.bytes_per_frame(mid_channels)]
            }
        };

        // Stage 4: channel routing after the resampler when the
        // channel count grows.
        let routed: &[u8] = match (&self.router, self.route_before_resample) {
            (Some(router), false) => {
                let bytes = produced as usize * working.bytes_per_frame(self.channels_out);
                self.scratch_post.resize(bytes, 0);
                router.process_pcm_frames(
                    &mut self.scratch_post,
                    resampled,
                    working,
                    produced as usize,
                )?;
                &self.scratch_post
            }
            _ => resampled,
        };

        // Stage 5: working format -> output format.
        if self.format_out == working {
            let bytes = produced as usize * working.bytes_per_frame(self.channels_out);
            output[..bytes].copy_from_slice(&routed[..bytes]);
        } else {
            convert_pcm_frames_format(
                output,
                self.format_out,
                routed,
                working,
                produced as usize,
                self.channels_out,
                &mut self.dither,
            )?;
        }

        *frame_count_in = consumed;
        *frame_count_out = produced;
        Ok(())
    }
}

/// One-shot format and channel conversion, no resampling.
///
/// Channel routing runs in the f32 working domain with the standard
/// maps for both channel counts and the default mix mode; format
/// conversion wraps it on either side as needed.
pub fn convert_frames_format_and_channels(
    dst: &mut [u8],
    format_out: Format,
    channels_out: usize,
    src: &[u8],
    format_in: Format,
    channels_in: usize,
    frame_count: usize,
    dither: &mut Dither,
) -> Result<()> {
    if channels_out == channels_in {
        if format_out == format_in {
            return copy_pcm_frames(dst, src, frame_count, format_out, channels_out);
        }
        return convert_pcm_frames_format(
            dst,
            format_out,
            src,
            format_in,
            frame_count,
            channels_in,
            dither,
        );
    }

    let router = ChannelRouter::new(&ChannelRouterConfig {
        channels_in,
        channels_out,
        channel_map_in: ChannelMap::default_for(channels_in)?,
        channel_map_out: ChannelMap::default_for(channels_out)?,
        mix_mode: MixMode::default(),
        weights: None,
    })?;

    let mut staged: Vec<u8> = Vec::new();
    let working_in: &[u8] = if format_in == Format::F32 {
        src
    } else {
        staged.resize(frame_count * Format::F32.bytes_per_frame(channels_in), 0);
        convert_pcm_frames_format(
            &mut staged,
            Format::F32,
            src,
            format_in,
            frame_count,
            channels_in,
            dither,
        )?;
        &staged
    };

    if format_out == Format::F32 {
        router.process_pcm_frames(dst, working_in, Format::F32, frame_count)
    } else {
        let mut routed = vec![0u8; frame_count * Format::F32.bytes_per_frame(channels_out)];
        router.process_pcm_frames(&mut routed, working_in, Format::F32, frame_count)?;
        convert_pcm_frames_format(
            dst,
            format_out,
            &routed,
            Format::F32,
            frame_count,
            channels_out,
            dither,
        )
    }
}
