//! # RSN DSP
//!
//! The data pipeline of the rsn_audio workspace: sample-format
//! conversion kernels, channel routing with mix-matrix synthesis,
//! linear resampling, the composed data converter, the data-source
//! interface with waveform and noise generators, effects, and the
//! accumulation-buffer mixer.

pub mod biquad;
pub mod channel;
pub mod converter;
pub mod effect;
pub mod format;
pub mod mixer;
pub mod noise;
pub mod resampler;
pub mod source;
pub mod waveform;

pub use biquad::{Biquad, BiquadCoefficients, LowPassFilter, MAX_FILTER_ORDER};
pub use channel::{Channel, ChannelMap, ChannelRouter, ChannelRouterConfig, MixMode};
pub use converter::{convert_frames_format_and_channels, Converter, ConverterConfig};
pub use effect::{Effect, EffectChain, Panner};
pub use format::{Dither, DitherMode, Format, MAX_CHANNELS};
pub use mixer::{AccumulationBuffer, Mixer, MixerConfig};
pub use noise::{Noise, NoiseConfig, NoiseType};
pub use resampler::{LinearResampler, ResamplerConfig, DEFAULT_LPF_ORDER};
pub use source::{read_pcm_frames_with_loop, DataFormat, DataSource, PcmBuffer, RingBufferSource};
pub use waveform::{Waveform, WaveformConfig, WaveformType};
