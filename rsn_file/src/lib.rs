//! # RSN File
//!
//! WAV file I/O for the rsn_audio workspace. [`WavSource`] loads a WAV
//! file and exposes it as a seekable [`DataSource`](rsn_dsp::DataSource);
//! [`WavSink`] writes interleaved PCM frames to a standard RIFF
//! container with PCM or IEEE-float sample formats.

pub mod wav;

pub use wav::{Result, WavError, WavSink, WavSource};
