//! WAV reading via wavers and writing via hound.

use std::path::Path;

use rsn_core::RsnError;
use rsn_dsp::format::Format;
use rsn_dsp::source::{DataFormat, DataSource, PcmBuffer};

/// Result type alias for WAV file operations.
pub type Result<T> = std::result::Result<T, WavError>;

/// Errors that can occur reading or writing WAV files.
#[derive(Debug, thiserror::Error)]
pub enum WavError {
    /// The file is missing, truncated, or not a WAV container.
    #[error("invalid WAV file: {0}")]
    InvalidWav(String),
    /// The requested sample format cannot be stored in a WAV file.
    #[error("unsupported data format")]
    UnsupportedFormat,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An engine-level error surfaced during file I/O.
    #[error(transparent)]
    Engine(#[from] RsnError),
}

/// A WAV file loaded into memory and exposed as a data source.
///
/// Decoding goes through f32, so the source always reports `F32`
/// regardless of the on-disk bit depth. Seekable and finite.
pub struct WavSource {
    buffer: PcmBuffer,
}

impl WavSource {
    /// Load a WAV file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WavSource> {
        let mut wav: wavers::Wav<f32> = wavers::Wav::from_path(path.as_ref())
            .map_err(|e| WavError::InvalidWav(e.to_string()))?;

        let sample_rate = wav.sample_rate() as u32;
        let channels = wav.n_channels() as usize;

        let samples = wav
            .read()
            .map_err(|e| WavError::InvalidWav(e.to_string()))?;

        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for sample in samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let data_format = DataFormat::new(Format::F32, channels, sample_rate)?;
        Ok(WavSource {
            buffer: PcmBuffer::new(data_format, bytes)?,
        })
    }

    /// Total length in frames.
    pub fn frame_count(&self) -> u64 {
        self.buffer.frame_count()
    }
}

impl DataSource for WavSource {
    fn read_pcm_frames(&mut self, dst: &mut [u8], frame_count: u64) -> rsn_core::Result<u64> {
        self.buffer.read_pcm_frames(dst, frame_count)
    }

    fn seek_to_pcm_frame(&mut self, frame: u64) -> rsn_core::Result<()> {
        self.buffer.seek_to_pcm_frame(frame)
    }

    fn map(&mut self, frame_count: u64) -> rsn_core::Result<&[u8]> {
        self.buffer.map(frame_count)
    }

    fn unmap(&mut self, frame_count: u64) -> rsn_core::Result<()> {
        self.buffer.unmap(frame_count)
    }

    fn data_format(&self) -> rsn_core::Result<DataFormat> {
        self.buffer.data_format()
    }

    fn cursor(&self) -> rsn_core::Result<u64> {
        self.buffer.cursor()
    }

    fn length(&self) -> rsn_core::Result<u64> {
        self.buffer.length()
    }
}

/// Writes interleaved PCM frames to a WAV file.
///
/// Integer formats are stored as PCM, `F32` as IEEE float. `S24` is
/// widened to the container's 24-bit integer samples.
pub struct WavSink {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
    data_format: DataFormat,
    frames_written: u64,
}

impl WavSink {
    /// Create (or overwrite) a WAV file for the given frame format.
    pub fn create<P: AsRef<Path>>(path: P, data_format: DataFormat) -> Result<WavSink> {
        data_format.validate()?;

        let spec = match data_format.format {
            Format::U8 => hound::WavSpec {
                channels: data_format.channels as u16,
                sample_rate: data_format.sample_rate,
                bits_per_sample: 8,
                sample_format: hound::SampleFormat::Int,
            },
            Format::S16 => hound::WavSpec {
                channels: data_format.channels as u16,
                sample_rate: data_format.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            Format::S24 => hound::WavSpec {
                channels: data_format.channels as u16,
                sample_rate: data_format.sample_rate,
                bits_per_sample: 24,
                sample_format: hound::SampleFormat::Int,
            },
            Format::S32 => hound::WavSpec {
                channels: data_format.channels as u16,
                sample_rate: data_format.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Int,
            },
            Format::F32 => hound::WavSpec {
                channels: data_format.channels as u16,
                sample_rate: data_format.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
            Format::Unknown => return Err(WavError::UnsupportedFormat),
        };

        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| WavError::InvalidWav(e.to_string()))?;

        Ok(WavSink {
            writer: Some(writer),
            data_format,
            frames_written: 0,
        })
    }

    /// The frame format this sink accepts.
    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append interleaved frames in the sink's format.
    pub fn write_pcm_frames(&mut self, frames: &[u8], frame_count: u64) -> Result<u64> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(WavError::Engine(RsnError::InvalidOperation))?;

        let bpf = self.data_format.bytes_per_frame();
        if frames.len() < frame_count as usize * bpf {
            return Err(WavError::Engine(RsnError::InvalidArgs));
        }

        let sample_count = frame_count as usize * self.data_format.channels;
        let result = match self.data_format.format {
            Format::U8 => frames
                .iter()
                .take(sample_count)
                .try_for_each(|s| writer.write_sample(*s as i32 - 128)),
            Format::S16 => frames
                .chunks_exact(2)
                .take(sample_count)
                .try_for_each(|s| writer.write_sample(i16::from_le_bytes([s[0], s[1]]))),
            Format::S24 => frames.chunks_exact(3).take(sample_count).try_for_each(|s| {
                let value = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                writer.write_sample(value)
            }),
            Format::S32 => frames.chunks_exact(4).take(sample_count).try_for_each(|s| {
                writer.write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
            }),
            Format::F32 => frames.chunks_exact(4).take(sample_count).try_for_each(|s| {
                writer.write_sample(f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
            }),
            Format::Unknown => return Err(WavError::UnsupportedFormat),
        };
        result.map_err(|e| WavError::InvalidWav(e.to_string()))?;

        self.frames_written += frame_count;
        Ok(frame_count)
    }

    /// Flush and close the file. Called automatically on drop, but
    /// calling it explicitly surfaces errors.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| WavError::InvalidWav(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.finalize();
        }
    }
}
