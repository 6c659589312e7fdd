//! The data-source interface.
//!
//! A data source is anything that produces PCM frames on demand: file
//! decoders, waveform and noise generators, in-memory buffers, and
//! ring-buffer adapters. `read` is the one mandatory capability;
//! `seek`, `map`/`unmap` and the metadata queries may fail with
//! `NotImplemented`, and callers fall back accordingly.

use rsn_core::{PcmRingReader, Result, RsnError};

use crate::channel::ChannelMap;
use crate::format::{Format, MAX_CHANNELS};

/// A complete data-format descriptor: sample format, channel count,
/// sample rate, and channel map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataFormat {
    pub format: Format,
    pub channels: usize,
    pub sample_rate: u32,
    pub channel_map: ChannelMap,
}

impl DataFormat {
    /// A descriptor with the standard channel map for the count.
    pub fn new(format: Format, channels: usize, sample_rate: u32) -> Result<Self> {
        let descriptor = Self {
            format,
            channels,
            sample_rate,
            channel_map: ChannelMap::default_for(channels)?,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the descriptor invariants: a known format, a channel
    /// count matching the map length, and a nonzero sample rate.
    pub fn validate(&self) -> Result<()> {
        if self.format == Format::Unknown
            || self.channels == 0
            || self.channels > MAX_CHANNELS
            || self.sample_rate == 0
            || self.channel_map.len() != self.channels
        {
            return Err(RsnError::InvalidArgs);
        }
        Ok(())
    }

    /// Size of one frame in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame(self.channels)
    }
}

/// A pull-based producer of PCM frames.
pub trait DataSource: Send {
    /// Read up to `frame_count` frames into `dst`, returning the
    /// number of frames actually read. A finite source that is
    /// exhausted returns `AtEnd` instead of reading zero frames; a
    /// source that is merely starved (e.g. an empty ring buffer)
    /// returns `Ok(0)`.
    fn read_pcm_frames(&mut self, dst: &mut [u8], frame_count: u64) -> Result<u64>;

    /// Seek to an absolute frame position.
    fn seek_to_pcm_frame(&mut self, _frame: u64) -> Result<()> {
        Err(RsnError::NotImplemented)
    }

    /// Borrow up to `frame_count` frames without copying. The frame
    /// count of the returned span is its length divided by the frame
    /// size. Each successful `map` must be paired with an `unmap`
    /// stating how many frames were consumed.
    fn map(&mut self, _frame_count: u64) -> Result<&[u8]> {
        Err(RsnError::NotImplemented)
    }

    /// Release a mapped span, consuming `frame_count` frames.
    fn unmap(&mut self, _frame_count: u64) -> Result<()> {
        Err(RsnError::NotImplemented)
    }

    /// The format of the frames this source produces.
    fn data_format(&self) -> Result<DataFormat> {
        Err(RsnError::NotImplemented)
    }

    /// The current read position in frames.
    fn cursor(&self) -> Result<u64> {
        Err(RsnError::NotImplemented)
    }

    /// The total length in frames, for finite sources.
    fn length(&self) -> Result<u64> {
        Err(RsnError::NotImplemented)
    }
}

/// Read with loop semantics: when a finite source reports `AtEnd`
/// mid-buffer and `looping` is set, seek back to frame 0 and keep
/// filling within the same call.
///
/// Returns the frames actually read. Without looping this is the
/// plain read, except that an immediate `AtEnd` with nothing read is
/// propagated as the error.
pub fn read_pcm_frames_with_loop(
    source: &mut dyn DataSource,
    dst: &mut [u8],
    frame_count: u64,
    looping: bool,
) -> Result<u64> {
    let bpf = source.data_format()?.bytes_per_frame();
    let mut total: u64 = 0;
    let mut just_looped = false;

    while total < frame_count {
        let offset = total as usize * bpf;
        let remaining = frame_count - total;
        match source.read_pcm_frames(&mut dst[offset..], remaining) {
            // A zero read means a starved infinite source (finite
            // sources report AtEnd instead). Nothing to loop.
            Ok(0) => break,
            Ok(read) => {
                total += read;
                just_looped = false;
            }
            Err(RsnError::AtEnd) => {
                if !looping {
                    if total == 0 {
                        return Err(RsnError::AtEnd);
                    }
                    break;
                }
                if just_looped {
                    // A zero-length source can never make progress.
                    break;
                }
                source.seek_to_pcm_frame(0)?;
                just_looped = true;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// An in-memory PCM frame buffer exposed as a seekable data source
/// with zero-copy `map` support.
pub struct PcmBuffer {
    data: Vec<u8>,
    data_format: DataFormat,
    cursor: u64,
}

impl PcmBuffer {
    /// Wrap interleaved frame data. The byte length must be a whole
    /// number of frames.
    pub fn new(data_format: DataFormat, data: Vec<u8>) -> Result<Self> {
        data_format.validate()?;
        if data.len() % data_format.bytes_per_frame() != 0 {
            return Err(RsnError::InvalidArgs);
        }
        Ok(Self {
            data,
            data_format,
            cursor: 0,
        })
    }

    /// Total length in frames.
    pub fn frame_count(&self) -> u64 {
        (self.data.len() / self.data_format.bytes_per_frame()) as u64
    }
}

impl DataSource for PcmBuffer {
    fn read_pcm_frames(&mut self, dst: &mut [u8], frame_count: u64) -> Result<u64> {
        let bpf = self.data_format.bytes_per_frame();
        let remaining = self.frame_count() - self.cursor;
        if remaining == 0 {
            return Err(RsnError::AtEnd);
        }

        let frames = frame_count
            .min(remaining)
            .min((dst.len() / bpf) as u64);
        let start = self.cursor as usize * bpf;
        let bytes = frames as usize * bpf;
        dst[..bytes].copy_from_slice(&self.data[start..start + bytes]);
        self.cursor += frames;
        Ok(frames)
    }

    fn seek_to_pcm_frame(&mut self, frame: u64) -> Result<()> {
        if frame > self.frame_count() {
            return Err(RsnError::InvalidArgs);
        }
        self.cursor = frame;
        Ok(())
    }

    fn map(&mut self, frame_count: u64) -> Result<&[u8]> {
        let bpf = self.data_format.bytes_per_frame();
        let remaining = self.frame_count() - self.cursor;
        if remaining == 0 {
            return Err(RsnError::AtEnd);
        }
        let frames = frame_count.min(remaining);
        let start = self.cursor as usize * bpf;
        Ok(&self.data[start..start + frames as usize * bpf])
    }

    fn unmap(&mut self, frame_count: u64) -> Result<()> {
        let remaining = self.frame_count() - self.cursor;
        if frame_count > remaining {
            return Err(RsnError::InvalidArgs);
        }
        self.cursor += frame_count;
        Ok(())
    }

    fn data_format(&self) -> Result<DataFormat> {
        Ok(self.data_format)
    }

    fn cursor(&self) -> Result<u64> {
        Ok(self.cursor)
    }

    fn length(&self) -> Result<u64> {
        Ok(self.frame_count())
    }
}

/// The consumer side of a PCM ring buffer exposed as a data source.
/// `map` returns the readable span, so mixing from a ring buffer is
/// zero-copy.
pub struct RingBufferSource {
    reader: PcmRingReader,
    data_format: DataFormat,
}

impl RingBufferSource {
    /// Wrap a ring-buffer reader. The descriptor's frame size must
    /// match the ring's.
    pub fn new(reader: PcmRingReader, data_format: DataFormat) -> Result<Self> {
        data_format.validate()?;
        if reader.bytes_per_frame() != data_format.bytes_per_frame() {
            return Err(RsnError::InvalidArgs);
        }
        Ok(Self {
            reader,
            data_format,
        })
    }
}

impl DataSource for RingBufferSource {
    fn read_pcm_frames(&mut self, dst: &mut [u8], frame_count: u64) -> Result<u64> {
        let bpf = self.data_format.bytes_per_frame();
        let mut total = 0u64;

        // The readable span may wrap; drain in up to two pieces.
        while total < frame_count {
            let want = (frame_count - total) as usize;
            let span = self.reader.acquire(want);
            if span.is_empty() {
                break;
            }
            let frames = span.len() / bpf;
            let offset = total as usize * bpf;
            if dst.len() < offset + span.len() {
                break;
            }
            dst[offset..offset + span.len()].copy_from_slice(span);
            self.reader.commit(frames)?;
            total += frames as u64;
        }
        Ok(total)
    }

    fn seek_to_pcm_frame(&mut self, _frame: u64) -> Result<()> {
        // A ring has no absolute positions; a seek discards pending
        // data instead.
        let pending = self.reader.available_frames();
        self.reader.seek(pending)
    }

    fn map(&mut self, frame_count: u64) -> Result<&[u8]> {
        Ok(self.reader.acquire(frame_count as usize))
    }

    fn unmap(&mut self, frame_count: u64) -> Result<()> {
        self.reader.commit(frame_count as usize)
    }

    fn data_format(&self) -> Result<DataFormat> {
        Ok(self.data_format)
    }
}

#[cfg(test)]
mod tests {
    use rsn_core::pcm_ring_buffer;

    use super::*;

    fn mono_s16(samples: &[i16]) -> PcmBuffer {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        PcmBuffer::new(DataFormat::new(Format::S16, 1, 8_000).unwrap(), data).unwrap()
    }

    #[test]
    fn test_pcm_buffer_read_and_cursor() {
        let mut buffer = mono_s16(&[1, 2, 3, 4, 5]);
        let mut dst = [0u8; 6];
        assert_eq!(buffer.read_pcm_frames(&mut dst, 3).unwrap(), 3);
        assert_eq!(buffer.cursor().unwrap(), 3);
        assert_eq!(buffer.length().unwrap(), 5);
    }

    #[test]
    fn test_pcm_buffer_reports_at_end() {
        let mut buffer = mono_s16(&[1, 2]);
        let mut dst = [0u8; 8];
        assert_eq!(buffer.read_pcm_frames(&mut dst, 4).unwrap(), 2);
        assert_eq!(
            buffer.read_pcm_frames(&mut dst, 1),
            Err(RsnError::AtEnd)
        );
    }

    #[test]
    fn test_pcm_buffer_seek_and_replay() {
        let mut buffer = mono_s16(&[10, 20, 30]);
        let mut dst = [0u8; 6];
        buffer.read_pcm_frames(&mut dst, 3).unwrap();
        buffer.seek_to_pcm_frame(0).unwrap();

        let mut again = [0u8; 6];
        buffer.read_pcm_frames(&mut again, 3).unwrap();
        assert_eq!(dst, again);

        assert!(buffer.seek_to_pcm_frame(4).is_err());
    }

    #[test]
    fn test_pcm_buffer_map_unmap() {
        let mut buffer = mono_s16(&[7, 8, 9]);
        let span = buffer.map(2).unwrap();
        assert_eq!(span.len(), 4);
        assert_eq!(i16::from_le_bytes([span[0], span[1]]), 7);
        buffer.unmap(2).unwrap();
        assert_eq!(buffer.cursor().unwrap(), 2);
    }

    #[test]
    fn test_loop_read_wraps_within_one_call() {
        // A 3-frame source asked for 8 frames with looping fills the
        // whole destination: [1 2 3 1 2 3 1 2].
        let mut buffer = mono_s16(&[1, 2, 3]);
        let mut dst = [0u8; 16];
        let read = read_pcm_frames_with_loop(&mut buffer, &mut dst, 8, true).unwrap();
        assert_eq!(read, 8);

        let samples: Vec<i16> = dst
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![1, 2, 3, 1, 2, 3, 1, 2]);
    }

    #[test]
    fn test_loop_read_without_looping_stops_at_end() {
        let mut buffer = mono_s16(&[1, 2, 3]);
        let mut dst = [0u8; 16];
        let read = read_pcm_frames_with_loop(&mut buffer, &mut dst, 8, false).unwrap();
        assert_eq!(read, 3);

        // Exhausted and not looping: the error surfaces.
        assert_eq!(
            read_pcm_frames_with_loop(&mut buffer, &mut dst, 1, false),
            Err(RsnError::AtEnd)
        );
    }

    #[test]
    fn test_data_format_invariants() {
        assert!(DataFormat::new(Format::Unknown, 2, 48_000).is_err());
        assert!(DataFormat::new(Format::F32, 0, 48_000).is_err());
        assert!(DataFormat::new(Format::F32, 2, 0).is_err());
        assert!(DataFormat::new(Format::F32, MAX_CHANNELS + 1, 48_000).is_err());
    }

    #[test]
    fn test_pcm_buffer_rejects_partial_frames() {
        let format = DataFormat::new(Format::S16, 2, 48_000).unwrap();
        assert!(PcmBuffer::new(format, vec![0u8; 5]).is_err());
    }

    #[test]
    fn test_ring_buffer_source_reads_what_was_written() {
        let (mut writer, reader) = pcm_ring_buffer(2, 8).unwrap();
        let format = DataFormat::new(Format::S16, 1, 48_000).unwrap();
        let mut source = RingBufferSource::new(reader, format).unwrap();

        let span = writer.acquire(3);
        span.copy_from_slice(&[1, 0, 2, 0, 3, 0]);
        writer.commit(3).unwrap();

        let mut dst = [0u8; 8];
        assert_eq!(source.read_pcm_frames(&mut dst, 4).unwrap(), 3);
        assert_eq!(&dst[..6], &[1, 0, 2, 0, 3, 0]);

        // Starved, not ended.
        assert_eq!(source.read_pcm_frames(&mut dst, 1).unwrap(), 0);
    }

    #[test]
    fn test_ring_buffer_source_map_returns_readable_span() {
        let (mut writer, reader) = pcm_ring_buffer(2, 8).unwrap();
        let format = DataFormat::new(Format::S16, 1, 48_000).unwrap();
        let mut source = RingBufferSource::new(reader, format).unwrap();

        writer.acquire(2).copy_from_slice(&[9, 0, 8, 0]);
        writer.commit(2).unwrap();

        let span = source.map(4).unwrap();
        assert_eq!(span.len(), 4);
        source.unmap(2).unwrap();
        assert_eq!(source.map(4).unwrap().len(), 0);
    }

    #[test]
    fn test_ring_buffer_source_frame_size_mismatch() {
        let (_writer, reader) = pcm_ring_buffer(3, 8).unwrap();
        let format = DataFormat::new(Format::S16, 1, 48_000).unwrap();
        assert!(RingBufferSource::new(reader, format).is_err());
    }
}
