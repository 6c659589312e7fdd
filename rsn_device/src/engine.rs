//! The fixed-size callback engines.
//!
//! Whatever chunk sizes a backend produces or consumes, the user's
//! data callback always sees exactly one period of frames per call.
//! The repacking goes through an SPSC PCM ring buffer: for playback
//! the engine drains the ring into the backend's buffer and, whenever
//! the ring runs dry, resets it and asks the callback for exactly one
//! period; for capture the engine converts and accumulates backend
//! chunks and hands the callback whole periods as they complete. The
//! reset is safe because the ring is always drained first and both
//! ends live on the same (backend or worker) thread.
//!
//! Duplex splits the machinery: the capture side feeds a second ring
//! with user-format frames, and the playback side pairs one period of
//! that ring with every callback so input and output frame counts
//! always match.

use std::sync::Arc;

use rsn_core::ring::{pcm_ring_buffer, PcmRingReader, PcmRingWriter};
use rsn_core::Result;
use rsn_dsp::converter::{Converter, ConverterConfig};
use rsn_dsp::format::{silence_pcm_frames, Format};
use rsn_dsp::source::DataFormat;

use crate::backend::Notification;
use crate::device::{DeviceShared, DeviceState};

/// The buffers handed to one invocation of the data callback. Output
/// is present for playback and duplex, input for capture, loopback,
/// and duplex; both carry exactly `frame_count` frames.
pub struct DeviceIo<'a> {
    pub output: Option<&'a mut [u8]>,
    pub input: Option<&'a [u8]>,
    pub frame_count: u32,
}

/// The real-time data callback.
pub type DataCallback = Box<dyn FnMut(DeviceIo<'_>) + Send + 'static>;

/// The notification callback. May fire from any backend thread.
pub type NotificationCallback = Box<dyn Fn(Notification) + Send + Sync + 'static>;

fn mark_started(shared: &DeviceShared) {
    if shared.state() == DeviceState::Starting
        && shared.compare_exchange_state(DeviceState::Starting, DeviceState::Started)
    {
        shared.started_event.signal();
        shared.notify(Notification::Started);
    }
}

/// Clamp f32 frames stored as raw bytes to `[-1.0, +1.0]`.
fn clip_f32_bytes(bytes: &mut [u8]) {
    for chunk in bytes.chunks_exact_mut(4) {
        let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&v.clamp(-1.0, 1.0).to_le_bytes());
    }
}

/// Renders user audio into backend buffers of arbitrary size.
pub struct PlaybackEngine {
    shared: Arc<DeviceShared>,
    callback: DataCallback,
    converter: Converter,
    ring_writer: PcmRingWriter,
    ring_reader: PcmRingReader,
    user_format: DataFormat,
    native_format: DataFormat,
    period_frames: u32,
    user_buf: Vec<u8>,
    duplex_rx: Option<PcmRingReader>,
    duplex_format: Option<DataFormat>,
    duplex_in_buf: Vec<u8>,
    pre_zero_output: bool,
    clip_output: bool,
}

impl PlaybackEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        callback: DataCallback,
        user_format: DataFormat,
        native_format: DataFormat,
        period_frames: u32,
        duplex: Option<(PcmRingReader, DataFormat)>,
        pre_zero_output: bool,
        clip_output: bool,
    ) -> Result<Self> {
        let converter = Converter::new(&ConverterConfig::new(
            user_format.format,
            native_format.format,
            user_format.channels,
            native_format.channels,
            user_format.sample_rate,
            native_format.sample_rate,
        )?)?;

        let ring_frames =
            (converter.expected_output_frame_count(period_frames as u64) as usize + 8) * 2;
        let (ring_writer, ring_reader) =
            pcm_ring_buffer(native_format.bytes_per_frame(), ring_frames)?;

        let (duplex_rx, duplex_format) = match duplex {
            Some((reader, format)) => (Some(reader), Some(format)),
            None => (None, None),
        };
        let duplex_in_buf = match &duplex_format {
            Some(format) => vec![0u8; period_frames as usize * format.bytes_per_frame()],
            None => Vec::new(),
        };

        Ok(Self {
            shared,
            callback,
            converter,
            ring_writer,
            ring_reader,
            user_format,
            native_format,
            period_frames,
            user_buf: vec![0u8; period_frames as usize * user_format.bytes_per_frame()],
            duplex_rx,
            duplex_format,
            duplex_in_buf,
            pre_zero_output,
            clip_output,
        })
    }

    /// The period every callback invocation sees, in user frames.
    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Fill a backend buffer of any size with rendered audio in the
    /// native format. Produces silence while the device is not
    /// running.
    pub fn render(&mut self, native_out: &mut [u8]) {
        let bpf = self.native_format.bytes_per_frame();
        let total_frames = native_out.len() / bpf;

        match self.shared.state() {
            DeviceState::Starting | DeviceState::Started => {}
            _ => {
                silence_pcm_frames(
                    native_out,
                    total_frames,
                    self.native_format.format,
                    self.native_format.channels,
                );
                return;
            }
        }

        let mut filled = 0usize;
        while filled < total_frames {
            let span = self.ring_reader.acquire(total_frames - filled);
            if !span.is_empty() {
                let frames = span.len() / bpf;
                native_out[filled * bpf..filled * bpf + span.len()].copy_from_slice(span);
                let _ = self.ring_reader.commit(frames);
                filled += frames;
                continue;
            }

            if !self.refill_one_period() {
                tracing::trace!("playback engine starved, padding with silence");
                silence_pcm_frames(
                    &mut native_out[filled * bpf..],
                    total_frames - filled,
                    self.native_format.format,
                    self.native_format.channels,
                );
                break;
            }
        }
    }

    /// Run the user callback for exactly one period and convert the
    /// result into the ring. Returns whether any native frames were
    /// produced.
    fn refill_one_period(&mut self) -> bool {
        let period = self.period_frames as usize;

        // Duplex input: exactly one period of captured user-format
        // frames, zero-padded when the capture side is behind.
        let input: Option<&[u8]> = match (&mut self.duplex_rx, &self.duplex_format) {
            (Some(rx), Some(format)) => {
                let bpf = format.bytes_per_frame();
                silence_pcm_frames(&mut self.duplex_in_buf, period, format.format, format.channels);
                let mut got = 0usize;
                while got < period {
                    let span = rx.acquire(period - got);
                    if span.is_empty() {
                        break;
                    }
                    let frames = span.len() / bpf;
                    self.duplex_in_buf[got * bpf..got * bpf + span.len()].copy_from_slice(span);
                    let _ = rx.commit(frames);
                    got += frames;
                }
                Some(&self.duplex_in_buf[..])
            }
            _ => None,
        };

        if self.pre_zero_output {
            silence_pcm_frames(
                &mut self.user_buf,
                period,
                self.user_format.format,
                self.user_format.channels,
            );
        }

        (self.callback)(DeviceIo {
            output: Some(&mut self.user_buf),
            input,
            frame_count: self.period_frames,
        });

        if self.clip_output && self.user_format.format == Format::F32 {
            clip_f32_bytes(&mut self.user_buf);
        }

        mark_started(&self.shared);

        // The ring is known-empty here; reset so the free span is
        // contiguous, then convert the period in.
        self.ring_writer.reset();

        let user_bpf = self.user_format.bytes_per_frame();
        let mut consumed = 0u64;
        let mut produced_total = 0u64;
        loop {
            let span = self.ring_writer.acquire(self.ring_writer.capacity_in_frames());
            if span.is_empty() {
                break;
            }
            let mut in_frames = period as u64 - consumed;
            let mut out_frames = (span.len() / self.native_format.bytes_per_frame()) as u64;
            if self
                .converter
                .process(
                    &self.user_buf[consumed as usize * user_bpf..],
                    &mut in_frames,
                    span,
                    &mut out_frames,
                )
                .is_err()
            {
                break;
            }
            let _ = self.ring_writer.commit(out_frames as usize);
            consumed += in_frames;
            produced_total += out_frames;
            if consumed >= period as u64 || (in_frames == 0 && out_frames == 0) {
                break;
            }
        }
        produced_total > 0
    }
}

/// Accumulates backend capture chunks and delivers whole periods.
pub struct CaptureEngine {
    shared: Arc<DeviceShared>,
    /// Present for capture and loopback devices; duplex devices
    /// deliver input through the playback engine instead.
    callback: Option<DataCallback>,
    converter: Converter,
    ring_writer: PcmRingWriter,
    ring_reader: PcmRingReader,
    user_format: DataFormat,
    native_format: DataFormat,
    period_frames: u32,
    convert_buf: Vec<u8>,
    period_buf: Vec<u8>,
    duplex_tx: Option<PcmRingWriter>,
}

impl CaptureEngine {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        callback: Option<DataCallback>,
        user_format: DataFormat,
        native_format: DataFormat,
        period_frames: u32,
        duplex_tx: Option<PcmRingWriter>,
    ) -> Result<Self> {
        let converter = Converter::new(&ConverterConfig::new(
            native_format.format,
            user_format.format,
            native_format.channels,
            user_format.channels,
            native_format.sample_rate,
            user_format.sample_rate,
        )?)?;

        let user_bpf = user_format.bytes_per_frame();
        let (ring_writer, ring_reader) =
            pcm_ring_buffer(user_bpf, period_frames as usize * 4)?;

        Ok(Self {
            shared,
            callback,
            converter,
            ring_writer,
            ring_reader,
            user_format,
            native_format,
            period_frames,
            convert_buf: Vec::new(),
            period_buf: vec![0u8; period_frames as usize * user_bpf],
            duplex_tx,
        })
    }

    /// The period every callback invocation sees, in user frames.
    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Feed one backend chunk of captured native-format frames.
    pub fn capture(&mut self, native_in: &[u8]) {
        match self.shared.state() {
            DeviceState::Starting | DeviceState::Started => {}
            _ => return,
        }

        let native_frames = (native_in.len() / self.native_format.bytes_per_frame()) as u64;
        if native_frames == 0 {
            return;
        }

        // Convert the chunk into the user format.
        let expected = self.converter.expected_output_frame_count(native_frames);
        let user_bpf = self.user_format.bytes_per_frame();
        self.convert_buf.resize(expected as usize * user_bpf, 0);
        let mut in_frames = native_frames;
        let mut out_frames = expected;
        if self
            .converter
            .process(native_in, &mut in_frames, &mut self.convert_buf, &mut out_frames)
            .is_err()
        {
            return;
        }

        // Push into the period ring (or the duplex ring). A full ring
        // drops the overflow; a persistent overrun means the consumer
        // died, and the notification path reports that separately.
        let writer = self.duplex_tx.as_mut().unwrap_or(&mut self.ring_writer);
        let mut offset = 0usize;
        let mut remaining = out_frames as usize;
        while remaining > 0 {
            let span = writer.acquire(remaining);
            if span.is_empty() {
                tracing::trace!(dropped = remaining, "capture ring full, dropping frames");
                break;
            }
            let span_len = span.len();
            let frames = span_len / user_bpf;
            span.copy_from_slice(&self.convert_buf[offset..offset + span_len]);
            let _ = writer.commit(frames);
            offset += span_len;
            remaining -= frames;
        }

        // Deliver completed periods.
        if self.callback.is_some() {
            self.flush_periods();
        }
    }

    fn flush_periods(&mut self) {
        let period = self.period_frames as usize;
        let user_bpf = self.user_format.bytes_per_frame();

        while self.ring_reader.available_frames() >= period {
            let mut got = 0usize;
            while got < period {
                let span = self.ring_reader.acquire(period - got);
                if span.is_empty() {
                    break;
                }
                let frames = span.len() / user_bpf;
                self.period_buf[got * user_bpf..got * user_bpf + span.len()]
                    .copy_from_slice(span);
                let _ = self.ring_reader.commit(frames);
                got += frames;
            }
            if got < period {
                break;
            }

            if let Some(callback) = &mut self.callback {
                callback(DeviceIo {
                    output: None,
                    input: Some(&self.period_buf[..]),
                    frame_count: self.period_frames,
                });
            }
            mark_started(&self.shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    fn shared() -> Arc<DeviceShared> {
        let shared = Arc::new(DeviceShared::new(None));
        shared.set_state(DeviceState::Started);
        shared
    }

    fn stereo_f32(rate: u32) -> DataFormat {
        DataFormat::new(Format::F32, 2, rate).unwrap()
    }

    #[test]
    fn test_playback_fixed_callback_size() {
        // The backend asks for odd chunk sizes; the callback must see
        // exactly 64 frames per invocation regardless.
        let counts = Arc::new(Mutex::new(Vec::new()));
        let counts_cb = Arc::clone(&counts);
        let callback: DataCallback = Box::new(move |io| {
            counts_cb.lock().unwrap().push(io.frame_count);
        });

        let mut engine = PlaybackEngine::new(
            shared(),
            callback,
            stereo_f32(48_000),
            stereo_f32(48_000),
            64,
            None,
            true,
            true,
        )
        .unwrap();

        let mut chunk = vec![0u8; 48 * 2 * 4];
        for _ in 0..10 {
            engine.render(&mut chunk);
        }

        let counts = counts.lock().unwrap();
        assert!(!counts.is_empty());
        assert!(counts.iter().all(|c| *c == 64));
        // 480 backend frames need at least 8 periods of 64.
        assert!(counts.len() >= 8);
    }

    #[test]
    fn test_playback_payload_is_continuous_across_chunks() {
        // The callback writes a ramp; the concatenated backend chunks
        // must reproduce it without gaps or repeats.
        let counter = Arc::new(AtomicU32::new(0));
        let counter_cb = Arc::clone(&counter);
        let callback: DataCallback = Box::new(move |io| {
            let out = io.output.unwrap();
            for frame in 0..io.frame_count {
                let v = counter_cb.fetch_add(1, Ordering::Relaxed) as f32;
                let offset = frame as usize * 4;
                out[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
            }
        });

        let mono = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut engine =
            PlaybackEngine::new(shared(), callback, mono, mono, 32, None, false, false).unwrap();

        let mut received = Vec::new();
        for chunk_frames in [7usize, 33, 64, 5, 100] {
            let mut chunk = vec![0u8; chunk_frames * 4];
            engine.render(&mut chunk);
            received.extend(
                chunk
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }

        for (i, v) in received.iter().enumerate() {
            assert_eq!(*v, i as f32, "discontinuity at frame {i}");
        }
    }

    #[test]
    fn test_playback_clips_f32_output() {
        let callback: DataCallback = Box::new(move |io| {
            let out = io.output.unwrap();
            for chunk in out.chunks_exact_mut(4) {
                chunk.copy_from_slice(&4.0f32.to_le_bytes());
            }
        });

        let mono = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut engine =
            PlaybackEngine::new(shared(), callback, mono, mono, 16, None, true, true).unwrap();

        let mut chunk = vec![0u8; 16 * 4];
        engine.render(&mut chunk);
        for bytes in chunk.chunks_exact(4) {
            let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            assert_eq!(v, 1.0);
        }
    }

    #[test]
    fn test_playback_silence_when_stopped() {
        let callback: DataCallback = Box::new(move |io| {
            let out = io.output.unwrap();
            out.fill(0x55);
        });

        let shared = Arc::new(DeviceShared::new(None));
        shared.set_state(DeviceState::Stopped);

        let mono = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut engine =
            PlaybackEngine::new(shared, callback, mono, mono, 16, None, true, true).unwrap();

        let mut chunk = vec![0xFFu8; 16 * 4];
        engine.render(&mut chunk);
        assert!(chunk.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_capture_accumulates_into_whole_periods() {
        let counts = Arc::new(Mutex::new(Vec::new()));
        let counts_cb = Arc::clone(&counts);
        let callback: DataCallback = Box::new(move |io| {
            assert!(io.output.is_none());
            let input = io.input.unwrap();
            counts_cb
                .lock()
                .unwrap()
                .push((io.frame_count, input.len()));
        });

        let mono = DataFormat::new(Format::S16, 1, 48_000).unwrap();
        let mut engine =
            CaptureEngine::new(shared(), Some(callback), mono, mono, 50, None).unwrap();

        // 30-frame backend chunks: callbacks fire on period boundaries.
        let chunk = vec![0u8; 30 * 2];
        for _ in 0..5 {
            engine.capture(&chunk);
        }

        let counts = counts.lock().unwrap();
        assert_eq!(counts.len(), 3); // 150 frames -> 3 periods of 50
        assert!(counts.iter().all(|(frames, bytes)| *frames == 50 && *bytes == 100));
    }

    #[test]
    fn test_capture_format_conversion_to_user() {
        // Backend delivers s16, the user asked for f32.
        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_cb = Arc::clone(&captured);
        let callback: DataCallback = Box::new(move |io| {
            let input = io.input.unwrap();
            captured_cb.lock().unwrap().extend(
                input
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        });

        let native = DataFormat::new(Format::S16, 1, 48_000).unwrap();
        let user = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut engine =
            CaptureEngine::new(shared(), Some(callback), user, native, 4, None).unwrap();

        let chunk: Vec<u8> = [16384i16, -16384, 32767, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        engine.capture(&chunk);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 4);
        assert!((captured[0] - 0.5).abs() < 1e-4);
        assert!((captured[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_duplex_rings_pair_input_with_output() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_cb = Arc::clone(&observed);
        let callback: DataCallback = Box::new(move |io| {
            let input = io.input.expect("duplex callback must see input");
            let output = io.output.expect("duplex callback must see output");
            assert_eq!(input.len(), output.len());
            observed_cb.lock().unwrap().push(io.frame_count);
            output.copy_from_slice(input); // echo
        });

        let mono = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let (duplex_tx, duplex_rx) =
            pcm_ring_buffer(mono.bytes_per_frame(), 32 * 4).unwrap();

        let shared = shared();
        let mut capture_engine =
            CaptureEngine::new(Arc::clone(&shared), None, mono, mono, 32, Some(duplex_tx))
                .unwrap();
        let mut playback_engine = PlaybackEngine::new(
            shared,
            callback,
            mono,
            mono,
            32,
            Some((duplex_rx, mono)),
            true,
            true,
        )
        .unwrap();

        // Feed capture, then render: the echo arrives on the output.
        let ramp: Vec<u8> = (0..32).flat_map(|i| (i as f32).to_le_bytes()).collect();
        capture_engine.capture(&ramp);

        let mut out = vec![0u8; 32 * 4];
        playback_engine.render(&mut out);

        assert_eq!(observed.lock().unwrap().as_slice(), &[32]);
        let echoed: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        for (i, v) in echoed.iter().enumerate() {
            assert_eq!(*v, i as f32);
        }
    }

    #[test]
    fn test_starting_state_transitions_on_first_callback() {
        let shared = Arc::new(DeviceShared::new(None));
        shared.set_state(DeviceState::Starting);

        let callback: DataCallback = Box::new(|_io| {});
        let mono = DataFormat::new(Format::F32, 1, 48_000).unwrap();
        let mut engine = PlaybackEngine::new(
            Arc::clone(&shared),
            callback,
            mono,
            mono,
            16,
            None,
            true,
            true,
        )
        .unwrap();

        let mut chunk = vec![0u8; 16 * 4];
        engine.render(&mut chunk);
        assert_eq!(shared.state(), DeviceState::Started);
    }
}
