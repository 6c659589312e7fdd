//! Lock-free single-producer single-consumer ring buffers.
//!
//! The byte ring buffer is the transport between backend audio threads
//! and the rest of the engine. Each cursor is a single 32-bit word: the
//! most significant bit is a loop flag and the lower 31 bits are the
//! offset in bytes. The loop flag disambiguates the full and empty
//! states when both cursors land on the same offset.
//!
//! Exactly one thread may write and exactly one thread may read. The
//! producer is the only side allowed to move the write cursor and the
//! consumer is the only side allowed to move the read cursor.

use core::cell::UnsafeCell;

#[cfg(not(loom))]
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::error::{Result, RsnError};

/// Alignment of the backing allocation and of subbuffer strides.
pub const RING_ALIGNMENT: usize = 64;

/// Largest allowed subbuffer size in bytes. The most significant bit of
/// each cursor word is reserved for the loop flag.
pub const MAX_SUBBUFFER_SIZE: usize = 0x7FFF_FFFF - (RING_ALIGNMENT - 1);

const LOOP_FLAG: u32 = 0x8000_0000;
const OFFSET_MASK: u32 = 0x7FFF_FFFF;

#[inline]
fn decode(encoded: u32) -> (u32, u32) {
    (encoded & OFFSET_MASK, encoded & LOOP_FLAG)
}

#[inline]
fn encode(offset: u32, loop_flag: u32) -> u32 {
    loop_flag | offset
}

/// Cache-line padded wrapper to prevent false sharing between the
/// producer's and consumer's cursor words.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> core::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Shared state of a ring buffer.
///
/// The buffer holds `subbuffer_count` lanes of `subbuffer_size` bytes,
/// laid out `subbuffer_stride` bytes apart. The cursors wrap at
/// `subbuffer_size` and are shared by all lanes, which is what a
/// deinterleaved stream needs: the same positions across every channel.
/// The `count == 1` case is a plain byte ring.
struct RingState {
    buffer: Box<[UnsafeCell<u8>]>,
    subbuffer_size: u32,
    subbuffer_count: u32,
    subbuffer_stride: u32,
    read_offset: CachePadded<AtomicU32>,
    write_offset: CachePadded<AtomicU32>,
}

// SAFETY: all cross-thread access to `buffer` is partitioned by the
// cursor words. The producer only touches bytes between the write and
// read cursors, the consumer only bytes between the read and write
// cursors, and cursor updates are Release stores paired with Acquire
// loads on the opposite side.
unsafe impl Send for RingState {}
unsafe impl Sync for RingState {}

impl RingState {
    fn new(subbuffer_size: usize, subbuffer_count: usize) -> Result<Self> {
        if subbuffer_size == 0 || subbuffer_count == 0 {
            return Err(RsnError::InvalidArgs);
        }
        if subbuffer_size > MAX_SUBBUFFER_SIZE {
            return Err(RsnError::InvalidArgs);
        }

        let stride = (subbuffer_size + (RING_ALIGNMENT - 1)) & !(RING_ALIGNMENT - 1);
        let total = stride
            .checked_mul(subbuffer_count)
            .ok_or(RsnError::OutOfMemory)?;

        let buffer: Box<[UnsafeCell<u8>]> = (0..total).map(|_| UnsafeCell::new(0)).collect();

        Ok(Self {
            buffer,
            subbuffer_size: subbuffer_size as u32,
            subbuffer_count: subbuffer_count as u32,
            subbuffer_stride: stride as u32,
            read_offset: CachePadded(AtomicU32::new(0)),
            write_offset: CachePadded(AtomicU32::new(0)),
        })
    }

    /// Distance from the read cursor to the write cursor in bytes.
    fn pointer_distance(&self) -> usize {
        let (r_off, r_flag) = decode(self.read_offset.load(Ordering::Acquire));
        let (w_off, w_flag) = decode(self.write_offset.load(Ordering::Acquire));

        if r_flag == w_flag {
            (w_off - r_off) as usize
        } else {
            (w_off + (self.subbuffer_size - r_off)) as usize
        }
    }

    fn reset(&self) {
        self.read_offset.store(0, Ordering::SeqCst);
        self.write_offset.store(0, Ordering::SeqCst);
    }

    /// A mutable view of `[offset, offset + len)` within the given lane.
    ///
    /// SAFETY: the caller must own that span through the SPSC cursor
    /// protocol (producer between write and read, consumer between read
    /// and write) and must not hand out overlapping views.
    unsafe fn span_mut(&self, lane: u32, offset: u32, len: u32) -> &mut [u8] {
        debug_assert!(lane < self.subbuffer_count);
        debug_assert!(offset + len <= self.subbuffer_size);
        let start = (lane * self.subbuffer_stride + offset) as usize;
        unsafe {
            let base = self.buffer[start].get();
            core::slice::from_raw_parts_mut(base, len as usize)
        }
    }

    /// A shared view of `[offset, offset + len)` within the given lane.
    ///
    /// SAFETY: same ownership requirement as [`RingState::span_mut`].
    unsafe fn span(&self, lane: u32, offset: u32, len: u32) -> &[u8] {
        debug_assert!(lane < self.subbuffer_count);
        debug_assert!(offset + len <= self.subbuffer_size);
        let start = (lane * self.subbuffer_stride + offset) as usize;
        unsafe {
            let base = self.buffer[start].get();
            core::slice::from_raw_parts(base, len as usize)
        }
    }
}

/// Create a plain byte ring buffer with a single subbuffer.
///
/// Returns a `(RingWriter, RingReader)` pair. Each side may be moved to
/// its own thread; the pair shares the same storage.
///
/// # Examples
///
/// ```
/// use rsn_core::ring::ring_buffer;
///
/// let (mut writer, mut reader) = ring_buffer(64).unwrap();
///
/// let span = writer.acquire(3);
/// span.copy_from_slice(&[1, 2, 3]);
/// writer.commit(3).unwrap();
///
/// let span = reader.acquire(3);
/// assert_eq!(span, &[1, 2, 3]);
/// reader.commit(3).unwrap();
/// ```
pub fn ring_buffer(size_in_bytes: usize) -> Result<(RingWriter, RingReader)> {
    ring_buffer_ex(size_in_bytes, 1)
}

/// Create a ring buffer with `subbuffer_count` parallel lanes of
/// `subbuffer_size` bytes each. All lanes share the same pair of
/// cursors; `acquire`/`commit` operate on lane 0 and the equivalent
/// span in another lane is obtained with `acquired_lane`.
pub fn ring_buffer_ex(
    subbuffer_size: usize,
    subbuffer_count: usize,
) -> Result<(RingWriter, RingReader)> {
    let state = Arc::new(RingState::new(subbuffer_size, subbuffer_count)?);
    Ok((
        RingWriter {
            state: Arc::clone(&state),
            acquired: None,
        },
        RingReader {
            state,
            acquired: None,
        },
    ))
}

/// Producer side of a byte ring buffer.
///
/// `Send` but not `Clone`: only one producer may exist.
pub struct RingWriter {
    state: Arc<RingState>,
    acquired: Option<(u32, u32)>,
}

impl RingWriter {
    /// Acquire the largest writable contiguous span, up to `size_hint`
    /// bytes. The span never crosses the wrap boundary and never
    /// overtakes the read cursor; it may be empty.
    ///
    /// The returned slice stays valid until the next `commit`, `seek`
    /// or `acquire` on this writer.
    pub fn acquire(&mut self, size_hint: usize) -> &mut [u8] {
        let (r_off, r_flag) = decode(self.state.read_offset.load(Ordering::Acquire));
        let (w_off, w_flag) = decode(self.state.write_offset.load(Ordering::Relaxed));

        // Same loop iteration: free space runs to the end of the
        // buffer. Different iteration: only up to the read cursor.
        let available = if w_flag == r_flag {
            self.state.subbuffer_size - w_off
        } else {
            r_off - w_off
        };

        let len = (size_hint.min(available as usize)) as u32;
        self.acquired = Some((w_off, len));

        // SAFETY: [w_off, w_off + len) is producer-owned per the SPSC
        // cursor protocol and `len` never exceeds the free span.
        unsafe { self.state.span_mut(0, w_off, len) }
    }

    /// The span acquired by the last `acquire`, in another lane.
    ///
    /// Returns `InvalidArgs` for an out-of-range lane and
    /// `InvalidOperation` when nothing is acquired.
    pub fn acquired_lane(&mut self, lane: usize) -> Result<&mut [u8]> {
        let (off, len) = self.acquired.ok_or(RsnError::InvalidOperation)?;
        if lane >= self.state.subbuffer_count as usize {
            return Err(RsnError::InvalidArgs);
        }
        // SAFETY: same producer-owned span as `acquire`, different lane.
        Ok(unsafe { self.state.span_mut(lane as u32, off, len) })
    }

    /// Commit `size` bytes of the previously acquired span, advancing
    /// the write cursor. `size` may be less than what was acquired.
    pub fn commit(&mut self, size: usize) -> Result<()> {
        let (off, len) = self.acquired.take().ok_or(RsnError::InvalidOperation)?;
        if size > len as usize {
            return Err(RsnError::InvalidArgs);
        }

        let (w_off, w_flag) = decode(self.state.write_offset.load(Ordering::Relaxed));
        debug_assert_eq!(w_off, off);

        let mut new_off = w_off + size as u32;
        let mut new_flag = w_flag;
        if new_off == self.state.subbuffer_size {
            new_off = 0;
            new_flag ^= LOOP_FLAG;
        }

        self.state
            .write_offset
            .store(encode(new_off, new_flag), Ordering::Release);
        Ok(())
    }

    /// Advance the write cursor by `offset_in_bytes` without acquiring,
    /// clamped so it never overtakes the read cursor.
    pub fn seek(&mut self, offset_in_bytes: usize) -> Result<()> {
        if offset_in_bytes > self.state.subbuffer_size as usize {
            return Err(RsnError::InvalidArgs);
        }
        self.acquired = None;

        let (r_off, r_flag) = decode(self.state.read_offset.load(Ordering::Acquire));
        let (w_off, w_flag) = decode(self.state.write_offset.load(Ordering::Relaxed));

        let mut new_off;
        let mut new_flag = w_flag;
        if w_flag == r_flag {
            // May wrap past the end of the buffer.
            let target = w_off + offset_in_bytes as u32;
            if target >= self.state.subbuffer_size {
                new_off = target - self.state.subbuffer_size;
                new_flag ^= LOOP_FLAG;
            } else {
                new_off = target;
            }
        } else {
            // Must not pass the read cursor.
            new_off = w_off + offset_in_bytes as u32;
            if new_off > r_off {
                new_off = r_off;
            }
        }

        self.state
            .write_offset
            .store(encode(new_off, new_flag), Ordering::Release);
        Ok(())
    }

    /// Total free space in bytes, contiguous or not.
    pub fn available(&self) -> usize {
        self.state.subbuffer_size as usize - self.state.pointer_distance()
    }

    /// Distance from the read cursor to the write cursor in bytes.
    pub fn pointer_distance(&self) -> usize {
        self.state.pointer_distance()
    }

    /// Capacity of one subbuffer in bytes.
    pub fn capacity(&self) -> usize {
        self.state.subbuffer_size as usize
    }

    /// Number of parallel lanes.
    pub fn subbuffer_count(&self) -> usize {
        self.state.subbuffer_count as usize
    }

    /// Byte stride between lanes.
    pub fn subbuffer_stride(&self) -> usize {
        self.state.subbuffer_stride as usize
    }

    /// Reset both cursors to zero.
    ///
    /// Only valid while the opposite side is quiescent: the caller must
    /// guarantee the reader is not concurrently active. The async
    /// device helper relies on this when it discards stale data.
    pub fn reset(&mut self) {
        self.acquired = None;
        self.state.reset();
    }
}

/// Consumer side of a byte ring buffer.
///
/// `Send` but not `Clone`: only one consumer may exist.
pub struct RingReader {
    state: Arc<RingState>,
    acquired: Option<(u32, u32)>,
}

impl RingReader {
    /// Acquire the largest readable contiguous span, up to `size_hint`
    /// bytes. The span never crosses the wrap boundary and never
    /// passes the write cursor; it may be empty.
    pub fn acquire(&mut self, size_hint: usize) -> &[u8] {
        let (w_off, w_flag) = decode(self.state.write_offset.load(Ordering::Acquire));
        let (r_off, r_flag) = decode(self.state.read_offset.load(Ordering::Relaxed));

        // Same loop iteration: data runs up to the write cursor.
        // Different iteration: data runs to the end of the buffer.
        let available = if r_flag == w_flag {
            w_off - r_off
        } else {
            self.state.subbuffer_size - r_off
        };

        let len = (size_hint.min(available as usize)) as u32;
        self.acquired = Some((r_off, len));

        // SAFETY: [r_off, r_off + len) is consumer-owned per the SPSC
        // cursor protocol.
        unsafe { self.state.span(0, r_off, len) }
    }

    /// The span acquired by the last `acquire`, in another lane.
    pub fn acquired_lane(&mut self, lane: usize) -> Result<&[u8]> {
        let (off, len) = self.acquired.ok_or(RsnError::InvalidOperation)?;
        if lane >= self.state.subbuffer_count as usize {
            return Err(RsnError::InvalidArgs);
        }
        // SAFETY: same consumer-owned span as `acquire`, different lane.
        Ok(unsafe { self.state.span(lane as u32, off, len) })
    }

    /// Commit `size` bytes of the previously acquired span, advancing
    /// the read cursor.
    pub fn commit(&mut self, size: usize) -> Result<()> {
        let (off, len) = self.acquired.take().ok_or(RsnError::InvalidOperation)?;
        if size > len as usize {
            return Err(RsnError::InvalidArgs);
        }

        let (r_off, r_flag) = decode(self.state.read_offset.load(Ordering::Relaxed));
        debug_assert_eq!(r_off, off);

        let mut new_off = r_off + size as u32;
        let mut new_flag = r_flag;
        if new_off == self.state.subbuffer_size {
            new_off = 0;
            new_flag ^= LOOP_FLAG;
        }

        self.state
            .read_offset
            .store(encode(new_off, new_flag), Ordering::Release);
        Ok(())
    }

    /// Advance the read cursor by `offset_in_bytes` without acquiring,
    /// clamped so it never passes the write cursor.
    pub fn seek(&mut self, offset_in_bytes: usize) -> Result<()> {
        if offset_in_bytes > self.state.subbuffer_size as usize {
            return Err(RsnError::InvalidArgs);
        }
        self.acquired = None;

        let (w_off, w_flag) = decode(self.state.write_offset.load(Ordering::Acquire));
        let (r_off, r_flag) = decode(self.state.read_offset.load(Ordering::Relaxed));

        let mut new_off;
        let mut new_flag = r_flag;
        if r_flag == w_flag {
            // Must not pass the write cursor.
            new_off = r_off + offset_in_bytes as u32;
            if new_off > w_off {
                new_off = w_off;
            }
        } else {
            // May wrap past the end of the buffer.
            let target = r_off + offset_in_bytes as u32;
            if target >= self.state.subbuffer_size {
                new_off = target - self.state.subbuffer_size;
                new_flag ^= LOOP_FLAG;
            } else {
                new_off = target;
            }
        }

        self.state
            .read_offset
            .store(encode(new_off, new_flag), Ordering::Release);
        Ok(())
    }

    /// Total readable bytes, contiguous or not.
    pub fn available(&self) -> usize {
        self.state.pointer_distance()
    }

    /// Distance from the read cursor to the write cursor in bytes.
    pub fn pointer_distance(&self) -> usize {
        self.state.pointer_distance()
    }

    /// Capacity of one subbuffer in bytes.
    pub fn capacity(&self) -> usize {
        self.state.subbuffer_size as usize
    }

    /// Number of parallel lanes.
    pub fn subbuffer_count(&self) -> usize {
        self.state.subbuffer_count as usize
    }

    /// Byte stride between lanes.
    pub fn subbuffer_stride(&self) -> usize {
        self.state.subbuffer_stride as usize
    }

    /// Reset both cursors to zero. See [`RingWriter::reset`].
    pub fn reset(&mut self) {
        self.acquired = None;
        self.state.reset();
    }
}

/// Create a PCM-frame ring buffer.
///
/// A thin wrapper over the byte ring that counts in whole frames of
/// `bytes_per_frame` bytes. All acquire/commit/seek sizes are frame
/// counts, so cursors stay frame-aligned by construction.
pub fn pcm_ring_buffer(
    bytes_per_frame: usize,
    size_in_frames: usize,
) -> Result<(PcmRingWriter, PcmRingReader)> {
    if bytes_per_frame == 0 {
        return Err(RsnError::InvalidArgs);
    }
    let size_in_bytes = size_in_frames
        .checked_mul(bytes_per_frame)
        .ok_or(RsnError::OutOfMemory)?;
    let (writer, reader) = ring_buffer(size_in_bytes)?;
    Ok((
        PcmRingWriter {
            inner: writer,
            bytes_per_frame,
        },
        PcmRingReader {
            inner: reader,
            bytes_per_frame,
        },
    ))
}

/// Producer side of a PCM-frame ring buffer.
pub struct PcmRingWriter {
    inner: RingWriter,
    bytes_per_frame: usize,
}

impl PcmRingWriter {
    /// Acquire a writable span of up to `frame_hint` whole frames.
    pub fn acquire(&mut self, frame_hint: usize) -> &mut [u8] {
        let bpf = self.bytes_per_frame;
        let span = self.inner.acquire(frame_hint * bpf);
        let whole = (span.len() / bpf) * bpf;
        &mut span[..whole]
    }

    /// Commit `frames` whole frames of the previously acquired span.
    pub fn commit(&mut self, frames: usize) -> Result<()> {
        self.inner.commit(frames * self.bytes_per_frame)
    }

    /// Advance the write cursor by `frames` without acquiring.
    pub fn seek(&mut self, frames: usize) -> Result<()> {
        self.inner.seek(frames * self.bytes_per_frame)
    }

    /// Total free space in whole frames.
    pub fn available_frames(&self) -> usize {
        self.inner.available() / self.bytes_per_frame
    }

    /// Distance from the read cursor to the write cursor in frames.
    pub fn pointer_distance_in_frames(&self) -> usize {
        self.inner.pointer_distance() / self.bytes_per_frame
    }

    /// Capacity in frames.
    pub fn capacity_in_frames(&self) -> usize {
        self.inner.capacity() / self.bytes_per_frame
    }

    /// Size of one frame in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Reset both cursors to zero. See [`RingWriter::reset`].
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Consumer side of a PCM-frame ring buffer.
pub struct PcmRingReader {
    inner: RingReader,
    bytes_per_frame: usize,
}

impl PcmRingReader {
    /// Acquire a readable span of up to `frame_hint` whole frames.
    pub fn acquire(&mut self, frame_hint: usize) -> &[u8] {
        let bpf = self.bytes_per_frame;
        let span = self.inner.acquire(frame_hint * bpf);
        let whole = (span.len() / bpf) * bpf;
        &span[..whole]
    }

    /// Commit `frames` whole frames of the previously acquired span.
    pub fn commit(&mut self, frames: usize) -> Result<()> {
        self.inner.commit(frames * self.bytes_per_frame)
    }

    /// Advance the read cursor by `frames` without acquiring.
    pub fn seek(&mut self, frames: usize) -> Result<()> {
        self.inner.seek(frames * self.bytes_per_frame)
    }

    /// Total readable whole frames.
    pub fn available_frames(&self) -> usize {
        self.inner.available() / self.bytes_per_frame
    }

    /// Distance from the read cursor to the write cursor in frames.
    pub fn pointer_distance_in_frames(&self) -> usize {
        self.inner.pointer_distance() / self.bytes_per_frame
    }

    /// Capacity in frames.
    pub fn capacity_in_frames(&self) -> usize {
        self.inner.capacity() / self.bytes_per_frame
    }

    /// Size of one frame in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Reset both cursors to zero. See [`RingWriter::reset`].
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::thread;

    use super::*;

    fn write_all(writer: &mut RingWriter, mut data: &[u8]) -> usize {
        let mut written = 0;
        while !data.is_empty() {
            let span = writer.acquire(data.len());
            if span.is_empty() {
                break;
            }
            let n = span.len();
            span.copy_from_slice(&data[..n]);
            writer.commit(n).unwrap();
            written += n;
            data = &data[n..];
        }
        written
    }

    fn read_all(reader: &mut RingReader, count: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < count {
            let span = reader.acquire(count - out.len());
            if span.is_empty() {
                break;
            }
            let n = span.len();
            out.extend_from_slice(span);
            reader.commit(n).unwrap();
        }
        out
    }

    #[test]
    fn test_basic_write_read() {
        let (mut writer, mut reader) = ring_buffer(16).unwrap();

        assert_eq!(write_all(&mut writer, &[1, 2, 3, 4]), 4);
        assert_eq!(reader.available(), 4);
        assert_eq!(read_all(&mut reader, 4), vec![1, 2, 3, 4]);
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn test_wrap_around_split_write() {
        // Capacity 8: write 5, read 3, write 5 (splits across the wrap
        // boundary), read 7.
        let (mut writer, mut reader) = ring_buffer(8).unwrap();

        assert_eq!(write_all(&mut writer, &[1, 2, 3, 4, 5]), 5);
        assert_eq!(read_all(&mut reader, 3), vec![1, 2, 3]);

        // First acquire only reaches the end of the buffer.
        let span = writer.acquire(5);
        assert_eq!(span.len(), 3);
        span.copy_from_slice(&[6, 7, 8]);
        writer.commit(3).unwrap();

        let span = writer.acquire(2);
        assert_eq!(span.len(), 2);
        span.copy_from_slice(&[9, 10]);
        writer.commit(2).unwrap();

        assert_eq!(read_all(&mut reader, 7), vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_full_buffer_rejects_writes() {
        let (mut writer, mut reader) = ring_buffer(4).unwrap();

        assert_eq!(write_all(&mut writer, &[1, 2, 3, 4]), 4);
        assert!(writer.acquire(1).is_empty());
        assert_eq!(writer.available(), 0);

        assert_eq!(read_all(&mut reader, 1), vec![1]);
        assert_eq!(writer.available(), 1);
    }

    #[test]
    fn test_pointer_distance_tracks_written_minus_read() {
        let (mut writer, mut reader) = ring_buffer(8).unwrap();
        let mut total_written = 0usize;
        let mut total_read = 0usize;

        for round in 0..20 {
            let chunk = [round as u8; 3];
            total_written += write_all(&mut writer, &chunk);
            assert_eq!(writer.pointer_distance(), total_written - total_read);

            total_read += read_all(&mut reader, 2).len();
            assert_eq!(reader.pointer_distance(), total_written - total_read);
        }
    }

    #[test]
    fn test_commit_without_acquire_fails() {
        let (mut writer, mut reader) = ring_buffer(8).unwrap();
        assert_eq!(writer.commit(1), Err(RsnError::InvalidOperation));
        assert_eq!(reader.commit(1), Err(RsnError::InvalidOperation));
    }

    #[test]
    fn test_commit_more_than_acquired_fails() {
        let (mut writer, _reader) = ring_buffer(8).unwrap();
        let span = writer.acquire(4);
        assert_eq!(span.len(), 4);
        assert_eq!(writer.commit(5), Err(RsnError::InvalidArgs));
    }

    #[test]
    fn test_partial_commit() {
        let (mut writer, mut reader) = ring_buffer(8).unwrap();
        let span = writer.acquire(6);
        span[..2].copy_from_slice(&[7, 8]);
        writer.commit(2).unwrap();
        assert_eq!(read_all(&mut reader, 2), vec![7, 8]);
    }

    #[test]
    fn test_seek_read_never_passes_write() {
        let (mut writer, mut reader) = ring_buffer(8).unwrap();
        write_all(&mut writer, &[1, 2, 3]);

        reader.seek(8).unwrap();
        assert_eq!(reader.available(), 0);

        write_all(&mut writer, &[4]);
        assert_eq!(read_all(&mut reader, 1), vec![4]);
    }

    #[test]
    fn test_seek_write_skips_frames() {
        let (mut writer, mut reader) = ring_buffer(8).unwrap();
        writer.seek(3).unwrap();
        assert_eq!(reader.available(), 3);
        // The skipped region was zero-initialized.
        assert_eq!(read_all(&mut reader, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_reset_discards_pending_data() {
        let (mut writer, mut reader) = ring_buffer(8).unwrap();
        write_all(&mut writer, &[1, 2, 3, 4, 5]);

        reader.reset();
        assert_eq!(reader.available(), 0);
        assert_eq!(writer.available(), 8);
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(ring_buffer(0).is_err());
        assert!(ring_buffer_ex(8, 0).is_err());
        assert!(ring_buffer_ex(MAX_SUBBUFFER_SIZE + 1, 1).is_err());
    }

    #[test]
    fn test_subbuffer_lanes_share_cursors() {
        let (mut writer, mut reader) = ring_buffer_ex(8, 2).unwrap();
        assert_eq!(writer.subbuffer_count(), 2);
        assert!(writer.subbuffer_stride() >= 8);

        let span = writer.acquire(4);
        span.copy_from_slice(&[1, 2, 3, 4]);
        writer.acquired_lane(1).unwrap().copy_from_slice(&[5, 6, 7, 8]);
        writer.commit(4).unwrap();

        let span = reader.acquire(4);
        assert_eq!(span, &[1, 2, 3, 4]);
        assert_eq!(reader.acquired_lane(1).unwrap(), &[5, 6, 7, 8]);
        reader.commit(4).unwrap();
    }

    #[test]
    fn test_spsc_bytes_cross_thread_in_order() {
        let (mut writer, mut reader) = ring_buffer(64).unwrap();
        let total = 10_000usize;

        let producer = thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let span = writer.acquire(total - next);
                if span.is_empty() {
                    thread::yield_now();
                    continue;
                }
                let n = span.len();
                for (i, byte) in span.iter_mut().enumerate() {
                    *byte = ((next + i) % 251) as u8;
                }
                writer.commit(n).unwrap();
                next += n;
            }
        });

        let consumer = thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let span = reader.acquire(total - next);
                if span.is_empty() {
                    thread::yield_now();
                    continue;
                }
                let n = span.len();
                for (i, byte) in span.iter().enumerate() {
                    assert_eq!(*byte, ((next + i) % 251) as u8);
                }
                reader.commit(n).unwrap();
                next += n;
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn test_pcm_ring_whole_frames_only() {
        // 4 bytes per frame, 4 frames capacity.
        let (mut writer, mut reader) = pcm_ring_buffer(4, 4).unwrap();
        assert_eq!(writer.capacity_in_frames(), 4);

        let span = writer.acquire(3);
        assert_eq!(span.len(), 12);
        span.copy_from_slice(&[1u8; 12]);
        writer.commit(3).unwrap();

        assert_eq!(reader.available_frames(), 3);
        let span = reader.acquire(8);
        assert_eq!(span.len(), 12);
        reader.commit(3).unwrap();
        assert_eq!(reader.available_frames(), 0);
    }

    #[test]
    fn test_pcm_ring_zero_frame_size_fails() {
        assert!(pcm_ring_buffer(0, 16).is_err());
    }
}

#[cfg(loom)]
mod loom_tests {
    use loom::thread;

    use super::*;

    #[test]
    fn loom_spsc_write_then_read() {
        loom::model(|| {
            let (mut writer, mut reader) = ring_buffer(4).unwrap();

            let producer = thread::spawn(move || {
                let span = writer.acquire(2);
                let n = span.len();
                for (i, byte) in span.iter_mut().enumerate() {
                    *byte = i as u8 + 1;
                }
                writer.commit(n).unwrap();
                n
            });

            let consumer = thread::spawn(move || {
                let span = reader.acquire(2);
                let n = span.len();
                for (i, byte) in span.iter().enumerate() {
                    assert_eq!(*byte, i as u8 + 1);
                }
                reader.commit(n).unwrap();
                n
            });

            let written = producer.join().unwrap();
            let read = consumer.join().unwrap();
            assert!(read <= written);
        });
    }
}
