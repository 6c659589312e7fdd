//! Sample formats and per-pair conversion kernels.
//!
//! Every ordered pair of supported formats has a dedicated kernel.
//! Narrowing conversions optionally apply dither before quantization;
//! widening conversions are exact shifts. `s24` is packed 3-byte
//! little-endian, sign-extended on load and truncated on store. The
//! float domain is `[-1.0, +1.0]`; values outside that range are legal
//! internally and are clipped by the mixer at final output.

use rsn_core::random::XorShiftRng;
use rsn_core::{Result, RsnError};

/// Maximum number of channels in a channel map or data format.
pub const MAX_CHANNELS: usize = 32;

/// A PCM sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Unknown or unspecified format.
    #[default]
    Unknown,
    /// Unsigned 8-bit, silence at 128.
    U8,
    /// Signed 16-bit little-endian.
    S16,
    /// Signed 24-bit, packed 3-byte little-endian.
    S24,
    /// Signed 32-bit little-endian.
    S32,
    /// 32-bit IEEE float in `[-1.0, +1.0]`.
    F32,
}

impl Format {
    /// Size of one sample in bytes. Zero for `Unknown`.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Format::Unknown => 0,
            Format::U8 => 1,
            Format::S16 => 2,
            Format::S24 => 3,
            Format::S32 => 4,
            Format::F32 => 4,
        }
    }

    /// Size of one frame in bytes for the given channel count.
    pub fn bytes_per_frame(self, channels: usize) -> usize {
        self.bytes_per_sample() * channels
    }

    /// Whether samples are signed. Only `U8` is unsigned.
    pub fn is_signed(self) -> bool {
        !matches!(self, Format::U8 | Format::Unknown)
    }

    /// Whether this is a floating-point format.
    pub fn is_float(self) -> bool {
        matches!(self, Format::F32)
    }

    /// The byte value that encodes silence. 128 for `U8`, 0 otherwise.
    pub fn silence_byte(self) -> u8 {
        match self {
            Format::U8 => 128,
            _ => 0,
        }
    }

    /// Size of one sample of this format's widened accumulation type.
    ///
    /// `U8` accumulates in i16, `S16` in i32, `S24` and `S32` in i64,
    /// `F32` in f32.
    pub fn accumulation_bytes_per_sample(self) -> usize {
        match self {
            Format::Unknown => 0,
            Format::U8 => 2,
            Format::S16 => 4,
            Format::S24 => 8,
            Format::S32 => 8,
            Format::F32 => 4,
        }
    }

    /// Size of one accumulation frame in bytes.
    pub fn accumulation_bytes_per_frame(self, channels: usize) -> usize {
        self.accumulation_bytes_per_sample() * channels
    }
}

/// Dither applied when quantizing to a narrower format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherMode {
    /// No dither.
    #[default]
    None,
    /// Rectangular PDF dither, one half LSB either side.
    Rectangle,
    /// Triangular PDF dither, one LSB either side.
    Triangle,
}

/// Dither state: a mode plus the PRNG that drives it.
pub struct Dither {
    mode: DitherMode,
    rng: XorShiftRng,
}

impl Dither {
    /// Create dither state with a default seed.
    pub fn new(mode: DitherMode) -> Self {
        Self::with_seed(mode, 0x7A9E_1D2C_4B5F_6E8D)
    }

    /// Create dither state with an explicit seed, for reproducibility.
    pub fn with_seed(mode: DitherMode, seed: u64) -> Self {
        Self {
            mode,
            rng: XorShiftRng::new(seed),
        }
    }

    /// The configured mode.
    pub fn mode(&self) -> DitherMode {
        self.mode
    }

    /// An integer dither value for a right shift of `shift` bits.
    ///
    /// Rectangular dither spans half of the dropped range either side
    /// of zero; triangular dither is the sum of two such values.
    #[inline]
    fn next_i32(&mut self, shift: u32) -> i32 {
        let half = 1i32 << (shift - 1);
        match self.mode {
            DitherMode::None => 0,
            DitherMode::Rectangle => self.rng.next_i32_range(-half, half - 1),
            DitherMode::Triangle => {
                self.rng.next_i32_range(-half, half - 1) + self.rng.next_i32_range(-half, half - 1)
            }
        }
    }

    /// A float dither value for a target LSB of size `lsb`.
    #[inline]
    fn next_f32(&mut self, lsb: f64) -> f32 {
        match self.mode {
            DitherMode::None => 0.0,
            DitherMode::Rectangle => (self.rng.next_f64_range(-0.5, 0.5) * lsb) as f32,
            DitherMode::Triangle => {
                ((self.rng.next_f64() - self.rng.next_f64()) * lsb) as f32
            }
        }
    }
}

#[inline]
fn read_s16(bytes: &[u8]) -> i16 {
    i16::from_le_bytes([bytes[0], bytes[1]])
}

#[inline]
fn read_s24(bytes: &[u8]) -> i32 {
    // Sign-extend the packed 24-bit value.
    (i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]])) >> 8
}

#[inline]
fn read_s32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn write_s24(bytes: &mut [u8], x: i32) {
    let b = x.to_le_bytes();
    bytes[0] = b[0];
    bytes[1] = b[1];
    bytes[2] = b[2];
}

/* Widening conversions from u8. The source is treated as signed and
centered at 128. */

pub fn u8_to_s16(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(2).zip(src.iter()).take(count) {
        let x = ((*s as i16) - 128) << 8;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

pub fn u8_to_s24(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.iter()).take(count) {
        write_s24(d, ((*s as i32) - 128) << 16);
    }
}

pub fn u8_to_s32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.iter()).take(count) {
        let x = ((*s as i32) - 128) << 24;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

pub fn u8_to_f32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.iter()).take(count) {
        let x = ((*s as i32) - 128) as f32 / 128.0;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

/* Conversions from s16. */

pub fn s16_to_u8(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.iter_mut().zip(src.chunks_exact(2)).take(count) {
        let x = (read_s16(s) as i32 + dither.next_i32(8)).clamp(-32768, 32767);
        *d = ((x >> 8) + 128) as u8;
    }
}

pub fn s16_to_s24(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(2)).take(count) {
        write_s24(d, (read_s16(s) as i32) << 8);
    }
}

pub fn s16_to_s32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(2)).take(count) {
        let x = (read_s16(s) as i32) << 16;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

pub fn s16_to_f32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(2)).take(count) {
        let x = read_s16(s) as f32 / 32768.0;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

/* Conversions from s24. */

pub fn s24_to_u8(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.iter_mut().zip(src.chunks_exact(3)).take(count) {
        let x = (read_s24(s) + dither.next_i32(16)).clamp(-8_388_608, 8_388_607);
        *d = ((x >> 16) + 128) as u8;
    }
}

pub fn s24_to_s16(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(3)).take(count) {
        let x = (read_s24(s) + dither.next_i32(8)).clamp(-8_388_608, 8_388_607);
        d.copy_from_slice(&(((x >> 8) as i16).to_le_bytes()));
    }
}

pub fn s24_to_s32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(3)).take(count) {
        let x = read_s24(s) << 8;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

pub fn s24_to_f32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(3)).take(count) {
        let x = read_s24(s) as f32 / 8_388_608.0;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

/* Conversions from s32. */

pub fn s32_to_u8(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.iter_mut().zip(src.chunks_exact(4)).take(count) {
        let x = (read_s32(s) as i64 + dither.next_i32(24) as i64)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        *d = ((x >> 24) + 128) as u8;
    }
}

pub fn s32_to_s16(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(4)).take(count) {
        let x = (read_s32(s) as i64 + dither.next_i32(16) as i64)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        d.copy_from_slice(&(((x >> 16) as i16).to_le_bytes()));
    }
}

pub fn s32_to_s24(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)).take(count) {
        let x = (read_s32(s) as i64 + dither.next_i32(8) as i64)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        write_s24(d, x >> 8);
    }
}

pub fn s32_to_f32(dst: &mut [u8], src: &[u8], count: usize) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)).take(count) {
        let x = (read_s32(s) as f64 / 2_147_483_648.0) as f32;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

/* Conversions from f32. Quantization clips to the full range of the
destination first; dither is applied in the float domain. */

pub fn f32_to_u8(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.iter_mut().zip(src.chunks_exact(4)).take(count) {
        let x = (read_f32(s) + dither.next_f32(2.0 / 256.0)).clamp(-1.0, 1.0);
        let q = ((x * 128.0) as i32).clamp(-128, 127);
        *d = (q + 128) as u8;
    }
}

pub fn f32_to_s16(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(4)).take(count) {
        let x = (read_f32(s) + dither.next_f32(2.0 / 65536.0)).clamp(-1.0, 1.0);
        let q = ((x * 32768.0) as i32).clamp(-32768, 32767) as i16;
        d.copy_from_slice(&q.to_le_bytes());
    }
}

pub fn f32_to_s24(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)).take(count) {
        let x = (read_f32(s) + dither.next_f32(2.0 / 16_777_216.0)).clamp(-1.0, 1.0);
        let q = ((x as f64 * 8_388_608.0) as i32).clamp(-8_388_608, 8_388_607);
        write_s24(d, q);
    }
}

pub fn f32_to_s32(dst: &mut [u8], src: &[u8], count: usize, dither: &mut Dither) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)).take(count) {
        let x = (read_f32(s) + dither.next_f32(2.0 / 4_294_967_296.0)).clamp(-1.0, 1.0);
        let q = ((x as f64 * 2_147_483_648.0) as i64)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        d.copy_from_slice(&q.to_le_bytes());
    }
}

/// Convert `count` samples between any two supported formats.
///
/// Same-format pairs are a plain copy. Fails with `InvalidArgs` when a
/// format is `Unknown` or a buffer is too small for `count` samples.
pub fn convert_pcm_samples(
    dst: &mut [u8],
    dst_format: Format,
    src: &[u8],
    src_format: Format,
    count: usize,
    dither: &mut Dither,
) -> Result<()> {
    if src_format == Format::Unknown || dst_format == Format::Unknown {
        return Err(RsnError::InvalidArgs);
    }
    if src.len() < count * src_format.bytes_per_sample()
        || dst.len() < count * dst_format.bytes_per_sample()
    {
        return Err(RsnError::InvalidArgs);
    }

    use Format::{F32, S16, S24, S32, U8};
    match (src_format, dst_format) {
        (U8, U8) | (S16, S16) | (S24, S24) | (S32, S32) | (F32, F32) => {
            let bytes = count * src_format.bytes_per_sample();
            dst[..bytes].copy_from_slice(&src[..bytes]);
        }
        (U8, S16) => u8_to_s16(dst, src, count),
        (U8, S24) => u8_to_s24(dst, src, count),
        (U8, S32) => u8_to_s32(dst, src, count),
        (U8, F32) => u8_to_f32(dst, src, count),
        (S16, U8) => s16_to_u8(dst, src, count, dither),
        (S16, S24) => s16_to_s24(dst, src, count),
        (S16, S32) => s16_to_s32(dst, src, count),
        (S16, F32) => s16_to_f32(dst, src, count),
        (S24, U8) => s24_to_u8(dst, src, count, dither),
        (S24, S16) => s24_to_s16(dst, src, count, dither),
        (S24, S32) => s24_to_s32(dst, src, count),
        (S24, F32) => s24_to_f32(dst, src, count),
        (S32, U8) => s32_to_u8(dst, src, count, dither),
        (S32, S16) => s32_to_s16(dst, src, count, dither),
        (S32, S24) => s32_to_s24(dst, src, count, dither),
        (S32, F32) => s32_to_f32(dst, src, count),
        (F32, U8) => f32_to_u8(dst, src, count, dither),
        (F32, S16) => f32_to_s16(dst, src, count, dither),
        (F32, S24) => f32_to_s24(dst, src, count, dither),
        (F32, S32) => f32_to_s32(dst, src, count, dither),
        (Format::Unknown, _) | (_, Format::Unknown) => unreachable!(),
    }
    Ok(())
}

/// Convert interleaved frames between two formats with a shared
/// channel count.
pub fn convert_pcm_frames_format(
    dst: &mut [u8],
    dst_format: Format,
    src: &[u8],
    src_format: Format,
    frame_count: usize,
    channels: usize,
    dither: &mut Dither,
) -> Result<()> {
    convert_pcm_samples(dst, dst_format, src, src_format, frame_count * channels, dither)
}

/// Copy whole frames between same-format buffers.
pub fn copy_pcm_frames(
    dst: &mut [u8],
    src: &[u8],
    frame_count: usize,
    format: Format,
    channels: usize,
) -> Result<()> {
    let bytes = frame_count * format.bytes_per_frame(channels);
    if src.len() < bytes || dst.len() < bytes {
        return Err(RsnError::InvalidArgs);
    }
    dst[..bytes].copy_from_slice(&src[..bytes]);
    Ok(())
}

/// Fill whole frames with silence. `U8` buffers are filled with the
/// 128 zero level, every other format with zero bytes.
pub fn silence_pcm_frames(dst: &mut [u8], frame_count: usize, format: Format, channels: usize) {
    let bytes = (frame_count * format.bytes_per_frame(channels)).min(dst.len());
    let fill = format.silence_byte();
    for byte in &mut dst[..bytes] {
        *byte = fill;
    }
}

/// Interleave per-channel planes into a single frame stream.
///
/// A pure shuffle: the frame count is preserved and no samples are
/// modified.
pub fn interleave_pcm_frames(
    dst: &mut [u8],
    srcs: &[&[u8]],
    frame_count: usize,
    format: Format,
) -> Result<()> {
    let channels = srcs.len();
    let bps = format.bytes_per_sample();
    if bps == 0 || channels == 0 || channels > MAX_CHANNELS {
        return Err(RsnError::InvalidArgs);
    }
    if dst.len() < frame_count * bps * channels {
        return Err(RsnError::InvalidArgs);
    }
    for src in srcs {
        if src.len() < frame_count * bps {
            return Err(RsnError::InvalidArgs);
        }
    }

    for frame in 0..frame_count {
        for (ch, src) in srcs.iter().enumerate() {
            let d = (frame * channels + ch) * bps;
            let s = frame * bps;
            dst[d..d + bps].copy_from_slice(&src[s..s + bps]);
        }
    }
    Ok(())
}

/// Deinterleave a frame stream into per-channel planes. The inverse of
/// [`interleave_pcm_frames`].
pub fn deinterleave_pcm_frames(
    dsts: &mut [&mut [u8]],
    src: &[u8],
    frame_count: usize,
    format: Format,
) -> Result<()> {
    let channels = dsts.len();
    let bps = format.bytes_per_sample();
    if bps == 0 || channels == 0 || channels > MAX_CHANNELS {
        return Err(RsnError::InvalidArgs);
    }
    if src.len() < frame_count * bps * channels {
        return Err(RsnError::InvalidArgs);
    }
    for dst in dsts.iter() {
        if dst.len() < frame_count * bps {
            return Err(RsnError::InvalidArgs);
        }
    }

    for frame in 0..frame_count {
        for (ch, dst) in dsts.iter_mut().enumerate() {
            let s = (frame * channels + ch) * bps;
            let d = frame * bps;
            dst[d..d + bps].copy_from_slice(&src[s..s + bps]);
        }
    }
    Ok(())
}

/// Store one sample given in the `[-1.0, +1.0]` float domain at
/// `sample_index` of a buffer in any format. Used by the generators.
pub(crate) fn store_sample_f64(dst: &mut [u8], sample_index: usize, format: Format, value: f64) {
    match format {
        Format::U8 => {
            let q = ((value * 128.0) as i32).clamp(-128, 127);
            dst[sample_index] = (q + 128) as u8;
        }
        Format::S16 => {
            let q = ((value * 32768.0) as i32).clamp(-32768, 32767) as i16;
            dst[sample_index * 2..sample_index * 2 + 2].copy_from_slice(&q.to_le_bytes());
        }
        Format::S24 => {
            let q = ((value * 8_388_608.0) as i32).clamp(-8_388_608, 8_388_607);
            write_s24(&mut dst[sample_index * 3..sample_index * 3 + 3], q);
        }
        Format::S32 => {
            let q = ((value * 2_147_483_648.0) as i64)
                .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            dst[sample_index * 4..sample_index * 4 + 4].copy_from_slice(&q.to_le_bytes());
        }
        Format::F32 => {
            let q = value as f32;
            dst[sample_index * 4..sample_index * 4 + 4].copy_from_slice(&q.to_le_bytes());
        }
        Format::Unknown => {}
    }
}

/* Saturating casts from the widened accumulation types back to wire
formats, used by the mixer at the end of a mix. */

/// Clip i16 accumulators to u8 output.
pub fn clip_samples_u8(dst: &mut [u8], src: &[i16]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = ((*s).clamp(-128, 127) + 128) as u8;
    }
}

/// Clip i32 accumulators to s16 output.
pub fn clip_samples_s16(dst: &mut [u8], src: &[i32]) {
    for (d, s) in dst.chunks_exact_mut(2).zip(src.iter()) {
        let x = (*s).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

/// Clip i64 accumulators to packed s24 output.
pub fn clip_samples_s24(dst: &mut [u8], src: &[i64]) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.iter()) {
        write_s24(d, (*s).clamp(-8_388_608, 8_388_607) as i32);
    }
}

/// Clip i64 accumulators to s32 output.
pub fn clip_samples_s32(dst: &mut [u8], src: &[i64]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.iter()) {
        let x = (*s).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        d.copy_from_slice(&x.to_le_bytes());
    }
}

/// Clip f32 accumulators to f32 output, clamping to `[-1.0, +1.0]`.
pub fn clip_samples_f32(dst: &mut [u8], src: &[f32]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.iter()) {
        d.copy_from_slice(&s.clamp(-1.0, 1.0).to_le_bytes());
    }
}

/// Clamp f32 samples to `[-1.0, +1.0]` in place.
pub fn clip_f32_in_place(samples: &mut [f32]) {
    for s in samples {
        *s = s.clamp(-1.0, 1.0);
    }
}

/* Volume scaling. Integer samples use a Q8 fixed-point factor, floats
multiply directly. None of these saturate; saturation happens at the
clip stage. */

/// Quantize a linear volume to the Q8 fixed-point scale used for
/// integer samples.
#[inline]
pub fn volume_to_q8(volume: f32) -> i16 {
    (volume * 256.0) as i16
}

/// Scale a u8-range accumulator sample by a Q8 volume.
#[inline]
pub fn apply_volume_q8_u8(x: i16, volume_q8: i16) -> i16 {
    ((x as i32 * volume_q8 as i32) >> 8) as i16
}

/// Scale an s16-range accumulator sample by a Q8 volume.
#[inline]
pub fn apply_volume_q8_s16(x: i32, volume_q8: i16) -> i32 {
    ((x as i64 * volume_q8 as i64) >> 8) as i32
}

/// Scale an s24/s32-range accumulator sample by a Q8 volume.
#[inline]
pub fn apply_volume_q8_wide(x: i64, volume_q8: i16) -> i64 {
    (x * volume_q8 as i64) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_dither() -> Dither {
        Dither::new(DitherMode::None)
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(Format::Unknown.bytes_per_sample(), 0);
        assert_eq!(Format::U8.bytes_per_sample(), 1);
        assert_eq!(Format::S16.bytes_per_sample(), 2);
        assert_eq!(Format::S24.bytes_per_sample(), 3);
        assert_eq!(Format::S32.bytes_per_sample(), 4);
        assert_eq!(Format::F32.bytes_per_sample(), 4);
    }

    #[test]
    fn test_accumulation_widths() {
        assert_eq!(Format::U8.accumulation_bytes_per_sample(), 2);
        assert_eq!(Format::S16.accumulation_bytes_per_sample(), 4);
        assert_eq!(Format::S24.accumulation_bytes_per_sample(), 8);
        assert_eq!(Format::S32.accumulation_bytes_per_sample(), 8);
        assert_eq!(Format::F32.accumulation_bytes_per_sample(), 4);
    }

    #[test]
    fn test_s24_pack_unpack_sign_extension() {
        let mut bytes = [0u8; 3];
        write_s24(&mut bytes, -1);
        assert_eq!(bytes, [0xFF, 0xFF, 0xFF]);
        assert_eq!(read_s24(&bytes), -1);

        write_s24(&mut bytes, 8_388_607);
        assert_eq!(read_s24(&bytes), 8_388_607);

        write_s24(&mut bytes, -8_388_608);
        assert_eq!(read_s24(&bytes), -8_388_608);
    }

    #[test]
    fn test_s16_f32_round_trip_is_lossless() {
        // Mono s16 [0, 32767, -32768, 0] -> f32 -> s16 must be exact.
        let samples: [i16; 4] = [0, 32767, -32768, 0];
        let mut src = Vec::new();
        for s in samples {
            src.extend_from_slice(&s.to_le_bytes());
        }

        let mut as_f32 = vec![0u8; 4 * 4];
        s16_to_f32(&mut as_f32, &src, 4);

        let mut back = vec![0u8; 4 * 2];
        f32_to_s16(&mut back, &as_f32, 4, &mut no_dither());

        assert_eq!(back, src);
    }

    #[test]
    fn test_u8_round_trips_through_wider_formats() {
        let src: Vec<u8> = (0..=255).collect();

        let mut s16 = vec![0u8; 256 * 2];
        u8_to_s16(&mut s16, &src, 256);
        let mut back = vec![0u8; 256];
        s16_to_u8(&mut back, &s16, 256, &mut no_dither());
        assert_eq!(back, src);

        let mut f32buf = vec![0u8; 256 * 4];
        u8_to_f32(&mut f32buf, &src, 256);
        let mut back = vec![0u8; 256];
        f32_to_u8(&mut back, &f32buf, 256, &mut no_dither());
        assert_eq!(back, src);
    }

    #[test]
    fn test_u8_zero_level_maps_to_zero() {
        let src = [128u8];
        let mut dst = [0u8; 2];
        u8_to_s16(&mut dst, &src, 1);
        assert_eq!(read_s16(&dst), 0);

        let mut dst = [0u8; 4];
        u8_to_f32(&mut dst, &src, 1);
        assert_eq!(read_f32(&dst), 0.0);
    }

    #[test]
    fn test_f32_full_scale_saturates_not_wraps() {
        let mut src = Vec::new();
        for v in [1.0f32, -1.0, 1.5, -1.5] {
            src.extend_from_slice(&v.to_le_bytes());
        }
        let mut dst = vec![0u8; 4 * 2];
        f32_to_s16(&mut dst, &src, 4, &mut no_dither());
        assert_eq!(read_s16(&dst[0..2]), 32767);
        assert_eq!(read_s16(&dst[2..4]), -32768);
        assert_eq!(read_s16(&dst[4..6]), 32767);
        assert_eq!(read_s16(&dst[6..8]), -32768);
    }

    #[test]
    fn test_s24_widening_shifts() {
        let mut s24 = [0u8; 3];
        write_s24(&mut s24, 0x123456);

        let mut s32 = [0u8; 4];
        s24_to_s32(&mut s32, &s24, 1);
        assert_eq!(read_s32(&s32), 0x12345600);

        let mut back = [0u8; 3];
        s32_to_s24(&mut back, &s32, 1, &mut no_dither());
        assert_eq!(read_s24(&back), 0x123456);
    }

    #[test]
    fn test_convert_dispatch_same_format_is_copy() {
        let src = [1u8, 2, 3, 4, 5, 6];
        let mut dst = [0u8; 6];
        convert_pcm_samples(&mut dst, Format::S24, &src, Format::S24, 2, &mut no_dither())
            .unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_convert_rejects_unknown_format() {
        let src = [0u8; 4];
        let mut dst = [0u8; 4];
        let result =
            convert_pcm_samples(&mut dst, Format::Unknown, &src, Format::S16, 2, &mut no_dither());
        assert_eq!(result, Err(RsnError::InvalidArgs));
    }

    #[test]
    fn test_convert_rejects_short_buffers() {
        let src = [0u8; 2];
        let mut dst = [0u8; 8];
        let result =
            convert_pcm_samples(&mut dst, Format::F32, &src, Format::S16, 2, &mut no_dither());
        assert_eq!(result, Err(RsnError::InvalidArgs));
    }

    #[test]
    fn test_dither_stays_within_one_lsb() {
        // Half-scale input so dither never pushes into saturation.
        let value = 16384i16;
        let mut src = Vec::new();
        for _ in 0..1000 {
            src.extend_from_slice(&value.to_le_bytes());
        }

        for mode in [DitherMode::Rectangle, DitherMode::Triangle] {
            let mut dither = Dither::with_seed(mode, 99);
            let mut dst = vec![0u8; 1000];
            s16_to_u8(&mut dst, &src, 1000, &mut dither);
            let expected = (16384 >> 8) + 128;
            for d in dst {
                assert!((d as i32 - expected).abs() <= 2, "excess dither: {d}");
            }
        }
    }

    #[test]
    fn test_dither_is_deterministic_per_seed() {
        let src: Vec<u8> = (0..200u32).flat_map(|v| ((v * 131) as i16).to_le_bytes()).collect();
        let mut a = vec![0u8; 100];
        let mut b = vec![0u8; 100];
        s16_to_u8(&mut a, &src, 100, &mut Dither::with_seed(DitherMode::Triangle, 5));
        s16_to_u8(&mut b, &src, 100, &mut Dither::with_seed(DitherMode::Triangle, 5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_interleave_deinterleave_inverse() {
        let left: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        let right: Vec<u8> = vec![7, 8, 9, 10, 11, 12];

        let mut interleaved = vec![0u8; 12];
        interleave_pcm_frames(&mut interleaved, &[&left, &right], 3, Format::S16).unwrap();
        assert_eq!(interleaved, [1, 2, 7, 8, 3, 4, 9, 10, 5, 6, 11, 12]);

        let mut out_left = vec![0u8; 6];
        let mut out_right = vec![0u8; 6];
        deinterleave_pcm_frames(
            &mut [&mut out_left, &mut out_right],
            &interleaved,
            3,
            Format::S16,
        )
        .unwrap();
        assert_eq!(out_left, left);
        assert_eq!(out_right, right);
    }

    #[test]
    fn test_silence_uses_format_zero_level() {
        let mut buf = [1u8; 8];
        silence_pcm_frames(&mut buf, 4, Format::U8, 2);
        assert_eq!(buf, [128u8; 8]);

        let mut buf = [1u8; 8];
        silence_pcm_frames(&mut buf, 2, Format::S16, 2);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn test_clip_saturates() {
        let mut dst = [0u8; 4];
        clip_samples_s16(&mut dst, &[40_000, -40_000]);
        assert_eq!(read_s16(&dst[0..2]), 32767);
        assert_eq!(read_s16(&dst[2..4]), -32768);

        let mut dst = [0u8; 2];
        clip_samples_u8(&mut dst, &[300, -300]);
        assert_eq!(dst, [255, 0]);

        let mut dst = [0u8; 8];
        clip_samples_f32(&mut dst, &[2.0, -2.0]);
        assert_eq!(read_f32(&dst[0..4]), 1.0);
        assert_eq!(read_f32(&dst[4..8]), -1.0);
    }

    #[test]
    fn test_q8_volume() {
        assert_eq!(volume_to_q8(1.0), 256);
        assert_eq!(volume_to_q8(0.5), 128);
        assert_eq!(apply_volume_q8_s16(1000, 128), 500);
        assert_eq!(apply_volume_q8_u8(100, 256), 100);
        assert_eq!(apply_volume_q8_wide(1 << 30, 64), 1 << 28);
    }
}
