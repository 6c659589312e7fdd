//! Channel positions, channel maps, and the channel router.
//!
//! The router turns an input channel map into an output channel map by
//! synthesizing a weight matrix from the declared mix mode, then
//! executing whichever fast path the matrix allows: passthrough,
//! shuffle, mono expansion, mono collapse, or the general weighted
//! loop.

use rsn_core::{Result, RsnError};

use crate::format::{Format, MAX_CHANNELS};

/// A labeled speaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// Unlabeled. Carries no spatial meaning and never participates in
    /// blending.
    #[default]
    None,
    /// Single-speaker (monophonic) position.
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    /// Low-frequency effects. Only ever fed by an LFE input unless the
    /// mix mode is `Custom`.
    Lfe,
    BackLeft,
    BackRight,
    FrontLeftCenter,
    FrontRightCenter,
    BackCenter,
    SideLeft,
    SideRight,
    TopCenter,
    TopFrontLeft,
    TopFrontCenter,
    TopFrontRight,
    TopBackLeft,
    TopBackCenter,
    TopBackRight,
}

impl Channel {
    /// Whether this position takes part in spatial blending.
    fn is_spatial(self) -> bool {
        !matches!(self, Channel::None | Channel::Mono | Channel::Lfe)
    }

    /// Per-plane presence ratios `[left, right, front, back, bottom,
    /// top]`, used to derive planar-blend weights. The blend weight of
    /// an unmatched pair is the dot product of their ratio vectors.
    fn plane_ratios(self) -> [f32; 6] {
        const THIRD: f32 = 1.0 / 3.0;
        match self {
            Channel::FrontLeft => [0.5, 0.0, 0.5, 0.0, 0.0, 0.0],
            Channel::FrontRight => [0.0, 0.5, 0.5, 0.0, 0.0, 0.0],
            Channel::FrontCenter => [0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            Channel::BackLeft => [0.5, 0.0, 0.0, 0.5, 0.0, 0.0],
            Channel::BackRight => [0.0, 0.5, 0.0, 0.5, 0.0, 0.0],
            Channel::FrontLeftCenter => [0.25, 0.0, 0.75, 0.0, 0.0, 0.0],
            Channel::FrontRightCenter => [0.0, 0.25, 0.75, 0.0, 0.0, 0.0],
            Channel::BackCenter => [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            Channel::SideLeft => [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            Channel::SideRight => [0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            Channel::TopCenter => [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            Channel::TopFrontLeft => [THIRD, 0.0, THIRD, 0.0, 0.0, THIRD],
            Channel::TopFrontCenter => [0.0, 0.0, 0.5, 0.0, 0.0, 0.5],
            Channel::TopFrontRight => [0.0, THIRD, THIRD, 0.0, 0.0, THIRD],
            Channel::TopBackLeft => [THIRD, 0.0, 0.0, THIRD, 0.0, THIRD],
            Channel::TopBackCenter => [0.0, 0.0, 0.0, 0.5, 0.0, 0.5],
            Channel::TopBackRight => [0.0, THIRD, 0.0, THIRD, 0.0, THIRD],
            Channel::None | Channel::Mono | Channel::Lfe => [0.0; 6],
        }
    }
}

/// An ordered sequence of channel positions, at most
/// [`MAX_CHANNELS`](crate::format::MAX_CHANNELS) long.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    positions: [Channel; MAX_CHANNELS],
    len: u8,
}

impl ChannelMap {
    /// Create a channel map from a slice of positions.
    ///
    /// Fails with `InvalidArgs` when the slice is empty, longer than
    /// `MAX_CHANNELS`, or contains a duplicate labeled position
    /// (`None` may repeat).
    pub fn new(positions: &[Channel]) -> Result<Self> {
        if positions.is_empty() || positions.len() > MAX_CHANNELS {
            return Err(RsnError::InvalidArgs);
        }
        for (i, a) in positions.iter().enumerate() {
            if *a == Channel::None {
                continue;
            }
            if positions[..i].contains(a) {
                return Err(RsnError::InvalidArgs);
            }
        }

        let mut map = [Channel::None; MAX_CHANNELS];
        map[..positions.len()].copy_from_slice(positions);
        Ok(Self {
            positions: map,
            len: positions.len() as u8,
        })
    }

    /// The standard (Microsoft-ordered) map for a channel count.
    pub fn default_for(channels: usize) -> Result<Self> {
        use Channel::*;
        let named: &[Channel] = match channels {
            0 => return Err(RsnError::InvalidArgs),
            1 => &[Mono],
            2 => &[FrontLeft, FrontRight],
            3 => &[FrontLeft, FrontRight, FrontCenter],
            4 => &[FrontLeft, FrontRight, BackLeft, BackRight],
            5 => &[FrontLeft, FrontRight, FrontCenter, BackLeft, BackRight],
            6 => &[FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight],
            7 => &[FrontLeft, FrontRight, FrontCenter, Lfe, BackCenter, SideLeft, SideRight],
            _ => &[FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight, SideLeft, SideRight],
        };
        if channels > MAX_CHANNELS {
            return Err(RsnError::InvalidArgs);
        }

        // Channels beyond the named set stay unlabeled.
        let mut map = [Channel::None; MAX_CHANNELS];
        map[..named.len().min(channels)].copy_from_slice(&named[..named.len().min(channels)]);
        Ok(Self {
            positions: map,
            len: channels as u8,
        })
    }

    /// Number of channels in the map.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The positions as a slice.
    pub fn positions(&self) -> &[Channel] {
        &self.positions[..self.len as usize]
    }

    /// The position of channel `index`.
    pub fn get(&self, index: usize) -> Option<Channel> {
        self.positions().get(index).copied()
    }

    /// Index of the first channel with the given position.
    pub fn index_of(&self, position: Channel) -> Option<usize> {
        self.positions().iter().position(|p| *p == position)
    }
}

impl core::fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.positions()).finish()
    }
}

/// Strategy for synthesizing routing weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixMode {
    /// Weight 1 where input and output positions match, 0 elsewhere.
    #[default]
    Rectangular,
    /// Identical to `Rectangular`: matched positions copy, unmatched
    /// outputs stay silent.
    Simple,
    /// Matched positions copy; unmatched spatial pairs blend by the
    /// geometric overlap of their speaker planes.
    PlanarBlend,
    /// Caller-supplied weight matrix, used verbatim.
    Custom,
}

/// Configuration for a [`ChannelRouter`].
#[derive(Clone)]
pub struct ChannelRouterConfig {
    pub channels_in: usize,
    pub channels_out: usize,
    pub channel_map_in: ChannelMap,
    pub channel_map_out: ChannelMap,
    pub mix_mode: MixMode,
    /// Row-major `[in][out]` weights, required for `MixMode::Custom`.
    pub weights: Option<Vec<f32>>,
}

impl ChannelRouterConfig {
    /// A config with default maps for the given channel counts.
    pub fn new(channels_in: usize, channels_out: usize) -> Result<Self> {
        Ok(Self {
            channels_in,
            channels_out,
            channel_map_in: ChannelMap::default_for(channels_in)?,
            channel_map_out: ChannelMap::default_for(channels_out)?,
            mix_mode: MixMode::default(),
            weights: Option::None,
        })
    }
}

/// Execution strategy chosen at init from the weight matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterPath {
    /// Identical maps: plain copy.
    Passthrough,
    /// Permutation of identical position sets.
    Shuffle,
    /// One mono input expanded to every spatial output.
    MonoExpand,
    /// All spatial inputs averaged into one mono output.
    MonoCollapse,
    /// General weighted loop.
    Weights,
}

/// Routes frames from one channel map to another.
pub struct ChannelRouter {
    channels_in: usize,
    channels_out: usize,
    weights: Vec<f32>,     // [in][out] row-major
    weights_q14: Vec<i32>, // fixed-point mirror for s16 processing
    shuffle: [u8; MAX_CHANNELS],
    path: RouterPath,
}

impl ChannelRouter {
    /// Build a router, synthesizing the weight matrix and detecting
    /// the fast path.
    pub fn new(config: &ChannelRouterConfig) -> Result<Self> {
        let channels_in = config.channels_in;
        let channels_out = config.channels_out;

        if channels_in == 0
            || channels_out == 0
            || channels_in > MAX_CHANNELS
            || channels_out > MAX_CHANNELS
            || config.channel_map_in.len() != channels_in
            || config.channel_map_out.len() != channels_out
        {
            return Err(RsnError::InvalidArgs);
        }

        let weights = match config.mix_mode {
            MixMode::Custom => {
                let weights = config.weights.as_ref().ok_or(RsnError::InvalidArgs)?;
                if weights.len() != channels_in * channels_out {
                    return Err(RsnError::InvalidArgs);
                }
                weights.clone()
            }
            mode => synthesize_weights(
                &config.channel_map_in,
                &config.channel_map_out,
                mode,
            ),
        };

        let weights_q14 = weights.iter().map(|w| (w * 16384.0) as i32).collect();

        let mut shuffle = [0u8; MAX_CHANNELS];
        let path = if config.mix_mode == MixMode::Custom {
            RouterPath::Weights
        } else {
            detect_path(
                &config.channel_map_in,
                &config.channel_map_out,
                &mut shuffle,
            )
        };

        Ok(Self {
            channels_in,
            channels_out,
            weights,
            weights_q14,
            shuffle,
            path,
        })
    }

    /// Whether routing reduces to a plain copy.
    pub fn is_passthrough(&self) -> bool {
        self.path == RouterPath::Passthrough
    }

    /// The synthesized weight of an input/output channel pair.
    pub fn weight(&self, channel_in: usize, channel_out: usize) -> f32 {
        self.weights[channel_in * self.channels_out + channel_out]
    }

    pub fn channels_in(&self) -> usize {
        self.channels_in
    }

    pub fn channels_out(&self) -> usize {
        self.channels_out
    }

    /// Route interleaved f32 frames.
    pub fn process_f32(&self, dst: &mut [f32], src: &[f32], frame_count: usize) -> Result<()> {
        if src.len() < frame_count * self.channels_in
            || dst.len() < frame_count * self.channels_out
        {
            return Err(RsnError::InvalidArgs);
        }

        match self.path {
            RouterPath::Passthrough => {
                let samples = frame_count * self.channels_in;
                dst[..samples].copy_from_slice(&src[..samples]);
            }
            RouterPath::Shuffle => {
                for frame in 0..frame_count {
                    let s = frame * self.channels_in;
                    let d = frame * self.channels_out;
                    for ch_out in 0..self.channels_out {
                        dst[d + ch_out] = src[s + self.shuffle[ch_out] as usize];
                    }
                }
            }
            RouterPath::MonoExpand => {
                for frame in 0..frame_count {
                    let value = src[frame];
                    let d = frame * self.channels_out;
                    for ch_out in 0..self.channels_out {
                        dst[d + ch_out] = value * self.weights[ch_out];
                    }
                }
            }
            RouterPath::MonoCollapse => {
                for frame in 0..frame_count {
                    let s = frame * self.channels_in;
                    let mut sum = 0.0f32;
                    for ch_in in 0..self.channels_in {
                        sum += src[s + ch_in] * self.weights[ch_in * self.channels_out];
                    }
                    dst[frame] = sum;
                }
            }
            RouterPath::Weights => {
                for frame in 0..frame_count {
                    let s = frame * self.channels_in;
                    let d = frame * self.channels_out;
                    for ch_out in 0..self.channels_out {
                        let mut sum = 0.0f32;
                        for ch_in in 0..self.channels_in {
                            sum += src[s + ch_in]
                                * self.weights[ch_in * self.channels_out + ch_out];
                        }
                        dst[d + ch_out] = sum;
                    }
                }
            }
        }
        Ok(())
    }

    /// Route interleaved s16 frames using Q14 fixed-point weights.
    pub fn process_s16(&self, dst: &mut [i16], src: &[i16], frame_count: usize) -> Result<()> {
        if src.len() < frame_count * self.channels_in
            || dst.len() < frame_count * self.channels_out
        {
            return Err(RsnError::InvalidArgs);
        }

        match self.path {
            RouterPath::Passthrough => {
                let samples = frame_count * self.channels_in;
                dst[..samples].copy_from_slice(&src[..samples]);
            }
            RouterPath::Shuffle => {
                for frame in 0..frame_count {
                    let s = frame * self.channels_in;
                    let d = frame * self.channels_out;
                    for ch_out in 0..self.channels_out {
                        dst[d + ch_out] = src[s + self.shuffle[ch_out] as usize];
                    }
                }
            }
            _ => {
                for frame in 0..frame_count {
                    let s = frame * self.channels_in;
                    let d = frame * self.channels_out;
                    for ch_out in 0..self.channels_out {
                        let mut sum = 0i64;
                        for ch_in in 0..self.channels_in {
                            sum += src[s + ch_in] as i64
                                * self.weights_q14[ch_in * self.channels_out + ch_out] as i64;
                        }
                        dst[d + ch_out] =
                            ((sum >> 14).clamp(i16::MIN as i64, i16::MAX as i64)) as i16;
                    }
                }
            }
        }
        Ok(())
    }

    /// Route interleaved frames stored as raw bytes. The router's
    /// working formats are `F32` and `S16`; other formats must be
    /// converted before routing.
    pub fn process_pcm_frames(
        &self,
        dst: &mut [u8],
        src: &[u8],
        format: Format,
        frame_count: usize,
    ) -> Result<()> {
        match format {
            Format::F32 => {
                let src_samples: Vec<f32> = src
                    .chunks_exact(4)
                    .take(frame_count * self.channels_in)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                let mut dst_samples = vec![0.0f32; frame_count * self.channels_out];
                self.process_f32(&mut dst_samples, &src_samples, frame_count)?;
                for (bytes, sample) in dst.chunks_exact_mut(4).zip(dst_samples.iter()) {
                    bytes.copy_from_slice(&sample.to_le_bytes());
                }
                Ok(())
            }
            Format::S16 => {
                let src_samples: Vec<i16> = src
                    .chunks_exact(2)
                    .take(frame_count * self.channels_in)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                let mut dst_samples = vec![0i16; frame_count * self.channels_out];
                self.process_s16(&mut dst_samples, &src_samples, frame_count)?;
                for (bytes, sample) in dst.chunks_exact_mut(2).zip(dst_samples.iter()) {
                    bytes.copy_from_slice(&sample.to_le_bytes());
                }
                Ok(())
            }
            _ => Err(RsnError::InvalidArgs),
        }
    }
}

/// Build the `[in][out]` weight matrix for a non-custom mix mode.
fn synthesize_weights(map_in: &ChannelMap, map_out: &ChannelMap, mode: MixMode) -> Vec<f32> {
    let channels_in = map_in.len();
    let channels_out = map_out.len();
    let mut weights = vec![0.0f32; channels_in * channels_out];
    let mut handled_in = [false; MAX_CHANNELS];
    let mut handled_out = [false; MAX_CHANNELS];

    // Matched positions copy at unit weight. Each input feeds at most
    // one matched output and vice versa.
    for (i, pos_in) in map_in.positions().iter().enumerate() {
        if *pos_in == Channel::None {
            continue;
        }
        for (o, pos_out) in map_out.positions().iter().enumerate() {
            if handled_out[o] || pos_in != pos_out {
                continue;
            }
            weights[i * channels_out + o] = 1.0;
            handled_in[i] = true;
            handled_out[o] = true;
            break;
        }
    }

    // A mono input feeds every spatial output at unit weight.
    for (i, pos_in) in map_in.positions().iter().enumerate() {
        if *pos_in != Channel::Mono {
            continue;
        }
        for (o, pos_out) in map_out.positions().iter().enumerate() {
            if !handled_out[o] && pos_out.is_spatial() {
                weights[i * channels_out + o] = 1.0;
            }
        }
    }

    // A mono output averages every spatial input.
    for (o, pos_out) in map_out.positions().iter().enumerate() {
        if *pos_out != Channel::Mono || handled_out[o] {
            continue;
        }
        let spatial_in = map_in.positions().iter().filter(|p| p.is_spatial()).count();
        if spatial_in == 0 {
            continue;
        }
        for (i, pos_in) in map_in.positions().iter().enumerate() {
            if pos_in.is_spatial() {
                weights[i * channels_out + o] = 1.0 / spatial_in as f32;
            }
        }
    }

    // Planar blend spills unmatched spatial inputs into unmatched
    // spatial outputs by plane overlap. LFE stays isolated.
    if mode == MixMode::PlanarBlend {
        for (i, pos_in) in map_in.positions().iter().enumerate() {
            if handled_in[i] || !pos_in.is_spatial() {
                continue;
            }
            let in_ratios = pos_in.plane_ratios();
            for (o, pos_out) in map_out.positions().iter().enumerate() {
                if !pos_out.is_spatial() {
                    continue;
                }
                let out_ratios = pos_out.plane_ratios();
                let mut weight = 0.0f32;
                for plane in 0..6 {
                    weight += in_ratios[plane] * out_ratios[plane];
                }
                if weight > 0.0 {
                    weights[i * channels_out + o] = weight;
                }
            }
        }
    }

    weights
}

/// Detect the fast path for a non-custom router; fills `shuffle` when
/// the result is `Shuffle`.
fn detect_path(
    map_in: &ChannelMap,
    map_out: &ChannelMap,
    shuffle: &mut [u8; MAX_CHANNELS],
) -> RouterPath {
    if map_in == map_out {
        return RouterPath::Passthrough;
    }

    if map_in.len() == map_out.len() {
        let mut used = [false; MAX_CHANNELS];
        let mut is_shuffle = true;
        for (o, pos_out) in map_out.positions().iter().enumerate() {
            if *pos_out == Channel::None {
                is_shuffle = false;
                break;
            }
            match map_in
                .positions()
                .iter()
                .enumerate()
                .find(|(i, p)| !used[*i] && *p == pos_out)
            {
                Some((i, _)) => {
                    used[i] = true;
                    shuffle[o] = i as u8;
                }
                None => {
                    is_shuffle = false;
                    break;
                }
            }
        }
        if is_shuffle {
            return RouterPath::Shuffle;
        }
    }

    if map_in.len() == 1 && map_in.get(0) == Some(Channel::Mono) {
        let expandable = map_out
            .positions()
            .iter()
            .all(|p| p.is_spatial() || *p == Channel::Mono);
        if expandable {
            return RouterPath::MonoExpand;
        }
    }

    if map_out.len() == 1 && map_out.get(0) == Some(Channel::Mono) {
        let collapsible = map_in.positions().iter().any(|p| p.is_spatial());
        if collapsible {
            return RouterPath::MonoCollapse;
        }
    }

    RouterPath::Weights
}
