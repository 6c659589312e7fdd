//! # RSN Core
//!
//! This crate contains the core mechanisms and utilities used
//! throughout this workspace: the shared error taxonomy, lock-free
//! SPSC ring buffers, a small PRNG, and threading primitives for
//! device worker threads.

pub mod error;
pub mod random;
pub mod ring;
pub mod thread;

pub use error::{Result, RsnError};
pub use random::XorShiftRng;
pub use ring::{
    PcmRingReader, PcmRingWriter, RingReader, RingWriter, pcm_ring_buffer, ring_buffer,
    ring_buffer_ex,
};
pub use thread::{Event, ThreadPriority, spawn_worker};
