//! Link cable access, one 32-bit word at a time.
//!
//! The physical link moves a single word per transfer, has no framing and never
//! retransmits.  Implementations of [`LinkIo`] (or [`AsyncLinkIo`]) expose the raw
//! registers and flags; [`Link`] turns them into the blocking send/receive primitives the
//! protocols are written against.
//!
//! ## Byte order
//!
//! A link word is the little-endian interpretation of the four bytes on the wire, the
//! first byte on the wire being the least significant.  Implementations on big-endian
//! hosts must convert.
//!
//! See [`crate`] for a description of how the protocols use these objects.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncLink, AsyncLinkIo};
pub use sync::{Link, LinkIo};

use crate::packet::{ControlWord, Packet};

/// How long a multiboot word send may wait for the peer before being given up on.
pub const SEND_TIMEOUT_MS: u32 = 60;

/// Gap left before and after each data word sent by the memory read responder.  The link
/// desynchronizes under back-to-back bursts.
pub const READ_WORD_DELAY_US: u32 = 1000;

/// What a receive returned, once classified against the packet that was expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Valid and exactly the expected packet
    Expected,
    /// Valid, but some other packet
    Other(Packet),
    /// Failed its checksum, or carries an unknown command
    Noise(u32),
}

impl Received {
    pub fn is_expected(&self) -> bool {
        *self == Received::Expected
    }
}

// Helper functions

fn classify(word: u32, expected: Packet) -> Received {
    match ControlWord(word).decode() {
        Some(packet) if packet == expected => Received::Expected,
        Some(packet) => Received::Other(packet),
        None => Received::Noise(word),
    }
}
