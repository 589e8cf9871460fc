//! Memory read exchange, between the Handheld (initiator) and the Console (responder).
//!
//! ```text
//!   Handheld                                  Console
//!      | ---- MEMORY/READ (data = 2) -------------> |
//!      | <--- SYSTEM/ACK --------------------------- |
//!      | ---- address ------------------------------> |
//!      | ---- word count ---------------------------> |
//!      | ---- SYSTEM/MW_TX_DONE (CRC-16 of header) --> |
//!      | <--- SYSTEM/ACK --------------------------- |
//!      | <--- data word 0 .. n-1 ------------------- |
//!      | <--- SYSTEM/MW_TX_DONE (CRC-16 of data) --- |
//! ```
//!
//! The initiator restarts the whole exchange from the top if anything other than the
//! expected packet arrives, or if the data CRC does not match.  There is no partial
//! resume.  Before restarting it discards inbound words until the link has been quiet for
//! [`RESTART_QUIET_MS`], so that the tail of the abandoned exchange is not read as a reply
//! to the new one.
//!
//! The responder acknowledges a MEMORY/READ that arrives again while it waits for the
//! address: the initiator lost the first ACK and restarted.  A drained initiator sends at
//! most one such repeat per restart.
//!
//! The responder never sends a NACK.  If the header fails its checks it goes back to
//! waiting for the next command, and the initiator waits for its second ACK until the link
//! cancels the wait.  A [`crate::link::LinkIo`] that never cancels leaves it waiting
//! forever.
//!
//! The CRC-16 over the header is computed over the address and then the word count, each
//! most significant byte first.  Data words carry guest memory with the first byte as the
//! most significant, so that the bytes read out of [`u32::to_be_bytes()`] are the guest
//! bytes in order.
//!
//! See [`GuestMemory`] (or [`AsyncGuestMemory`]) for the initiator and [`ReadResponder`]
//! for the responder.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::AsyncGuestMemory;
#[cfg(feature = "host")]
pub use sync::ReadResponder;
pub use sync::GuestMemory;

use crate::packet::{Command, ControlWord, Crc16, Packet, crc16};

/// Number of raw header words following MEMORY/READ: address and word count.
pub const HEADER_WORDS: u16 = 2;

/// How long the link must be idle before an initiator restarts an exchange.  Longer than
/// the responder's gap between data words.
pub const RESTART_QUIET_MS: u32 = 20;

/// Result of one attempt at an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Exchange completed and the data is valid
    Done,
    /// Something went wrong on the link, start again from the top
    Restart,
}

/// Address and length of a memory read, as carried in the exchange header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Guest address of the first byte
    pub addr: u32,
    /// Number of 32-bit words to transfer
    pub words: u32,
}

impl ReadRequest {
    /// Request covering `len` bytes at `addr`, rounded up to whole words.
    pub fn new(addr: u32, len: usize) -> Self {
        Self {
            addr,
            words: len.div_ceil(4) as u32,
        }
    }

    /// The MEMORY/READ command opening the exchange.
    pub fn command() -> Packet {
        Packet::new(Command::MemRead, HEADER_WORDS)
    }

    /// Raw header words, in the order they are sent.
    pub fn header(&self) -> [u32; 2] {
        [self.addr, self.words]
    }

    /// CRC-16 protecting the header.
    pub fn crc(&self) -> u16 {
        header_crc(self.addr, self.words)
    }

    /// The MW_TX_DONE closing the header.
    pub fn header_done(&self) -> Packet {
        Packet::new(Command::MwTxDone, self.crc())
    }

    /// Total bytes transferred.
    pub fn byte_len(&self) -> usize {
        self.words as usize * 4
    }
}

/// CRC-16 over an address and word count.
pub fn header_crc(addr: u32, words: u32) -> u16 {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&addr.to_be_bytes());
    bytes[4..].copy_from_slice(&words.to_be_bytes());
    crc16(&bytes)
}

// Helper functions

// Whether `word` is the MW_TX_DONE closing a run of words with the given CRC.
fn is_done(word: u32, crc: u16) -> bool {
    ControlWord(word).decode() == Some(Packet::new(Command::MwTxDone, crc))
}

// Fold a received data word into the CRC and copy as much of it as fits into `buf` at
// word `index`.
fn store_word(buf: &mut [u8], index: usize, word: u32, crc: &mut Crc16) {
    let bytes = word.to_be_bytes();
    crc.update(&bytes);
    let start = index * 4;
    if start < buf.len() {
        let end = buf.len().min(start + 4);
        buf[start..end].copy_from_slice(&bytes[..end - start]);
    }
}
