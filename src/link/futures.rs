//! Asynchronous link - typically used by a Handheld whose emulator runs under an executor.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::link::{Received, classify};
use crate::packet::Packet;

/// Trait for accessing the link cable hardware.
///
/// Async version.  Implementations suspend until the transmit register is free or a word
/// has arrived, typically driven by the serial interrupt, rather than busy-polling.  They
/// are also responsible for any cancellation, by returning
/// [`crate::Error::Cancelled`].
#[async_trait(?Send)]
pub trait AsyncLinkIo {
    /// Send a word, returning once the peer has collected it
    async fn send(&mut self, word: u32) -> Result<()>;

    /// Receive the next word
    async fn recv(&mut self) -> Result<u32>;

    /// Receive the next word if one arrives within `timeout_ms`.
    ///
    /// Used to discard stale words before an exchange is restarted.  The default reports
    /// that nothing arrived, which is only correct for links that never buffer words.
    async fn recv_timeout(&mut self, _timeout_ms: u32) -> Result<Option<u32>> {
        Ok(None)
    }
}

/// Word-level access to an async link.
pub struct AsyncLink<'a, I: AsyncLinkIo> {
    io: &'a mut I,
}

impl<'a, I: AsyncLinkIo> AsyncLink<'a, I> {
    pub fn new(io: &'a mut I) -> Self {
        Self { io }
    }

    /// Send a raw word.
    pub async fn send(&mut self, word: u32) -> Result<()> {
        self.io.send(word).await
    }

    /// Encode and send a control word.
    pub async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        self.io.send(packet.encode().raw()).await
    }

    /// Receive a raw word.
    pub async fn recv(&mut self) -> Result<u32> {
        self.io.recv().await
    }

    /// Receive one word and classify it against the expected packet.
    pub async fn recv_expect(&mut self, expected: Packet) -> Result<Received> {
        let word = self.io.recv().await?;
        let received = classify(word, expected);
        if !received.is_expected() {
            trace!("Expected {expected:?}, got {received:?}");
        }
        Ok(received)
    }

    /// Discard received words until none has arrived for `quiet_ms`.
    ///
    /// Returns the number of words discarded.
    pub async fn drain(&mut self, quiet_ms: u32) -> Result<usize> {
        let mut discarded = 0;
        while let Some(word) = self.io.recv_timeout(quiet_ms).await? {
            trace!("Discarding {word:#010X}");
            discarded += 1;
        }
        Ok(discarded)
    }

    /// Receive until the expected packet arrives, ignoring everything else.
    pub async fn wait_for(&mut self, expected: Packet) -> Result<()> {
        while !self.recv_expect(expected).await?.is_expected() {}
        Ok(())
    }
}
