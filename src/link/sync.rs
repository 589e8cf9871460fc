//! Synchronous link - used by both the Console and the Handheld.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::link::{Received, classify};
use crate::packet::Packet;
use crate::{Error, Result};

/// Trait for accessing the link cable hardware.
///
/// Sync version, typically implemented directly on top of the serial registers or a
/// polled controller interface.
pub trait LinkIo {
    /// Place a word in the transmit register
    fn write_word(&mut self, word: u32) -> Result<()>;

    /// Take the word waiting in the receive register
    fn read_word(&mut self) -> Result<u32>;

    /// Transmit register is free, i.e. the peer has collected the previous word
    fn transmit_ready(&mut self) -> bool;

    /// A word is waiting in the receive register
    fn receive_pending(&mut self) -> bool;

    /// A peer device is attached to the link
    fn device_present(&mut self) -> bool;

    /// The peer's boot ROM is waiting for a multiboot image.  Implementations that need to
    /// reset the link and query status to find this out should do so here.
    fn boot_ready(&mut self) -> bool {
        true
    }

    /// Free-running millisecond counter, used for send timeouts.  May wrap.
    fn millis(&mut self) -> u32;

    /// Busy-wait for the given number of microseconds
    fn delay_us(&mut self, us: u32);

    /// Called between readiness checks while waiting.  Returning `true` abandons the wait
    /// with [`Error::Cancelled`].
    fn cancelled(&mut self) -> bool {
        false
    }
}

/// Blocking word-level access to the link.
///
/// Short-lived: create, use, drop.  This allows temporary ownership of the [`LinkIo`],
/// which is usually a shared hardware resource.
pub struct Link<'a, I: LinkIo> {
    io: &'a mut I,
}

impl<'a, I: LinkIo> Link<'a, I> {
    pub fn new(io: &'a mut I) -> Self {
        Self { io }
    }

    /// Send a raw word, waiting for the transmit register before and after.
    pub fn send(&mut self, word: u32) -> Result<()> {
        self.wait_transmit_ready()?;
        self.io.write_word(word)?;
        self.wait_transmit_ready()
    }

    /// Send a raw word, giving up on it if the peer has not collected it within
    /// `timeout_ms`.
    ///
    /// Returns whether the word was collected.  A word that was given up on may or may
    /// not have reached the peer.
    pub fn send_timeout(&mut self, word: u32, timeout_ms: u32) -> Result<bool> {
        self.io.write_word(word)?;
        let start = self.io.millis();
        loop {
            if self.io.transmit_ready() {
                return Ok(true);
            }
            if self.io.millis().wrapping_sub(start) > timeout_ms {
                trace!("Gave up sending {word:#010X} after {timeout_ms}ms");
                return Ok(false);
            }
            self.check_cancelled()?;
        }
    }

    /// Encode and send a control word.
    pub fn send_packet(&mut self, packet: Packet) -> Result<()> {
        self.send(packet.encode().raw())
    }

    /// Receive a raw word, waiting for one to arrive.
    pub fn recv(&mut self) -> Result<u32> {
        loop {
            if self.io.receive_pending() {
                return self.io.read_word();
            }
            self.check_cancelled()?;
        }
    }

    /// Receive one word and classify it against the expected packet.
    pub fn recv_expect(&mut self, expected: Packet) -> Result<Received> {
        let word = self.recv()?;
        let received = classify(word, expected);
        if !received.is_expected() {
            trace!("Expected {expected:?}, got {received:?}");
        }
        Ok(received)
    }

    /// Receive until the expected packet arrives, ignoring everything else.
    pub fn wait_for(&mut self, expected: Packet) -> Result<()> {
        while !self.recv_expect(expected)?.is_expected() {}
        Ok(())
    }

    /// Discard received words until none has arrived for `quiet_ms`.
    ///
    /// Returns the number of words discarded.
    pub fn drain(&mut self, quiet_ms: u32) -> Result<usize> {
        let mut discarded = 0;
        let mut start = self.io.millis();
        loop {
            if self.io.receive_pending() {
                let word = self.io.read_word()?;
                trace!("Discarding {word:#010X}");
                discarded += 1;
                start = self.io.millis();
            } else if self.io.millis().wrapping_sub(start) > quiet_ms {
                return Ok(discarded);
            } else {
                self.check_cancelled()?;
            }
        }
    }

    /// Busy-poll `ready` until it returns `true`, or the wait is cancelled.
    pub fn wait_until(&mut self, mut ready: impl FnMut(&mut I) -> bool) -> Result<()> {
        loop {
            if ready(&mut *self.io) {
                return Ok(());
            }
            self.check_cancelled()?;
        }
    }

    pub fn delay_us(&mut self, us: u32) {
        self.io.delay_us(us)
    }

    /// Access the underlying [`LinkIo`]
    pub fn io(&mut self) -> &mut I {
        &mut *self.io
    }
}

// Internal functions
impl<I: LinkIo> Link<'_, I> {
    fn wait_transmit_ready(&mut self) -> Result<()> {
        self.wait_until(|io| io.transmit_ready())
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.io.cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
