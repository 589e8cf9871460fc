//! Synchronous memory read exchange: the Handheld's initiator and the Console's responder.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::exchange::{Attempt, RESTART_QUIET_MS, ReadRequest, is_done, store_word};
use crate::link::{Link, LinkIo};
use crate::packet::{Crc16, Packet};

#[cfg(feature = "host")]
use crate::exchange::header_crc;
#[cfg(feature = "host")]
use crate::memory::MemoryMap;
#[cfg(feature = "host")]
use crate::packet::{Command, ControlWord};

/// Guest memory as seen from the Handheld: every access is a memory read exchange with the
/// Console.
///
/// This is the object handed to the emulator.  Reads block until they succeed, restarting
/// the exchange as many times as the link requires.
///
/// ```ignore
/// let mut memory = GuestMemory::new(&mut link_io);
/// let mut page = [0u8; 256];
/// memory.read_memory(0x8000, &mut page)?;
/// ```
pub struct GuestMemory<'a, I: LinkIo> {
    link: Link<'a, I>,
    restarts: u32,
}

impl<'a, I: LinkIo> GuestMemory<'a, I> {
    pub fn new(io: &'a mut I) -> Self {
        Self {
            link: Link::new(io),
            restarts: 0,
        }
    }

    /// Number of times an exchange has been restarted from the top since creation.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Fill `buf` with guest memory starting at `addr`.
    ///
    /// The request is rounded up to whole words.  Any bytes received beyond the end of
    /// `buf` are covered by the CRC check and then dropped.
    ///
    /// Only returns an error if the link reports one, or cancels a wait.
    ///
    /// If the Console rejects the header (it was corrupted on the way) it sends nothing
    /// back, and this waits for an ACK until [`LinkIo::cancelled()`] returns `true`.  With
    /// the default implementation, which never cancels, that wait does not end.  Links that
    /// can lose words should implement a timeout there and call this again on
    /// [`crate::Error::Cancelled`].
    pub fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let request = ReadRequest::new(addr, buf.len());
        debug!("Read {:#010X} ({} words)", request.addr, request.words);

        loop {
            match self.attempt(&request, buf)? {
                Attempt::Done => return Ok(()),
                Attempt::Restart => {
                    self.restarts += 1;
                    let stale = self.link.drain(RESTART_QUIET_MS)?;
                    warn!(
                        "Restarting read of {:#010X}, {stale} stale words discarded",
                        request.addr
                    );
                }
            }
        }
    }

    /// Write guest memory.
    ///
    /// MEMORY/WRITE is reserved on the wire, and the Console ignores it, so this sends
    /// nothing.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        warn!(
            "Memory write of {} bytes at {addr:#010X} not supported, dropped",
            data.len()
        );
        Ok(())
    }
}

// Internal functions
impl<I: LinkIo> GuestMemory<'_, I> {
    fn attempt(&mut self, request: &ReadRequest, buf: &mut [u8]) -> Result<Attempt> {
        self.link.send_packet(ReadRequest::command())?;
        if !self.link.recv_expect(Packet::ack())?.is_expected() {
            return Ok(Attempt::Restart);
        }

        for word in request.header() {
            self.link.send(word)?;
        }
        self.link.send_packet(request.header_done())?;
        if !self.link.recv_expect(Packet::ack())?.is_expected() {
            return Ok(Attempt::Restart);
        }

        let mut crc = Crc16::new();
        for index in 0..request.words as usize {
            let word = self.link.recv()?;
            store_word(buf, index, word, &mut crc);
        }

        let done = self.link.recv()?;
        if is_done(done, crc.finish()) {
            Ok(Attempt::Done)
        } else {
            debug!("Data CRC {:#06X} not confirmed by {done:#010X}", crc.finish());
            Ok(Attempt::Restart)
        }
    }
}

/// Serves memory read exchanges out of a [`MemoryMap`].
///
/// The Console creates one whenever a MEMORY/READ arrives, borrowing guest memory for the
/// duration of the exchange.
#[cfg(feature = "host")]
pub struct ReadResponder<'m> {
    memory: &'m MemoryMap,
    word_delay_us: u32,
}

#[cfg(feature = "host")]
impl<'m> ReadResponder<'m> {
    /// `word_delay_us` is waited before and after every data word sent.
    pub fn new(memory: &'m MemoryMap, word_delay_us: u32) -> Self {
        Self {
            memory,
            word_delay_us,
        }
    }

    /// Serve the exchange opened by `command`, which has already been received.
    ///
    /// Returns the request served, or `None` if the header failed its checks and the
    /// exchange was abandoned.  The initiator will restart it.
    pub fn serve<I: LinkIo>(
        &self,
        link: &mut Link<'_, I>,
        command: ControlWord,
    ) -> Result<Option<ReadRequest>> {
        link.send_packet(Packet::ack())?;

        // A copy of the command here is either a duplicate on the link or the initiator
        // restarting after losing our ACK.  Acknowledge it again: the initiator drains
        // before restarting, so any surplus ACK only costs it one more restart.
        let addr = loop {
            let word = link.recv()?;
            if word != command.raw() {
                break word;
            }
            trace!("Repeated MEMORY/READ, acknowledging again");
            link.send_packet(Packet::ack())?;
        };
        let words = link.recv()?;
        let done = link.recv()?;

        match ControlWord(done).decode() {
            Some(packet) if packet.command == Command::MwTxDone && packet.id == 0 => {
                let crc = header_crc(addr, words);
                if packet.data != crc {
                    debug!(
                        "Read header CRC mismatch {:#06X} != {crc:#06X} ({addr:#010X}, {words})",
                        packet.data
                    );
                    return Ok(None);
                }
            }
            _ => {
                debug!("Expected MW_TX_DONE after read header, got {done:#010X}");
                return Ok(None);
            }
        }

        link.send_packet(Packet::ack())?;
        debug!("Serving read of {addr:#010X} ({words} words)");

        let mut crc = Crc16::new();
        let mut warned = false;
        for index in 0..words {
            let guest = addr.wrapping_add(index.wrapping_mul(4));
            let word = match self.memory.read_word(guest) {
                Ok(word) => word,
                Err(e) => {
                    if !warned {
                        warn!("Read of {guest:#010X}: {e}, sending zeros");
                        warned = true;
                    }
                    0
                }
            };
            link.delay_us(self.word_delay_us);
            link.send(word)?;
            link.delay_us(self.word_delay_us);
            crc.update(&word.to_be_bytes());
        }

        link.send_packet(Packet::new(Command::MwTxDone, crc.finish()))?;
        Ok(Some(ReadRequest { addr, words }))
    }

    /// MEMORY/WRITE is reserved and deliberately inert.
    pub fn serve_write(&self, command: ControlWord) {
        debug!("Ignoring MEMORY/WRITE {:#010X}", command.raw());
    }
}
