//! Asynchronous memory read initiator - typically used by a Handheld whose emulator runs
//! under an executor.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::exchange::{Attempt, RESTART_QUIET_MS, ReadRequest, is_done, store_word};
use crate::link::{AsyncLink, AsyncLinkIo};
use crate::packet::{Crc16, Packet};

/// Async version of [`crate::exchange::GuestMemory`].
///
/// The exchange is identical.  Waiting is delegated to the [`AsyncLinkIo`]
/// implementation, which keeps this crate free of any specific async runtime.
///
/// ```ignore
/// let mut memory = AsyncGuestMemory::new(&mut link_io);
/// let mut page = [0u8; 256];
/// memory.read_memory(0x8000, &mut page).await?;
/// ```
pub struct AsyncGuestMemory<'a, I: AsyncLinkIo> {
    link: AsyncLink<'a, I>,
    restarts: u32,
}

impl<'a, I: AsyncLinkIo> AsyncGuestMemory<'a, I> {
    pub fn new(io: &'a mut I) -> Self {
        Self {
            link: AsyncLink::new(io),
            restarts: 0,
        }
    }

    /// Number of times an exchange has been restarted from the top since creation.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Fill `buf` with guest memory starting at `addr`, restarting as necessary.
    ///
    /// As with the sync version, a header the Console rejected leaves this waiting for an
    /// ACK until the [`AsyncLinkIo`] gives up with [`crate::Error::Cancelled`].
    pub async fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let request = ReadRequest::new(addr, buf.len());
        debug!("Read {:#010X} ({} words)", request.addr, request.words);

        loop {
            match self.attempt(&request, buf).await? {
                Attempt::Done => return Ok(()),
                Attempt::Restart => {
                    self.restarts += 1;
                    let stale = self.link.drain(RESTART_QUIET_MS).await?;
                    warn!(
                        "Restarting read of {:#010X}, {stale} stale words discarded",
                        request.addr
                    );
                }
            }
        }
    }

    /// Write guest memory.  Reserved on the wire, so this only logs.
    pub async fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        warn!(
            "Memory write of {} bytes at {addr:#010X} not supported, dropped",
            data.len()
        );
        Ok(())
    }
}

// Internal functions
impl<I: AsyncLinkIo> AsyncGuestMemory<'_, I> {
    async fn attempt(&mut self, request: &ReadRequest, buf: &mut [u8]) -> Result<Attempt> {
        self.link.send_packet(ReadRequest::command()).await?;
        if !self.link.recv_expect(Packet::ack()).await?.is_expected() {
            return Ok(Attempt::Restart);
        }

        for word in request.header() {
            self.link.send(word).await?;
        }
        self.link.send_packet(request.header_done()).await?;
        if !self.link.recv_expect(Packet::ack()).await?.is_expected() {
            return Ok(Attempt::Restart);
        }

        let mut crc = Crc16::new();
        for index in 0..request.words as usize {
            let word = self.link.recv().await?;
            store_word(buf, index, word, &mut crc);
        }

        let done = self.link.recv().await?;
        if is_done(done, crc.finish()) {
            Ok(Attempt::Done)
        } else {
            debug!("Data CRC {:#06X} not confirmed by {done:#010X}", crc.finish());
            Ok(Attempt::Restart)
        }
    }
}
