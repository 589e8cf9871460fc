//! Console session: boots the Handheld and then serves its memory.
//!
//! A [`Session`] is a poll-driven state machine.  Each call to [`Session::poll()`] does
//! the work of the current state, and either advances to the next state or stays put to
//! try again on the next poll:
//!
//! ```text
//!   LoadLoaderImage -> WaitForDevice -> PrepareMultiboot -> Multiboot -> HandshakeWait
//!     -> LoadKernelImage -> SendKernel -> Ready
//! ```
//!
//! States never go backwards.  `Ready` is the steady state, dispatching each control word
//! received from the Handheld.
//!
//! Errors come in two tiers (see [`Error::is_fatal()`]).  Protocol failures are retried by
//! staying in the same state.  Fatal errors, such as a missing or oversized image, end the
//! session: [`Session::run()`] reports them, waits out the grace delay and returns
//! [`SessionExit::Fatal`], which the caller should turn into a non-zero exit status with
//! [`SessionExit::code()`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::commands::CommandTable;
use crate::exchange::ReadResponder;
use crate::handshake::{self, Progress};
use crate::io::{ImageKind, ImageSource};
use crate::link::{Link, LinkIo, READ_WORD_DELAY_US, SEND_TIMEOUT_MS};
use crate::memory::MemoryMap;
use crate::multiboot::{HEADER_SIZE, Multiboot, prepare_image};
use crate::packet::{Command, ControlWord, Packet};
use crate::{Error, Result};

/// Largest loader image accepted is one byte less than this.
pub const LOADER_LIMIT: usize = 256 * 1024;

/// Largest kernel image accepted is one byte less than this.
pub const KERNEL_LIMIT: usize = 16 * 1024 * 1024;

/// Wait after reporting a fatal error, so the diagnostic can be read.
pub const GRACE_DELAY_MS: u32 = 5000;

/// Where the session is in booting and serving the Handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    LoadLoaderImage,
    WaitForDevice,
    PrepareMultiboot,
    Multiboot,
    HandshakeWait,
    LoadKernelImage,
    SendKernel,
    Ready,
}

/// Session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Loader images of this size or larger are rejected
    pub loader_limit: usize,
    /// Kernel images of this size or larger are rejected
    pub kernel_limit: usize,
    /// How long each multiboot word may wait to be collected
    pub send_timeout_ms: u32,
    /// Delay before and after each word of a memory read response
    pub read_word_delay_us: u32,
    /// Delay after a fatal error before the session returns
    pub grace_delay_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loader_limit: LOADER_LIMIT,
            kernel_limit: KERNEL_LIMIT,
            send_timeout_ms: SEND_TIMEOUT_MS,
            read_word_delay_us: READ_WORD_DELAY_US,
            grace_delay_ms: GRACE_DELAY_MS,
        }
    }
}

/// Why [`Session::run()`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The exit hook, or the link, asked for the session to end
    Requested,
    /// The session could not continue
    Fatal(Error),
}

impl SessionExit {
    /// Process exit status for this outcome.
    pub fn code(&self) -> i32 {
        match self {
            SessionExit::Requested => 0,
            SessionExit::Fatal(_) => 1,
        }
    }
}

/// Console session.
///
/// Owns the link, the image source and guest memory for its lifetime.
///
/// Example usage:
///
/// ```ignore
/// let memory = MemoryMap::from_regions([Region::zeroed(24 << 20), Region::zeroed(16 << 20)]);
/// let mut session = Session::new(link_io, images, memory, SessionConfig::default());
/// let exit = session.run(|| reset_pressed());
/// std::process::exit(exit.code());
/// ```
pub struct Session<I: LinkIo, S: ImageSource> {
    io: I,
    source: S,
    memory: MemoryMap,
    config: SessionConfig,
    state: SessionState,
    loader: Vec<u8>,
    kernel: Option<Vec<u8>>,
    commands: CommandTable,
}

impl<I: LinkIo, S: ImageSource> Session<I, S> {
    /// Create a new session, in [`SessionState::LoadLoaderImage`].
    ///
    /// Arguments:
    /// - `io`: Link to the handheld
    /// - `source`: Supplier of the loader and kernel images
    /// - `memory`: Guest memory, which the kernel is staged into and reads are served from
    /// - `config`: Limits and timings
    pub fn new(io: I, source: S, memory: MemoryMap, config: SessionConfig) -> Self {
        Self {
            io,
            source,
            memory,
            config,
            state: SessionState::LoadLoaderImage,
            loader: Vec::new(),
            kernel: None,
            commands: CommandTable::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn memory(&self) -> &MemoryMap {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryMap {
        &mut self.memory
    }

    /// Commands awaiting acknowledgement.  Completed from the `Ready` state.
    pub fn commands_mut(&mut self) -> &mut CommandTable {
        &mut self.commands
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    /// Do the work of the current state.
    ///
    /// Returns an error if the state failed.  The session stays in that state, so polling
    /// again retries it, which is only worthwhile if the error is not fatal.
    pub fn poll(&mut self) -> Result<()> {
        match self.state {
            SessionState::LoadLoaderImage => {
                let image = self.load_image(ImageKind::Loader, self.config.loader_limit)?;
                if image.len() < HEADER_SIZE {
                    error!(
                        "Loader image is {} bytes, too small for its header",
                        image.len()
                    );
                    return Err(Error::ImageTooSmall);
                }
                self.loader = image;
                self.advance(SessionState::WaitForDevice);
            }
            SessionState::WaitForDevice => {
                if self.io.device_present() {
                    info!("Device found");
                    self.advance(SessionState::PrepareMultiboot);
                }
            }
            SessionState::PrepareMultiboot => {
                prepare_image(&mut self.loader);
                self.advance(SessionState::Multiboot);
            }
            SessionState::Multiboot => {
                let mut link = Link::new(&mut self.io);
                let mut multiboot = Multiboot::new(&mut link, self.config.send_timeout_ms);
                multiboot.wait_boot_ready()?;
                info!("Sending loader, {} bytes", self.loader.len());
                let transfer = multiboot.transfer(&self.loader)?;
                debug!("Multiboot transfer: {transfer:?}");
                info!("Multiboot complete");
                self.advance(SessionState::HandshakeWait);
            }
            SessionState::HandshakeWait => {
                let progress = handshake::initiate(&mut Link::new(&mut self.io))?;
                match progress {
                    Progress::Done => self.advance(SessionState::LoadKernelImage),
                    Progress::Retry => debug!("Ping not acknowledged, retrying"),
                }
            }
            SessionState::LoadKernelImage => {
                let image = self.load_image(ImageKind::Kernel, self.config.kernel_limit)?;
                if image.len() > self.memory.size() {
                    error!(
                        "Kernel image is {} bytes, guest memory only {}",
                        image.len(),
                        self.memory.size()
                    );
                    return Err(Error::OutOfMemory);
                }
                self.kernel = Some(image);
                self.advance(SessionState::SendKernel);
            }
            SessionState::SendKernel => {
                // Kept until staged, so a failed load is retried by the next poll
                if let Some(kernel) = &self.kernel {
                    self.memory.load(0, kernel)?;
                    info!("Kernel staged in guest memory, {} bytes", kernel.len());
                    self.kernel = None;
                }

                let mut link = Link::new(&mut self.io);
                link.send_packet(Packet::new(Command::KernelLoad, 0))?;
                if link.recv_expect(Packet::ack())?.is_expected() {
                    info!("Device is booting the kernel, serving memory");
                    self.advance(SessionState::Ready);
                } else {
                    warn!("Kernel load not acknowledged, resending");
                }
            }
            SessionState::Ready => self.dispatch()?,
        }
        Ok(())
    }

    /// Poll until `exit` returns `true`, or the session fails.
    ///
    /// `exit` is checked once before each poll.  A wait cancelled by the link is treated
    /// as an exit request.  Fatal errors are logged, and return after the configured grace
    /// delay.  Other errors are logged and the state retried.
    pub fn run(&mut self, mut exit: impl FnMut() -> bool) -> SessionExit {
        loop {
            if exit() {
                info!("Exit requested");
                return SessionExit::Requested;
            }

            match self.poll() {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    info!("Link wait cancelled in {:?}, exiting", self.state);
                    return SessionExit::Requested;
                }
                Err(e) if e.is_fatal() => {
                    error!("Fatal error in {:?}: {e}", self.state);
                    self.io
                        .delay_us(self.config.grace_delay_ms.saturating_mul(1000));
                    return SessionExit::Fatal(e);
                }
                Err(e) => warn!("Error in {:?}: {e}, retrying", self.state),
            }
        }
    }
}

// Internal functions
impl<I: LinkIo, S: ImageSource> Session<I, S> {
    fn advance(&mut self, state: SessionState) {
        debug!("State {:?} -> {state:?}", self.state);
        self.state = state;
    }

    fn load_image(&mut self, kind: ImageKind, limit: usize) -> Result<Vec<u8>> {
        let image = self.source.load(kind).map_err(|e| {
            error!("Failed to load {kind} image: {e:?}");
            Error::ImageUnavailable
        })?;
        if image.len() >= limit {
            error!(
                "{kind} image is {} bytes, must be under {limit}",
                image.len()
            );
            return Err(Error::ImageTooLarge);
        }
        info!("Loaded {kind} image, {} bytes", image.len());
        Ok(image)
    }

    // Handle one control word in the steady state, if there is one.
    fn dispatch(&mut self) -> Result<()> {
        if !self.io.receive_pending() {
            return Ok(());
        }

        let mut link = Link::new(&mut self.io);
        let word = ControlWord(link.recv()?);
        let Some(packet) = word.decode() else {
            if word.is_valid() && word.raw() != 0 {
                warn!(
                    "Unknown command class {} subcommand {} ({:#010X})",
                    word.class(),
                    word.subcommand(),
                    word.raw()
                );
            } else {
                trace!("Ignoring invalid word {:#010X}", word.raw());
            }
            return Ok(());
        };

        match packet.command {
            Command::Ack => {
                self.commands.complete(word);
            }
            Command::MwTxDone | Command::Ping | Command::PingReply | Command::KernelLoad => {
                warn!("Unexpected SYSTEM command {:?} in steady state", packet.command);
            }
            Command::MemRead => {
                let responder = ReadResponder::new(&self.memory, self.config.read_word_delay_us);
                if responder.serve(&mut link, word)?.is_none() {
                    debug!("Read abandoned, waiting for restart");
                }
            }
            Command::MemWrite => {
                ReadResponder::new(&self.memory, self.config.read_word_delay_us).serve_write(word);
            }
        }
        Ok(())
    }
}
