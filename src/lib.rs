//! Remote memory and boot-image service for a memory-constrained handheld connected to a
//! memory-rich console over a narrow, synchronous, serial link cable.
//!
//! The handheld runs a small emulator kernel whose working memory does not fit on the
//! device.  The console holds that memory instead and answers read requests issued by the
//! handheld over the link.  Before that can happen the console has to boot the handheld:
//! it streams a loader image through the handheld's boot ROM ("multiboot"), confirms the
//! loader is alive with a handshake, stages the kernel image in guest memory and tells the
//! handheld to start it.
//!
//! `no_std`.  The console side requires `alloc` (the `host` feature).
//!
//! ## Architecture
//!
//! Assumes a Console (memory and image supplier) and Handheld (memory consumer)
//! architecture.  Every exchange is made of 32-bit words, moved one at a time through the
//! link cable with no retransmission and no framing.  Words are either:
//! - **Control words** ([`packet::ControlWord`]) carrying a class, subcommand, command id,
//!   16 bits of data and a CRC-8, or
//! - **Raw words**, such as addresses, lengths, image words and memory contents, which are
//!   protected by a CRC carried in a neighbouring control word.
//!
//! A word that fails its CRC is indistinguishable from line noise.  It is never treated as
//! an error, only ignored, or used as the trigger to restart the current exchange from the
//! top.
//!
//! Both ends are single-threaded and poll driven.  Every wait is a busy-poll on a link
//! readiness flag, routed through [`link::Link`] so that the link implementation can abort
//! it (see [`link::LinkIo::cancelled()`]).
//!
//! ## Modules
//!
//! - [`packet`] - Control word codec and the CRCs used on the link
//! - [`link`] - Link traits for word I/O, and the blocking primitives built on them
//! - [`multiboot`] - Encrypted boot-image transfer through the handheld's boot ROM
//! - [`handshake`] - Ping handshake proving both ends speak the protocol, and the kernel
//!   load acknowledgement
//! - [`exchange`] - Memory read exchange, issued by the handheld and served by the console
//! - [`memory`] - Guest memory made of one or more host buffers (`host` feature)
//! - [`commands`] - Table of outstanding commands awaiting acknowledgement (`host` feature)
//! - [`io`] - Image source trait, used by the console to fetch boot images (`host`
//!   feature)
//! - [`session`] - Console session state machine (`host` feature)
//!
//! ## Getting Started
//!
//! **Console setup**:
//! 1. Implement [`link::LinkIo`] for your link cable port
//! 2. Implement [`io::ImageSource`] to provide the loader and kernel images
//! 3. Build a [`memory::MemoryMap`] from the buffers backing guest memory
//! 4. Create a [`session::Session`] and call [`session::Session::run()`], or call
//!    [`session::Session::poll()`] from your own main loop
//!
//! **Handheld setup** (once the loader is running):
//! 1. Implement [`link::LinkIo`] (or [`link::AsyncLinkIo`]) for the serial registers
//! 2. Call [`handshake::respond()`] and then [`handshake::await_kernel_load()`]
//! 3. Hand a [`exchange::GuestMemory`] (or [`exchange::AsyncGuestMemory`]) to the
//!    emulator, which calls `read_memory()` whenever it needs guest memory
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async memory read client and the [`link::AsyncLinkIo`] trait
//!   (requires `alloc`).
//! - `host` - Enable the console side: guest memory, command table, image source and
//!   session (requires `alloc`).
//!
//! Compile with `--no-default-features` for an allocation-free handheld build.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(any(feature = "async", feature = "host"))]
extern crate alloc;

#[cfg(feature = "host")]
pub mod commands;
pub mod exchange;
pub mod handshake;
#[cfg(feature = "host")]
pub mod io;
pub mod link;
#[cfg(feature = "host")]
pub mod memory;
pub mod multiboot;
pub mod packet;
#[cfg(feature = "host")]
pub mod session;

#[cfg(test)]
mod testing;

/// Link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A wait was abandoned because the link asked for it to be
    Cancelled,
    /// I/O error reported by the link implementation
    Io,
    /// The image source could not supply an image
    ImageUnavailable,
    /// Image is at or over its size ceiling
    ImageTooLarge,
    /// Image is too short to carry a multiboot header
    ImageTooSmall,
    /// Guest memory is too small for the requested operation
    OutOfMemory,
    /// Guest address does not resolve to host memory
    InvalidAddress,
}

impl Error {
    /// Whether the session cannot continue after this error.
    ///
    /// Fatal errors come from the environment (missing or oversized images, not enough
    /// memory) and no amount of retrying on the link can fix them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ImageUnavailable
                | Error::ImageTooLarge
                | Error::ImageTooSmall
                | Error::OutOfMemory
        )
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Cancelled => write!(f, "wait cancelled"),
            Error::Io => write!(f, "link I/O error"),
            Error::ImageUnavailable => write!(f, "image unavailable"),
            Error::ImageTooLarge => write!(f, "image too large"),
            Error::ImageTooSmall => write!(f, "image too small for a multiboot header"),
            Error::OutOfMemory => write!(f, "guest memory too small"),
            Error::InvalidAddress => write!(f, "invalid guest address"),
        }
    }
}

/// Type to represent the result of a link operation
pub type Result<T> = core::result::Result<T, Error>;
