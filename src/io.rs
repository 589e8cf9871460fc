//! Image source trait, used by the Console to fetch the boot images it sends.
//!
//! The session asks for each image once: the loader when it starts, and the kernel after
//! the handshake.  Where the bytes come from is up to the implementation.
//!
//! # Possible implementations
//!
//! - For PC-based consoles or tests: in-memory buffers, or files read from disk
//! - For a real console: files on an SD card or DVD, read through the platform's
//!   filesystem layer
//!
//! Any error returned is fatal to the session, which cannot continue without the image.
//! It is logged with its `Debug` representation and reported as
//! [`crate::Error::ImageUnavailable`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;

/// The images the session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Multiboot loader, streamed through the handheld's boot ROM
    Loader,
    /// Emulator kernel, staged in guest memory
    Kernel,
}

impl core::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ImageKind::Loader => write!(f, "loader"),
            ImageKind::Kernel => write!(f, "kernel"),
        }
    }
}

/// Image source trait.
pub trait ImageSource {
    /// The error type returned when an image cannot be loaded.
    ///
    /// This allows implementations to use their own error types
    /// (e.g., `std::io::Error` for file I/O).
    type Error: core::fmt::Debug;

    /// Load the complete image of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the image does not exist or cannot be read.  Size limits are
    /// enforced by the caller, not the implementation.
    fn load(&mut self, kind: ImageKind) -> Result<Vec<u8>, Self::Error>;
}
