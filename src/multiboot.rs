//! Multiboot - streaming an executable image through the handheld's boot ROM.
//!
//! The boot ROM accepts an image over the link before any code of ours runs on the
//! handheld, so the transfer has to speak the ROM's own format:
//!
//! 1. The image size is rounded up to a multiple of 8 bytes, and a key is derived from
//!    the rounded size ([`derive_key()`]).
//! 2. The ROM sends its session key seed; we reply with our derived key.
//! 3. The first [`HEADER_SIZE`] bytes (the cartridge header) are sent in the clear.
//! 4. Every following word is whitened with a keystream ([`Keystream`]) advanced once per
//!    word, an offset-dependent value and a constant, while the plain word is folded into
//!    a running checksum.
//! 5. The checksum, folded with the size, is sent whitened the same way, and the ROM
//!    sends back its own checksum.
//!
//! Words are sent with a short timeout ([`crate::link::SEND_TIMEOUT_MS`]) and a word the
//! ROM does not collect in time is given up on.  The transfer does not verify the ROM's
//! checksum: the handshake that follows is the real check that the image arrived intact.
//!
//! This module also contains the header fix-ups applied to an image before it is sent
//! ([`prepare_image()`]).

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::link::{Link, LinkIo};

/// Bytes at the start of the image sent without encryption.
pub const HEADER_SIZE: usize = 0xC0;

/// Address the boot ROM loads the image to.  Used for whitening.
const LOAD_ADDRESS: u32 = 0x0200_0000;

/// Keystream multiplier ("Kawa", little-endian).
const KEYSTREAM_MULTIPLIER: u32 = 0x6177_614B;

/// Constant whitening applied to every encrypted word.
const WHITENING: u32 = 0x2079_6220;

/// XOR applied by the ROM to its session key seed.
const SEED_XOR: u32 = 0x7365_646F;

/// Initial value of the running transfer checksum.
pub const CHECKSUM_SEED: u32 = 0x15A0;

/// Polynomial of the running transfer checksum.
const CHECKSUM_POLY: u32 = 0xA1C1;

/// Offset of the byte the ROM requires to be [`FIXED_HEADER_VALUE`].
const FIXED_HEADER_OFFSET: usize = 0xB2;
const FIXED_HEADER_VALUE: u8 = 0x96;

/// Word patched over the entry point of recognized ROMs, a branch past the boot
/// handshake they would otherwise wait for.
const ENTRY_PATCH_OFFSET: usize = 0xE0;
const ENTRY_PATCH: u32 = 0x1700_00EA;

/// Instruction words (big-endian, as stored in the image) identifying a ROM that performs
/// its own boot handshake at its entry point.
const HANDSHAKE_SIGNATURE: [(usize, u32); 8] = [
    (0xE4, 0x0010_A0E3),
    (0xEC, 0xC010_A0E3),
    (0x100, 0xFCFF_FF1A),
    (0x118, 0x0400_50E3),
    (0x11C, 0xFBFF_FF1A),
    (0x12C, 0x0200_50E3),
    (0x130, 0xFBFF_FF1A),
    (0x140, 0xFEFF_FF1A),
];

/// Round an image size up to the multiple of 8 bytes the ROM works in.
pub fn rounded_size(len: usize) -> u32 {
    ((len as u32).wrapping_add(7)) & !7
}

/// Derive our key from the rounded image size.
///
/// Pure function of `size`.
pub fn derive_key(size: u32) -> u32 {
    let size = size.wrapping_sub(0x200) >> 3;
    let res2 = ((size & 0x3F80) << 1) | ((size & 0x4000) << 2) | (size & 0x7F) | 0x38_0000;
    let res1 = res2 >> 16;
    let mut res3 = (res2 >> 8).wrapping_add(res1).wrapping_add(res2);
    res3 <<= 24;
    res3 |= res2;
    res3 |= 0x8080_8080;

    let salt = if res3 & 0x200 == 0 { *b"Kawa" } else { *b"sedo" };
    res3.swap_bytes() ^ u32::from_be_bytes(salt)
}

/// Recover the keystream's starting state from the seed word sent by the ROM.
pub fn session_key(seed: u32) -> u32 {
    (seed.swap_bytes() ^ SEED_XOR).swap_bytes()
}

/// Fold one plain word into the running transfer checksum.
pub fn fold_checksum(mut checksum: u32, mut word: u32) -> u32 {
    for _ in 0..32 {
        if (checksum ^ word) & 1 != 0 {
            checksum = (checksum >> 1) ^ CHECKSUM_POLY;
        } else {
            checksum >>= 1;
        }
        word >>= 1;
    }
    checksum
}

/// Keystream used to whiten the encrypted part of the image.
#[derive(Debug, Clone)]
pub struct Keystream {
    state: u32,
}

impl Keystream {
    pub fn new(session_key: u32) -> Self {
        Self { state: session_key }
    }

    /// Advance the keystream and encrypt the word at byte `offset` of the image.
    ///
    /// Encryption is an XOR, so the same call decrypts.
    pub fn apply(&mut self, offset: u32, word: u32) -> u32 {
        self.state = self
            .state
            .wrapping_mul(KEYSTREAM_MULTIPLIER)
            .wrapping_add(1);
        word ^ self.state ^ offset.wrapping_add(LOAD_ADDRESS).wrapping_neg() ^ WHITENING
    }
}

/// Outcome of a multiboot transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Rounded image size that was sent
    pub size: u32,
    /// Checksum sent to the ROM, before whitening
    pub checksum: u32,
    /// Word sent back by the ROM after the checksum.  Not verified.
    pub peer_checksum: u32,
    /// Number of words the ROM did not collect within the send timeout
    pub dropped_words: usize,
}

/// Apply the fix-ups the ROM needs to the image, in place.
///
/// - Forces the fixed header byte the ROM checks.
/// - Patches the entry point of ROMs that perform their own boot handshake, so they skip
///   straight past it.
///
/// Returns whether the entry point was patched.
pub fn prepare_image(image: &mut [u8]) -> bool {
    if image.len() <= FIXED_HEADER_OFFSET {
        return false;
    }

    if image[FIXED_HEADER_OFFSET] != FIXED_HEADER_VALUE {
        warn!(
            "Header value incorrect ({:#04X})!  Fixing value ({FIXED_HEADER_VALUE:#04X})",
            image[FIXED_HEADER_OFFSET]
        );
        image[FIXED_HEADER_OFFSET] = FIXED_HEADER_VALUE;
    }

    let signature_found = HANDSHAKE_SIGNATURE
        .iter()
        .all(|&(offset, word)| read_be(image, offset) == Some(word));
    if signature_found {
        info!("Boot handshake ROM detected, patching entry point");
        image[ENTRY_PATCH_OFFSET..ENTRY_PATCH_OFFSET + 4]
            .copy_from_slice(&ENTRY_PATCH.to_be_bytes());
    }
    signature_found
}

/// Multiboot transfer engine.
pub struct Multiboot<'a, 'b, I: LinkIo> {
    link: &'a mut Link<'b, I>,
    send_timeout_ms: u32,
    dropped_words: usize,
}

impl<'a, 'b, I: LinkIo> Multiboot<'a, 'b, I> {
    /// Arguments:
    /// - `link` - Link to the handheld, whose boot ROM must be waiting for an image
    /// - `send_timeout_ms` - How long to wait for the ROM to collect each word
    pub fn new(link: &'a mut Link<'b, I>, send_timeout_ms: u32) -> Self {
        Self {
            link,
            send_timeout_ms,
            dropped_words: 0,
        }
    }

    /// Wait until the ROM reports it is ready for an image.
    pub fn wait_boot_ready(&mut self) -> Result<()> {
        self.link.wait_until(|io| io.boot_ready())
    }

    /// Send `image` to the ROM.
    ///
    /// Bytes beyond the end of the image, up to the rounded size, are sent as zero.
    pub fn transfer(&mut self, image: &[u8]) -> Result<Transfer> {
        self.dropped_words = 0;
        let size = rounded_size(image.len());
        let our_key = derive_key(size);
        debug!("Our key: {our_key:08x}");

        let seed = self.link.recv()?;
        let mut keystream = Keystream::new(session_key(seed));
        trace!("Session key seed: {seed:08x}");

        self.send(our_key.swap_bytes())?;

        for offset in (0..HEADER_SIZE as u32).step_by(4) {
            self.send(image_word(image, offset))?;
        }
        debug!("Header done, sending image");

        let mut checksum = CHECKSUM_SEED;
        let mut offset = HEADER_SIZE as u32;
        while offset < size {
            let plain = image_word(image, offset);
            checksum = fold_checksum(checksum, plain);
            let encrypted = keystream.apply(offset, plain);
            self.send(encrypted)?;
            offset += 4;
        }

        checksum |= size << 16;
        debug!("Image done, checksum: {checksum:08x}");
        let encrypted = keystream.apply(offset, checksum);
        self.send(encrypted)?;

        let peer_checksum = self.link.recv()?;
        debug!("Peer checksum: {peer_checksum:08x} (unverified)");

        if self.dropped_words > 0 {
            warn!("{} words not collected by the boot ROM", self.dropped_words);
        }

        Ok(Transfer {
            size,
            checksum,
            peer_checksum,
            dropped_words: self.dropped_words,
        })
    }
}

// Internal functions
impl<I: LinkIo> Multiboot<'_, '_, I> {
    fn send(&mut self, word: u32) -> Result<()> {
        if !self.link.send_timeout(word, self.send_timeout_ms)? {
            self.dropped_words += 1;
        }
        Ok(())
    }
}

// Image word at `offset`, zero-padded past the end of the image.  Link words are
// little-endian on the wire, so this preserves the image's byte order.
fn image_word(image: &[u8], offset: u32) -> u32 {
    let mut bytes = [0u8; 4];
    let start = offset as usize;
    if start < image.len() {
        let end = image.len().min(start + 4);
        bytes[..end - start].copy_from_slice(&image[start..end]);
    }
    u32::from_le_bytes(bytes)
}

fn read_be(image: &[u8], offset: usize) -> Option<u32> {
    let bytes = image.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
