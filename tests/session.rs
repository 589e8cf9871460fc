//! A complete Console session against a simulated Handheld: multiboot through the boot
//! ROM, handshake, kernel load, then memory reads until the Handheld is done.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg(feature = "host")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use joybus_link::exchange::GuestMemory;
use joybus_link::handshake;
use joybus_link::io::{ImageKind, ImageSource};
use joybus_link::link::Link;
use joybus_link::memory::{MemoryMap, Region};
use joybus_link::multiboot::{
    CHECKSUM_SEED, HEADER_SIZE, Keystream, derive_key, fold_checksum, rounded_size,
    session_key,
};
use joybus_link::session::{Session, SessionConfig, SessionExit, SessionState};

use common::{LoopbackIo, pair};

const SEED: u32 = 0x5A5A_1234;
const LOADER_LEN: usize = 0x1002;
const KERNEL_LEN: usize = 0x3000;

struct Images;

impl ImageSource for Images {
    type Error = std::io::Error;

    fn load(&mut self, kind: ImageKind) -> Result<Vec<u8>, Self::Error> {
        Ok(match kind {
            ImageKind::Loader => loader(),
            ImageKind::Kernel => kernel(),
        })
    }
}

fn loader() -> Vec<u8> {
    (0..LOADER_LEN).map(|i| (i % 251) as u8).collect()
}

fn kernel() -> Vec<u8> {
    (0..KERNEL_LEN).map(|i| (i % 253) as u8 ^ 0x5A).collect()
}

// The handheld's boot ROM: hand out a seed, then decrypt and check the image.
fn boot_rom(link: &mut Link<'_, LoopbackIo>) -> Vec<u8> {
    let size = rounded_size(LOADER_LEN);
    link.send(SEED).unwrap();
    assert_eq!(link.recv().unwrap(), derive_key(size).swap_bytes());

    let mut image = Vec::new();
    for _ in 0..HEADER_SIZE / 4 {
        image.extend_from_slice(&link.recv().unwrap().to_le_bytes());
    }

    let mut keystream = Keystream::new(session_key(SEED));
    let mut checksum = CHECKSUM_SEED;
    let mut offset = HEADER_SIZE as u32;
    while offset < size {
        let plain = keystream.apply(offset, link.recv().unwrap());
        checksum = fold_checksum(checksum, plain);
        image.extend_from_slice(&plain.to_le_bytes());
        offset += 4;
    }
    let closing = keystream.apply(offset, link.recv().unwrap());
    assert_eq!(closing, checksum | size << 16);

    link.send(checksum).unwrap();
    image
}

struct Handheld {
    loader: Vec<u8>,
    kernel: Vec<u8>,
    restarts: u32,
}

// `duplicate_every` applies from the handshake up to acknowledging the kernel load.
fn handheld(
    mut io: LoopbackIo,
    done: Arc<AtomicBool>,
    duplicate_every: Option<usize>,
) -> Handheld {
    let mut link = Link::new(&mut io);
    let loader = boot_rom(&mut link);
    if let Some(n) = duplicate_every {
        link.io().duplicate_every(n);
    }
    handshake::respond(&mut link).unwrap();
    handshake::await_kernel_load(&mut link).unwrap();
    link.io().stop_duplicating();

    let mut memory = GuestMemory::new(&mut io);
    let mut kernel = vec![0u8; KERNEL_LEN];
    for (index, chunk) in kernel.chunks_mut(0x800).enumerate() {
        memory.read_memory(index as u32 * 0x800, chunk).unwrap();
    }
    let restarts = memory.restarts();

    done.store(true, Ordering::SeqCst);
    Handheld {
        loader,
        kernel,
        restarts,
    }
}

fn run_session(duplicate_every: Option<usize>) -> (SessionExit, SessionState, Handheld) {
    let (console_io, handheld_io) = pair();
    let done = Arc::new(AtomicBool::new(false));

    let exit_flag = done.clone();
    let console = thread::spawn(move || {
        let memory = MemoryMap::from_regions([
            Region::zeroed(0x2000),
            Region::zeroed(0x2000),
            Region::zeroed(0x2000),
        ]);
        let config = SessionConfig {
            grace_delay_ms: 0,
            ..SessionConfig::default()
        };
        let mut session = Session::new(console_io, Images, memory, config);
        let exit = session.run(|| exit_flag.load(Ordering::SeqCst));
        (exit, session.state())
    });

    let device = handheld(handheld_io, done, duplicate_every);
    let (exit, state) = console.join().unwrap();
    (exit, state, device)
}

#[test]
fn test_full_session() {
    let (exit, state, device) = run_session(None);

    assert_eq!(exit, SessionExit::Requested);
    assert_eq!(exit.code(), 0);
    assert_eq!(state, SessionState::Ready);

    // loader arrives with its header fixed up, padded to a multiple of 8 bytes
    let mut expected = loader();
    expected[0xB2] = 0x96;
    assert_eq!(device.loader.len(), rounded_size(LOADER_LEN) as usize);
    assert_eq!(&device.loader[..LOADER_LEN], &expected[..]);
    assert!(device.loader[LOADER_LEN..].iter().all(|&b| b == 0));

    assert_eq!(device.kernel, kernel());
    assert_eq!(device.restarts, 0);
}

#[test]
fn test_session_survives_duplicated_handshake_words() {
    for n in [1, 2, 3, 5] {
        let (exit, state, device) = run_session(Some(n));
        assert_eq!(exit, SessionExit::Requested, "duplicating every {n}");
        assert_eq!(state, SessionState::Ready, "duplicating every {n}");
        assert_eq!(device.kernel, kernel(), "duplicating every {n}");
        // stale words from the handshake cost at most the first read a restart
        assert!(device.restarts <= 1, "duplicating every {n}: {}", device.restarts);
    }
}
