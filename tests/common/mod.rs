//! Threaded loopback link shared by the integration tests.
//!
//! Each end of a [`pair()`] runs on its own thread.  Words travel through unbounded
//! channels, so the transmit register is always free.  Faults are injected on the sending
//! side.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![allow(dead_code)]

use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::time::{Duration, Instant};

use joybus_link::link::LinkIo;
use joybus_link::{Error, Result};

/// How long any one test may take before its waits are cancelled.
pub const DEADLINE: Duration = Duration::from_secs(10);

pub struct LoopbackIo {
    tx: Sender<u32>,
    rx: Receiver<u32>,
    pending: Option<u32>,
    disconnected: bool,
    start: Instant,
    deadline: Instant,
    sent: usize,
    corrupt: Vec<(usize, u32)>,
    duplicate_every: Option<usize>,
}

/// Create the two ends of a link.
pub fn pair() -> (LoopbackIo, LoopbackIo) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    (LoopbackIo::new(a_tx, a_rx), LoopbackIo::new(b_tx, b_rx))
}

impl LoopbackIo {
    fn new(tx: Sender<u32>, rx: Receiver<u32>) -> Self {
        let start = Instant::now();
        Self {
            tx,
            rx,
            pending: None,
            disconnected: false,
            start,
            deadline: start + DEADLINE,
            sent: 0,
            corrupt: Vec::new(),
            duplicate_every: None,
        }
    }

    /// XOR `mask` into the `index`th word this end sends, counting from 0.
    pub fn corrupt_sent(&mut self, index: usize, mask: u32) {
        self.corrupt.push((index, mask));
    }

    /// Send every `n`th word twice.
    pub fn duplicate_every(&mut self, n: usize) {
        self.duplicate_every = Some(n);
    }

    pub fn stop_duplicating(&mut self) {
        self.duplicate_every = None;
    }

    /// Number of words sent so far, not counting duplicates.
    pub fn sent(&self) -> usize {
        self.sent
    }

    fn poll_rx(&mut self) {
        if self.pending.is_none() {
            match self.rx.try_recv() {
                Ok(word) => self.pending = Some(word),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.disconnected = true,
            }
        }
    }
}

impl LinkIo for LoopbackIo {
    fn write_word(&mut self, word: u32) -> Result<()> {
        let index = self.sent;
        self.sent += 1;

        let word = self
            .corrupt
            .iter()
            .filter(|(at, _)| *at == index)
            .fold(word, |word, (_, mask)| word ^ mask);
        // Words sent once the other end has gone are lost, as on a real cable
        let _ = self.tx.send(word);
        if let Some(n) = self.duplicate_every {
            if (index + 1) % n == 0 {
                let _ = self.tx.send(word);
            }
        }
        Ok(())
    }

    fn read_word(&mut self) -> Result<u32> {
        self.poll_rx();
        self.pending.take().ok_or(Error::Io)
    }

    fn transmit_ready(&mut self) -> bool {
        true
    }

    fn receive_pending(&mut self) -> bool {
        self.poll_rx();
        self.pending.is_some()
    }

    fn device_present(&mut self) -> bool {
        true
    }

    fn millis(&mut self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    fn delay_us(&mut self, _us: u32) {}

    fn cancelled(&mut self) -> bool {
        std::thread::yield_now();
        self.disconnected || Instant::now() > self.deadline
    }
}
