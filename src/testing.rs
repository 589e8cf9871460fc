//! Scripted link used by unit tests.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

extern crate std;

use std::collections::VecDeque;
use std::vec::Vec;

use crate::link::LinkIo;
use crate::{Error, Result};

// Consecutive idle polls after which a wait is cancelled, so that a test which would
// block forever fails instead.
const IDLE_POLL_LIMIT: u32 = 1000;

/// Single-threaded link: inbound words come from a script, outbound words are recorded.
///
/// The script may be split into segments with [`ScriptedIo::then()`].  Each later segment
/// is held back until a word is sent with nothing left to read, modelling a peer that
/// only answers once it is spoken to.
pub(crate) struct ScriptedIo {
    rx: VecDeque<u32>,
    later: VecDeque<Vec<u32>>,
    tx: Vec<u32>,
    transmit_ready: bool,
    device_present: bool,
    millis: u32,
    delays_us: u64,
    idle_polls: u32,
    fail_reads: u32,
}

impl ScriptedIo {
    pub(crate) fn new(rx: &[u32]) -> Self {
        Self {
            rx: rx.iter().copied().collect(),
            later: VecDeque::new(),
            tx: Vec::new(),
            transmit_ready: true,
            device_present: true,
            millis: 0,
            delays_us: 0,
            idle_polls: 0,
            fail_reads: 0,
        }
    }

    /// Queue a segment released by the first send after everything before it is read.
    pub(crate) fn then(mut self, words: &[u32]) -> Self {
        self.later.push_back(words.to_vec());
        self
    }

    pub(crate) fn push(&mut self, words: &[u32]) {
        self.rx.extend(words.iter().copied());
    }

    pub(crate) fn sent(&self) -> &[u32] {
        &self.tx
    }

    pub(crate) fn take_sent(&mut self) -> Vec<u32> {
        core::mem::take(&mut self.tx)
    }

    /// Words left to read, including any segments not yet released.
    pub(crate) fn remaining(&self) -> usize {
        self.rx.len() + self.later.iter().map(Vec::len).sum::<usize>()
    }

    pub(crate) fn set_transmit_ready(&mut self, ready: bool) {
        self.transmit_ready = ready;
    }

    pub(crate) fn set_device_present(&mut self, present: bool) {
        self.device_present = present;
    }

    /// Make the next `count` reads fail with [`Error::Io`].
    pub(crate) fn fail_reads(&mut self, count: u32) {
        self.fail_reads = count;
    }

    pub(crate) fn millis_elapsed(&self) -> u32 {
        self.millis
    }

    pub(crate) fn delays_us(&self) -> u64 {
        self.delays_us
    }
}

impl LinkIo for ScriptedIo {
    fn write_word(&mut self, word: u32) -> Result<()> {
        self.idle_polls = 0;
        self.tx.push(word);
        if self.rx.is_empty() {
            if let Some(segment) = self.later.pop_front() {
                self.rx.extend(segment);
            }
        }
        Ok(())
    }

    fn read_word(&mut self) -> Result<u32> {
        self.idle_polls = 0;
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            self.rx.pop_front();
            return Err(Error::Io);
        }
        self.rx.pop_front().ok_or(Error::Io)
    }

    fn transmit_ready(&mut self) -> bool {
        self.transmit_ready
    }

    fn receive_pending(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn device_present(&mut self) -> bool {
        self.device_present
    }

    fn millis(&mut self) -> u32 {
        self.millis += 1;
        self.millis
    }

    fn delay_us(&mut self, us: u32) {
        self.delays_us += us as u64;
    }

    fn cancelled(&mut self) -> bool {
        self.idle_polls += 1;
        self.idle_polls > IDLE_POLL_LIMIT
    }
}
