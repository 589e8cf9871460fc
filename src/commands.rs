//! Table of commands awaiting acknowledgement from the Handheld.
//!
//! A command sent by the Console can register a completion callback in the slot for its
//! command id.  When a SYSTEM/ACK carrying that id arrives in the steady state, the
//! callback is taken out of the slot and invoked with the ACK.  Only command id 0 is used
//! by the current command set.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::packet::{COMMAND_IDS, ControlWord};

/// Completion callback, called with the acknowledging control word.
pub type Completion = Box<dyn FnMut(ControlWord)>;

/// One slot per command id.
#[derive(Default)]
pub struct CommandTable {
    slots: [Option<Completion>; COMMAND_IDS],
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `completion` for command `id`, returning any callback it replaces.
    ///
    /// Ids are 2 bits; higher bits are ignored.
    pub fn register(&mut self, id: u8, completion: Completion) -> Option<Completion> {
        let slot = &mut self.slots[id as usize % COMMAND_IDS];
        let previous = slot.replace(completion);
        if previous.is_some() {
            warn!("Replaced pending command {id}");
        }
        previous
    }

    /// Whether a command with this id is awaiting acknowledgement.
    pub fn is_pending(&self, id: u8) -> bool {
        self.slots[id as usize % COMMAND_IDS].is_some()
    }

    /// Complete the command acknowledged by `ack`.
    ///
    /// Returns `false`, having logged it, if nothing was waiting on that id.
    pub fn complete(&mut self, ack: ControlWord) -> bool {
        let id = ack.command_id();
        match self.slots[id as usize % COMMAND_IDS].take() {
            Some(mut completion) => {
                trace!("Completing command {id}");
                completion(ack);
                true
            }
            None => {
                warn!("Spurious ACK for command id {id}");
                false
            }
        }
    }
}

impl core::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_list();
        for (id, slot) in self.slots.iter().enumerate() {
            if slot.is_some() {
                list.entry(&id);
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use core::cell::Cell;

    use super::*;
    use crate::packet::{Command, Packet};

    fn ack(id: u8) -> ControlWord {
        Packet {
            command: Command::Ack,
            id,
            data: 0,
        }
        .encode()
    }

    #[test]
    fn test_complete_invokes_once() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let mut table = CommandTable::new();
        table.register(2, Box::new(move |word: ControlWord| {
            assert_eq!(word.command_id(), 2);
            seen.set(seen.get() + 1);
        }));
        assert!(table.is_pending(2));

        assert!(table.complete(ack(2)));
        assert_eq!(calls.get(), 1);
        assert!(!table.is_pending(2));

        // Second ACK for the same id is spurious
        assert!(!table.complete(ack(2)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_spurious_ack() {
        let mut table = CommandTable::new();
        assert!(!table.complete(ack(0)));
    }

    #[test]
    fn test_slots_are_independent() {
        let mut table = CommandTable::new();
        table.register(0, Box::new(|_: ControlWord| {}));
        table.register(3, Box::new(|_: ControlWord| {}));
        assert!(table.complete(ack(3)));
        assert!(table.is_pending(0));
        assert!(!table.is_pending(1));
    }

    #[test]
    fn test_register_replaces() {
        let mut table = CommandTable::new();
        assert!(table.register(1, Box::new(|_: ControlWord| {})).is_none());
        assert!(table.register(1, Box::new(|_: ControlWord| {})).is_some());
    }
}
