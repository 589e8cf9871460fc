//! Ping handshake, run once after multiboot to prove both ends speak the protocol.
//!
//! ```text
//!   Console                         Handheld
//!      | ---- SYSTEM/PING (magic) ----> |
//!      | <--- SYSTEM/ACK -------------- |
//!      | <--- SYSTEM/PING_REPLY (magic) |
//!      | ---- SYSTEM/ACK -------------> |
//! ```
//!
//! Any word that fails its checksum, or is not the packet expected at that step, is
//! ignored.  The console's first wait is the exception: if the word after its ping is not
//! an ACK it gives up and the caller pings again.  There is no timeout on any of the waits
//! beyond the link's own cancellation.
//!
//! Also contains the handheld's side of the kernel load command, which the console sends
//! once the kernel is staged.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::link::{Link, LinkIo};
use crate::packet::{Command, Packet};

/// Data carried by PING and PING_REPLY ("HI").
pub const PING_MAGIC: u16 = 0x4849;

/// Whether a protocol step completed, or should be attempted again from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    Retry,
}

fn ping() -> Packet {
    Packet::new(Command::Ping, PING_MAGIC)
}

fn ping_reply() -> Packet {
    Packet::new(Command::PingReply, PING_MAGIC)
}

/// Console: make one handshake attempt.
///
/// Returns [`Progress::Retry`] if the handheld did not acknowledge the ping, in which case
/// the caller should call again.
pub fn initiate<I: LinkIo>(link: &mut Link<'_, I>) -> Result<Progress> {
    link.send_packet(ping())?;

    if !link.recv_expect(Packet::ack())?.is_expected() {
        return Ok(Progress::Retry);
    }

    link.wait_for(ping_reply())?;
    link.send_packet(Packet::ack())?;

    info!("Got ping back from device");
    Ok(Progress::Done)
}

/// Handheld: wait for the console's ping and complete the handshake.
pub fn respond<I: LinkIo>(link: &mut Link<'_, I>) -> Result<()> {
    link.wait_for(ping())?;
    debug!("Got ping");

    link.send_packet(Packet::ack())?;
    link.send_packet(ping_reply())?;

    link.wait_for(Packet::ack())?;
    debug!("Got ping reply ACK");
    Ok(())
}

/// Handheld: wait for the console to announce the kernel is staged, and acknowledge it.
pub fn await_kernel_load<I: LinkIo>(link: &mut Link<'_, I>) -> Result<()> {
    link.wait_for(Packet::new(Command::KernelLoad, 0))?;
    link.send_packet(Packet::ack())?;
    info!("Kernel load acknowledged");
    Ok(())
}
