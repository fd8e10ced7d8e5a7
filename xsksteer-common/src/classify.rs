//! Per-frame classify-and-redirect decision.
//!
//! [`classify`] is stateless across frames. It reads the configuration
//! through [`ConfigStore`] and only ever answers with a [`Verdict`]; performing
//! the redirect (and falling back to pass on a table miss) is left to the
//! caller, which owns the socket table.

use crate::header::{Cursor, EthernetHeader, Frame, Ipv4Header, Truncated, UdpHeader};
use crate::{ARP_SOURCE_PORT, ETH_P_ARP, ETH_P_IP, IPPROTO_UDP, MAX_SOCKETS};

/// Read side of the single-slot configuration records.
///
/// `None` means the value has not been written yet. The caller treats it as
/// "not ready" and lets the frame pass.
pub trait ConfigStore {
    fn sockets_per_queue(&self) -> Option<u32>;

    /// Bound IPv4 address as a host-order number.
    fn bound_address(&self) -> Option<u32>;

    /// Bound UDP port, host order.
    fn bound_port(&self) -> Option<u16>;
}

/// Outcome of classifying one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Continue through the normal network stack
    Pass,
    /// Malformed frame or misconfiguration, drop it
    Abort,
    /// Hand the frame to the socket registered at `index`, or pass if none is
    Redirect { index: u32 },
}

/// `queue * sockets_per_queue + port_key % sockets_per_queue`.
///
/// `port_key` is the UDP source port field as loaded from the frame, see
/// [`port_key`]. Returns `None` when `sockets_per_queue` is zero. The
/// multiplication wraps; a wrapped index simply misses the table.
#[inline(always)]
pub fn routing_index(queue: u32, port_key: u16, sockets_per_queue: u32) -> Option<u32> {
    if sockets_per_queue == 0 {
        return None;
    }
    let slot = u32::from(port_key) % sockets_per_queue;
    Some(queue.wrapping_mul(sockets_per_queue).wrapping_add(slot))
}

/// The routing key of source port number `port`: its network-order bytes read
/// as a native integer, which is what the program sees in the UDP header.
pub const fn port_key(port: u16) -> u16 {
    u16::from_ne_bytes(port.to_be_bytes())
}

/// Decides what happens to the frame received on `rx_queue_index`.
#[inline(always)]
pub fn classify<F, C>(frame: &F, rx_queue_index: u32, config: &C) -> Verdict
where
    F: Frame + ?Sized,
    C: ConfigStore + ?Sized,
{
    let (eth, cursor) = match Cursor::start().take::<EthernetHeader, F>(frame) {
        Ok(parsed) => parsed,
        Err(Truncated) => return Verdict::Abort,
    };

    match eth.ether_type() {
        ETH_P_IP => classify_ipv4(frame, cursor, rx_queue_index, config),
        ETH_P_ARP => route(rx_queue_index, ARP_SOURCE_PORT, config),
        _ => Verdict::Pass,
    }
}

#[inline(always)]
fn classify_ipv4<F, C>(frame: &F, cursor: Cursor, rx_queue_index: u32, config: &C) -> Verdict
where
    F: Frame + ?Sized,
    C: ConfigStore + ?Sized,
{
    let (ip, cursor) = match cursor.take::<Ipv4Header, F>(frame) {
        Ok(parsed) => parsed,
        Err(Truncated) => return Verdict::Abort,
    };

    let Some(bound_address) = config.bound_address() else {
        return Verdict::Pass;
    };
    if ip.dst_addr() != bound_address {
        return Verdict::Pass;
    }
    if ip.protocol() != IPPROTO_UDP {
        return Verdict::Pass;
    }

    let (udp, _) = match cursor.take::<UdpHeader, F>(frame) {
        Ok(parsed) => parsed,
        Err(Truncated) => return Verdict::Abort,
    };

    let Some(bound_port) = config.bound_port() else {
        return Verdict::Pass;
    };
    if udp.dest_port() != bound_port {
        return Verdict::Pass;
    }

    route(rx_queue_index, udp.source_port_key(), config)
}

#[inline(always)]
fn route<C: ConfigStore + ?Sized>(rx_queue_index: u32, port_key: u16, config: &C) -> Verdict {
    let Some(sockets_per_queue) = config.sockets_per_queue() else {
        return Verdict::Pass;
    };
    match routing_index(rx_queue_index, port_key, sockets_per_queue) {
        Some(index) if index < MAX_SOCKETS => Verdict::Redirect { index },
        Some(_) => Verdict::Pass,
        None => Verdict::Abort,
    }
}
