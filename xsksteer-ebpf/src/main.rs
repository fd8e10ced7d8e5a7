#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::{Array, XskMap},
    programs::XdpContext,
};
use core::mem;
use xsksteer_common::{classify, ConfigStore, Frame, Verdict, CONFIG_SLOT, MAX_SOCKETS};

// Single-slot configuration records, written by the controller before attach.
#[map(name = "SOCKS_PER_QUEUE")]
static SOCKS_PER_QUEUE: Array<u32> = Array::with_max_entries(1, 0);

#[map(name = "BIND_ADDR")]
static BIND_ADDR: Array<u32> = Array::with_max_entries(1, 0);

#[map(name = "BIND_PORT")]
static BIND_PORT: Array<u16> = Array::with_max_entries(1, 0);

// Routing index -> AF_XDP socket, maintained by the socket-owning server.
#[map(name = "XSKS_MAP")]
static XSKS_MAP: XskMap = XskMap::with_max_entries(MAX_SOCKETS, 0);

/// XDP entry point: classify the frame and steer it into an AF_XDP socket.
#[xdp]
pub fn xsksteer(ctx: XdpContext) -> u32 {
    let rx_queue_index = unsafe { (*ctx.ctx).rx_queue_index };

    match classify(&Packet(&ctx), rx_queue_index, &MapConfig) {
        Verdict::Pass => xdp_action::XDP_PASS,
        Verdict::Abort => xdp_action::XDP_ABORTED,
        Verdict::Redirect { index } => redirect_to_socket(index),
    }
}

/// Redirects into the socket at `index`. An empty slot makes the helper
/// return the `XDP_PASS` carried in the flags.
#[inline(always)]
fn redirect_to_socket(index: u32) -> u32 {
    XSKS_MAP
        .redirect(index, xdp_action::XDP_PASS as u64)
        .unwrap_or(xdp_action::XDP_PASS)
}

/// Packet bytes between `data` and `data_end`.
struct Packet<'a>(&'a XdpContext);

impl Frame for Packet<'_> {
    #[inline(always)]
    fn load<T: Copy>(&self, offset: usize) -> Option<T> {
        let start = self.0.data();
        let end = self.0.data_end();

        if start + offset + mem::size_of::<T>() > end {
            return None;
        }

        Some(unsafe { ((start + offset) as *const T).read_unaligned() })
    }
}

/// Configuration read straight from the single-slot maps.
struct MapConfig;

impl ConfigStore for MapConfig {
    #[inline(always)]
    fn sockets_per_queue(&self) -> Option<u32> {
        SOCKS_PER_QUEUE.get(CONFIG_SLOT).copied()
    }

    #[inline(always)]
    fn bound_address(&self) -> Option<u32> {
        BIND_ADDR.get(CONFIG_SLOT).copied()
    }

    #[inline(always)]
    fn bound_port(&self) -> Option<u16> {
        BIND_PORT.get(CONFIG_SLOT).copied()
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
