//! Bounds-checked header views over a raw frame.
//!
//! Every read goes through [`Frame::load`], which proves `offset + size_of::<T>()`
//! lies inside the frame before touching memory. The XDP verifier requires
//! exactly this shape of check, and the same code runs on plain byte slices in
//! user space.

use core::mem;

/// Raw frame bytes that can be read at a given offset.
pub trait Frame {
    /// Reads a `T` at `offset`, or `None` if it would run past the frame end.
    fn load<T: Copy>(&self, offset: usize) -> Option<T>;
}

impl Frame for [u8] {
    #[inline(always)]
    fn load<T: Copy>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(mem::size_of::<T>())?;
        if end > self.len() {
            return None;
        }
        // SAFETY: `offset..end` was checked against the slice length above.
        Some(unsafe { (self.as_ptr().add(offset) as *const T).read_unaligned() })
    }
}

/// The frame ended before the header being parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Truncated;

/// Position of the next unparsed byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    offset: usize,
}

impl Cursor {
    pub const fn start() -> Self {
        Self { offset: 0 }
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the header at the cursor and returns it with the cursor advanced
    /// past it.
    #[inline(always)]
    pub fn take<H: Copy, F: Frame + ?Sized>(self, frame: &F) -> Result<(H, Cursor), Truncated> {
        match frame.load::<H>(self.offset) {
            Some(header) => Ok((
                header,
                Cursor {
                    offset: self.offset + mem::size_of::<H>(),
                },
            )),
            None => Err(Truncated),
        }
    }
}

/// Ethernet II header
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EthernetHeader {
    pub dest_mac: [u8; 6],
    pub src_mac: [u8; 6],
    /// Network byte order
    pub ether_type: u16,
}

impl EthernetHeader {
    pub const LEN: usize = 14;

    pub fn ether_type(&self) -> u16 {
        u16::from_be(self.ether_type)
    }
}

/// IPv4 header without options. Multi-byte fields are in network byte order.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_addr: u32,
    pub dst_addr: u32,
}

impl Ipv4Header {
    pub const LEN: usize = 20;

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Destination address as a host-order number, comparable with
    /// `u32::from(Ipv4Addr)`.
    pub fn dst_addr(&self) -> u32 {
        u32::from_be(self.dst_addr)
    }

    pub fn src_addr(&self) -> u32 {
        u32::from_be(self.src_addr)
    }
}

/// UDP header. Multi-byte fields are in network byte order.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct UdpHeader {
    pub source: u16,
    pub dest: u16,
    pub len: u16,
    pub check: u16,
}

impl UdpHeader {
    pub const LEN: usize = 8;

    pub fn source_port(&self) -> u16 {
        u16::from_be(self.source)
    }

    /// Source port field exactly as loaded, without the byte swap. This is the
    /// value routing takes the modulo of.
    pub fn source_port_key(&self) -> u16 {
        self.source
    }

    pub fn dest_port(&self) -> u16 {
        u16::from_be(self.dest)
    }
}
