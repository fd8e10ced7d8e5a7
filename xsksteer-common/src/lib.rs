#![no_std]

pub mod classify;
pub mod header;

pub use classify::{classify, port_key, routing_index, ConfigStore, Verdict};
pub use header::{Cursor, EthernetHeader, Frame, Ipv4Header, Truncated, UdpHeader};

/// Number of slots in the socket routing table.
pub const MAX_SOCKETS: u32 = 1024;

/// Key of the single slot in each configuration map.
pub const CONFIG_SLOT: u32 = 0;

/// Name of the XDP program inside the object file
pub const PROGRAM_NAME: &str = "xsksteer";

/// Map holding the number of sockets dedicated to each receive queue
pub const SOCKS_PER_QUEUE_MAP: &str = "SOCKS_PER_QUEUE";

/// Map holding the bound IPv4 address, host order
pub const BIND_ADDR_MAP: &str = "BIND_ADDR";

/// Map holding the bound UDP port, host order
pub const BIND_PORT_MAP: &str = "BIND_PORT";

/// XSKMAP from routing index to AF_XDP socket
pub const XSKS_MAP: &str = "XSKS_MAP";

/// Every map the program declares, in pinning order.
pub const MAP_NAMES: [&str; 4] = [SOCKS_PER_QUEUE_MAP, BIND_ADDR_MAP, BIND_PORT_MAP, XSKS_MAP];

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const IPPROTO_UDP: u8 = 17;

/// Source port used to route ARP frames, so they land on slot 0 of the queue.
pub const ARP_SOURCE_PORT: u16 = 0;
