//! Write side of the configuration records and the socket routing table.

use std::net::Ipv4Addr;
use std::os::fd::{AsFd, RawFd};
use std::path::Path;

use aya::maps::{Array, Map, MapData, XskMap};
use aya::Ebpf;
use log::debug;
use xsksteer_common::{
    BIND_ADDR_MAP, BIND_PORT_MAP, CONFIG_SLOT, MAX_SOCKETS, SOCKS_PER_QUEUE_MAP, XSKS_MAP,
};

use crate::error::{Result, SteerError};
use crate::sys;

/// The three configuration values, written together by [`SteeringControl::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteeringSettings {
    pub sockets_per_queue: u32,
    pub bound_address: Ipv4Addr,
    pub bound_port: u16,
}

/// Controller-side operations on the steering state.
///
/// Every write is idempotent and last-write-wins. Writes to different values
/// are not atomic as a group; the classifier tolerates seeing a mix.
pub trait SteeringControl {
    /// What the routing table stores for a socket.
    type Handle;

    fn set_sockets_per_queue(&mut self, sockets_per_queue: u32) -> Result<()>;

    fn set_bound_address(&mut self, address: Ipv4Addr) -> Result<()>;

    fn set_bound_port(&mut self, port: u16) -> Result<()>;

    /// Points routing index `index` at `handle`, replacing any previous socket.
    fn register_socket(&mut self, index: u32, handle: Self::Handle) -> Result<()>;

    /// Clears routing index `index`. Clearing an empty index is not an error.
    fn unregister_socket(&mut self, index: u32) -> Result<()>;

    fn apply(&mut self, settings: &SteeringSettings) -> Result<()> {
        debug!(
            "Applying steering settings: {} socket(s) per queue, {}:{}",
            settings.sockets_per_queue, settings.bound_address, settings.bound_port
        );
        self.set_bound_address(settings.bound_address)?;
        self.set_bound_port(settings.bound_port)?;
        self.set_sockets_per_queue(settings.sockets_per_queue)
    }
}

pub(crate) fn check_index(index: u32) -> Result<()> {
    if index >= MAX_SOCKETS {
        return Err(SteerError::IndexOutOfRange {
            index,
            max: MAX_SOCKETS,
        });
    }
    Ok(())
}

/// [`SteeringControl`] over the maps of a loaded program, or over the maps
/// pinned by another process.
pub struct MapController {
    sockets_per_queue: Array<MapData, u32>,
    bound_address: Array<MapData, u32>,
    bound_port: Array<MapData, u16>,
    sockets: Map,
}

impl MapController {
    /// Takes ownership of the steering maps out of `ebpf`. Pin them first if
    /// other processes need to reach them.
    pub fn from_ebpf(ebpf: &mut Ebpf) -> Result<Self> {
        let mut take = |name: &'static str| {
            ebpf.take_map(name).ok_or(SteerError::MapNotFound(name))
        };

        Ok(Self {
            sockets_per_queue: Array::try_from(take(SOCKS_PER_QUEUE_MAP)?)?,
            bound_address: Array::try_from(take(BIND_ADDR_MAP)?)?,
            bound_port: Array::try_from(take(BIND_PORT_MAP)?)?,
            sockets: check_xsk_map(take(XSKS_MAP)?)?,
        })
    }

    /// Opens the maps pinned under `dir` by the process running the program.
    pub fn from_pinned<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let open = |name: &'static str| -> Result<Map> {
            let data = MapData::from_pin(dir.join(name))?;
            Ok(Map::from_map_data(data)?)
        };

        debug!("Opening steering maps pinned under {}", dir.display());
        Ok(Self {
            sockets_per_queue: Array::try_from(open(SOCKS_PER_QUEUE_MAP)?)?,
            bound_address: Array::try_from(open(BIND_ADDR_MAP)?)?,
            bound_port: Array::try_from(open(BIND_PORT_MAP)?)?,
            sockets: check_xsk_map(open(XSKS_MAP)?)?,
        })
    }
}

fn check_xsk_map(map: Map) -> Result<Map> {
    match map {
        Map::XskMap(_) => Ok(map),
        _ => Err(SteerError::MapNotFound(XSKS_MAP)),
    }
}

impl SteeringControl for MapController {
    /// AF_XDP socket file descriptor
    type Handle = RawFd;

    fn set_sockets_per_queue(&mut self, sockets_per_queue: u32) -> Result<()> {
        self.sockets_per_queue.set(CONFIG_SLOT, sockets_per_queue, 0)?;
        Ok(())
    }

    fn set_bound_address(&mut self, address: Ipv4Addr) -> Result<()> {
        self.bound_address.set(CONFIG_SLOT, u32::from(address), 0)?;
        Ok(())
    }

    fn set_bound_port(&mut self, port: u16) -> Result<()> {
        self.bound_port.set(CONFIG_SLOT, port, 0)?;
        Ok(())
    }

    fn register_socket(&mut self, index: u32, handle: RawFd) -> Result<()> {
        check_index(index)?;
        let mut sockets = XskMap::try_from(&mut self.sockets)?;
        sockets.set(index, handle, 0)?;
        debug!("Registered socket fd {} at index {}", handle, index);
        Ok(())
    }

    fn unregister_socket(&mut self, index: u32) -> Result<()> {
        check_index(index)?;
        let Map::XskMap(data) = &self.sockets else {
            return Err(SteerError::MapNotFound(XSKS_MAP));
        };
        sys::map_delete_elem(data.fd().as_fd(), &index).map_err(|source| SteerError::Syscall {
            name: XSKS_MAP,
            source,
        })?;
        debug!("Unregistered socket at index {}", index);
        Ok(())
    }
}
