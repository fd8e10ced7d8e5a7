//! Socket index plan for the socket-owning server.
//!
//! The program routes a frame on queue `q` to index `q * n + key % n`, where
//! `key` is the source port field as loaded, so the socket serving slot `s` of
//! queue `q` must be registered at `q * n + s`.

use serde::Serialize;
use xsksteer_common::{port_key, routing_index, MAX_SOCKETS};

use crate::config::ConfigError;

/// One AF_XDP socket position: the receive queue it is bound to, its slot
/// within that queue, and the routing table index it must be registered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SocketSlot {
    pub queue: u32,
    pub slot: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SocketLayout {
    sockets_per_queue: u32,
    slots: Vec<SocketSlot>,
}

impl SocketLayout {
    pub fn new(queues: &[u32], sockets_per_queue: u32) -> Result<Self, ConfigError> {
        if sockets_per_queue == 0 {
            return Err(ConfigError::ZeroSocketsPerQueue);
        }
        if queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }

        let mut slots = Vec::with_capacity(queues.len() * sockets_per_queue as usize);
        for &queue in queues {
            for slot in 0..sockets_per_queue {
                let index = u64::from(queue) * u64::from(sockets_per_queue) + u64::from(slot);
                if index >= u64::from(MAX_SOCKETS) {
                    return Err(ConfigError::LayoutTooLarge {
                        queue,
                        index,
                        max: MAX_SOCKETS,
                    });
                }
                slots.push(SocketSlot {
                    queue,
                    slot,
                    index: index as u32,
                });
            }
        }

        Ok(Self {
            sockets_per_queue,
            slots,
        })
    }

    pub fn sockets_per_queue(&self) -> u32 {
        self.sockets_per_queue
    }

    pub fn slots(&self) -> &[SocketSlot] {
        &self.slots
    }

    /// Slots dedicated to `queue`, in slot order.
    pub fn queue_slots(&self, queue: u32) -> impl Iterator<Item = &SocketSlot> + '_ {
        self.slots.iter().filter(move |slot| slot.queue == queue)
    }

    pub fn index_of(&self, queue: u32, slot: u32) -> Option<u32> {
        self.slots
            .iter()
            .find(|s| s.queue == queue && s.slot == slot)
            .map(|s| s.index)
    }

    /// The socket a UDP peer using `source_port` lands on when its frames
    /// arrive on `queue`. `None` if the queue is not part of the layout.
    pub fn slot_for(&self, queue: u32, source_port: u16) -> Option<SocketSlot> {
        let index = routing_index(queue, port_key(source_port), self.sockets_per_queue)?;
        self.slots
            .iter()
            .find(|s| s.queue == queue && s.index == index)
            .copied()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
