//! In-process steering state driving the same classifier as the XDP program.
//!
//! [`SharedConfig`] and [`SocketTable`] mirror the single-slot configuration
//! maps and the XSKMAP. [`Steering`] runs [`classify`] over byte slices and
//! resolves redirects against the table, so every property of the kernel path
//! can be exercised without loading anything.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use xsksteer_common::{classify, ConfigStore, Verdict, MAX_SOCKETS};

use crate::control::{check_index, SteeringControl};
use crate::error::Result;

/// Marks a configuration word as written.
const PRESENT: u64 = 1 << 32;

/// Configuration record shared between the controller and every receiver.
///
/// Each value lives in one atomic word carrying a presence bit, so a read
/// never sees half of a write. The three values are independent.
#[derive(Debug, Default)]
pub struct SharedConfig {
    sockets_per_queue: AtomicU64,
    bound_address: AtomicU64,
    bound_port: AtomicU64,
}

impl SharedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sockets_per_queue(&self, sockets_per_queue: u32) {
        store(&self.sockets_per_queue, sockets_per_queue);
    }

    pub fn set_bound_address(&self, address: Ipv4Addr) {
        store(&self.bound_address, u32::from(address));
    }

    pub fn set_bound_port(&self, port: u16) {
        store(&self.bound_port, u32::from(port));
    }
}

fn store(cell: &AtomicU64, value: u32) {
    cell.store(PRESENT | u64::from(value), Ordering::Release);
}

fn load(cell: &AtomicU64) -> Option<u32> {
    let raw = cell.load(Ordering::Acquire);
    (raw & PRESENT != 0).then_some(raw as u32)
}

impl ConfigStore for SharedConfig {
    fn sockets_per_queue(&self) -> Option<u32> {
        load(&self.sockets_per_queue)
    }

    fn bound_address(&self) -> Option<u32> {
        load(&self.bound_address)
    }

    fn bound_port(&self) -> Option<u16> {
        load(&self.bound_port).map(|port| port as u16)
    }
}

/// Fixed-size routing table from index to socket handle.
#[derive(Debug)]
pub struct SocketTable<H> {
    slots: RwLock<Vec<Option<H>>>,
}

impl<H: Clone> SocketTable<H> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(vec![None; MAX_SOCKETS as usize]),
        }
    }

    /// Returns the handle at `index`. Out-of-range indices miss.
    pub fn get(&self, index: u32) -> Option<H> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(index as usize).and_then(Clone::clone)
    }

    /// Stores `handle` at `index` and returns the handle it replaced.
    pub fn insert(&self, index: u32, handle: H) -> Result<Option<H>> {
        check_index(index)?;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Ok(slots[index as usize].replace(handle))
    }

    pub fn remove(&self, index: u32) -> Result<Option<H>> {
        check_index(index)?;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Ok(slots[index as usize].take())
    }

    pub fn registered(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<H: Clone> Default for SocketTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<H> {
    /// Left to the normal network stack
    Pass,
    /// Dropped as malformed or misconfigured
    Abort,
    /// Delivered to the socket behind this handle
    Consumed(H),
}

/// Classifier plus the state it reads. Clones share that state.
#[derive(Debug)]
pub struct Steering<H> {
    config: Arc<SharedConfig>,
    sockets: Arc<SocketTable<H>>,
}

impl<H: Clone> Steering<H> {
    pub fn new() -> Self {
        Self::with_shared(Arc::new(SharedConfig::new()), Arc::new(SocketTable::new()))
    }

    pub fn with_shared(config: Arc<SharedConfig>, sockets: Arc<SocketTable<H>>) -> Self {
        Self { config, sockets }
    }

    pub fn config(&self) -> &Arc<SharedConfig> {
        &self.config
    }

    pub fn sockets(&self) -> &Arc<SocketTable<H>> {
        &self.sockets
    }

    /// Runs one frame received on `rx_queue_index` through the classifier.
    pub fn receive(&self, frame: &[u8], rx_queue_index: u32) -> Outcome<H> {
        match classify(frame, rx_queue_index, self.config.as_ref()) {
            Verdict::Pass => Outcome::Pass,
            Verdict::Abort => Outcome::Abort,
            Verdict::Redirect { index } => match self.sockets.get(index) {
                Some(handle) => Outcome::Consumed(handle),
                None => Outcome::Pass,
            },
        }
    }
}

impl<H: Clone> Default for Steering<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Clone for Steering<H> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            sockets: Arc::clone(&self.sockets),
        }
    }
}

impl<H: Clone> SteeringControl for Steering<H> {
    type Handle = H;

    fn set_sockets_per_queue(&mut self, sockets_per_queue: u32) -> Result<()> {
        self.config.set_sockets_per_queue(sockets_per_queue);
        Ok(())
    }

    fn set_bound_address(&mut self, address: Ipv4Addr) -> Result<()> {
        self.config.set_bound_address(address);
        Ok(())
    }

    fn set_bound_port(&mut self, port: u16) -> Result<()> {
        self.config.set_bound_port(port);
        Ok(())
    }

    fn register_socket(&mut self, index: u32, handle: H) -> Result<()> {
        self.sockets.insert(index, handle).map(|_| ())
    }

    fn unregister_socket(&mut self, index: u32) -> Result<()> {
        self.sockets.remove(index).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use xsksteer_common::{ETH_P_ARP, ETH_P_IP, IPPROTO_UDP};

    use super::*;
    use crate::control::SteeringSettings;
    use crate::error::SteerError;
    use crate::layout::SocketLayout;

    const BOUND: Ipv4Addr = Ipv4Addr::new(198, 18, 3, 2);
    const PORT: u16 = 1234;

    fn udp_frame(dst: Ipv4Addr, dst_port: u16, src_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 14 + 20 + 8 + 4];
        frame[12..14].copy_from_slice(&ETH_P_IP.to_be_bytes());
        frame[14] = 0x45;
        frame[16..18].copy_from_slice(&32u16.to_be_bytes());
        frame[22] = 64;
        frame[23] = IPPROTO_UDP;
        frame[26..30].copy_from_slice(&[10, 0, 0, 1]);
        frame[30..34].copy_from_slice(&dst.octets());
        frame[34..36].copy_from_slice(&src_port.to_be_bytes());
        frame[36..38].copy_from_slice(&dst_port.to_be_bytes());
        frame[38..40].copy_from_slice(&12u16.to_be_bytes());
        frame[42..].copy_from_slice(b"ping");
        frame
    }

    fn arp_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 42];
        frame[0..6].copy_from_slice(&[0xff; 6]);
        frame[12..14].copy_from_slice(&ETH_P_ARP.to_be_bytes());
        frame
    }

    fn configured(sockets_per_queue: u32) -> Steering<&'static str> {
        let mut steering = Steering::new();
        steering
            .apply(&SteeringSettings {
                sockets_per_queue,
                bound_address: BOUND,
                bound_port: PORT,
            })
            .unwrap();
        steering
    }

    #[test]
    fn test_unconfigured_steering_passes_everything() {
        let mut steering: Steering<&str> = Steering::new();
        steering.register_socket(0, "sock-0").unwrap();
        assert_eq!(steering.receive(&udp_frame(BOUND, PORT, 1), 0), Outcome::Pass);
        assert_eq!(steering.receive(&arp_frame(), 0), Outcome::Pass);
    }

    #[test]
    fn test_concrete_scenario_redirects_to_index_one() {
        let mut steering = configured(2);
        steering.register_socket(0, "sock-0").unwrap();
        steering.register_socket(1, "sock-1").unwrap();

        let frame = udp_frame(BOUND, PORT, 55201);
        assert_eq!(steering.receive(&frame, 0), Outcome::Consumed("sock-1"));
    }

    #[test]
    fn test_address_mismatch_passes() {
        let mut steering = configured(2);
        steering.register_socket(1, "sock-1").unwrap();

        let frame = udp_frame(Ipv4Addr::new(198, 18, 3, 3), PORT, 55201);
        assert_eq!(steering.receive(&frame, 0), Outcome::Pass);
    }

    #[test]
    fn test_zero_sockets_per_queue_aborts() {
        let mut steering = configured(0);
        steering.register_socket(0, "sock-0").unwrap();

        assert_eq!(steering.receive(&udp_frame(BOUND, PORT, 55201), 0), Outcome::Abort);
    }

    #[test]
    fn test_short_frames_abort() {
        let steering = configured(2);
        let frame = udp_frame(BOUND, PORT, 55201);
        assert_eq!(steering.receive(&frame[..10], 0), Outcome::Abort);
        assert_eq!(steering.receive(&frame[..30], 0), Outcome::Abort);
        assert_eq!(steering.receive(&frame[..40], 0), Outcome::Abort);
    }

    #[test]
    fn test_registered_socket_receives_and_no_other() {
        let mut steering = configured(4);
        for index in 0..8 {
            let name = ["a", "b", "c", "d", "e", "f", "g", "h"][index as usize];
            steering.register_socket(index, name).unwrap();
        }

        // queue 1, port 0x0202 -> 1 * 4 + 2 in either byte order
        let frame = udp_frame(BOUND, PORT, 0x0202);
        for _ in 0..5 {
            assert_eq!(steering.receive(&frame, 1), Outcome::Consumed("g"));
        }
        assert_eq!(steering.receive(&frame, 0), Outcome::Consumed("c"));
    }

    #[test]
    fn test_unregistered_index_passes_not_aborts() {
        let mut steering = configured(2);
        steering.register_socket(1, "sock-1").unwrap();
        let frame = udp_frame(BOUND, PORT, 55201);
        assert_eq!(steering.receive(&frame, 0), Outcome::Consumed("sock-1"));

        steering.unregister_socket(1).unwrap();
        assert_eq!(steering.receive(&frame, 0), Outcome::Pass);

        // Clearing an empty slot is fine.
        steering.unregister_socket(1).unwrap();
    }

    #[test]
    fn test_arp_reaches_first_socket_of_each_queue() {
        let mut steering = configured(3);
        let layout = SocketLayout::new(&[0, 1, 2], 3).unwrap();
        let names = ["q0s0", "q0s1", "q0s2", "q1s0", "q1s1", "q1s2", "q2s0", "q2s1", "q2s2"];
        for (slot, name) in layout.slots().iter().zip(names) {
            steering.register_socket(slot.index, name).unwrap();
        }

        assert_eq!(steering.receive(&arp_frame(), 0), Outcome::Consumed("q0s0"));
        assert_eq!(steering.receive(&arp_frame(), 1), Outcome::Consumed("q1s0"));
        assert_eq!(steering.receive(&arp_frame(), 2), Outcome::Consumed("q2s0"));
    }

    #[test]
    fn test_register_rejects_out_of_range_index() {
        let mut steering: Steering<u32> = Steering::new();
        assert!(matches!(
            steering.register_socket(MAX_SOCKETS, 7),
            Err(SteerError::IndexOutOfRange { .. })
        ));
        assert!(steering.unregister_socket(MAX_SOCKETS + 5).is_err());
        assert_eq!(steering.sockets().registered(), 0);
    }

    #[test]
    fn test_last_write_wins() {
        let mut steering = configured(2);
        steering.register_socket(1, "old").unwrap();
        steering.register_socket(1, "new").unwrap();
        assert_eq!(steering.sockets().registered(), 1);

        steering.set_bound_port(4321).unwrap();
        assert_eq!(steering.receive(&udp_frame(BOUND, PORT, 55201), 0), Outcome::Pass);
        assert_eq!(steering.receive(&udp_frame(BOUND, 4321, 55201), 0), Outcome::Consumed("new"));
    }

    #[test]
    fn test_shared_config_reads_absent_until_written() {
        let config = SharedConfig::new();
        assert_eq!(config.sockets_per_queue(), None);
        assert_eq!(config.bound_address(), None);
        assert_eq!(config.bound_port(), None);

        config.set_sockets_per_queue(0);
        config.set_bound_address(BOUND);
        config.set_bound_port(u16::MAX);
        assert_eq!(config.sockets_per_queue(), Some(0));
        assert_eq!(config.bound_address(), Some(u32::from(BOUND)));
        assert_eq!(config.bound_port(), Some(u16::MAX));
    }

    #[test]
    fn test_concurrent_reconfiguration_never_escapes_queue() {
        let steering: Steering<u32> = configured_u32(1);
        for index in 0..MAX_SOCKETS {
            steering.sockets().insert(index, index).unwrap();
        }

        thread::scope(|scope| {
            let writer = steering.clone();
            scope.spawn(move || {
                for round in 0..2_000u32 {
                    writer.config().set_sockets_per_queue(round % 4 + 1);
                }
            });

            for queue in 0..4u32 {
                let reader = steering.clone();
                scope.spawn(move || {
                    for port in 0..2_000u16 {
                        match reader.receive(&udp_frame(BOUND, PORT, port), queue) {
                            Outcome::Consumed(index) => {
                                // Whatever N was read, the index stays inside
                                // queue * N..queue * N + N.
                                assert!(index >= queue && index < queue * 4 + 4);
                            }
                            other => panic!("unexpected outcome {other:?}"),
                        }
                    }
                });
            }
        });
    }

    fn configured_u32(sockets_per_queue: u32) -> Steering<u32> {
        let steering = Steering::new();
        steering.config().set_sockets_per_queue(sockets_per_queue);
        steering.config().set_bound_address(BOUND);
        steering.config().set_bound_port(PORT);
        steering
    }
}
