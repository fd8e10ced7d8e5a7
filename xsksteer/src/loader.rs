use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aya::programs::xdp::XdpLinkId;
use aya::programs::Xdp;
use aya::{include_bytes_aligned, Ebpf};
use log::{debug, info, warn};
use xsksteer_common::{MAP_NAMES, PROGRAM_NAME};

use crate::config::XdpMode;
use crate::control::MapController;
use crate::error::{Result, SteerError};

const EBPF_BYTES: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/xsksteer"));

/// Owns the loaded steering program and its attachment to one interface.
pub struct SteeringProgram {
    ebpf: Ebpf,
    link: Option<(String, XdpLinkId)>,
    pinned: Vec<PathBuf>,
}

impl SteeringProgram {
    /// Loads the embedded object. Maps are created, nothing is attached yet.
    pub fn load() -> Result<Self> {
        bump_memlock_rlimit();

        let ebpf = Ebpf::load(EBPF_BYTES)?;
        info!("Loaded steering program ({} bytes of BPF object)", EBPF_BYTES.len());

        Ok(Self {
            ebpf,
            link: None,
            pinned: Vec::new(),
        })
    }

    /// Pins every steering map under `dir`, replacing stale pins from a
    /// previous run.
    pub fn pin_maps<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        for name in MAP_NAMES {
            let path = dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => warn!("Removed stale pin {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            let map = self.ebpf.map(name).ok_or(SteerError::MapNotFound(name))?;
            map.pin(&path)
                .map_err(|source| SteerError::Pin { name, source })?;
            debug!("Pinned {} at {}", name, path.display());
            self.pinned.push(path);
        }

        info!("Steering maps pinned under {}", dir.display());
        Ok(())
    }

    /// Removes the pins created by [`pin_maps`](Self::pin_maps).
    pub fn unpin_maps(&mut self) {
        for path in self.pinned.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove pin {}: {}", path.display(), e);
            }
        }
    }

    /// Moves the steering maps into a controller. Pin before calling this.
    pub fn controller(&mut self) -> Result<MapController> {
        MapController::from_ebpf(&mut self.ebpf)
    }

    pub fn attach(&mut self, interface: &str, mode: XdpMode) -> Result<()> {
        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(SteerError::ProgramNotFound(PROGRAM_NAME))?
            .try_into()?;
        program.load()?;
        let link = program.attach(interface, mode.flags())?;

        info!("XDP program attached to {} in {:?} mode", interface, mode);
        self.link = Some((interface.to_string(), link));
        Ok(())
    }

    pub fn detach(&mut self) -> Result<()> {
        let Some((interface, link)) = self.link.take() else {
            warn!("No XDP program attached to detach");
            return Ok(());
        };

        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(SteerError::ProgramNotFound(PROGRAM_NAME))?
            .try_into()?;
        program.detach(link)?;

        info!("XDP program detached from {}", interface);
        Ok(())
    }
}

impl Drop for SteeringProgram {
    fn drop(&mut self) {
        if let Some((interface, _)) = &self.link {
            warn!(
                "Steering program still attached to {} during drop, detaching with it",
                interface
            );
        }
        self.unpin_maps();
    }
}

// Bump the memlock rlimit. This is needed for older kernels that don't use the
// new memcg based accounting, see https://lwn.net/Articles/837122/
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }
}
