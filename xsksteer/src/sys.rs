//! Raw bpf(2) calls that aya does not expose for XSKMAP.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};

const BPF_MAP_DELETE_ELEM: libc::c_long = 3;

/// The `bpf_attr` layout used by the map element commands.
#[repr(C)]
struct MapElemAttr {
    map_fd: u32,
    _pad: u32,
    key: u64,
    value: u64,
    flags: u64,
}

/// Deletes `key` from the map behind `fd`. A missing key is not an error.
pub(crate) fn map_delete_elem<K>(fd: BorrowedFd<'_>, key: &K) -> io::Result<()> {
    let attr = MapElemAttr {
        map_fd: fd.as_raw_fd() as u32,
        _pad: 0,
        key: key as *const K as u64,
        value: 0,
        flags: 0,
    };

    // SAFETY: `attr` and `key` outlive the call and the size matches the struct.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_MAP_DELETE_ELEM,
            &attr as *const MapElemAttr,
            mem::size_of::<MapElemAttr>() as libc::c_uint,
        )
    };
    if ret < 0 {
        return missing_key_ok(io::Error::last_os_error());
    }
    Ok(())
}

fn missing_key_ok(err: io::Error) -> io::Result<()> {
    match err.raw_os_error() {
        Some(libc::ENOENT) => Ok(()),
        _ => Err(err),
    }
}
