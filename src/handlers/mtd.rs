//! `mtd`: enumerates flash partitions from `/proc/mtd`, and a shared
//! size-detection helper used by `pull` for MTD character devices, which
//! report a zero `st_size` from `stat(2)` regardless of their real size.

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use crate::codec::Writer;
use crate::error::{FatalError, HandlerError};
use crate::handlers::respond;
use crate::session::Session;

const MTD_TYPE: u64 = b'M' as u64;
const MTD_GETINFO_NR: u64 = 1;
const MTD_INFO_SIZE: u64 = std::mem::size_of::<MtdInfoUser>() as u64;

/// `_IOR('M', 1, struct mtd_info_user)` computed the way the kernel's
/// `ioctl.h` macros do, since no safe binding for MTD ioctls exists in
/// `libc` or `nix`.
const MEMGETINFO: libc::c_ulong = ((2u64 << 30) | (MTD_INFO_SIZE << 16) | (MTD_TYPE << 8) | MTD_GETINFO_NR) as libc::c_ulong;

/// Mirrors `struct mtd_info_user` from `linux/mtd/mtd-abi.h`.
#[repr(C)]
struct MtdInfoUser {
    type_: u8,
    flags: u32,
    size: u32,
    erasesize: u32,
    writesize: u32,
    oobsize: u32,
    padding: u64,
}

pub fn mtd(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_mtd();
    respond(session, id, result)
}

fn do_mtd() -> Result<Vec<u8>, HandlerError> {
    let text = fs::read_to_string("/proc/mtd").map_err(HandlerError::filesystem)?;
    let mut partitions = Vec::new();

    for line in text.lines().skip(1) {
        if let Some(p) = parse_proc_mtd_line(line) {
            partitions.push(p);
        }
    }

    let mut w = Writer::with_capacity(64 + partitions.len() * 48);
    w.map_header(1);
    w.str("partitions");
    w.array_header(partitions.len());
    for p in &partitions {
        w.map_header(4);
        w.str("index");
        w.uint(p.index);
        w.str("name");
        w.str(&p.name);
        w.str("size");
        w.uint(p.size);
        w.str("erasesize");
        w.uint(p.erasesize);
    }
    Ok(w.into_bytes())
}

struct MtdPartition {
    index: u64,
    name: String,
    size: u64,
    erasesize: u64,
}

/// Parses one line of `/proc/mtd`, e.g. `mtd0: 00800000 00020000 "rootfs"`.
fn parse_proc_mtd_line(line: &str) -> Option<MtdPartition> {
    let (dev, rest) = line.split_once(':')?;
    let index: u64 = dev.trim().trim_start_matches("mtd").parse().ok()?;

    let mut fields = rest.trim().splitn(3, char::is_whitespace);
    let size = u64::from_str_radix(fields.next()?, 16).ok()?;
    let erasesize = u64::from_str_radix(fields.next()?.trim(), 16).ok()?;
    let name = fields
        .next()?
        .trim()
        .trim_matches('"')
        .to_string();

    Some(MtdPartition {
        index,
        name,
        size,
        erasesize,
    })
}

/// Returns the real size of `path` when it is an MTD character device
/// (`MEMGETINFO` ioctl, falling back to a `/proc/mtd` name lookup if the
/// ioctl fails). Returns `None` for anything else, leaving the caller to
/// fall back to `st_size`.
pub fn mtd_size(path: &Path, meta: &std::fs::Metadata) -> Option<u64> {
    if !meta.file_type().is_char_device() {
        return None;
    }

    if let Some(size) = mtd_size_via_ioctl(path) {
        return Some(size);
    }
    mtd_size_via_proc(path)
}

fn mtd_size_via_ioctl(path: &Path) -> Option<u64> {
    let file = std::fs::File::open(path).ok()?;
    use std::os::unix::io::AsRawFd;
    let mut info = MtdInfoUser {
        type_: 0,
        flags: 0,
        size: 0,
        erasesize: 0,
        writesize: 0,
        oobsize: 0,
        padding: 0,
    };
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), MEMGETINFO, &mut info as *mut MtdInfoUser) };
    if ret != 0 {
        return None;
    }
    Some(info.size as u64)
}

fn mtd_size_via_proc(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let text = fs::read_to_string("/proc/mtd").ok()?;
    for line in text.lines().skip(1) {
        let p = parse_proc_mtd_line(line)?;
        if p.name == name || format!("mtd{}", p.index) == name {
            return Some(p.size);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_proc_mtd_line() {
        let p = parse_proc_mtd_line(r#"mtd0: 00800000 00020000 "rootfs""#).unwrap();
        assert_eq!(p.index, 0);
        assert_eq!(p.name, "rootfs");
        assert_eq!(p.size, 0x0080_0000);
        assert_eq!(p.erasesize, 0x0002_0000);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_proc_mtd_line("garbage").is_none());
    }
}
