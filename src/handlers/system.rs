//! System-introspection handlers that don't touch user files directly:
//! `uname`, `whoami`, `ps`, `ss`, `env`, `dmesg`, `cpuinfo`, `strings`,
//! `hexdump`, `firmware`, `ip_addr`, `ip_route`, `kill-agent`, `reboot`.

use std::ffi::CStr;
use std::fs;
use std::io::Read;

use crate::codec::Writer;
use crate::envelope::{get_string_arg, get_uint_arg};
use crate::error::{FatalError, HandlerError};
use crate::handlers::respond;
use crate::path_util;
use crate::session::Session;

pub fn uname(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_uname();
    respond(session, id, result)
}

fn cstr_field(buf: &[i8]) -> String {
    let bytes: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, buf.len()) };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn do_uname() -> Result<Vec<u8>, HandlerError> {
    let mut u: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut u) } != 0 {
        return Err(HandlerError::filesystem(std::io::Error::last_os_error()));
    }

    let mut w = Writer::with_capacity(256);
    w.map_header(5);
    w.str("sysname");
    w.str(&cstr_field(&u.sysname));
    w.str("nodename");
    w.str(&cstr_field(&u.nodename));
    w.str("release");
    w.str(&cstr_field(&u.release));
    w.str("version");
    w.str(&cstr_field(&u.version));
    w.str("machine");
    w.str(&cstr_field(&u.machine));
    Ok(w.into_bytes())
}

pub fn whoami(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_whoami();
    respond(session, id, result)
}

fn do_whoami() -> Result<Vec<u8>, HandlerError> {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let name = user_name_for(uid).unwrap_or_else(|| uid.to_string());

    let mut w = Writer::with_capacity(64);
    w.map_header(3);
    w.str("username");
    w.str(&name);
    w.str("uid");
    w.uint(uid as u64);
    w.str("gid");
    w.uint(gid as u64);
    Ok(w.into_bytes())
}

fn user_name_for(uid: libc::uid_t) -> Option<String> {
    let pw = unsafe { libc::getpwuid(uid) };
    if pw.is_null() {
        return None;
    }
    let name_ptr = unsafe { (*pw).pw_name };
    if name_ptr.is_null() {
        return None;
    }
    let cstr = unsafe { CStr::from_ptr(name_ptr) };
    Some(cstr.to_string_lossy().into_owned())
}

pub fn ps(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_ps();
    respond(session, id, result)
}

struct ProcEntry {
    pid: u64,
    comm: String,
    cmdline: String,
}

fn do_ps() -> Result<Vec<u8>, HandlerError> {
    let mut procs = Vec::new();
    let dir = fs::read_dir("/proc").map_err(HandlerError::filesystem)?;
    for entry in dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(pid) = name.parse::<u64>() else {
            continue;
        };
        if let Some(p) = read_proc_entry(pid) {
            procs.push(p);
        }
    }
    procs.sort_by_key(|p| p.pid);

    let mut w = Writer::with_capacity(64 + procs.len() * 48);
    w.map_header(1);
    w.str("processes");
    w.array_header(procs.len());
    for p in &procs {
        w.map_header(3);
        w.str("pid");
        w.uint(p.pid);
        w.str("comm");
        w.str(&p.comm);
        w.str("cmdline");
        w.str(&p.cmdline);
    }
    Ok(w.into_bytes())
}

fn read_proc_entry(pid: u64) -> Option<ProcEntry> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?.to_string();

    let cmdline_raw = fs::read(format!("/proc/{pid}/cmdline")).unwrap_or_default();
    let cmdline = cmdline_raw
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    Some(ProcEntry { pid, comm, cmdline })
}

pub fn ss(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_ss();
    respond(session, id, result)
}

fn do_ss() -> Result<Vec<u8>, HandlerError> {
    let inode_pids = build_inode_pid_map();
    let mut out = String::new();
    out.push_str("proto local_address remote_address state pid\n");

    for (path, proto) in [
        ("/proc/net/tcp", "tcp"),
        ("/proc/net/tcp6", "tcp6"),
        ("/proc/net/udp", "udp"),
        ("/proc/net/udp6", "udp6"),
    ] {
        let Ok(text) = fs::read_to_string(path) else {
            continue;
        };
        for line in text.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            let local = decode_proc_net_address(fields[1], proto.ends_with('6'));
            let remote = decode_proc_net_address(fields[2], proto.ends_with('6'));
            let state = fields[3];
            let inode = fields[9];
            let pid = inode_pids
                .get(inode)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!("{proto} {local} {remote} {state} {pid}\n"));
        }
    }

    let mut w = Writer::with_capacity(out.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(out.as_bytes());
    Ok(w.into_bytes())
}

fn build_inode_pid_map() -> std::collections::HashMap<String, u64> {
    let mut map = std::collections::HashMap::new();
    let Ok(dir) = fs::read_dir("/proc") else {
        return map;
    };
    for entry in dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(pid) = name.parse::<u64>() else {
            continue;
        };
        let fd_dir = format!("/proc/{pid}/fd");
        let Ok(fds) = fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(target) = fs::read_link(fd.path()) {
                let target = target.to_string_lossy();
                if let Some(inode) = target
                    .strip_prefix("socket:[")
                    .and_then(|s| s.strip_suffix(']'))
                {
                    map.insert(inode.to_string(), pid);
                }
            }
        }
    }
    map
}

fn decode_proc_net_address(field: &str, is_v6: bool) -> String {
    let Some((addr_hex, port_hex)) = field.split_once(':') else {
        return field.to_string();
    };
    let port = u16::from_str_radix(port_hex, 16).unwrap_or(0);

    if is_v6 {
        let Ok(raw) = u128::from_str_radix(addr_hex, 16) else {
            return field.to_string();
        };
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = ((raw >> (i * 32)) & 0xffff_ffff) as u32;
        }
        let mut octets = [0u8; 16];
        for (i, word) in words.iter().enumerate() {
            octets[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        let addr = std::net::Ipv6Addr::from(octets);
        format!("[{addr}]:{port}")
    } else {
        let Ok(raw) = u32::from_str_radix(addr_hex, 16) else {
            return field.to_string();
        };
        let octets = raw.to_le_bytes();
        let addr = std::net::Ipv4Addr::from(octets);
        format!("{addr}:{port}")
    }
}

pub fn env(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let mut out = String::new();
    for (k, v) in std::env::vars() {
        out.push_str(&format!("{k}={v}\n"));
    }
    let mut w = Writer::with_capacity(out.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(out.as_bytes());
    respond(session, id, Ok(w.into_bytes()))
}

pub fn dmesg(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_dmesg();
    respond(session, id, result)
}

fn do_dmesg() -> Result<Vec<u8>, HandlerError> {
    // SYSLOG_ACTION_READ_ALL = 3, with a generous fixed buffer; klogctl
    // truncates rather than overflowing.
    const SYSLOG_ACTION_READ_ALL: libc::c_int = 3;
    let mut buf = vec![0u8; 256 * 1024];
    let ret = unsafe {
        libc::klogctl(
            SYSLOG_ACTION_READ_ALL,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len() as libc::c_int,
        )
    };
    if ret < 0 {
        // Fall back to the kernel ring buffer exposed in /dev, which some
        // hardened kernels allow unprivileged reads of even when the
        // syslog syscall is restricted.
        let fallback = fs::read("/dev/kmsg").or_else(|_| fs::read("/proc/kmsg"));
        return match fallback {
            Ok(data) => {
                let mut w = Writer::with_capacity(data.len() + 16);
                w.map_header(1);
                w.str("content");
                w.bin(&data);
                Ok(w.into_bytes())
            }
            Err(e) => Err(HandlerError::filesystem(e)),
        };
    }
    buf.truncate(ret as usize);

    let mut w = Writer::with_capacity(buf.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(&buf);
    Ok(w.into_bytes())
}

pub fn cpuinfo(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = fs::read("/proc/cpuinfo")
        .map_err(HandlerError::filesystem)
        .map(|data| {
            let mut w = Writer::with_capacity(data.len() + 16);
            w.map_header(1);
            w.str("content");
            w.bin(&data);
            w.into_bytes()
        });
    respond(session, id, result)
}

pub fn strings(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_strings(session, args);
    respond(session, id, result)
}

fn do_strings(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path")
        .ok_or_else(|| HandlerError::BadArgument("missing path argument".to_string()))?;
    let min_len = get_uint_arg(args, "min_len").unwrap_or(4) as usize;
    let path = path_util::resolve(&session.cwd, &path_str);

    let data = fs::read(&path).map_err(HandlerError::filesystem)?;
    let mut out = String::new();
    let mut run = Vec::new();
    for &b in &data {
        if b.is_ascii_graphic() || b == b' ' {
            run.push(b);
        } else {
            if run.len() >= min_len {
                out.push_str(&String::from_utf8_lossy(&run));
                out.push('\n');
            }
            run.clear();
        }
    }
    if run.len() >= min_len {
        out.push_str(&String::from_utf8_lossy(&run));
        out.push('\n');
    }

    let mut w = Writer::with_capacity(out.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(out.as_bytes());
    Ok(w.into_bytes())
}

pub fn hexdump(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_hexdump(session, args);
    respond(session, id, result)
}

fn do_hexdump(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path")
        .ok_or_else(|| HandlerError::BadArgument("missing path argument".to_string()))?;
    let offset = get_uint_arg(args, "offset").unwrap_or(0);
    let length = get_uint_arg(args, "length").unwrap_or(256);
    let path = path_util::resolve(&session.cwd, &path_str);

    let mut file = fs::File::open(&path).map_err(HandlerError::filesystem)?;
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset)).map_err(HandlerError::filesystem)?;

    let mut buf = vec![0u8; length as usize];
    let n = file.read(&mut buf).map_err(HandlerError::filesystem)?;
    buf.truncate(n);

    let text = render_hexdump(&buf, offset);
    let mut w = Writer::with_capacity(text.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(text.as_bytes());
    Ok(w.into_bytes())
}

fn render_hexdump(data: &[u8], base_offset: u64) -> String {
    let mut out = String::new();
    for (row_idx, row) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", base_offset + (row_idx * 16) as u64));
        for (i, b) in row.iter().enumerate() {
            out.push_str(&format!("{b:02x} "));
            if i == 7 {
                out.push(' ');
            }
        }
        let pad = 16 - row.len();
        for i in 0..pad {
            out.push_str("   ");
            if row.len() + i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        for &b in row {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            out.push(c);
        }
        out.push_str("|\n");
    }
    out
}

pub fn firmware(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let data = fs::read("/etc/os-release")
        .or_else(|_| fs::read("/proc/version"))
        .map_err(HandlerError::filesystem)
        .map(|data| {
            let mut w = Writer::with_capacity(data.len() + 16);
            w.map_header(1);
            w.str("content");
            w.bin(&data);
            w.into_bytes()
        });
    respond(session, id, data)
}

pub fn ip_addr(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_ip_addr();
    respond(session, id, result)
}

fn do_ip_addr() -> Result<Vec<u8>, HandlerError> {
    let mut out = String::new();
    let dir = fs::read_dir("/sys/class/net").map_err(HandlerError::filesystem)?;
    let mut names: Vec<String> = dir
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for name in names {
        let mtu = fs::read_to_string(format!("/sys/class/net/{name}/mtu"))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let flags = fs::read_to_string(format!("/sys/class/net/{name}/flags"))
            .ok()
            .and_then(|s| {
                let s = s.trim().trim_start_matches("0x");
                u32::from_str_radix(s, 16).ok()
            })
            .unwrap_or(0);
        let up = flags & 0x1 != 0;

        let (addr, netmask) = ioctl_ipv4_addr(&name).unwrap_or((String::new(), String::new()));

        out.push_str(&format!(
            "{name}: mtu {mtu} flags={flags:#x}{} addr {addr} mask {netmask}\n",
            if up { " UP" } else { "" }
        ));
    }

    let mut w = Writer::with_capacity(out.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(out.as_bytes());
    Ok(w.into_bytes())
}

/// Layout-compatible with the kernel's `struct ifreq` for the
/// `SIOCGIFADDR`/`SIOCGIFNETMASK` calls, hand-defined rather than trusted
/// to `libc::ifreq`'s exact field shape across target triples.
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_addr: libc::sockaddr,
}

fn ioctl_ipv4_addr(name: &str) -> Option<(String, String)> {
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return None;
    }
    let result = (|| {
        let mut req: IfReq = unsafe { std::mem::zeroed() };
        let name_bytes = name.as_bytes();
        if name_bytes.len() >= libc::IFNAMSIZ {
            return None;
        }
        for (i, &b) in name_bytes.iter().enumerate() {
            req.ifr_name[i] = b as libc::c_char;
        }

        if unsafe { libc::ioctl(sock, libc::SIOCGIFADDR, &mut req) } != 0 {
            return None;
        }
        let addr = sockaddr_to_ipv4(&req.ifr_addr)?;

        if unsafe { libc::ioctl(sock, libc::SIOCGIFNETMASK, &mut req) } != 0 {
            return None;
        }
        let mask = sockaddr_to_ipv4(&req.ifr_addr)?;

        Some((addr, mask))
    })();
    unsafe { libc::close(sock) };
    result
}

fn sockaddr_to_ipv4(addr: &libc::sockaddr) -> Option<String> {
    if addr.sa_family as i32 != libc::AF_INET {
        return None;
    }
    let sin: libc::sockaddr_in = unsafe { std::mem::transmute_copy(addr) };
    let octets = sin.sin_addr.s_addr.to_ne_bytes();
    Some(std::net::Ipv4Addr::from(octets).to_string())
}

pub fn ip_route(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let result = do_ip_route();
    respond(session, id, result)
}

fn do_ip_route() -> Result<Vec<u8>, HandlerError> {
    let text = fs::read_to_string("/proc/net/route").map_err(HandlerError::filesystem)?;
    let mut out = String::new();
    const RTF_UP: u64 = 0x1;

    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        let iface = fields[0];
        let Ok(dest) = u32::from_str_radix(fields[1], 16) else {
            continue;
        };
        let Ok(gateway) = u32::from_str_radix(fields[2], 16) else {
            continue;
        };
        let Ok(flags) = u64::from_str_radix(fields[3], 16) else {
            continue;
        };
        let Ok(mask) = u32::from_str_radix(fields[7], 16) else {
            continue;
        };
        if flags & RTF_UP == 0 {
            continue;
        }
        out.push_str(&format!(
            "{iface} dest={} gateway={} mask={}\n",
            std::net::Ipv4Addr::from(dest.to_le_bytes()),
            std::net::Ipv4Addr::from(gateway.to_le_bytes()),
            std::net::Ipv4Addr::from(mask.to_le_bytes()),
        ));
    }

    if out.is_empty() {
        out.push_str("(no routes)\n");
    }

    let mut w = Writer::with_capacity(out.len() + 16);
    w.map_header(1);
    w.str("content");
    w.bin(out.as_bytes());
    Ok(w.into_bytes())
}

pub fn kill_agent(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let pid = unsafe { libc::getppid() };
    let mut w = Writer::with_capacity(16);
    w.map_header(1);
    w.str("killed_pid");
    w.uint(pid as u64);
    session.send_ok(id, &w.into_bytes())?;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    Ok(true)
}

pub fn reboot(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let mut w = Writer::with_capacity(32);
    w.map_header(1);
    w.str("status");
    w.str("rebooting");
    session.send_ok(id, &w.into_bytes())?;
    unsafe {
        libc::sync();
        libc::reboot(libc::RB_AUTOBOOT);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ipv4_proc_net_address() {
        assert_eq!(decode_proc_net_address("0100007F:1F90", false), "127.0.0.1:8080");
    }

    #[test]
    fn hexdump_renders_known_row() {
        let text = render_hexdump(b"hello", 0);
        assert!(text.starts_with("00000000  "));
        assert!(text.contains("|hello"));
    }

    #[test]
    fn strings_respects_min_len() {
        // exercised indirectly via do_strings in integration tests; here
        // just check the ascii-run classifier logic inline.
        let data = b"ab\x00cdef\x00gh";
        let mut out = String::new();
        let mut run = Vec::new();
        let min_len = 3;
        for &b in data {
            if b.is_ascii_graphic() {
                run.push(b);
            } else {
                if run.len() >= min_len {
                    out.push_str(&String::from_utf8_lossy(&run));
                }
                run.clear();
            }
        }
        assert_eq!(out, "cdef");
    }
}
