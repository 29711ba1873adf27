//! Filesystem-facing handlers: `ls`, `cat`, `pwd`, `cd`, `realpath`,
//! `mkdir`, `rm`, `mv`, `cp`, `chmod`, `touch`.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;

use crate::codec::Writer;
use crate::envelope::{get_string_arg, get_uint_arg};
use crate::error::{FatalError, HandlerError};
use crate::frame::MAX_FRAME_SIZE;
use crate::handlers::{empty_map, respond};
use crate::path_util;
use crate::session::Session;

fn missing_arg(name: &str) -> HandlerError {
    HandlerError::BadArgument(format!("missing {name} argument"))
}

pub fn ls(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_ls(session, args);
    respond(session, id, result)
}

fn do_ls(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path = match get_string_arg(args, "path") {
        Some(p) => path_util::resolve(&session.cwd, &p),
        None => std::path::PathBuf::from(&session.cwd),
    };

    let dir = fs::read_dir(&path).map_err(HandlerError::filesystem)?;
    let mut entries = Vec::new();
    for entry in dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let entry_path = entry.path();
        let (etype, size, mode, mtime) = classify(&entry_path);
        entries.push((name, etype, size, mode, mtime));
    }

    let mut w = Writer::with_capacity(64 + entries.len() * 80);
    w.map_header(1);
    w.str("entries");
    w.array_header(entries.len());
    for (name, etype, size, mode, mtime) in &entries {
        w.map_header(5);
        w.str("name");
        w.str(name);
        w.str("type");
        w.str(etype);
        w.str("size");
        w.uint(*size);
        w.str("mode");
        w.uint(*mode);
        w.str("mtime");
        w.uint(*mtime);
    }
    Ok(w.into_bytes())
}

/// Classifies one directory entry. Per-entry stat failures (a dangling
/// symlink target, a file removed mid-scan) are tolerated: the entry is
/// still reported, with zeroed size/mode/mtime, rather than failing the
/// whole listing.
fn classify(path: &Path) -> (&'static str, u64, u64, u64) {
    let link_meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return ("other", 0, 0, 0),
    };

    if link_meta.file_type().is_symlink() {
        return ("link", 0, link_meta.mode() as u64 & 0o7777, link_meta.mtime() as u64);
    }

    match fs::metadata(path) {
        Ok(meta) => {
            let etype = if meta.is_dir() {
                "dir"
            } else if meta.is_file() {
                "file"
            } else {
                "other"
            };
            (etype, meta.len(), meta.mode() as u64 & 0o7777, meta.mtime() as u64)
        }
        Err(_) => ("other", 0, 0, 0),
    }
}

pub fn pwd(session: &mut Session, id: u64, _args: &[u8]) -> Result<bool, FatalError> {
    let mut w = Writer::with_capacity(32 + session.cwd.len());
    w.map_header(1);
    w.str("path");
    w.str(&session.cwd);
    let body = w.into_bytes();
    respond(session, id, Ok(body))
}

pub fn cd(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_cd(session, args);
    respond(session, id, result)
}

fn do_cd(session: &mut Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    let path = path_util::resolve(&session.cwd, &path_str);
    if !path.exists() {
        return Err(HandlerError::Filesystem(format!(
            "{path_str}: no such file or directory"
        )));
    }
    if !path.is_dir() {
        return Err(HandlerError::Filesystem(format!("{path_str}: not a directory")));
    }
    let canon = path_util::canonicalize(&path).map_err(HandlerError::filesystem)?;
    let canon_str = canon.to_string_lossy().into_owned();
    session.cwd = canon_str.clone();

    let mut w = Writer::with_capacity(32 + canon_str.len());
    w.map_header(1);
    w.str("path");
    w.str(&canon_str);
    Ok(w.into_bytes())
}

pub fn realpath(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_realpath(session, args);
    respond(session, id, result)
}

fn do_realpath(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    let path = path_util::resolve(&session.cwd, &path_str);
    let canon = path_util::canonicalize(&path).map_err(HandlerError::filesystem)?;
    let canon_str = canon.to_string_lossy().into_owned();

    let mut w = Writer::with_capacity(32 + canon_str.len());
    w.map_header(1);
    w.str("path");
    w.str(&canon_str);
    Ok(w.into_bytes())
}

pub fn mkdir(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_mkdir(session, args);
    respond(session, id, result)
}

fn do_mkdir(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    let mode = get_uint_arg(args, "mode").unwrap_or(0o755) as u32;
    let path = path_util::resolve(&session.cwd, &path_str);
    fs::create_dir(&path).map_err(HandlerError::filesystem)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(HandlerError::filesystem)?;
    Ok(empty_map())
}

pub fn rm(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_rm(session, args);
    respond(session, id, result)
}

fn do_rm(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    let path = path_util::resolve(&session.cwd, &path_str);
    let meta = fs::symlink_metadata(&path).map_err(HandlerError::filesystem)?;
    let result = if meta.is_dir() {
        fs::remove_dir(&path)
    } else {
        fs::remove_file(&path)
    };
    result.map_err(HandlerError::filesystem)?;
    Ok(empty_map())
}

pub fn mv(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_mv(session, args);
    respond(session, id, result)
}

fn do_mv(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let src_str = get_string_arg(args, "src").ok_or_else(|| missing_arg("src"))?;
    let dst_str = get_string_arg(args, "dst").ok_or_else(|| missing_arg("dst"))?;
    let src = path_util::resolve(&session.cwd, &src_str);
    if !src.exists() {
        return Err(HandlerError::Filesystem(format!("{src_str}: no such file or directory")));
    }
    let dst = path_util::resolve(&session.cwd, &dst_str);
    fs::rename(&src, &dst).map_err(HandlerError::filesystem)?;
    Ok(empty_map())
}

pub fn cp(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_cp(session, args);
    respond(session, id, result)
}

fn do_cp(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let src_str = get_string_arg(args, "src").ok_or_else(|| missing_arg("src"))?;
    let dst_str = get_string_arg(args, "dst").ok_or_else(|| missing_arg("dst"))?;
    let src = path_util::resolve(&session.cwd, &src_str);
    let dst = path_util::resolve(&session.cwd, &dst_str);

    let meta = fs::metadata(&src).map_err(HandlerError::filesystem)?;
    if meta.is_dir() {
        return Err(HandlerError::Filesystem(format!("{src_str}: is a directory")));
    }

    let mut in_file = File::open(&src).map_err(HandlerError::filesystem)?;
    let mut out_file = File::create(&dst).map_err(HandlerError::filesystem)?;

    let copy_result: std::io::Result<()> = (|| {
        let mut buf = [0u8; 8192];
        loop {
            let n = in_file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            std::io::Write::write_all(&mut out_file, &buf[..n])?;
        }
        Ok(())
    })();

    if let Err(e) = copy_result {
        let _ = fs::remove_file(&dst);
        return Err(HandlerError::filesystem(e));
    }

    fs::set_permissions(&dst, meta.permissions()).map_err(HandlerError::filesystem)?;
    Ok(empty_map())
}

pub fn chmod(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_chmod(session, args);
    respond(session, id, result)
}

fn do_chmod(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    // Unlike mkdir, mode is mandatory here -- there is no sensible default
    // for an explicit permission change.
    let mode = get_uint_arg(args, "mode").ok_or_else(|| missing_arg("mode"))? as u32;
    let path = path_util::resolve(&session.cwd, &path_str);
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(HandlerError::filesystem)?;
    Ok(empty_map())
}

pub fn touch(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_touch(session, args);
    respond(session, id, result)
}

fn do_touch(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    let path = path_util::resolve(&session.cwd, &path_str);

    OpenOptions::new()
        .create(true)
        .write(true)
        .open(&path)
        .map_err(HandlerError::filesystem)?;
    touch_mtime(&path).map_err(HandlerError::filesystem)?;
    Ok(empty_map())
}

/// Sets both atime and mtime to "now" without truncating existing
/// content -- real POSIX `touch` semantics, implemented via
/// `utimensat(2)` since the standard library has no direct equivalent.
fn touch_mtime(path: &Path) -> std::io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul byte in path"))?;
    let times = [
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
    ];
    let ret = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

pub fn cat(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let result = do_cat(session, args);
    respond(session, id, result)
}

fn do_cat(session: &Session, args: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let path_str = get_string_arg(args, "path").ok_or_else(|| missing_arg("path"))?;
    let path = path_util::resolve(&session.cwd, &path_str);

    let mut file = File::open(&path).map_err(HandlerError::filesystem)?;
    let meta = file.metadata().map_err(HandlerError::filesystem)?;
    if meta.is_dir() {
        return Err(HandlerError::Filesystem(format!("{path_str}: is a directory")));
    }

    // The message-size ceiling leaves headroom for envelope overhead
    // (type/id/ok/data keys and the size field) around the content blob.
    let cap = (MAX_FRAME_SIZE as usize).saturating_sub(1024);

    // Regular files with a known, nonzero size are read in one shot;
    // "virtual" files (proc/sysfs-style, reporting zero size up front)
    // are read in a growing buffer until EOF. Both paths share the same
    // cap, so the observable behavior -- and the "file too large" error
    // -- is identical regardless of which path a given file takes.
    let content = if meta.len() > 0 && !meta.file_type().is_char_device() {
        if meta.len() as usize > cap {
            return Err(HandlerError::Filesystem("file too large".to_string()));
        }
        let mut buf = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut buf).map_err(HandlerError::filesystem)?;
        buf
    } else {
        read_until_eof_capped(&mut file, cap)?
    };

    let mut w = Writer::with_capacity(content.len() + 32);
    w.map_header(2);
    w.str("content");
    w.bin(&content);
    w.str("size");
    w.uint(content.len() as u64);
    Ok(w.into_bytes())
}

fn read_until_eof_capped(file: &mut File, cap: usize) -> Result<Vec<u8>, HandlerError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = file.read(&mut chunk).map_err(HandlerError::filesystem)?;
        if n == 0 {
            break;
        }
        if buf.len() + n > cap {
            return Err(HandlerError::Filesystem("file too large".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Mode;
    use std::net::{TcpListener, TcpStream};

    fn dummy_session() -> Session {
        // A session needs a live socket pair for its type to construct;
        // handler unit tests below only touch `cwd`, never the stream.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(client);
        let mut session = Session::new(server, Mode::Bind);
        session.cwd = "/".to_string();
        session
    }

    #[test]
    fn mkdir_then_ls_then_rm() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = dummy_session();
        session.cwd = dir.path().to_string_lossy().into_owned();

        let mut w = Writer::new();
        w.map_header(1);
        w.str("path");
        w.str("child");
        let args = w.into_bytes();
        do_mkdir(&session, &args).unwrap();

        let body = do_ls(&session, &[]).unwrap();
        let mut r = crate::codec::Reader::new(&body);
        assert_eq!(r.read_map_header().unwrap(), 1);
        assert_eq!(r.read_str().unwrap(), "entries");
        let n = r.read_array_header().unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn chmod_requires_mode_but_mkdir_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = dummy_session();
        session.cwd = dir.path().to_string_lossy().into_owned();

        let mut w = Writer::new();
        w.map_header(1);
        w.str("path");
        w.str("nomode");
        let args = w.into_bytes();
        assert!(do_mkdir(&session, &args).is_ok());

        let mut w2 = Writer::new();
        w2.map_header(1);
        w2.str("path");
        w2.str("nomode");
        let args2 = w2.into_bytes();
        assert!(do_chmod(&session, &args2).is_err());
    }

    #[test]
    fn touch_creates_and_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let session = dummy_session();
        let path = dir.path().join("new");
        let path_str = path.to_string_lossy().into_owned();

        let mut w = Writer::new();
        w.map_header(1);
        w.str("path");
        w.str(&path_str);
        let args = w.into_bytes();
        do_touch(&session, &args).unwrap();
        assert!(path.exists());

        fs::write(&path, b"hello").unwrap();
        do_touch(&session, &args).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn cd_resolves_relative_and_updates_cwd() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut session = dummy_session();
        session.cwd = dir.path().to_string_lossy().into_owned();

        let mut w = Writer::new();
        w.map_header(1);
        w.str("path");
        w.str("sub");
        let args = w.into_bytes();
        do_cd(&mut session, &args).unwrap();
        assert!(session.cwd.ends_with("sub"));
    }
}
