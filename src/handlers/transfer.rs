//! Bulk data transfer: `pull` (device to client) and `push` (client to
//! device). Both stream in fixed-size chunks over the existing request
//! connection rather than opening a side channel.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};

use crate::codec::Writer;
use crate::envelope::{get_string_arg, get_uint_arg};
use crate::error::{FatalError, HandlerError};
use crate::handlers::mtd::mtd_size;
use crate::path_util;
use crate::session::Session;

const CHUNK_SIZE: usize = 64 * 1024;

pub fn pull(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let path_str = match get_string_arg(args, "path") {
        Some(p) => p,
        None => {
            session.send_err(id, "missing path argument")?;
            return Ok(false);
        }
    };
    let path = path_util::resolve(&session.cwd, &path_str);

    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            session.send_handler_err(id, &HandlerError::filesystem(e))?;
            return Ok(false);
        }
    };

    let meta = match file.metadata() {
        Ok(m) => m,
        Err(e) => {
            session.send_handler_err(id, &HandlerError::filesystem(e))?;
            return Ok(false);
        }
    };

    if meta.is_dir() {
        session.send_handler_err(
            id,
            &HandlerError::Filesystem(format!("{path_str}: is a directory")),
        )?;
        return Ok(false);
    }

    let size = match mtd_size(&path, &meta).or_else(|| {
        if meta.len() > 0 {
            Some(meta.len())
        } else {
            None
        }
    }) {
        Some(s) => s,
        None => {
            session.send_handler_err(
                id,
                &HandlerError::Filesystem(format!("{path_str}: unknown size")),
            )?;
            return Ok(false);
        }
    };

    let mode = meta.permissions().mode() & 0o7777;
    let mut w = Writer::with_capacity(32);
    w.map_header(2);
    w.str("size");
    w.uint(size);
    w.str("mode");
    w.uint(mode as u64);
    session.send_ok(id, &w.into_bytes())?;

    let mut seq: u64 = 0;
    let mut sent: u64 = 0;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(n) => n,
            // Mid-stream read failures abort the transfer silently: the
            // initial response was already sent and there is no further
            // `resp` to carry an error in, unlike push.
            Err(_) => return Ok(false),
        };
        if n == 0 {
            break;
        }
        sent += n as u64;
        let done = sent >= size;
        session.send_data_chunk(id, seq, &buf[..n], done)?;
        if done {
            break;
        }
        seq += 1;
    }
    Ok(false)
}

pub fn push(session: &mut Session, id: u64, args: &[u8]) -> Result<bool, FatalError> {
    let path_str = match get_string_arg(args, "path") {
        Some(p) => p,
        None => {
            session.send_err(id, "missing path argument")?;
            return Ok(false);
        }
    };
    let mode = get_uint_arg(args, "mode").unwrap_or(0o644) as u32;
    let path = path_util::resolve(&session.cwd, &path_str);

    let mut file = match File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            session.send_handler_err(id, &HandlerError::filesystem(e))?;
            return Ok(false);
        }
    };
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)) {
        session.send_handler_err(id, &HandlerError::filesystem(e))?;
        return Ok(false);
    }

    session.send_empty_ok(id)?;

    loop {
        let frame = match session.recv_data_frame() {
            Ok(f) => f,
            Err(e) => {
                session.send_handler_err(id, &e)?;
                return Ok(false);
            }
        };
        if let Err(e) = file.write_all(&frame.data) {
            session.send_handler_err(id, &HandlerError::filesystem(e))?;
            return Ok(false);
        }
        if frame.done {
            break;
        }
    }
    Ok(false)
}
