//! Length-prefixed message framing over a blocking stream socket.
//!
//! Every frame on the wire is a 4-byte big-endian length followed by
//! exactly that many payload bytes. Framing is stateless: each call reads
//! or writes one complete frame.

use std::io::{self, Read, Write};

use crate::error::FatalError;

pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

pub fn send_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), FatalError> {
    let len = payload.len();
    if len as u64 > MAX_FRAME_SIZE as u64 {
        return Err(FatalError::FrameTooLarge(len as u32, MAX_FRAME_SIZE));
    }
    write_all_retrying(w, &(len as u32).to_be_bytes())?;
    write_all_retrying(w, payload)?;
    Ok(())
}

pub fn recv_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, FatalError> {
    let mut len_buf = [0u8; 4];
    read_exact_retrying(r, &mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FatalError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len as usize];
    read_exact_retrying(r, &mut buf)?;
    Ok(buf)
}

/// `write_all` that transparently restarts on `EINTR`, matching the
/// complete-transfer semantics the transport layer requires.
fn write_all_retrying<W: Write>(w: &mut W, mut buf: &[u8]) -> Result<(), FatalError> {
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => {
                return Err(FatalError::Transport(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                )))
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FatalError::Transport(e)),
        }
    }
    Ok(())
}

fn read_exact_retrying<R: Read>(r: &mut R, mut buf: &mut [u8]) -> Result<(), FatalError> {
    while !buf.is_empty() {
        match r.read(buf) {
            Ok(0) => return Err(FatalError::PeerClosed),
            Ok(n) => {
                let tmp = buf;
                buf = &mut tmp[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FatalError::Transport(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_nonempty_payload() {
        let mut buf = Vec::new();
        send_frame(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[0..4], &5u32.to_be_bytes());
        let mut cur = Cursor::new(buf);
        let payload = recv_frame(&mut cur).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn zero_length_frame_is_legal() {
        let mut buf = Vec::new();
        send_frame(&mut buf, b"").unwrap();
        let mut cur = Cursor::new(buf);
        let payload = recv_frame(&mut cur).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn oversize_length_rejected_without_allocating() {
        let mut cur = Cursor::new(0xFFFF_FFFFu32.to_be_bytes().to_vec());
        let err = recv_frame(&mut cur).unwrap_err();
        assert!(matches!(err, FatalError::FrameTooLarge(_, _)));
    }

    #[test]
    fn send_rejects_oversize_payload() {
        // Avoid actually allocating 16MiB+1 in the test; fake it via a slice
        // of zero-filled memory is wasteful but simplest and still small
        // enough for CI (16 MiB).
        let payload = vec![0u8; (MAX_FRAME_SIZE + 1) as usize];
        let mut buf = Vec::new();
        let err = send_frame(&mut buf, &payload).unwrap_err();
        assert!(matches!(err, FatalError::FrameTooLarge(_, _)));
    }

    #[test]
    fn short_read_is_an_error() {
        let mut cur = Cursor::new(vec![0u8, 0, 0, 5, b'h', b'i']); // claims 5, only 2 bytes follow
        assert!(recv_frame(&mut cur).is_err());
    }
}
