//! Envelope shapes and their wire encoding/decoding, per the protocol's
//! data model: `hello`/`hello_ack` (handshake), `req` (command invocation),
//! `resp` (reply), `data` (bulk transfer chunk).
//!
//! Decoding walks the top-level map generically (unknown fields are
//! skipped rather than rejected, except where noted) so a peer sending
//! fields in a different order, or extra fields, still decodes. `args` is
//! kept as a borrowed slice into the original frame buffer -- handlers see
//! it without a copy and must not retain it past their own return.

use crate::codec::{Reader, Writer};
use crate::error::DecodeError;

pub const PROTOCOL_VERSION: u64 = 1;

/// A decoded handshake frame (`hello` or `hello_ack`).
pub struct Handshake {
    pub is_ack: bool,
    pub version: u64,
    pub agent: bool,
}

pub fn encode_hello(agent: bool) -> Vec<u8> {
    encode_handshake("hello", agent)
}

pub fn encode_hello_ack(agent: bool) -> Vec<u8> {
    encode_handshake("hello_ack", agent)
}

fn encode_handshake(type_name: &str, agent: bool) -> Vec<u8> {
    let mut w = Writer::with_capacity(32);
    w.map_header(3);
    w.str("type");
    w.str(type_name);
    w.str("version");
    w.uint(PROTOCOL_VERSION);
    w.str("agent");
    w.bool(agent);
    w.into_bytes()
}

/// Decodes a handshake frame, requiring `type` to be `hello` or
/// `hello_ack` and `version` to match. This is the hardened handshake
/// behavior: the original reference implementation accepted any frame as
/// acknowledgement, but a conformant rewrite validates both fields.
pub fn decode_handshake(buf: &[u8]) -> Result<Handshake, DecodeError> {
    let mut r = Reader::new(buf);
    let count = r.read_map_header()?;
    let mut type_name: Option<&str> = None;
    let mut version: Option<u64> = None;
    let mut agent: Option<bool> = None;

    for _ in 0..count {
        let key = r.read_str()?;
        match key {
            "type" => type_name = Some(r.read_str()?),
            "version" => version = Some(r.read_uint()?),
            "agent" => agent = Some(r.read_bool()?),
            _ => r.skip_value()?,
        }
    }

    let type_name = type_name.ok_or(DecodeError::MissingField("type"))?;
    let is_ack = match type_name {
        "hello" => false,
        "hello_ack" => true,
        _ => return Err(DecodeError::WrongType("handshake type")),
    };
    let version = version.ok_or(DecodeError::MissingField("version"))?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::WrongType("handshake version"));
    }
    let agent = agent.unwrap_or(false);

    Ok(Handshake {
        is_ack,
        version,
        agent,
    })
}

/// A decoded `req` envelope. `args` borrows the raw bytes of the `args`
/// map as they appear in the source buffer -- it is not re-parsed here.
pub struct Request<'a> {
    pub id: u64,
    pub cmd: String,
    pub args: &'a [u8],
}

pub fn decode_request(buf: &[u8]) -> Result<Request<'_>, DecodeError> {
    let mut r = Reader::new(buf);
    let count = r.read_map_header()?;
    let mut type_ok = false;
    let mut id: Option<u64> = None;
    let mut cmd: Option<String> = None;
    let mut args: Option<&[u8]> = None;

    for _ in 0..count {
        let key = r.read_str()?;
        match key {
            "type" => {
                let t = r.read_str()?;
                type_ok = t == "req";
            }
            "id" => id = Some(r.read_uint()?),
            "cmd" => cmd = Some(r.read_str()?.to_string()),
            "args" => {
                // args is the last field per the wire convention: it is
                // everything from here to the end of the buffer, consumed
                // as a raw (still-encoded) map rather than interpreted.
                let start = r.pos();
                r.skip_value()?;
                args = Some(&buf[start..r.pos()]);
            }
            _ => r.skip_value()?,
        }
    }

    if !type_ok {
        return Err(DecodeError::WrongType("request type"));
    }
    let id = id.ok_or(DecodeError::MissingField("id"))?;
    let cmd = cmd.ok_or(DecodeError::MissingField("cmd"))?;
    let args = args.unwrap_or(&[]);

    Ok(Request { id, cmd, args })
}

/// Extracts a string-valued argument from a raw, still-encoded args map.
/// Any decode mismatch (missing key, wrong type, truncated buffer) is
/// treated as absence rather than propagated as an error -- this mirrors
/// the ABI's "absence is indistinguishable from wrong type" contract.
pub fn get_string_arg(args: &[u8], key: &str) -> Option<String> {
    let mut r = Reader::new(args);
    let count = r.read_map_header().ok()?;
    for _ in 0..count {
        let k = r.read_str().ok()?;
        if k == key {
            return r.read_str().ok().map(|s| s.to_string());
        }
        r.skip_value().ok()?;
    }
    None
}

pub fn get_uint_arg(args: &[u8], key: &str) -> Option<u64> {
    let mut r = Reader::new(args);
    let count = r.read_map_header().ok()?;
    for _ in 0..count {
        let k = r.read_str().ok()?;
        if k == key {
            return r.read_uint().ok();
        }
        r.skip_value().ok()?;
    }
    None
}

/// Encodes a successful `resp` envelope. `data_body` is a pre-encoded map
/// value (built with a [`crate::codec::Writer`] by the handler) spliced
/// directly into the envelope under the `data` key.
pub fn encode_resp_ok(id: u64, data_body: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(32 + data_body.len());
    w.map_header(4);
    w.str("type");
    w.str("resp");
    w.str("id");
    w.uint(id);
    w.str("ok");
    w.bool(true);
    w.str("data");
    w.raw(data_body);
    w.into_bytes()
}

pub fn encode_resp_err(id: u64, message: &str) -> Vec<u8> {
    let mut w = Writer::with_capacity(64 + message.len());
    w.map_header(4);
    w.str("type");
    w.str("resp");
    w.str("id");
    w.uint(id);
    w.str("ok");
    w.bool(false);
    w.str("error");
    w.str(message);
    w.into_bytes()
}

pub fn encode_data(id: u64, seq: u64, data: &[u8], done: bool) -> Vec<u8> {
    let mut w = Writer::with_capacity(32 + data.len());
    w.map_header(5);
    w.str("type");
    w.str("data");
    w.str("id");
    w.uint(id);
    w.str("seq");
    w.uint(seq);
    w.str("data");
    w.bin(data);
    w.str("done");
    w.bool(done);
    w.into_bytes()
}

/// A decoded `data` frame, for the push/upload path where the agent
/// receives chunks from the peer.
pub struct DataFrame {
    pub data: Vec<u8>,
    pub done: bool,
}

pub fn decode_data_frame(buf: &[u8]) -> Result<DataFrame, DecodeError> {
    let mut r = Reader::new(buf);
    let count = r.read_map_header()?;
    let mut data: Option<Vec<u8>> = None;
    let mut done = false;

    for _ in 0..count {
        let key = r.read_str()?;
        match key {
            "data" => data = Some(r.read_bin()?.to_vec()),
            "done" => done = r.read_bool()?,
            _ => r.skip_value()?,
        }
    }

    Ok(DataFrame {
        data: data.unwrap_or_default(),
        done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_roundtrip() {
        let bytes = encode_hello(true);
        let hs = decode_handshake(&bytes).unwrap();
        assert!(!hs.is_ack);
        assert_eq!(hs.version, PROTOCOL_VERSION);
        assert!(hs.agent);
    }

    #[test]
    fn handshake_rejects_wrong_version() {
        let mut w = Writer::new();
        w.map_header(2);
        w.str("type");
        w.str("hello");
        w.str("version");
        w.uint(99);
        assert!(decode_handshake(&w.into_bytes()).is_err());
    }

    #[test]
    fn request_decode_extracts_args_as_raw_slice() {
        let mut w = Writer::new();
        w.map_header(4);
        w.str("type");
        w.str("req");
        w.str("id");
        w.uint(7);
        w.str("cmd");
        w.str("pwd");
        w.str("args");
        w.map_header(1);
        w.str("path");
        w.str("/tmp");
        let bytes = w.into_bytes();

        let req = decode_request(&bytes).unwrap();
        assert_eq!(req.id, 7);
        assert_eq!(req.cmd, "pwd");
        assert_eq!(get_string_arg(req.args, "path").as_deref(), Some("/tmp"));
    }

    #[test]
    fn missing_arg_is_absence_not_error() {
        let mut w = Writer::new();
        w.map_header(0);
        let bytes = w.into_bytes();
        assert_eq!(get_string_arg(&bytes, "path"), None);
        assert_eq!(get_uint_arg(&bytes, "size"), None);
    }

    #[test]
    fn data_frame_roundtrip() {
        let bytes = encode_data(3, 0, b"payload", true);
        let df = decode_data_frame(&bytes).unwrap();
        assert_eq!(df.data, b"payload");
        assert!(df.done);
    }
}
