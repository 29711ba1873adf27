//! End-to-end test: drives a real `Session` over a loopback TCP pair
//! through a handshake, a handful of commands, and a bulk pull/push
//! exchange, acting as the peer on the other end of the socket.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use embbridge_agent::codec::{Reader, Writer};
use embbridge_agent::session::{Mode, Session};

fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&(payload.len() as u32).to_be_bytes()).unwrap();
    stream.write_all(payload).unwrap();
}

fn recv_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

fn encode_req(id: u64, cmd: &str, args_writer: impl FnOnce(&mut Writer)) -> Vec<u8> {
    let mut args = Writer::new();
    args_writer(&mut args);
    let args_bytes = args.into_bytes();

    let mut w = Writer::with_capacity(32 + args_bytes.len());
    w.map_header(4);
    w.str("type");
    w.str("req");
    w.str("id");
    w.uint(id);
    w.str("cmd");
    w.str(cmd);
    w.str("args");
    w.raw(&args_bytes);
    w.into_bytes()
}

struct DecodedResp {
    ok: bool,
    data: Vec<u8>,
    error: Option<String>,
}

fn decode_resp(buf: &[u8]) -> DecodedResp {
    let mut r = Reader::new(buf);
    let count = r.read_map_header().unwrap();
    let mut ok = false;
    let mut data = Vec::new();
    let mut error = None;
    for _ in 0..count {
        let key = r.read_str().unwrap();
        match key {
            "type" | "id" => {
                r.skip_value().unwrap();
            }
            "ok" => ok = r.read_bool().unwrap(),
            "data" => {
                let start = r.pos();
                r.skip_value().unwrap();
                data = buf[start..r.pos()].to_vec();
            }
            "error" => error = Some(r.read_str().unwrap().to_string()),
            _ => {
                r.skip_value().unwrap();
            }
        }
    }
    DecodedResp { ok, data, error }
}

struct DecodedDataFrame {
    seq: u64,
    data: Vec<u8>,
    done: bool,
}

fn decode_data_frame(buf: &[u8]) -> DecodedDataFrame {
    let mut r = Reader::new(buf);
    let count = r.read_map_header().unwrap();
    let mut seq = 0;
    let mut data = Vec::new();
    let mut done = false;
    for _ in 0..count {
        let key = r.read_str().unwrap();
        match key {
            "seq" => seq = r.read_uint().unwrap(),
            "data" => data = r.read_bin().unwrap().to_vec(),
            "done" => done = r.read_bool().unwrap(),
            _ => {
                r.skip_value().unwrap();
            }
        }
    }
    DecodedDataFrame { seq, data, done }
}

fn spawn_bind_session() -> (TcpStream, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut session = Session::new(stream, Mode::Bind);
        let _ = session.run();
    });

    let peer = TcpStream::connect(addr).unwrap();
    (peer, handle)
}

#[test]
fn handshake_then_pwd_roundtrip() {
    let (mut peer, _handle) = spawn_bind_session();

    // Peer drives the bind-mode handshake: send hello, expect hello_ack.
    let mut hello = Writer::new();
    hello.map_header(3);
    hello.str("type");
    hello.str("hello");
    hello.str("version");
    hello.uint(1);
    hello.str("agent");
    hello.bool(false);
    send_frame(&mut peer, &hello.into_bytes());

    let ack = recv_frame(&mut peer);
    let mut r = Reader::new(&ack);
    let count = r.read_map_header().unwrap();
    let mut saw_ack = false;
    for _ in 0..count {
        let key = r.read_str().unwrap();
        if key == "type" {
            assert_eq!(r.read_str().unwrap(), "hello_ack");
            saw_ack = true;
        } else {
            r.skip_value().unwrap();
        }
    }
    assert!(saw_ack);

    let req = encode_req(1, "pwd", |_| {});
    send_frame(&mut peer, &req);
    let resp = decode_resp(&recv_frame(&mut peer));
    assert!(resp.ok);

    let mut dr = Reader::new(&resp.data);
    let n = dr.read_map_header().unwrap();
    assert_eq!(n, 1);
    assert_eq!(dr.read_str().unwrap(), "path");
    let _ = dr.read_str().unwrap();
}

#[test]
fn unknown_command_gets_error_response_not_session_death() {
    let (mut peer, _handle) = spawn_bind_session();

    let mut hello = Writer::new();
    hello.map_header(2);
    hello.str("type");
    hello.str("hello");
    hello.str("version");
    hello.uint(1);
    send_frame(&mut peer, &hello.into_bytes());
    let _ = recv_frame(&mut peer);

    let req = encode_req(2, "no-such-command", |_| {});
    send_frame(&mut peer, &req);
    let resp = decode_resp(&recv_frame(&mut peer));
    assert!(!resp.ok);
    assert_eq!(resp.error.as_deref(), Some("unknown command"));

    // Session should still be alive: a second, valid request follows.
    let req2 = encode_req(3, "pwd", |_| {});
    send_frame(&mut peer, &req2);
    let resp2 = decode_resp(&recv_frame(&mut peer));
    assert!(resp2.ok);
}

#[test]
fn mkdir_then_ls_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, _handle) = spawn_bind_session();

    let mut hello = Writer::new();
    hello.map_header(2);
    hello.str("type");
    hello.str("hello");
    hello.str("version");
    hello.uint(1);
    send_frame(&mut peer, &hello.into_bytes());
    let _ = recv_frame(&mut peer);

    let dir_str = dir.path().to_string_lossy().into_owned();
    let child = dir.path().join("sub");
    let child_str = child.to_string_lossy().into_owned();

    let req = encode_req(1, "mkdir", |w| {
        w.map_header(1);
        w.str("path");
        w.str(&child_str);
    });
    send_frame(&mut peer, &req);
    let resp = decode_resp(&recv_frame(&mut peer));
    assert!(resp.ok);

    let req2 = encode_req(2, "ls", |w| {
        w.map_header(1);
        w.str("path");
        w.str(&dir_str);
    });
    send_frame(&mut peer, &req2);
    let resp2 = decode_resp(&recv_frame(&mut peer));
    assert!(resp2.ok);

    let mut r = Reader::new(&resp2.data);
    let count = r.read_map_header().unwrap();
    assert_eq!(count, 1);
    assert_eq!(r.read_str().unwrap(), "entries");
    let n = r.read_array_header().unwrap();
    assert_eq!(n, 1);
}

#[test]
fn pull_splits_into_chunks_with_done_only_on_the_last() {
    const CHUNK_SIZE: usize = 64 * 1024;
    let tail = 928;
    let file_size = CHUNK_SIZE * 2 + tail;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob");
    std::fs::write(&path, vec![0xab_u8; file_size]).unwrap();
    let path_str = path.to_string_lossy().into_owned();

    let (mut peer, _handle) = spawn_bind_session();

    let mut hello = Writer::new();
    hello.map_header(2);
    hello.str("type");
    hello.str("hello");
    hello.str("version");
    hello.uint(1);
    send_frame(&mut peer, &hello.into_bytes());
    let _ = recv_frame(&mut peer);

    let req = encode_req(1, "pull", |w| {
        w.map_header(1);
        w.str("path");
        w.str(&path_str);
    });
    send_frame(&mut peer, &req);

    let resp = decode_resp(&recv_frame(&mut peer));
    assert!(resp.ok);
    let mut dr = Reader::new(&resp.data);
    let n = dr.read_map_header().unwrap();
    assert_eq!(n, 2);
    assert_eq!(dr.read_str().unwrap(), "size");
    assert_eq!(dr.read_uint().unwrap(), file_size as u64);

    let mut received = Vec::new();
    let mut expected_seq = 0u64;
    loop {
        let frame = decode_data_frame(&recv_frame(&mut peer));
        assert_eq!(frame.seq, expected_seq);
        received.extend_from_slice(&frame.data);
        if frame.done {
            break;
        }
        assert!(!frame.data.is_empty());
        expected_seq += 1;
    }

    // Exactly 3 frames for a 2*CHUNK_SIZE+tail file: two full chunks and a
    // final partial one carrying done=true, nothing trailing afterward.
    assert_eq!(expected_seq, 2);
    assert_eq!(received.len(), file_size);
    assert_eq!(received, vec![0xab_u8; file_size]);
}
