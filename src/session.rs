//! Per-connection state machine: handshake, request loop, dispatch, and
//! the response/streaming primitives handlers use to talk back to the
//! peer.

use std::net::TcpStream;

use tracing::{debug, info, warn};

use crate::codec::Writer;
use crate::dispatch;
use crate::envelope::{self, DataFrame};
use crate::error::{FatalError, HandlerError};
use crate::frame;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Reverse,
    Bind,
}

pub struct Session {
    pub stream: TcpStream,
    pub cwd: String,
    pub mode: Mode,
}

impl Session {
    pub fn new(stream: TcpStream, mode: Mode) -> Self {
        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());
        Session { stream, cwd, mode }
    }

    /// Runs the handshake appropriate to `self.mode`, then the request
    /// loop, until the peer closes the connection, a fatal I/O error
    /// occurs, or a handler ends the session (e.g. `kill-agent`).
    pub fn run(&mut self) -> Result<(), FatalError> {
        self.handshake()?;
        loop {
            let frame = match frame::recv_frame(&mut self.stream) {
                Ok(f) => f,
                Err(FatalError::PeerClosed) => {
                    info!("peer closed connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let req = match envelope::decode_request(&frame) {
                Ok(req) => req,
                Err(e) => {
                    // No recoverable `id` to answer a malformed envelope
                    // with; this is session-fatal per the decode-error
                    // policy.
                    return Err(FatalError::Protocol(format!(
                        "malformed request envelope: {e}"
                    )));
                }
            };

            debug!(id = req.id, cmd = %req.cmd, "dispatching request");

            match dispatch::lookup(&req.cmd) {
                Some(handler) => {
                    let should_stop = handler(self, req.id, req.args)?;
                    if should_stop {
                        return Ok(());
                    }
                }
                None => {
                    self.send_err(req.id, "unknown command")?;
                }
            }
        }
    }

    fn handshake(&mut self) -> Result<(), FatalError> {
        match self.mode {
            Mode::Reverse => {
                let hello = envelope::encode_hello(true);
                frame::send_frame(&mut self.stream, &hello)?;
                let ack_frame = frame::recv_frame(&mut self.stream)?;
                let ack = envelope::decode_handshake(&ack_frame)
                    .map_err(|e| FatalError::Handshake(e.to_string()))?;
                if !ack.is_ack {
                    warn!("peer replied to hello with another hello, not hello_ack");
                }
            }
            Mode::Bind => {
                let hello_frame = frame::recv_frame(&mut self.stream)?;
                let hello = envelope::decode_handshake(&hello_frame)
                    .map_err(|e| FatalError::Handshake(e.to_string()))?;
                if hello.is_ack {
                    warn!("peer opened with hello_ack instead of hello");
                }
                let ack = envelope::encode_hello_ack(true);
                frame::send_frame(&mut self.stream, &ack)?;
            }
        }
        Ok(())
    }

    pub fn send_ok(&mut self, id: u64, data_body: &[u8]) -> Result<(), FatalError> {
        frame::send_frame(&mut self.stream, &envelope::encode_resp_ok(id, data_body))
    }

    pub fn send_empty_ok(&mut self, id: u64) -> Result<(), FatalError> {
        let mut w = Writer::with_capacity(4);
        w.map_header(0);
        self.send_ok(id, &w.into_bytes())
    }

    pub fn send_err(&mut self, id: u64, message: &str) -> Result<(), FatalError> {
        frame::send_frame(&mut self.stream, &envelope::encode_resp_err(id, message))
    }

    pub fn send_handler_err(&mut self, id: u64, err: &HandlerError) -> Result<(), FatalError> {
        self.send_err(id, &err.to_wire_message())
    }

    pub fn send_data_chunk(
        &mut self,
        id: u64,
        seq: u64,
        data: &[u8],
        done: bool,
    ) -> Result<(), FatalError> {
        frame::send_frame(&mut self.stream, &envelope::encode_data(id, seq, data, done))
    }

    /// Reads one `data` frame from the peer, for the push/upload path.
    /// A transport-level failure here is treated as mid-stream -- it does
    /// not automatically terminate the session; the caller converts it to
    /// an error response.
    pub fn recv_data_frame(&mut self) -> Result<DataFrame, HandlerError> {
        let raw = frame::recv_frame(&mut self.stream).map_err(|_| HandlerError::MidStream)?;
        envelope::decode_data_frame(&raw).map_err(|_| HandlerError::MidStream)
    }
}
