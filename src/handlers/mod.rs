//! Command handlers: the OS-facing glue behind each entry in the dispatch
//! table. Every handler in these modules is built against the same small
//! contract -- extract typed args, do the OS work, assemble a response
//! body -- and shares the [`respond`] helper to turn a `Result` into the
//! single terminal `resp` the ABI requires.

pub mod exec;
pub mod fs;
pub mod mtd;
pub mod system;
pub mod transfer;

use crate::error::{FatalError, HandlerError};
use crate::session::Session;

/// Converts a handler's inner result into exactly one `resp` envelope.
/// Used by every handler that doesn't need to stream bulk data itself
/// (`pull`/`push` drive their own frame I/O and don't go through this).
pub fn respond(
    session: &mut Session,
    id: u64,
    result: Result<Vec<u8>, HandlerError>,
) -> Result<bool, FatalError> {
    match result {
        Ok(body) => {
            session.send_ok(id, &body)?;
            Ok(false)
        }
        Err(e) => {
            session.send_handler_err(id, &e)?;
            Ok(false)
        }
    }
}

pub fn empty_map() -> Vec<u8> {
    let mut w = crate::codec::Writer::with_capacity(1);
    w.map_header(0);
    w.into_bytes()
}
