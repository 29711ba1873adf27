//! # embbridge-agent
//!
//! A remote debug/administration agent for embedded Linux devices. The
//! agent speaks a small length-prefixed binary protocol over TCP, either
//! dialing out to a waiting listener ("reverse" mode) or listening for
//! incoming connections and forking a handler per client ("bind" mode).

pub mod cli;
pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod logging;
pub mod path_util;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use cli::Args;
pub use session::{Mode, Session};

/// The current version of the agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol- and transport-level default values.
pub mod defaults {
    /// Default TCP port used when none is given on the command line.
    pub const PORT: u16 = 1337;

    /// Chunk size used for bulk `pull`/`push` data frames.
    pub const CHUNK_SIZE: usize = 64 * 1024;

    /// Maximum wire frame size (length-prefix cap).
    pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

    /// Size of the general-purpose read buffer used for file copies.
    pub const READ_BUF_SIZE: usize = 8192;
}
