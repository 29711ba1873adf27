//! Static command dispatch table. Lookup is a linear scan over a small,
//! closed set of command names; the original source table listed `mtd`
//! twice against the same handler, which this table collapses to a
//! single entry.

use crate::error::FatalError;
use crate::handlers;
use crate::session::Session;

/// A handler's return value signals whether the session should end after
/// this request (used by `kill-agent`, which must send its reply before
/// the process is signaled to exit). `Err` is reserved for fatal
/// transport-level failures while sending a response.
pub type Handler = fn(&mut Session, u64, &[u8]) -> Result<bool, FatalError>;

static COMMANDS: &[(&str, Handler)] = &[
    ("ls", handlers::fs::ls),
    ("cat", handlers::fs::cat),
    ("pwd", handlers::fs::pwd),
    ("cd", handlers::fs::cd),
    ("realpath", handlers::fs::realpath),
    ("mkdir", handlers::fs::mkdir),
    ("rm", handlers::fs::rm),
    ("mv", handlers::fs::mv),
    ("cp", handlers::fs::cp),
    ("chmod", handlers::fs::chmod),
    ("touch", handlers::fs::touch),
    ("pull", handlers::transfer::pull),
    ("push", handlers::transfer::push),
    ("exec", handlers::exec::exec),
    ("uname", handlers::system::uname),
    ("whoami", handlers::system::whoami),
    ("ps", handlers::system::ps),
    ("ss", handlers::system::ss),
    ("env", handlers::system::env),
    ("dmesg", handlers::system::dmesg),
    ("cpuinfo", handlers::system::cpuinfo),
    ("strings", handlers::system::strings),
    ("hexdump", handlers::system::hexdump),
    ("firmware", handlers::system::firmware),
    ("ip_addr", handlers::system::ip_addr),
    ("ip_route", handlers::system::ip_route),
    ("kill-agent", handlers::system::kill_agent),
    ("reboot", handlers::system::reboot),
    ("mtd", handlers::mtd::mtd),
];

pub fn lookup(name: &str) -> Option<Handler> {
    COMMANDS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, handler)| *handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn no_duplicate_command_names() {
        let mut seen = HashSet::new();
        for (name, _) in COMMANDS {
            assert!(seen.insert(*name), "duplicate dispatch entry for {name}");
        }
    }

    #[test]
    fn unknown_command_misses() {
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn known_commands_resolve() {
        for name in ["ls", "pwd", "mtd", "kill-agent"] {
            assert!(lookup(name).is_some(), "{name} should be dispatchable");
        }
    }
}
