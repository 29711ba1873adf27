//! Command-line argument parsing for the agent binary.
//!
//! The agent runs in exactly one of two modes: reverse (dial out to a
//! waiting listener) or bind (listen for incoming connections). These are
//! mutually exclusive, enforced by clap's argument grouping.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Remote debug/administration agent for embedded Linux devices.
///
/// ## Usage Examples
///
/// ```bash
/// # Reverse mode: dial out to a waiting listener
/// embbridge-agent -c 192.168.1.10:1337
///
/// # Bind mode: listen for incoming connections
/// embbridge-agent -l 1337
///
/// # Increase log verbosity
/// embbridge-agent -l 1337 -vv
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Reverse mode: connect out to host:port and run a single session.
    #[arg(short = 'c', long = "connect", value_name = "HOST:PORT")]
    pub connect: Option<String>,

    /// Bind mode: listen on port and fork a session per accepted client.
    #[arg(short = 'l', long = "listen", value_name = "PORT")]
    pub listen: Option<u16>,

    /// Increase log verbosity. Repeatable: -v for DEBUG, -vv for TRACE.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the colorized stdout log; the detailed log file still runs.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Path to the detailed log file, or "stderr" to log there instead.
    /// Defaults to a daily-rotating file in the current directory.
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,
}

impl Args {
    /// Splits a "host:port" connect target into its parts.
    pub fn connect_target(&self) -> Option<anyhow::Result<(String, u16)>> {
        self.connect.as_ref().map(|target| {
            let (host, port_str) = target
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("expected host:port, got '{target}'"))?;
            let port: u16 = port_str.parse()?;
            Ok((host.to_string(), port))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_target_splits_host_and_port() {
        let args = Args {
            connect: Some("192.168.1.10:1337".to_string()),
            listen: None,
            verbose: 0,
            quiet: false,
            log_file: None,
        };
        let (host, port) = args.connect_target().unwrap().unwrap();
        assert_eq!(host, "192.168.1.10");
        assert_eq!(port, 1337);
    }

    #[test]
    fn connect_target_rejects_missing_port() {
        let args = Args {
            connect: Some("192.168.1.10".to_string()),
            listen: None,
            verbose: 0,
            quiet: false,
            log_file: None,
        };
        assert!(args.connect_target().unwrap().is_err());
    }
}
