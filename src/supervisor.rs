//! Process orchestration: reverse mode runs a single session against a
//! dial-out connection; bind mode listens and forks a fresh process per
//! accepted client, the traditional Unix "accept loop + fork" server
//! shape.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{fork, ForkResult};
use tracing::{error, info, warn};

use crate::session::{Mode, Session};
use crate::transport;

/// Cleared by the SIGINT/SIGTERM handler; the accept loop polls this
/// between blocking calls and exits in an orderly fashion once it's
/// false instead of dying on default signal disposition.
static RUNNING: AtomicBool = AtomicBool::new(true);

pub fn run_reverse(host: &str, port: u16) -> Result<()> {
    ignore_sigpipe();
    info!(host, port, "connecting in reverse mode");
    let stream = transport::connect(host, port)?;
    run_one_session(stream, Mode::Reverse);
    Ok(())
}

pub fn run_bind(port: u16) -> Result<()> {
    ignore_sigpipe();
    install_sigchld_reaper();
    install_shutdown_handler();
    let listener = transport::listen(port)?;
    info!(port, "listening for incoming connections");
    accept_loop(&listener)
}

fn accept_loop(listener: &TcpListener) -> Result<()> {
    while RUNNING.load(Ordering::SeqCst) {
        let stream = match transport::accept(listener) {
            Ok(Some(s)) => s,
            Ok(None) => continue, // poll timeout, recheck RUNNING
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        // SAFETY: fork is called with no other threads running in this
        // process and no locks held across the call; the child does not
        // touch any heap state shared with the parent beyond the inherited
        // socket fds, and exits via `_exit` without unwinding.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child, .. }) => {
                info!(pid = child.as_raw(), "forked session handler");
                drop(stream);
            }
            Ok(ForkResult::Child) => {
                // The child inherits the listening fd but never accepts on
                // it; it exits as soon as the session ends, which closes
                // every fd including that one.
                run_one_session(stream, Mode::Bind);
                std::process::exit(0);
            }
            Err(e) => {
                error!("fork failed: {e}");
            }
        }
    }
    info!("shutdown signal received, exiting accept loop");
    Ok(())
}

fn run_one_session(stream: TcpStream, mode: Mode) {
    let mut session = Session::new(stream, mode);
    if let Err(e) = session.run() {
        error!("session ended with error: {e}");
    }
}

fn ignore_sigpipe() {
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
}

/// SIGINT/SIGTERM clear `RUNNING` so the accept loop exits on its next
/// poll instead of the process dying under default signal disposition.
fn install_shutdown_handler() {
    extern "C" fn request_shutdown(_: libc::c_int) {
        RUNNING.store(false, Ordering::SeqCst);
    }
    unsafe {
        let handler = SigHandler::Handler(request_shutdown);
        let _ = signal::signal(Signal::SIGINT, handler);
        let _ = signal::signal(Signal::SIGTERM, handler);
    }
}

/// Bind mode forks one child per client; without reaping, exited children
/// accumulate as zombies. `SA_NOCLDWAIT`-free manual reaping keeps this
/// explicit and testable rather than relying on signal disposition alone.
fn install_sigchld_reaper() {
    extern "C" fn reap(_: libc::c_int) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) if status.pid().is_some() => continue,
                _ => break,
            }
        }
    }
    unsafe {
        let handler = SigHandler::Handler(reap);
        let _ = signal::signal(Signal::SIGCHLD, handler);
    }
}
