//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGHUP, SIGINT, SIGQUIT and SIGTERM (Ctrl-C,
//!   Ctrl-Break and console close on Windows)
//! - Translate the first one received into the shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Every termination signal takes the same graceful path
//! - Handlers are installed before startup work, so a signal during the
//!   readiness wait is latched rather than killing the process

use std::io;

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Install signal handlers and trigger `shutdown` on the first termination
/// signal. Installation errors are returned immediately.
pub fn spawn_signal_listener(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let mut signals = TerminationSignals::install()?;

    Ok(tokio::spawn(async move {
        let name = signals.recv().await;
        tracing::info!(signal = name, "Signal caught, shutting down");
        shutdown.trigger();
    }))
}

#[cfg(unix)]
struct TerminationSignals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(windows)]
struct TerminationSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_break: tokio::signal::windows::CtrlBreak,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl TerminationSignals {
    fn install() -> io::Result<Self> {
        use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close};

        Ok(Self {
            ctrl_c: ctrl_c()?,
            ctrl_break: ctrl_break()?,
            ctrl_close: ctrl_close()?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.ctrl_c.recv() => "CTRL_C",
            _ = self.ctrl_break.recv() => "CTRL_BREAK",
            _ = self.ctrl_close.recv() => "CTRL_CLOSE",
        }
    }
}
