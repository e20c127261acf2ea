//! Windows named pipe capability.
//!
//! # Responsibilities
//! - Listen on, dial and probe named pipes where the platform has them
//! - Fail deterministically with [`UnsupportedPlatform`] everywhere else
//!
//! # Design Decisions
//! - Both implementations expose the same surface, so callers never need
//!   their own `cfg` attributes
//! - On non-Windows targets [`PipeListener`] is uninhabited: a listener can
//!   never be produced, and the accept path type-checks without stubs

use std::io;
use std::time::Duration;

use crate::net::endpoint::TransportKind;
use crate::net::stream::BridgeStream;
use crate::net::UnsupportedPlatform;

pub use imp::PipeListener;

/// How long a dial waits for a free instance of a busy pipe.
pub const PIPE_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between attempts while the pipe is busy.
#[cfg(any(windows, test))]
const BUSY_RETRY: Duration = Duration::from_millis(50);

/// Run `attempt` until it succeeds, fails with a non-busy error, or
/// `deadline` passes. The last error is returned at the deadline.
#[cfg(any(windows, test))]
async fn retry_while_busy<T>(
    deadline: Duration,
    mut attempt: impl FnMut() -> io::Result<T>,
    is_busy: impl Fn(&io::Error) -> bool,
) -> io::Result<T> {
    let start = tokio::time::Instant::now();
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if is_busy(&e) && start.elapsed() + BUSY_RETRY < deadline => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(BUSY_RETRY).await;
    }
}

/// Named pipe operations.
pub struct NamedPipe;

impl NamedPipe {
    /// Whether the platform supports named pipes.
    pub fn ensure_available() -> Result<(), UnsupportedPlatform> {
        if cfg!(windows) {
            Ok(())
        } else {
            Err(UnsupportedPlatform::new(TransportKind::NamedPipe))
        }
    }

    /// Create the first server instance of the pipe at `address`.
    pub fn listen(address: &str) -> io::Result<PipeListener> {
        imp::listen(address)
    }

    /// Open a client connection to the pipe at `address`.
    pub async fn dial(address: &str) -> io::Result<BridgeStream> {
        imp::dial(address).await
    }

    /// Whether the pipe currently exists. Readiness only checks existence.
    pub fn exists(address: &str) -> bool {
        imp::exists(address)
    }
}

#[cfg(windows)]
mod imp {
    use std::io;

    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

    use super::{retry_while_busy, PIPE_BUSY_TIMEOUT};
    use crate::net::stream::BridgeStream;

    /// `ERROR_PIPE_BUSY`: every server instance is currently connected.
    pub(super) const ERROR_PIPE_BUSY: i32 = 231;

    /// Accepts named pipe clients by rotating server instances.
    #[derive(Debug)]
    pub struct PipeListener {
        address: String,
        next: NamedPipeServer,
    }

    impl PipeListener {
        pub fn address(&self) -> &str {
            &self.address
        }

        /// Wait for a client on the pending instance, then create the next one.
        pub async fn accept(&mut self) -> io::Result<BridgeStream> {
            self.next.connect().await?;
            let fresh = ServerOptions::new().create(&self.address)?;
            let connected = std::mem::replace(&mut self.next, fresh);
            Ok(BridgeStream::PipeServer(connected))
        }
    }

    pub fn listen(address: &str) -> io::Result<PipeListener> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(address)?;
        Ok(PipeListener {
            address: address.to_string(),
            next,
        })
    }

    pub async fn dial(address: &str) -> io::Result<BridgeStream> {
        let client = retry_while_busy(
            PIPE_BUSY_TIMEOUT,
            || ClientOptions::new().open(address),
            |e| e.raw_os_error() == Some(ERROR_PIPE_BUSY),
        )
        .await?;
        Ok(BridgeStream::PipeClient(client))
    }

    pub fn exists(address: &str) -> bool {
        std::path::Path::new(address).exists()
    }
}

#[cfg(not(windows))]
mod imp {
    use std::io;

    use crate::net::endpoint::TransportKind;
    use crate::net::stream::BridgeStream;
    use crate::net::UnsupportedPlatform;

    /// Never constructed on this platform.
    #[derive(Debug)]
    pub enum PipeListener {}

    impl PipeListener {
        pub fn address(&self) -> &str {
            match *self {}
        }

        pub async fn accept(&mut self) -> io::Result<BridgeStream> {
            match *self {}
        }
    }

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            UnsupportedPlatform::new(TransportKind::NamedPipe),
        )
    }

    pub fn listen(_address: &str) -> io::Result<PipeListener> {
        Err(unsupported())
    }

    pub async fn dial(_address: &str) -> io::Result<BridgeStream> {
        Err(unsupported())
    }

    pub fn exists(_address: &str) -> bool {
        false
    }
}
