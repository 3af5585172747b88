pub mod binaries;
pub mod chain;
pub mod client;
pub mod index_server;
pub mod stratum;

use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{
    DynError,
    poll::{PollError, wait_for},
};

/// A component the orchestrator can stop during shutdown.
#[async_trait]
pub trait ManagedService: Send {
    fn name(&self) -> &'static str;

    /// Stops the component. Components that never started succeed trivially.
    async fn stop(&mut self, cleanup: bool) -> Result<(), DynError>;
}

/// Creates a uniquely named working directory that outlives its creator.
///
/// Directories are removed explicitly through [`remove_workdir`]; anything not
/// cleaned up stays behind for post-mortem inspection.
pub(crate) fn create_workdir(prefix: &str) -> io::Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
    let path = dir.keep();
    debug!(path = %path.display(), "created working directory");
    Ok(path)
}

pub(crate) fn remove_workdir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed working directory");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

/// Combines the outcome of stopping a process with that of removing its
/// directory. The stop error wins; a cleanup error behind it is logged.
pub(crate) fn stop_outcome<E: Display>(stopped: Result<(), E>, cleaned: Result<(), E>) -> Result<(), E> {
    if let (Err(_), Err(error)) = (&stopped, &cleaned) {
        warn!("cleanup after a failed stop also failed: {error}");
    }
    stopped.and(cleaned)
}

/// Polls `addr` until connections to it are refused.
pub(crate) async fn wait_until_closed(
    addr: &str,
    interval: Duration,
    limit: Duration,
) -> Result<(), PollError> {
    wait_for(
        &format!("{addr} to stop listening"),
        interval,
        limit,
        || async { Ok::<_, io::Error>(TcpStream::connect(addr).await.is_err().then_some(())) },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workdirs_survive_until_removed() {
        let path = create_workdir("orchstr8-test-").unwrap();
        assert!(path.is_dir());
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("orchstr8-test-")
        );

        remove_workdir(&path).unwrap();
        assert!(!path.exists());
        // Removing twice is harmless.
        remove_workdir(&path).unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_detected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let still_open =
            wait_until_closed(&addr, Duration::from_millis(10), Duration::from_millis(50)).await;
        assert!(still_open.is_err());

        drop(listener);
        wait_until_closed(&addr, Duration::from_millis(10), Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[test]
    fn stop_error_outranks_cleanup_error() {
        assert_eq!(stop_outcome::<&str>(Ok(()), Ok(())), Ok(()));
        assert_eq!(stop_outcome(Ok(()), Err("removing")), Err("removing"));
        assert_eq!(stop_outcome(Err("signalling"), Ok(())), Err("signalling"));
        assert_eq!(
            stop_outcome(Err("signalling"), Err("removing")),
            Err("signalling")
        );
    }
}
