use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncRead, BufReader, Lines},
    process::{Child, Command},
    sync::watch,
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, trace, warn};

use crate::config::StopSignal;

const DRAIN_AFTER_EXIT: Duration = Duration::from_millis(200);

/// Outcome of watching a process for its startup markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Running,
    /// Exit code, `None` when the process was killed by a signal.
    Exited(Option<i32>),
}

/// Decides, line by line, whether a process has finished starting up.
///
/// Returning `None` means the line says nothing about readiness. Only the first
/// verdict counts; later ones are ignored.
pub trait ReadinessProbe: Send + Sync {
    fn on_stdout(&self, line: &str) -> Option<Readiness>;

    fn on_stderr(&self, line: &str) -> Option<Readiness>;
}

/// Substring markers recognized in a process' console output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputMarkers {
    pub ready: Vec<String>,
    pub error: Vec<String>,
    /// Any stderr output before readiness counts as a failed start.
    pub stderr_is_failure: bool,
}

impl Default for OutputMarkers {
    fn default() -> Self {
        Self {
            ready: vec!["Done loading".to_owned()],
            error: vec!["Error:".to_owned()],
            stderr_is_failure: true,
        }
    }
}

impl ReadinessProbe for OutputMarkers {
    fn on_stdout(&self, line: &str) -> Option<Readiness> {
        if self.error.iter().any(|marker| line.contains(marker.as_str())) {
            return Some(Readiness::Failed);
        }
        self.ready
            .iter()
            .any(|marker| line.contains(marker.as_str()))
            .then_some(Readiness::Ready)
    }

    fn on_stderr(&self, line: &str) -> Option<Readiness> {
        if self.stderr_is_failure {
            Some(Readiness::Failed)
        } else {
            self.on_stdout(line)
        }
    }
}

/// Ignores console output. Used for servers whose readiness is observed some
/// other way, such as a port accepting connections.
pub struct NoMarkers;

impl ReadinessProbe for NoMarkers {
    fn on_stdout(&self, _line: &str) -> Option<Readiness> {
        None
    }

    fn on_stderr(&self, _line: &str) -> Option<Readiness> {
        None
    }
}

/// Controls which output lines are echoed to the log at `info` level.
#[derive(Clone, Debug, Default)]
pub struct OutputFilter {
    verbose: bool,
    ignore: Vec<String>,
}

impl OutputFilter {
    #[must_use]
    pub const fn new(verbose: bool, ignore: Vec<String>) -> Self {
        Self { verbose, ignore }
    }

    #[must_use]
    pub fn should_echo(&self, line: &str) -> bool {
        self.verbose && !self.ignore.iter().any(|noise| line.contains(noise.as_str()))
    }

    fn echo(&self, label: &str, stream: &'static str, line: &str) {
        if self.should_echo(line) {
            info!(target: "orchstr8::process", process = label, stream, "{line}");
        } else {
            trace!(target: "orchstr8::process", process = label, stream, "{line}");
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessSpec {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    #[must_use]
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, cwd: &Path) -> Self {
        self.cwd = Some(cwd.to_owned());
        self
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawning {label} from {program}: {source}")]
    Spawn {
        label: String,
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{label} did not report readiness within {timeout:?}")]
    ReadyTimeout { label: String, timeout: Duration },
    #[error("signalling {label} (pid {pid}) with {signal}: {source}")]
    Signal {
        label: String,
        pid: u32,
        signal: Signal,
        #[source]
        source: Errno,
    },
    #[error("{label} still running {timeout:?} after SIGKILL")]
    ExitTimeout { label: String, timeout: Duration },
}

/// A running external executable plus the two one-shot signals observed on it.
///
/// The child is owned by a monitor task that reads its output and waits for
/// it to exit; dropping the handle aborts that task, which kills the child.
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    readiness: watch::Receiver<Readiness>,
    termination: watch::Receiver<Termination>,
    monitor: JoinHandle<()>,
}

impl ProcessHandle {
    /// Starts `spec` and begins watching its output with `probe`.
    pub fn launch(
        spec: &ProcessSpec,
        probe: Arc<dyn ReadinessProbe>,
        filter: OutputFilter,
    ) -> Result<Self, ProcessError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            label: spec.label.clone(),
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        let (readiness_tx, readiness) = watch::channel(Readiness::Pending);
        let (termination_tx, termination) = watch::channel(Termination::Running);
        let monitor = tokio::spawn(monitor(
            spec.label.clone(),
            child,
            probe,
            filter,
            readiness_tx,
            termination_tx,
        ));

        Ok(Self {
            label: spec.label.clone(),
            pid,
            readiness,
            termination,
            monitor,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    #[must_use]
    pub fn termination(&self) -> Termination {
        *self.termination.borrow()
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        matches!(self.termination(), Termination::Exited(_))
    }

    /// Resolves once the process reported ready (`true`) or failed (`false`).
    ///
    /// Exiting before any verdict counts as a failure.
    pub async fn wait_ready(&self) -> bool {
        let mut readiness = self.readiness.clone();
        readiness
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .is_ok_and(|state| *state == Readiness::Ready)
    }

    pub async fn wait_ready_timeout(&self, limit: Duration) -> Result<bool, ProcessError> {
        timeout(limit, self.wait_ready())
            .await
            .map_err(|_| ProcessError::ReadyTimeout {
                label: self.label.clone(),
                timeout: limit,
            })
    }

    /// Waits up to `limit` for the process to exit.
    pub async fn wait_exit(&self, limit: Duration) -> bool {
        let mut termination = self.termination.clone();
        timeout(
            limit,
            termination.wait_for(|state| matches!(state, Termination::Exited(_))),
        )
        .await
        .is_ok_and(|outcome| outcome.is_ok())
    }

    /// Asks the process to stop and waits for it to exit.
    ///
    /// Escalates to `SIGKILL` when the process outlives `grace`. Returns
    /// immediately when it already exited.
    pub async fn terminate(&self, stop: StopSignal, grace: Duration) -> Result<(), ProcessError> {
        if self.has_exited() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let requested = match stop {
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Hup => Signal::SIGHUP,
        };
        if !self.send_signal(pid, requested)? {
            return Ok(());
        }
        if self.wait_exit(grace).await {
            return Ok(());
        }

        warn!(
            process = self.label,
            pid, "still running {grace:?} after {requested}, killing"
        );
        if !self.send_signal(pid, Signal::SIGKILL)? {
            return Ok(());
        }
        if self.wait_exit(grace).await {
            Ok(())
        } else {
            Err(ProcessError::ExitTimeout {
                label: self.label.clone(),
                timeout: grace,
            })
        }
    }

    /// `Ok(false)` when the process is already gone.
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<bool, ProcessError> {
        let Ok(raw) = i32::try_from(pid) else {
            return Ok(false);
        };
        match signal::kill(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(source) => Err(ProcessError::Signal {
                label: self.label.clone(),
                pid,
                signal,
                source,
            }),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

fn settle(readiness: &watch::Sender<Readiness>, verdict: Option<Readiness>) {
    let Some(verdict) = verdict else {
        return;
    };
    readiness.send_if_modified(|state| {
        if *state == Readiness::Pending {
            *state = verdict;
            true
        } else {
            false
        }
    });
}

async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(reader) => reader.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn monitor(
    label: String,
    mut child: Child,
    probe: Arc<dyn ReadinessProbe>,
    filter: OutputFilter,
    readiness: watch::Sender<Readiness>,
    termination: watch::Sender<Termination>,
) {
    let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
    let mut stderr = child.stderr.take().map(|err| BufReader::new(err).lines());

    let status = loop {
        tokio::select! {
            line = next_line(&mut stdout) => match line {
                Some(line) => {
                    filter.echo(&label, "stdout", &line);
                    settle(&readiness, probe.on_stdout(&line));
                }
                None => stdout = None,
            },
            line = next_line(&mut stderr) => match line {
                Some(line) => {
                    filter.echo(&label, "stderr", &line);
                    settle(&readiness, probe.on_stderr(&line));
                }
                None => stderr = None,
            },
            status = child.wait() => break status,
        }
    };

    // Lines still buffered in the pipes can carry the verdict.
    let _ = timeout(DRAIN_AFTER_EXIT, async {
        while let Some(line) = next_line(&mut stdout).await {
            filter.echo(&label, "stdout", &line);
            settle(&readiness, probe.on_stdout(&line));
        }
    })
    .await;

    let code = match status {
        Ok(status) => status.code(),
        Err(error) => {
            warn!(process = label, "waiting for exit failed: {error}");
            None
        }
    };
    trace!(process = label, ?code, "process exited");
    settle(&readiness, Some(Readiness::Failed));
    termination.send_replace(Termination::Exited(code));
}
