//! Process-boundary streams.
//!
//! A backend speaks cgilink on its own stdin/stdout; the UI side spawns it and
//! talks over the child's pipes. Stderr is left to the child for logging.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::connection::{CloseReason, Connection};
use crate::error::{ConnectionError, Result};

/// A spawned backend process whose stdio carries a connection.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
}

impl BackendProcess {
    /// Spawn `program` with piped stdin/stdout.
    ///
    /// Returns the process and the `(reader, writer)` pair to hand to
    /// [`Connection::listen`]. The child is killed if the handle is dropped
    /// before it exits.
    pub fn spawn<I, S>(
        program: impl AsRef<OsStr>,
        args: I,
    ) -> Result<(Self, ChildStdout, ChildStdin)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program.as_ref());
        command.args(args);
        Self::spawn_command(command)
    }

    /// Spawn a prepared command. Stdin and stdout are always replaced by pipes.
    pub fn spawn_command(mut command: Command) -> Result<(Self, ChildStdout, ChildStdin)> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(ConnectionError::Spawn)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ConnectionError::Spawn(std::io::Error::other("child stdout was not piped"))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ConnectionError::Spawn(std::io::Error::other("child stdin was not piped"))
        })?;
        info!(pid = ?child.id(), "backend process started");
        Ok((Self { child }, stdout, stdin))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        debug!(%status, "backend process exited");
        Ok(status)
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

/// Spawn `program` and start a connection over its stdio in the background.
///
/// The returned task resolves with `listen`'s result once the connection
/// closes; closing the connection closes the child's stdin.
pub fn connect_child<I, S>(
    connection: &Connection,
    program: impl AsRef<OsStr>,
    args: I,
) -> Result<(
    BackendProcess,
    tokio::task::JoinHandle<Result<CloseReason>>,
)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (process, stdout, stdin) = BackendProcess::spawn(program, args)?;
    let connection = connection.clone();
    let listener = tokio::spawn(async move { connection.listen(stdout, stdin).await });
    Ok((process, listener))
}
