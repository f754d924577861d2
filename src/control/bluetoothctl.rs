//! Process-backed control interface.
//!
//! Spawns `bluetoothctl` and talks to it over its standard streams.
//!
//! `bluetoothctl` only behaves like an interactive shell, printing the
//! `[bluetooth]#` prompt the pairing steps wait for, when it sits on a
//! terminal. By default it is therefore started inside a pseudo-terminal
//! allocated by util-linux `script`. [`BluetoothCtl::new`] drives it over
//! plain pipes instead.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::control::{match_earliest, ControlInterface, ControlSession};
use crate::error::{Error, Result};

/// Default program name.
pub const DEFAULT_PROGRAM: &str = "bluetoothctl";

/// Output kept while waiting for a pattern; older output is dropped.
const MAX_BUFFER: usize = 64 * 1024;

/// Wrapper that runs a command on a pseudo-terminal.
pub const PTY_WRAPPER: &str = "script";

/// Grace period for the process to exit on its own after `close`.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Spawns interactive `bluetoothctl` sessions.
#[derive(Debug, Clone)]
pub struct BluetoothCtl {
    program: String,
    pty: bool,
}

impl Default for BluetoothCtl {
    fn default() -> Self {
        Self::with_pty(DEFAULT_PROGRAM)
    }
}

impl BluetoothCtl {
    /// Run `program` over plain stdin/stdout pipes.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            pty: false,
        }
    }

    /// Run `program` on a pseudo-terminal through [`PTY_WRAPPER`].
    pub fn with_pty(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            pty: true,
        }
    }

    /// The control program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the program runs on a pseudo-terminal.
    pub fn uses_pty(&self) -> bool {
        self.pty
    }

    fn command(&self) -> Command {
        if self.pty {
            let mut command = Command::new(PTY_WRAPPER);
            command
                .args(["-q", "-f", "-e", "-c"])
                .arg(&self.program)
                .arg("/dev/null");
            command
        } else {
            Command::new(&self.program)
        }
    }
}

#[async_trait]
impl ControlInterface for BluetoothCtl {
    async fn open(&self) -> Result<Box<dyn ControlSession>> {
        debug!(pty = self.pty, "Spawning {}", self.program);

        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let missing = |stream: &str| Error::ControlInterface {
            message: format!("{} not captured", stream),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        Ok(Box::new(ProcessSession {
            child,
            stdin,
            stdout,
            buffer: String::new(),
        }))
    }
}

struct ProcessSession {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    buffer: String,
}

impl ProcessSession {
    fn append(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        trace!("bluetoothctl: {}", text.trim_end());
        self.buffer.push_str(&text);

        if self.buffer.len() > MAX_BUFFER {
            let mut cut = self.buffer.len() - MAX_BUFFER;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }
}

#[async_trait]
impl ControlSession for ProcessSession {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        trace!("> {}", line);
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn await_pattern(
        &mut self,
        patterns: &[Regex],
        wait: Duration,
    ) -> Result<Option<usize>> {
        let deadline = Instant::now() + wait;
        let mut chunk = [0u8; 4096];

        loop {
            if let Some((index, end)) = match_earliest(&self.buffer, patterns) {
                self.buffer.drain(..end);
                return Ok(Some(index));
            }

            match timeout_at(deadline, self.stdout.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(Error::ControlInterface {
                        message: "bluetoothctl exited".to_string(),
                    })
                }
                Ok(Ok(n)) => self.append(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.stdin.shutdown().await {
            debug!("Closing bluetoothctl stdin: {}", e);
        }

        match timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                debug!("bluetoothctl exited: {:?}", status?);
            }
            Err(_) => {
                warn!("bluetoothctl did not exit, killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
