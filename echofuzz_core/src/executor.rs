use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Wall-clock limit for one execution unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// `stderr` value reported for a run that exceeded its timeout.
pub const TIMEOUT_MESSAGE: &str = "Timeout";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Permissively decoded and trimmed output of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn from_bytes(stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self::new("", TIMEOUT_MESSAGE)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new("", message)
    }

    pub fn is_timeout(&self) -> bool {
        self.stdout.is_empty() && self.stderr == TIMEOUT_MESSAGE
    }
}

/// One probe together with the output it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub probe: Vec<u8>,
    pub output: ProcessOutput,
}

impl ExecutionResult {
    pub fn new(probe: Vec<u8>, output: ProcessOutput) -> Self {
        Self { probe, output }
    }

    pub fn probe_text(&self) -> String {
        String::from_utf8_lossy(&self.probe).into_owned()
    }
}

/// Runs the target once per probe.
///
/// Implementations never fail: spawn errors, I/O errors and timeouts are all
/// reported through the returned [`ProcessOutput`].
pub trait Executor: Send + Sync {
    fn run(&self, input: &[u8]) -> ProcessOutput;
}

#[derive(Error, Debug)]
enum ExecutionError {
    #[error("Target command is empty")]
    EmptyCommand,
    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Error waiting for child: {0}")]
    Wait(#[source] io::Error),
    #[error("Process timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl CommandExecutorConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }
}

/// Spawns the target for every probe, feeding the probe on standard input.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    fn try_run(&self, input: &[u8]) -> Result<ProcessOutput, ExecutionError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(ExecutionError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            command: self.config.command.join(" "),
            source,
        })?;

        let deadline = Instant::now() + self.config.timeout;

        // Pipes are serviced on helper threads so a chatty target cannot
        // block on a full pipe while we wait for it.
        spawn_writer(child.stdin.take(), input.to_vec());
        let stdout_rx = spawn_reader(child.stdout.take());
        let stderr_rx = spawn_reader(child.stderr.take());

        let status = wait_until(&mut child, deadline)?;
        debug!(?status, "target exited");

        let stdout = stdout_rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|_| ExecutionError::Timeout)?;
        let stderr = stderr_rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|_| ExecutionError::Timeout)?;

        Ok(ProcessOutput::from_bytes(&stdout, &stderr))
    }
}

impl Executor for CommandExecutor {
    fn run(&self, input: &[u8]) -> ProcessOutput {
        match self.try_run(input) {
            Ok(output) => output,
            Err(ExecutionError::Timeout) => {
                warn!(
                    input = %String::from_utf8_lossy(input),
                    "process timed out"
                );
                ProcessOutput::timeout()
            }
            Err(e) => {
                debug!(error = %e, "execution failed");
                ProcessOutput::failure(e.to_string())
            }
        }
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<ExitStatus, ExecutionError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    if let Err(e) = child.kill() {
                        debug!(error = %e, "failed to kill timed-out process");
                    }
                    let _ = child.wait();
                    return Err(ExecutionError::Timeout);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecutionError::Wait(e));
            }
        }
    }
}

fn spawn_writer<W: Write + Send + 'static>(pipe: Option<W>, payload: Vec<u8>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    thread::spawn(move || {
        // A target that exits without reading its input closes the pipe early.
        if let Err(e) = pipe.write_all(&payload) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                debug!(error = %e, "failed to write probe to stdin");
            }
        }
    });
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!(error = %e, "failed to read target output");
            }
        }
        let _ = tx.send(buf);
    });
    rx
}
