//! Child process execution bounded by a wall-clock deadline.
//!
//! Every child is started as the leader of a new process group, so the
//! whole tree it spawns (shell wrappers, `go run`, background jobs) can be
//! killed with one `killpg`.

use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, warn};

use crate::{registry::CommandLine, types::ResourceLimits};

/// How long to wait for output pipes to drain once the group is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("{program} is not available on this host")]
    NotFound { program: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub fn program(&self) -> &str {
        match self {
            SpawnError::NotFound { program }
            | SpawnError::Spawn { program, .. }
            | SpawnError::Wait { program, .. } => program,
        }
    }
}

/// What a finished (or killed) child left behind
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        let mut output = String::from_utf8_lossy(&self.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.truncated {
            if !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str("[output truncated]\n");
        }
        output
    }
}

/// Spawns recipe steps with a fixed environment and limits
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    child_path: String,
    child_env: Vec<(String, String)>,
    limits: ResourceLimits,
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(
        child_path: String,
        child_env: Vec<(String, String)>,
        limits: ResourceLimits,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            child_path,
            child_env,
            limits,
            max_output_bytes,
        }
    }

    /// Locate `program` on the child `PATH`, or take it as-is when it is a path
    pub fn resolve_program(&self, program: &str, cwd: &Path) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return path.exists().then_some(path);
        }
        which::which_in(program, Some(&self.child_path), cwd).ok()
    }

    /// Run `command` inside `cwd` until it exits or `deadline` passes.
    pub async fn run(
        &self,
        command: &CommandLine,
        cwd: &Path,
        deadline: Instant,
    ) -> Result<ProcessOutcome, SpawnError> {
        let started = Instant::now();
        let program = self
            .resolve_program(&command.program, cwd)
            .ok_or_else(|| SpawnError::NotFound {
                program: command.program.clone(),
            })?;

        debug!(program = %program.display(), args = ?command.args, "Spawning process");

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .env_clear()
            .envs(self.child_env.iter().map(|(k, v)| (k, v)))
            .env("PATH", &self.child_path)
            .env("HOME", cwd)
            .env("TMPDIR", cwd)
            .env("LANG", "C.UTF-8")
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let cpu_time = u64::from(self.limits.cpu_time);
        let file_size = self.limits.file_size;

        // Only async-signal-safe calls in here.
        unsafe {
            cmd.pre_exec(move || {
                if cpu_time > 0 {
                    setrlimit(Resource::RLIMIT_CPU, cpu_time, cpu_time)
                        .map_err(std::io::Error::from)?;
                }
                if file_size > 0 {
                    setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size)
                        .map_err(std::io::Error::from)?;
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound {
                program: command.program.clone(),
            },
            _ => SpawnError::Spawn {
                program: command.program.clone(),
                source: e,
            },
        })?;

        // The child called setpgid(0, 0), so its pid is the group id.
        let mut group = GroupGuard(child.id().map(|id| Pid::from_raw(id as i32)));

        let (stop_readers, stop) = watch::channel(false);
        let stdout = tokio::spawn(read_capped(
            child.stdout.take(),
            self.max_output_bytes,
            stop.clone(),
        ));
        let stderr = tokio::spawn(read_capped(
            child.stderr.take(),
            self.max_output_bytes,
            stop,
        ));

        let (status, timed_out) = match time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                group.kill();
                return Err(SpawnError::Wait {
                    program: command.program.clone(),
                    source: e,
                });
            }
            Err(_) => (None, true),
        };

        // Sweep the group on every path. After a normal exit this takes out
        // backgrounded descendants that would otherwise outlive the request
        // and hold our pipes open.
        group.kill();

        let status = match status {
            Some(status) => status,
            None => {
                warn!(program = %command.program, "Deadline elapsed, killed process group");
                let _ = child.start_kill();
                child.wait().await.map_err(|e| SpawnError::Wait {
                    program: command.program.clone(),
                    source: e,
                })?
            }
        };

        let (stdout, stderr) = drain(stdout, stderr, stop_readers).await;
        if stdout.pipe_held || stderr.pipe_held {
            warn!(
                program = %command.program,
                "A process outside the group still holds the output pipe, keeping what was read"
            );
        }

        Ok(ProcessOutcome {
            exit_code: status.code(),
            signal: status.signal(),
            truncated: stdout.truncated || stderr.truncated,
            stdout: stdout.bytes,
            stderr: stderr.bytes,
            timed_out,
            elapsed: started.elapsed(),
        })
    }
}

/// Kills the process group when dropped, so a cancelled request cannot
/// leave descendants behind.
struct GroupGuard(Option<Pid>);

impl GroupGuard {
    fn kill(&mut self) {
        let Some(pgid) = self.0.take() else { return };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), "Failed to kill process group: {}", e),
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Bytes read from one output stream
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
    /// Reading was stopped while the pipe was still open
    pipe_held: bool,
}

/// Wait for both readers to hit EOF. A descendant that left the group (for
/// example through `setsid`) can keep a pipe open indefinitely; after
/// [`DRAIN_GRACE`] the readers are told to stop and hand back what they have.
async fn drain(
    stdout: JoinHandle<Captured>,
    stderr: JoinHandle<Captured>,
    stop: watch::Sender<bool>,
) -> (Captured, Captured) {
    let readers = async { tokio::join!(stdout, stderr) };
    tokio::pin!(readers);

    let (stdout, stderr) = match time::timeout(DRAIN_GRACE, &mut readers).await {
        Ok(joined) => joined,
        Err(_) => {
            let _ = stop.send(true);
            readers.await
        }
    };
    (joined(stdout), joined(stderr))
}

fn joined(result: Result<Captured, tokio::task::JoinError>) -> Captured {
    result.unwrap_or_else(|e| {
        warn!("Output reader failed: {}", e);
        Captured::default()
    })
}

/// Read until EOF or until `stop` fires, keeping at most `cap` bytes. The
/// rest is read and discarded so the writer never blocks on a full pipe.
async fn read_capped<R>(
    reader: Option<R>,
    cap: usize,
    mut stop: watch::Receiver<bool>,
) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return captured;
    };
    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let room = cap.saturating_sub(captured.bytes.len());
                    if n > room {
                        captured.truncated = true;
                    }
                    captured.bytes.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) => {
                    debug!("Stopped reading child output: {}", e);
                    break;
                }
            },
            _ = stop.changed() => {
                captured.pipe_held = true;
                break;
            }
        }
    }
    captured
}
