use crate::deadline::Deadline;
use crate::error::{Error, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code pkexec uses when the authentication dialog was dismissed.
const PKEXEC_DISMISSED: i32 = 126;
/// Exit code pkexec uses when authorization could not be obtained.
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

/// Captured result of one external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into `Error::CommandFailed`.
    pub fn into_success(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = match self.status {
            Some(PKEXEC_DISMISSED) | Some(PKEXEC_NOT_AUTHORIZED) if program == "pkexec" => {
                "authorization was not granted".to_string()
            }
            _ if !self.stderr.trim().is_empty() => self.stderr.trim().to_string(),
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        };
        Err(Error::CommandFailed {
            program: program.to_string(),
            detail,
        })
    }
}

/// Runs external programs. Every call is bounded by `timeout`.
pub trait CommandRunner: Send + Sync {
    fn run_input(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        self.run_input(program, args, None, timeout)
    }

    /// Whether `program` resolves to an executable on `PATH`.
    fn exists(&self, program: &str) -> bool;
}

/// PIDs of children currently running on behalf of this process.
#[derive(Debug, Clone, Default)]
pub struct ChildRegistry {
    pids: Arc<Mutex<BTreeSet<u32>>>,
}

impl ChildRegistry {
    fn register(&self, pid: u32) {
        self.pids
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pid);
    }

    fn unregister(&self, pid: u32) {
        self.pids
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&pid);
    }

    pub fn len(&self) -> usize {
        self.pids.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send SIGTERM to every tracked child. Returns how many were signalled.
    pub fn terminate_all(&self) -> usize {
        let pids: Vec<u32> = std::mem::take(&mut *self.pids.lock().unwrap_or_else(|p| p.into_inner()))
            .into_iter()
            .collect();
        let mut signalled = 0;
        for pid in pids {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    tracing::debug!("sent SIGTERM to child {}", pid);
                    signalled += 1;
                }
                Err(e) => tracing::debug!("child {} already gone: {}", pid, e),
            }
        }
        signalled
    }
}

struct Tracked<'a> {
    registry: &'a ChildRegistry,
    pid: u32,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.pid);
    }
}

/// Runs real processes, clamping each timeout to the invocation deadline.
pub struct SystemRunner {
    deadline: Deadline,
    children: ChildRegistry,
}

impl SystemRunner {
    pub fn new(deadline: Deadline, children: ChildRegistry) -> Self {
        Self { deadline, children }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
    }
    rx
}

impl CommandRunner for SystemRunner {
    fn run_input(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let timeout = self.deadline.bound(timeout);
        let operation = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        if timeout.is_zero() {
            return Err(Error::Timeout {
                operation,
                after: timeout,
            });
        }

        tracing::debug!("running `{}` (timeout {:?})", operation, timeout);
        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::CommandNotFound {
                    program: program.to_string(),
                },
                _ => Error::CommandFailed {
                    program: program.to_string(),
                    detail: e.to_string(),
                },
            })?;

        self.children.register(child.id());
        let _tracked = Tracked {
            registry: &self.children,
            pid: child.id(),
        };

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), input) {
            let data = input.to_string();
            thread::spawn(move || {
                let _ = stdin.write_all(data.as_bytes());
            });
        }
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::CommandFailed {
                        program: program.to_string(),
                        detail: e.to_string(),
                    });
                }
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!("`{}` killed after {:?}", operation, timeout);
                return Err(Error::Timeout {
                    operation,
                    after: timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Pipes may be held open by a grandchild; don't wait past the budget.
        let drain = timeout
            .saturating_sub(started.elapsed())
            .max(Duration::from_millis(100));
        let output = CommandOutput {
            status: status.code(),
            stdout: stdout.recv_timeout(drain).unwrap_or_default(),
            stderr: stderr.recv_timeout(drain).unwrap_or_default(),
        };
        tracing::debug!("`{}` exited with {:?}", operation, output.status);
        Ok(output)
    }

    fn exists(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
            .unwrap_or(false)
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
