// Process launcher implementation
// reason: tokio::process for async pipes, nix for process-group signalling
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use plugin_runtime_core::port::process::{
    ChildProcess, ExecutionError, LaunchSpec, OutputReader, ProcessExit, ProcessLauncher,
    StdinWriter,
};

/// Launches plugins as local child processes
///
/// Every child gets:
/// - exactly the environment of its LaunchSpec (nothing inherited)
/// - its own process group, so a kill reaches anything it forked
/// - SIGKILL on parent death (Linux), plus kill-on-drop of the handle
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &LaunchSpec) -> Command {
        let mut command = Command::new(&spec.command.program);
        command
            .args(&spec.command.args)
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(spec.env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            // SAFETY: only async-signal-safe syscalls run between fork and exec
            unsafe {
                command.pre_exec(|| {
                    use nix::unistd::{setpgid, Pid};

                    setpgid(Pid::from_raw(0), Pid::from_raw(0))?;

                    #[cfg(target_os = "linux")]
                    nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)?;

                    Ok(())
                });
            }
        }

        command
    }
}

impl ProcessLauncher for TokioProcessLauncher {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>, ExecutionError> {
        let child = Self::command(spec).spawn().map_err(|e| {
            ExecutionError::SpawnFailed(format!(
                "{} in {}: {}",
                spec.command.program,
                spec.working_dir.display(),
                e
            ))
        })?;

        debug!(
            program = %spec.command.program,
            args = ?spec.command.args,
            working_dir = %spec.working_dir.display(),
            pid = ?child.id(),
            "Spawned plugin process"
        );

        Ok(Box::new(TokioChildProcess::new(child)))
    }
}

/// Handle on a process spawned by TokioProcessLauncher
pub struct TokioChildProcess {
    child: Child,
}

impl TokioChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    /// Signal the whole process group, falling back to the child alone
    fn kill_group(&mut self, pid: u32) -> Result<(), ExecutionError> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => return Ok(()),
                Err(Errno::ESRCH) => {}
                Err(e) => {
                    warn!(pid = %pid, error = %e, "Failed to kill process group, killing process only");
                }
            }
        }

        #[cfg(not(unix))]
        let _ = pid;

        self.child
            .start_kill()
            .map_err(|e| ExecutionError::Killed(e.to_string()))
    }
}

#[async_trait]
impl ChildProcess for TokioChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdin(&mut self) -> Option<StdinWriter> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as StdinWriter)
    }

    fn take_stdout(&mut self) -> Option<OutputReader> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as OutputReader)
    }

    fn take_stderr(&mut self) -> Option<OutputReader> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as OutputReader)
    }

    async fn wait(&mut self) -> Result<ProcessExit, ExecutionError> {
        self.child
            .wait()
            .await
            .map(process_exit)
            .map_err(|e| ExecutionError::WaitFailed(e.to_string()))
    }

    async fn kill(&mut self) -> Result<(), ExecutionError> {
        // id() is None once the child has been reaped
        match self.child.id() {
            Some(pid) => self.kill_group(pid),
            None => Ok(()),
        }
    }
}

fn process_exit(status: ExitStatus) -> ProcessExit {
    if let Some(code) = status.code() {
        return ProcessExit::code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ProcessExit::signaled(signal);
        }
    }

    ProcessExit {
        code: None,
        signal: None,
    }
}
