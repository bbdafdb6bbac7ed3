//! Shell task runner
//!
//! Commands run through the user's shell (`$SHELL -c`, `/bin/sh` when unset,
//! `cmd /C` on Windows) with stdin closed. Output is stdout followed by
//! stderr, capped in length, with the exit status appended. Failures of any
//! kind become text in the output; `run` itself never errors.
//!
//! On Unix the shell leads its own process group. Output is collected as it
//! arrives, so a timeout keeps what was printed before the whole group is
//! killed. Once the shell itself exits, background jobs still holding the
//! pipes get a short grace period and are then left behind.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;

/// How long pipes are drained after the shell exits
const PIPE_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: Option<String>,
    timeout: Duration,
    output_limit: usize,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: None,
            timeout: Duration::from_secs(60),
            output_limit: 10_000,
        }
    }
}

impl ShellRunner {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            shell: config.shell.clone().filter(|s| !s.trim().is_empty()),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit: config.output_limit_chars,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    /// Run `command` and return its captured output
    pub async fn run(&self, command: &str) -> String {
        let command = command.trim();
        if command.is_empty() {
            return "[ERROR] empty command".to_string();
        }

        info!(command, "running shell task");

        let mut cmd = self.build_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "failed to start shell");
                return format!("[ERROR] failed to start command: {}", e);
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let waited = tokio::time::timeout(
            self.timeout,
            collect(&mut child, &mut stdout, &mut stderr),
        )
        .await;

        let trailer = match waited {
            Ok(Ok(status)) => {
                debug!(command, success = status.success(), "shell task finished");
                status_line(&status)
            }
            Ok(Err(e)) => {
                warn!(command, error = %e, "failed to collect command output");
                terminate(&mut child).await;
                format!("[ERROR] failed to collect output: {}", e)
            }
            Err(_) => {
                warn!(command, timeout_secs = self.timeout.as_secs(), "command timed out");
                terminate(&mut child).await;
                format!("[ERROR] command timed out after {}s", self.timeout.as_secs())
            }
        };

        let mut text = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        let mut text = truncate_output(&text, self.output_limit);
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&trailer);
        text
    }

    fn build_command(&self, command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new(self.shell.as_deref().unwrap_or("cmd"));
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let shell = self
                .shell
                .clone()
                .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
                .unwrap_or_else(|| "/bin/sh".to_string());
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

/// Read both pipes until the shell exits, then give lingering writers
/// `PIPE_GRACE` to finish. Bytes land in the buffers as they arrive, so
/// they survive this future being dropped.
async fn collect(
    child: &mut Child,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> io::Result<ExitStatus> {
    let out_pipe = child.stdout.take();
    let err_pipe = child.stderr.take();
    let readers = async {
        tokio::join!(drain(out_pipe, stdout), drain(err_pipe, stderr));
    };
    tokio::pin!(readers);

    let exited = tokio::select! {
        status = child.wait() => Some(status?),
        _ = &mut readers => None,
    };

    match exited {
        Some(status) => {
            if tokio::time::timeout(PIPE_GRACE, readers).await.is_err() {
                debug!("background jobs still hold the output pipes, detaching");
            }
            Ok(status)
        }
        None => child.wait().await,
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Kill the shell and everything in its process group
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, error = %e, "process group already gone");
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "shell already exited");
    }
}

fn status_line(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("[exit status: {}]", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("[terminated by signal {}]", signal);
        }
    }

    "[terminated by signal]".to_string()
}

/// Keep the first `limit` characters of `text`, noting how many were dropped
pub fn truncate_output(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{}\n…[truncated {} chars]", &text[..cut], dropped)
        }
        None => text.to_string(),
    }
}
