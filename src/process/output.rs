// Line-by-line capture of the model server's stdout/stderr into the log

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Take the child's output pipes and forward every line to `tracing`.
///
/// Returns the reader tasks; they end on their own at EOF.
pub fn capture_output(child: &mut Child, pid: u32) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(forward_lines(stdout, OutputStream::Stdout, pid)));
    }

    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(forward_lines(stderr, OutputStream::Stderr, pid)));
    }

    tasks
}

async fn forward_lines<R>(reader: R, stream: OutputStream, pid: u32)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match stream {
                    OutputStream::Stdout => info!(target: "model_server", pid, "{}", line),
                    OutputStream::Stderr => warn!(target: "model_server", pid, "{}", line),
                }
            }
            // EOF or read error: the process closed the pipe
            Ok(None) | Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_capture_ends_at_eof() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().unwrap_or_default();

        let tasks = capture_output(&mut child, pid);
        assert_eq!(tasks.len(), 2);
        assert!(child.stdout.is_none());

        let _ = child.wait().await;
        for task in tasks {
            tokio::time::timeout(std::time::Duration::from_secs(5), task)
                .await
                .expect("reader did not finish")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_capture_without_pipes() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("Failed to spawn process");

        let tasks = capture_output(&mut child, 0);
        assert!(tasks.is_empty());
        let _ = child.wait().await;
    }
}
