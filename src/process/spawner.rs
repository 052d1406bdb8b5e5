use crate::config::ServerConfig;
use crate::error::{GovernorError, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Environment hint that keeps the server's output line-buffered
const UNBUFFERED_ENV: (&str, &str) = ("PYTHONUNBUFFERED", "1");

/// Handle returned when the model server has been spawned
#[derive(Debug)]
pub struct SpawnedServer {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Check that the server directory and its entrypoint exist
pub fn check_layout(config: &ServerConfig) -> Result<()> {
    if !config.server_dir.is_dir() {
        return Err(GovernorError::ServerDirNotFound(
            config.server_dir.display().to_string(),
        ));
    }

    let entrypoint = config.entrypoint_path();
    if !entrypoint.is_file() {
        return Err(GovernorError::EntrypointNotFound(
            entrypoint.display().to_string(),
        ));
    }

    Ok(())
}

/// Spawn the model server described by `config`.
///
/// The command is `<interpreter> <entrypoint> <args...>` run inside
/// `server_dir`, with stdin/stdout/stderr piped so output can be captured
/// line by line.
pub fn spawn_server(config: &ServerConfig) -> Result<SpawnedServer> {
    check_layout(config)?;

    let mut command = Command::new(&config.interpreter);
    command
        .arg(&config.entrypoint)
        .args(&config.args)
        .current_dir(&config.server_dir)
        .env(UNBUFFERED_ENV.0, UNBUFFERED_ENV.1)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        GovernorError::SpawnError(format!(
            "Failed to run '{} {}': {}",
            config.interpreter, config.entrypoint, e
        ))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| GovernorError::SpawnError("Failed to get PID for model server".to_string()))?;

    Ok(SpawnedServer { child, pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_server_dir(script: &str) -> (TempDir, ServerConfig) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("main.sh"), script).unwrap();

        let config = ServerConfig {
            server_dir: temp_dir.path().to_path_buf(),
            entrypoint: "main.sh".to_string(),
            interpreter: "/bin/sh".to_string(),
            ..ServerConfig::default()
        };
        (temp_dir, config)
    }

    #[tokio::test]
    async fn test_spawn_simple_server() {
        let (_dir, config) = create_server_dir("echo ready\n");

        let spawned = spawn_server(&config).unwrap();
        assert!(spawned.pid > 0);

        let mut child = spawned.child;
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_sets_unbuffered_env_and_cwd() {
        let (dir, config) = create_server_dir(
            "[ \"$PYTHONUNBUFFERED\" = 1 ] && [ -f main.sh ] && exit 0; exit 3\n",
        );

        let mut child = spawn_server(&config).unwrap().child;
        let status = child.wait().await.unwrap();
        assert!(status.success(), "cwd or env not applied in {:?}", dir.path());
    }

    #[tokio::test]
    async fn test_spawn_captures_stdio() {
        let (_dir, config) = create_server_dir("echo hi\n");

        let spawned = spawn_server(&config).unwrap();
        assert!(spawned.child.stdout.is_some());
        assert!(spawned.child.stderr.is_some());
        assert!(spawned.child.stdin.is_some());
    }

    #[test]
    fn test_missing_server_dir() {
        let config = ServerConfig {
            server_dir: "/nonexistent/model-server".into(),
            ..ServerConfig::default()
        };

        assert!(matches!(
            check_layout(&config),
            Err(GovernorError::ServerDirNotFound(_))
        ));
    }

    #[test]
    fn test_missing_entrypoint() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            server_dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };

        assert!(matches!(
            check_layout(&config),
            Err(GovernorError::EntrypointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_missing_interpreter() {
        let (_dir, mut config) = create_server_dir("exit 0\n");
        config.interpreter = "/nonexistent/python3".to_string();

        assert!(matches!(
            spawn_server(&config),
            Err(GovernorError::SpawnError(_))
        ));
    }
}
