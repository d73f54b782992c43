//! Remote script execution.
//!
//! `SshExecutor` drives the system `ssh` client through
//! `tokio::process::Command`. A script is streamed over stdin into a uniquely
//! named file on the server, made executable, run, and removed; its stdout is
//! the plugin output.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::{DiscoverConfig, SshConfig};
use crate::error::{DiscoverError, Result};
use crate::inventory::ServerEntry;

/// Runs plugin scripts on servers.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Check the server is reachable and accepts our credentials.
    async fn connect(&self, server: &ServerEntry) -> Result<()>;

    /// Run a local script on the server and return its standard output.
    async fn run_script(&self, server: &ServerEntry, script: &Path) -> Result<String>;
}

pub struct SshExecutor {
    ssh: SshConfig,
    remote_tmp_dir: String,
    command_timeout: Duration,
}

impl SshExecutor {
    pub fn new(config: &DiscoverConfig) -> Self {
        Self {
            ssh: config.ssh.clone(),
            remote_tmp_dir: config.remote_tmp_dir.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    /// Build the `ssh` invocation for one remote command.
    ///
    /// With a password, `sshpass -e` reads it from `SSHPASS` so it never
    /// shows up in the process list.
    fn command(&self, server: &ServerEntry, remote_command: &str) -> Command {
        let mut cmd = match &self.ssh.password {
            Some(password) => {
                let mut cmd = Command::new(&self.ssh.sshpass_path);
                cmd.env("SSHPASS", password).arg("-e").arg(&self.ssh.ssh_path);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.ssh.ssh_path);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };

        cmd.arg("-p")
            .arg(self.ssh.port.to_string())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.ssh.connect_timeout_secs));
        if !self.ssh.strict_host_key_checking {
            cmd.args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "LogLevel=ERROR",
            ]);
        }
        if let Some(identity) = &self.ssh.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.ssh.user, server.ip))
            .arg(remote_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Remote shell snippet: stage stdin to a temp file, run it, clean up,
    /// and exit with the script's status.
    fn staging_command(&self) -> String {
        let remote_path = format!(
            "{}/fleetgraph-{}",
            self.remote_tmp_dir.trim_end_matches('/'),
            Uuid::new_v4()
        );
        format!(
            "f={}; cat > \"$f\" && chmod +x \"$f\" && \"$f\"; rc=$?; rm -f \"$f\"; exit $rc",
            shell_quote(&remote_path)
        )
    }

    async fn execute(
        &self,
        server: &ServerEntry,
        remote_command: &str,
        input: &[u8],
        operation: &str,
    ) -> Result<Output> {
        let mut child = self
            .command(server, remote_command)
            .spawn()
            .map_err(|e| DiscoverError::Connection {
                host: server.ip.clone(),
                reason: format!("cannot start ssh client: {e}"),
            })?;

        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input).await?;
                // Dropping stdin sends EOF to the remote `cat`.
            }
            child.wait_with_output().await
        };

        tokio::time::timeout(self.command_timeout, run)
            .await
            .map_err(|_| DiscoverError::Timeout {
                host: server.ip.clone(),
                operation: operation.to_string(),
                timeout: self.command_timeout,
            })?
            .map_err(DiscoverError::from)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&self, server: &ServerEntry) -> Result<()> {
        tracing::info!(server = %server.vm_name, ip = %server.ip, "SSH: connecting to server");
        let output = self.execute(server, "true", &[], "connect").await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DiscoverError::Connection {
                host: server.ip.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn run_script(&self, server: &ServerEntry, script: &Path) -> Result<String> {
        let body = tokio::fs::read(script)
            .await
            .map_err(|e| DiscoverError::RemoteExecution {
                host: server.ip.clone(),
                script: script.display().to_string(),
                reason: format!("cannot read local script: {e}"),
            })?;

        tracing::info!(server = %server.vm_name, script = %script.display(), "Executing script");
        let output = self
            .execute(server, &self.staging_command(), &body, "script")
            .await?;

        if !output.status.success() {
            return Err(DiscoverError::RemoteExecution {
                host: server.ip.clone(),
                script: script.display().to_string(),
                reason: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Single-quote a string for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerEntry {
        ServerEntry {
            vm_name: "web1".to_string(),
            ip: "10.0.0.5".to_string(),
            dns_name: "web1.local".to_string(),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_key_auth_command() {
        let mut config = DiscoverConfig::default();
        config.ssh.user = "ops".to_string();
        config.ssh.identity_file = Some("/keys/id_ed25519".to_string());
        let executor = SshExecutor::new(&config);

        let cmd = executor.command(&server(), "true");
        assert_eq!(cmd.as_std().get_program(), "ssh");
        let args = args(&cmd);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert_eq!(args[args.len() - 2], "ops@10.0.0.5");
        assert_eq!(args[args.len() - 1], "true");
    }

    #[test]
    fn test_password_auth_uses_sshpass_env() {
        let mut config = DiscoverConfig::default();
        config.ssh.password = Some("hunter2".to_string());
        config.ssh.strict_host_key_checking = true;
        let executor = SshExecutor::new(&config);

        let cmd = executor.command(&server(), "true");
        assert_eq!(cmd.as_std().get_program(), "sshpass");
        let args = args(&cmd);
        assert_eq!(&args[..2], ["-e", "ssh"]);
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        assert!(!args.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn test_staging_command_uses_unique_paths() {
        let mut config = DiscoverConfig::default();
        config.remote_tmp_dir = "/var/tmp/".to_string();
        let executor = SshExecutor::new(&config);

        let first = executor.staging_command();
        let second = executor.staging_command();
        assert_ne!(first, second);
        assert!(first.starts_with("f='/var/tmp/fleetgraph-"));
        assert!(first.ends_with("exit $rc"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp"), "'/tmp'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    /// An executor whose `ssh` is a local script that hangs, then touches
    /// `marker` if it was not killed.
    #[cfg(unix)]
    fn hanging_executor(dir: &Path, marker: &Path) -> SshExecutor {
        use std::os::unix::fs::PermissionsExt;

        let ssh = dir.join("ssh");
        std::fs::write(
            &ssh,
            format!("#!/bin/sh\nsleep 2\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&ssh, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = DiscoverConfig::default();
        config.ssh.ssh_path = ssh.display().to_string();
        config.command_timeout_secs = 1;
        SshExecutor::new(&config)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_command_times_out_and_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let executor = hanging_executor(dir.path(), &marker);

        let err = executor.connect(&server()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoverError::Timeout { ref operation, timeout, .. }
                if operation == "connect" && timeout == Duration::from_secs(1)
        ));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_script_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("check.sh");
        std::fs::write(&script, "echo ok\n").unwrap();
        let executor = hanging_executor(dir.path(), &dir.path().join("finished"));

        let err = executor.run_script(&server(), &script).await.unwrap_err();
        assert!(matches!(err, DiscoverError::Timeout { ref operation, .. } if operation == "script"));
    }

    #[tokio::test]
    async fn test_missing_local_script_is_remote_error() {
        let executor = SshExecutor::new(&DiscoverConfig::default());
        let err = executor
            .run_script(&server(), Path::new("/nonexistent/check.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoverError::RemoteExecution { .. }));
    }
}
