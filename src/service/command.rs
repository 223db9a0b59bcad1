use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, warn};
use tokio::fs;
use tokio::process::Command;
use which::which;

use crate::config::ExecutionStrategy;
use crate::service::DumpError;

pub fn normalize_host(host: &str) -> String {
    if host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    }
}

pub fn is_loopback(host: &str) -> bool {
    normalize_host(host)
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Finds dump tools on `PATH`, then in the configured fallback directories.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    fallback_dirs: Vec<PathBuf>,
}

impl ToolLocator {
    pub fn new(fallback_dirs: Vec<PathBuf>) -> ToolLocator {
        ToolLocator { fallback_dirs }
    }

    pub fn locate(&self, tool: &str) -> Result<PathBuf, DumpError> {
        if let Ok(path) = which(tool) {
            return Ok(path);
        }

        self.fallback_dirs
            .iter()
            .map(|dir| dir.join(tool))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| DumpError::ToolNotFound(tool.to_string()))
    }
}

/// Spawns dump tools with their stdout streamed into the target artifact.
#[derive(Debug, Clone, Default)]
pub struct DumpRunner {
    locator: ToolLocator,
    strategy: ExecutionStrategy,
}

impl DumpRunner {
    pub fn new(locator: ToolLocator, strategy: ExecutionStrategy) -> DumpRunner {
        DumpRunner { locator, strategy }
    }

    /// The container to route through for `host`, if any.
    pub fn container_for(&self, host: &str) -> Option<&str> {
        match &self.strategy {
            ExecutionStrategy::Container { name } if is_loopback(host) => Some(name.as_str()),
            _ => None,
        }
    }

    pub async fn run_direct(
        &self,
        tool: &str,
        args: &[String],
        envs: &[(&str, &str)],
        target: &Path,
    ) -> Result<(), DumpError> {
        let command_path = self.locator.locate(tool)?;
        let mut cmd = Command::new(command_path);
        cmd.args(args);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        run_to_file(cmd, tool, target).await
    }

    pub async fn run_in_container(
        &self,
        container: &str,
        tool: &str,
        args: &[String],
        envs: &[(&str, &str)],
        target: &Path,
    ) -> Result<(), DumpError> {
        let docker = self.locator.locate("docker")?;
        let cmd = container_command(&docker, container, tool, args, envs);
        run_to_file(cmd, tool, target).await
    }
}

/// `docker exec` for `tool`. Only variable names go on the command line;
/// docker forwards their values from its own environment.
fn container_command(docker: &Path, container: &str, tool: &str, args: &[String], envs: &[(&str, &str)]) -> Command {
    let mut cmd = Command::new(docker);
    cmd.arg("exec");
    for (key, value) in envs {
        cmd.arg("-e").arg(key);
        cmd.env(key, value);
    }
    cmd.arg(container).arg(tool).args(args);
    cmd
}

/// Runs `cmd` writing its stdout to `target`; the target is removed on failure.
pub async fn run_to_file(mut cmd: Command, tool: &str, target: &Path) -> Result<(), DumpError> {
    let file = fs::File::create(target).await?.into_std().await;
    cmd.stdin(Stdio::null())
        .stdout(file)
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {} into {}", tool, target.display());
    // output() would re-pipe stdout, so spawn and collect stderr only.
    let output = match async { cmd.spawn()?.wait_with_output().await }.await {
        Ok(output) => output,
        Err(error) => {
            remove_partial(target).await;
            return Err(error.into());
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        remove_partial(target).await;
        Err(DumpError::Failed {
            tool: tool.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

pub async fn remove_partial(target: &Path) {
    match fs::remove_file(target).await {
        Ok(()) => debug!("Removed partial artifact {}", target.display()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!("Failed to remove partial artifact {}: {}", target.display(), error),
    }
}
