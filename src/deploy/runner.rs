//! Service runner seam and the Docker Compose adapter.
//!
//! The orchestrator drives the service group through [`ServiceRunner`]; the
//! production adapter shells out to `docker compose` (preferring the
//! standalone `docker-compose` binary when present, matching older hosts).
//! [`ProxyReloader`] is the graceful-reload signal sent to the reverse
//! proxy after certificate renewal.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Control surface for the managed service group.
#[async_trait]
pub trait ServiceRunner: Send + Sync {
    /// Start the full group detached. Returns once the start command has
    /// been issued; readiness is the health poller's concern.
    async fn up(&self) -> Result<()>;

    /// Stop and remove the group.
    async fn down(&self) -> Result<()>;

    /// Current container listing for the group.
    async fn ps(&self) -> Result<String>;

    /// Tail of the log stream, optionally narrowed to named services.
    async fn logs(&self, tail: usize, services: &[String]) -> Result<String>;
}

/// Graceful configuration reload of the reverse proxy, without dropping
/// in-flight connections.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Pick the compose invocation available on this host.
pub async fn detect_compose_command() -> (&'static str, Vec<&'static str>) {
    let check = Command::new("which").arg("docker-compose").output().await;

    if check.map(|o| o.status.success()).unwrap_or(false) {
        ("docker-compose", vec![])
    } else {
        ("docker", vec!["compose"])
    }
}

#[derive(Debug, Clone)]
pub struct ComposeRunner {
    project: String,
    compose_file: String,
    work_dir: PathBuf,
    program: &'static str,
    base_args: Vec<&'static str>,
}

impl ComposeRunner {
    pub async fn new(project: impl Into<String>, compose_file: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        let (program, base_args) = detect_compose_command().await;
        debug!("Using compose command: {} {:?}", program, base_args);
        Self {
            project: project.into(),
            compose_file: compose_file.into(),
            work_dir: work_dir.into(),
            program,
            base_args,
        }
    }

    /// Full argument list for one compose subcommand, for logging and
    /// execution alike.
    fn compose_args<'a>(&'a self, tail: &[&'a str]) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.base_args.clone();
        args.extend(["-p", self.project.as_str(), "-f", self.compose_file.as_str()]);
        args.extend_from_slice(tail);
        args
    }

    async fn run(&self, tail: &[&str]) -> Result<std::process::Output> {
        let args = self.compose_args(tail);
        info!(">>> {} {}", self.program, args.join(" "));

        let output = Command::new(self.program)
            .args(&args)
            .current_dir(&self.work_dir)
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", self.program, args.join(" ")))?;

        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }
}

#[async_trait]
impl ServiceRunner for ComposeRunner {
    async fn up(&self) -> Result<()> {
        self.run(&["up", "-d", "--remove-orphans"]).await?;
        Ok(())
    }

    async fn down(&self) -> Result<()> {
        self.run(&["down", "--remove-orphans"]).await?;
        Ok(())
    }

    async fn ps(&self) -> Result<String> {
        let output = self.run(&["ps"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn logs(&self, tail: usize, services: &[String]) -> Result<String> {
        let tail_arg = tail.to_string();
        let mut args = vec!["logs", "--no-color", "--tail", tail_arg.as_str()];
        args.extend(services.iter().map(|s| s.as_str()));

        let output = self.run(&args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Sends `nginx -s reload` into the proxy container via compose exec.
pub struct NginxReloader {
    runner: ComposeRunner,
    proxy_service: String,
}

impl NginxReloader {
    pub fn new(runner: ComposeRunner, proxy_service: impl Into<String>) -> Self {
        Self {
            runner,
            proxy_service: proxy_service.into(),
        }
    }
}

#[async_trait]
impl ProxyReloader for NginxReloader {
    async fn reload(&self) -> Result<()> {
        self.runner
            .run(&["exec", "-T", self.proxy_service.as_str(), "nginx", "-s", "reload"])
            .await?;
        info!("Signaled proxy {} to reload configuration", self.proxy_service);
        Ok(())
    }
}
