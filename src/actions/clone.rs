//! Clone action: on `push`, clone the repository into the working directory
//! unless a directory of the same name already exists.
//!
//! The directory check is the only idempotence guard. The actual `git`
//! invocation sits behind [`RepoCloner`] so it can be swapped out.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::actions::{Action, ActionFactory};
use crate::config::CloneConfig;
use crate::error::ActionError;
use crate::event::WebhookEvent;

/// Maximum command output kept for reports and logs (16KB).
const MAX_OUTPUT_SIZE: usize = 16 * 1024;

/// Clones a repository URL into a directory.
#[async_trait]
pub trait RepoCloner: Send + Sync {
    /// Clone `url` inside `workdir`. Returns the captured command output.
    async fn clone_repo(&self, url: &str, workdir: &Path) -> Result<String, ActionError>;
}

/// Runs `git clone` as a child process.
#[derive(Debug, Clone)]
pub struct GitCloner {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl GitCloner {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout: None,
        }
    }

    /// Use a different `git` executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Kill the clone if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for GitCloner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoCloner for GitCloner {
    async fn clone_repo(&self, url: &str, workdir: &Path) -> Result<String, ActionError> {
        let command_line = format!("{} clone {}", self.program.display(), url);
        let failed = |reason: String| ActionError::CommandFailed {
            command: command_line.clone(),
            reason,
        };

        let child = Command::new(&self.program)
            .args(["clone", "--", url])
            .current_dir(workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("failed to spawn: {e}")))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| failed(format!("timed out after {limit:?}")))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| failed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stdout.trim().is_empty() {
            stderr.trim().to_string()
        } else if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{}\n{}", stdout.trim(), stderr.trim())
        };
        let combined = truncate_output(&combined);

        if output.status.success() {
            Ok(combined)
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(failed(format!("exit status {code}: {combined}")))
        }
    }
}

/// Registers [`CloneAction`]s.
pub struct CloneActionFactory {
    config: Arc<CloneConfig>,
    cloner: Arc<dyn RepoCloner>,
}

impl CloneActionFactory {
    pub fn new(config: CloneConfig, cloner: Arc<dyn RepoCloner>) -> Self {
        Self {
            config: Arc::new(config),
            cloner,
        }
    }
}

impl ActionFactory for CloneActionFactory {
    fn name(&self) -> &str {
        CloneAction::NAME
    }

    fn build(&self, event: Arc<WebhookEvent>) -> Box<dyn Action> {
        Box::new(CloneAction {
            event,
            config: Arc::clone(&self.config),
            cloner: Arc::clone(&self.cloner),
            alert: String::new(),
        })
    }
}

/// Clones the pushed repository if it is not already present locally.
pub struct CloneAction {
    event: Arc<WebhookEvent>,
    config: Arc<CloneConfig>,
    cloner: Arc<dyn RepoCloner>,
    alert: String,
}

impl CloneAction {
    pub const NAME: &'static str = "CloneAction";

    /// `<prefix><organization>/<name>`.
    pub fn clone_url(prefix: &str, organization: &str, name: &str) -> String {
        format!("{prefix}{organization}/{name}")
    }

    fn repo_name(&self) -> Result<&str, ActionError> {
        let name = self
            .event
            .repository_field("name")
            .ok_or_else(|| ActionError::MissingField {
                field: "repository.name".into(),
            })?;
        validate_dir_name(name)?;
        Ok(name)
    }

    /// The owning organization. Falls back to the owner's login/name for
    /// payloads that carry no `organization` string.
    fn organization(&self) -> Result<&str, ActionError> {
        self.event
            .repository_field("organization")
            .or_else(|| self.event.str_at("/repository/owner/login"))
            .or_else(|| self.event.str_at("/repository/owner/name"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ActionError::MissingField {
                field: "repository.organization".into(),
            })
    }
}

#[async_trait]
impl Action for CloneAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn matches(&mut self) -> Result<bool, ActionError> {
        tracing::debug!(
            repository = self.event.repository_url().unwrap_or("<unknown>"),
            "Checking whether delivery should be acted upon"
        );
        if self.event.is_push() {
            self.alert
                .push_str("Push event received, this action will run.\n");
            Ok(true)
        } else {
            self.alert.push_str(&format!(
                "Received {} event, this action only runs on push.\n",
                self.event.event_type
            ));
            Ok(false)
        }
    }

    async fn act(&mut self) -> Result<(), ActionError> {
        let name = self.repo_name()?.to_string();
        let url = Self::clone_url(&self.config.url_prefix, self.organization()?, &name);
        let target = self.config.workdir.join(&name);

        tracing::debug!(repo = %name, workdir = %self.config.workdir.display(), "Checking for existing checkout");

        if tokio::fs::try_exists(&target).await? {
            let msg = format!(
                "Directory {name} already exists, ignoring clone request of repository {url}.\n"
            );
            tracing::warn!("{}", msg.trim_end());
            self.alert.push_str(&msg);
            return Ok(());
        }

        tracing::debug!(url = %url, "Cloning new repository");
        match self.cloner.clone_repo(&url, &self.config.workdir).await {
            Ok(_) => {
                tracing::info!(url = %url, "Git clone succeeded");
                self.alert
                    .push_str(&format!("Cloned repository at {url}\n"));
            }
            Err(e) => {
                let msg = format!("Attempt to clone repository at {url} failed: {e}\n");
                tracing::error!("{}", msg.trim_end());
                self.alert.push_str(&msg);
            }
        }
        Ok(())
    }

    fn info(&self) -> String {
        self.alert.clone()
    }
}

/// Reject names that would escape the working directory.
fn validate_dir_name(name: &str) -> Result<(), ActionError> {
    let invalid = |reason: &str| ActionError::InvalidField {
        field: "repository.name".into(),
        reason: format!("{reason}: {name:?}"),
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name == "." || name == ".." {
        return Err(invalid("relative path component"));
    }
    if name.contains(['/', '\\']) {
        return Err(invalid("contains a path separator"));
    }
    if name.starts_with('-') {
        return Err(invalid("starts with '-'"));
    }
    Ok(())
}

/// Truncate output to fit within limits (UTF-8 safe).
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let mut end = MAX_OUTPUT_SIZE;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [truncated {} bytes]", &s[..end], s.len() - end)
}
