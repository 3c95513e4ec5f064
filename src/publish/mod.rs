//! Subscription repository publisher.
//!
//! Owns a local working copy and pushes one file per update. Recovery
//! ladder when the working copy drifts: `pull --rebase`, then
//! `fetch` + `reset --hard`, then a fresh clone. Commits only when the
//! porcelain status reports changes. Failures are logged and swallowed:
//! publishing is a side effect of a successful refresh, never a reason
//! to fail one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Settings;

pub struct Publisher {
    repo_url: String,
    user_name: String,
    user_email: String,
    branch: String,
    repo_dir: PathBuf,
}

impl Publisher {
    /// Built only when publishing is enabled and fully configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let p = &settings.publish;
        if !p.enabled || p.token.is_empty() || p.repo_url.is_empty() {
            return None;
        }

        // Embed the token for authentication unless the URL already carries
        // credentials.
        let repo_url = if p.repo_url.contains('@') {
            p.repo_url.clone()
        } else {
            p.repo_url
                .replacen("https://", &format!("https://{}@", p.token), 1)
        };

        Some(Self {
            repo_url,
            user_name: p.user.clone(),
            user_email: p.email.clone(),
            branch: p.branch.clone(),
            repo_dir: PathBuf::from(&p.repo_dir),
        })
    }

    /// Write `content` into `filename` inside the working copy, commit and
    /// push. Never returns an error; the outcome is logged.
    pub async fn update_file_and_push(&self, filename: &str, content: &str) {
        if let Err(e) = self.try_update(filename, content).await {
            warn!(filename, error = %e, "repository push failed");
        }
    }

    async fn try_update(&self, filename: &str, content: &str) -> Result<()> {
        self.setup_repo().await?;

        tokio::fs::write(self.repo_dir.join(filename), content)
            .await
            .with_context(|| format!("failed to write {}", filename))?;

        let status = self.git(&["status", "--porcelain"], Some(self.repo_dir.as_path())).await?;
        if status.trim().is_empty() {
            debug!(filename, "no changes to push");
            return Ok(());
        }

        info!(filename, "committing and pushing");
        self.git(&["add", filename], Some(self.repo_dir.as_path())).await?;
        let message = format!("Auto-update {}", filename);
        self.git(&["commit", "-m", &message], Some(self.repo_dir.as_path())).await?;
        self.git(&["push", "origin", &self.branch], Some(self.repo_dir.as_path())).await?;
        info!(filename, "push complete");
        Ok(())
    }

    /// Clone the working copy if absent, otherwise bring it up to date.
    async fn setup_repo(&self) -> Result<()> {
        if !self.repo_dir.exists() {
            return self.clone_fresh().await;
        }

        if !self.repo_dir.join(".git").exists() {
            warn!(dir = %self.repo_dir.display(), "working copy is not a git repository, recloning");
            tokio::fs::remove_dir_all(&self.repo_dir)
                .await
                .context("failed to remove stale working copy")?;
            return self.clone_fresh().await;
        }

        if self
            .git(&["pull", "--rebase", "origin", &self.branch], Some(self.repo_dir.as_path()))
            .await
            .is_ok()
        {
            return Ok(());
        }

        warn!("git pull failed, resetting to remote state");
        self.git(&["fetch", "origin", &self.branch], Some(self.repo_dir.as_path())).await?;
        let target = format!("origin/{}", self.branch);
        self.git(&["reset", "--hard", &target], Some(self.repo_dir.as_path())).await?;
        Ok(())
    }

    async fn clone_fresh(&self) -> Result<()> {
        if let Some(parent) = self.repo_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create working copy parent directory")?;
        }

        info!(dir = %self.repo_dir.display(), "cloning subscription repository");
        let dir = self.repo_dir.to_string_lossy().to_string();
        self.git(
            &["clone", "-b", &self.branch, "--single-branch", &self.repo_url, &dir],
            None,
        )
        .await?;
        self.git(&["config", "user.name", &self.user_name], Some(self.repo_dir.as_path())).await?;
        self.git(&["config", "user.email", &self.user_email], Some(self.repo_dir.as_path())).await?;
        Ok(())
    }

    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to run git {}", args.first().unwrap_or(&"")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Per-site publish target: hostname with dots replaced by underscores.
pub fn site_filename(site_url: &str) -> String {
    let hostname = site_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default()
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split('@')
        .next_back()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default();

    if hostname.is_empty() {
        "unknown_site.txt".to_string()
    } else {
        format!("{}.txt", hostname.replace('.', "_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_filename_replaces_dots() {
        assert_eq!(site_filename("https://www.google.com"), "www_google_com.txt");
        assert_eq!(
            site_filename("https://chat.openai.com/backend/api?x=1"),
            "chat_openai_com.txt"
        );
        assert_eq!(site_filename("http://example.com:8443/path"), "example_com.txt");
        assert_eq!(site_filename("not a url"), "unknown_site.txt");
    }

    #[test]
    fn publisher_requires_full_configuration() {
        let mut settings = Settings::default();
        assert!(Publisher::from_settings(&settings).is_none());

        settings.publish.enabled = true;
        assert!(Publisher::from_settings(&settings).is_none());

        settings.publish.token = "tok".to_string();
        settings.publish.repo_url = "https://github.com/example/subs.git".to_string();
        let publisher = Publisher::from_settings(&settings).unwrap();
        assert_eq!(publisher.repo_url, "https://tok@github.com/example/subs.git");
    }
}
