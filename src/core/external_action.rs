//! External processes the ledger depends on: version control for commits
//! and the directory-service query for the roster.
//!
//! Both sit behind small traits so the core can be driven without git or
//! a directory server (tests, offline kiosks).

use crate::core::error::LedgerError;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCapability {
    VcsWrite,
    DirectoryQuery,
}

impl ExternalCapability {
    fn as_str(self) -> &'static str {
        match self {
            ExternalCapability::VcsWrite => "vcs_write",
            ExternalCapability::DirectoryQuery => "directory_query",
        }
    }
}

/// Run an external command and fail on a non-zero exit status.
pub fn execute(
    capability: ExternalCapability,
    command: &str,
    args: &[String],
    cwd: &Path,
) -> Result<Output, LedgerError> {
    let started = Instant::now();
    let output = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| LedgerError::ExternalCommandFailure {
            command: command.to_string(),
            detail: e.to_string(),
        })?;

    tracing::debug!(
        capability = capability.as_str(),
        command,
        ?args,
        exit_code = output.status.code(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "external command finished"
    );

    if !output.status.success() {
        return Err(LedgerError::ExternalCommandFailure {
            command: format!("{} {}", command, args.join(" ")),
            detail: format!(
                "exit status {}: {}",
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output)
}

/// Commits files into version-control history.
pub trait Vcs: Send + Sync {
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), LedgerError>;
}

/// `git add` + `git commit` in the store's work tree.
#[derive(Debug, Clone)]
pub struct GitVcs {
    pub git: String,
    pub workdir: PathBuf,
}

impl GitVcs {
    pub fn new(git: &str, workdir: &Path) -> Self {
        Self {
            git: git.to_string(),
            workdir: workdir.to_path_buf(),
        }
    }

    fn relative(&self, paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| {
                p.strip_prefix(&self.workdir)
                    .unwrap_or(p)
                    .to_string_lossy()
                    .to_string()
            })
            .collect()
    }
}

impl Vcs for GitVcs {
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), LedgerError> {
        let rel = self.relative(paths);

        let mut add_args = vec!["add".to_string(), "--all".to_string(), "--".to_string()];
        add_args.extend(rel.iter().cloned());
        execute(ExternalCapability::VcsWrite, &self.git, &add_args, &self.workdir)?;

        let mut commit_args = vec!["commit".to_string(), "-m".to_string(), message.to_string()];
        commit_args.push("--".to_string());
        commit_args.extend(rel);
        execute(
            ExternalCapability::VcsWrite,
            &self.git,
            &commit_args,
            &self.workdir,
        )?;
        Ok(())
    }
}

/// Keeps changes on disk only; for stores without history.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnlyVcs;

impl Vcs for LocalOnlyVcs {
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), LedgerError> {
        tracing::debug!(?paths, message, "commits disabled, keeping changes local");
        Ok(())
    }
}

/// Produces the raw directory dump text.
pub trait DirectorySource: Send + Sync {
    fn dump(&self) -> Result<String, LedgerError>;
}

/// Runs the configured directory query, e.g. `ldapsearch -x -h <host>`.
#[derive(Debug, Clone)]
pub struct CommandDirectorySource {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
}

impl DirectorySource for CommandDirectorySource {
    fn dump(&self) -> Result<String, LedgerError> {
        let (command, args) = self.argv.split_first().ok_or_else(|| {
            LedgerError::ConfigError("directory.command is empty".to_string())
        })?;
        let output = execute(ExternalCapability::DirectoryQuery, command, args, &self.cwd)?;
        String::from_utf8(output.stdout).map_err(|e| LedgerError::ExternalCommandFailure {
            command: command.clone(),
            detail: format!("output is not UTF-8: {}", e),
        })
    }
}

/// Fixed dump text; used when no directory service is reachable.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectorySource {
    pub text: String,
}

impl DirectorySource for StaticDirectorySource {
    fn dump(&self) -> Result<String, LedgerError> {
        Ok(self.text.clone())
    }
}
