//! Versioning metadata of the evaluated program.
//!
//! The consumer compares the metadata recorded when the experiment was
//! created against what the program's repository looks like right before
//! a trial runs. Any difference is a branching event.

use core::fmt;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Snapshot of the version-control state of a program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsMetadata {
    /// Version-control system, e.g. `git`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the working tree has uncommitted changes.
    pub is_dirty: bool,
    /// Commit checked out.
    #[serde(rename = "HEAD_sha")]
    pub head_sha: String,
    /// Branch checked out, `None` when detached.
    pub active_branch: Option<String>,
    /// Hash of the uncommitted diff.
    pub diff_sha: String,
}

/// One field that differs between two metadata snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VcsChange {
    /// Field name.
    pub field: &'static str,
    /// Value recorded with the experiment.
    pub old: String,
    /// Value found now.
    pub new: String,
}

impl fmt::Display for VcsChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}' -> '{}'", self.field, self.old, self.new)
    }
}

impl VcsMetadata {
    /// Lists every field of `current` that differs from `self`.
    #[must_use]
    pub fn diff(&self, current: &Self) -> Vec<VcsChange> {
        let branch = |b: &Option<String>| b.clone().unwrap_or_else(|| "<detached>".into());
        let fields = [
            ("type", self.kind.clone(), current.kind.clone()),
            (
                "is_dirty",
                self.is_dirty.to_string(),
                current.is_dirty.to_string(),
            ),
            ("head_sha", self.head_sha.clone(), current.head_sha.clone()),
            (
                "active_branch",
                branch(&self.active_branch),
                branch(&current.active_branch),
            ),
            ("diff_sha", self.diff_sha.clone(), current.diff_sha.clone()),
        ];
        fields
            .into_iter()
            .filter(|(_, old, new)| old != new)
            .map(|(field, old, new)| VcsChange { field, old, new })
            .collect()
    }
}

/// Provider of versioning metadata for a program.
pub trait VersionControl: Send + Sync {
    /// Infers the metadata of the repository containing `user_script`.
    /// Returns `None` when the script is not under version control.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Vcs`] if the repository exists but cannot be queried.
    fn infer(&self, user_script: &Path) -> Result<Option<VcsMetadata>>;
}

/// Reads metadata with the `git` command-line tool.
#[derive(Clone, Copy, Debug, Default)]
pub struct GitVersionControl;

impl GitVersionControl {
    fn git(dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .map_err(|e| Error::Vcs(format!("cannot run git: {e}")))?;
        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for GitVersionControl {
    fn infer(&self, user_script: &Path) -> Result<Option<VcsMetadata>> {
        let dir = match user_script.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !dir.is_dir() || Self::git(dir, &["rev-parse", "--show-toplevel"]).is_err() {
            return Ok(None);
        }

        let head_sha = Self::git(dir, &["rev-parse", "HEAD"])?.trim().to_owned();
        let branch = Self::git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_owned();
        let is_dirty = !Self::git(dir, &["status", "--porcelain"])?.trim().is_empty();
        let diff = Self::git(dir, &["diff"])?;

        Ok(Some(VcsMetadata {
            kind: "git".into(),
            is_dirty,
            head_sha,
            active_branch: (branch != "HEAD").then_some(branch),
            diff_sha: format!("{:064x}", Sha256::digest(diff.as_bytes())),
        }))
    }
}
