//! Git queries run on the exec lane and Git actions run in the shell

use super::{CommandLine, CommandRunner};
use crate::error::AppResult;
use crate::shell::sentinel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branches {
    pub names: Vec<String>,
    pub current: Option<String>,
}

/// Parse `git branch` output; the `*` line is the checked-out branch
pub fn parse_branches(output: &str) -> Branches {
    let mut branches = Branches::default();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.strip_prefix('*') {
            Some(current) => {
                let name = current.trim().to_string();
                branches.current = Some(name.clone());
                branches.names.push(name);
            }
            None => branches.names.push(line.to_string()),
        }
    }
    branches
}

/// Parse `git branch -r` output, dropping the `origin/HEAD -> ...` alias
pub fn parse_remote_branches(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.contains("/HEAD "))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `origin/feature/x` -> (`origin`, `feature/x`)
pub fn split_remote_branch(remote_branch: &str) -> (&str, Option<&str>) {
    match remote_branch.split_once('/') {
        Some((remote, branch)) => (remote, Some(branch)),
        None => (remote_branch, None),
    }
}

fn git(repo: &str) -> CommandLine {
    CommandLine::new("git").raw("-C").path(repo)
}

/// Interactive Git operations, run in the shell so prompts and progress
/// reach the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "lowercase")]
pub enum GitAction {
    Fetch,
    Pull(String),
    Push(String),
    Commit,
    Log(String),
}

impl GitAction {
    pub fn command(&self, repo: &str) -> CommandLine {
        match self {
            GitAction::Fetch => git(repo).arg("fetch"),
            GitAction::Pull(remote_branch) => with_remote(git(repo).arg("pull"), remote_branch),
            GitAction::Push(remote_branch) => with_remote(git(repo).arg("push"), remote_branch),
            GitAction::Commit => CommandLine::new("read").raw("-ep \"Commit message: \" msg")
                .then(git(repo).arg("add").arg("."))
                .then(git(repo).arg("commit").arg("-m").raw("\"$msg\"")),
            GitAction::Log(branch) => git(repo).raw("--no-pager log --graph").arg(branch),
        }
    }

    /// The command wrapped so the shell driver closes when it finishes
    pub fn one_shot(&self, repo: &str) -> String {
        sentinel::one_shot(self.command(repo).as_str())
    }
}

fn with_remote(cmd: CommandLine, remote_branch: &str) -> CommandLine {
    match split_remote_branch(remote_branch) {
        (remote, Some(branch)) => cmd.arg(remote).arg(branch),
        (remote, None) => cmd.arg(remote),
    }
}

/// A repository on the remote host
pub struct GitRepo {
    runner: CommandRunner,
    path: String,
}

impl GitRepo {
    pub fn new(runner: CommandRunner, path: impl Into<String>) -> Self {
        Self {
            runner,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn branches(&self) -> AppResult<Branches> {
        let output = self.runner.run(&git(&self.path).arg("branch"))?;
        Ok(parse_branches(&output))
    }

    /// Prune stale remote refs, then list remote branches
    pub fn remote_branches(&self) -> AppResult<Vec<String>> {
        if let Err(e) = self.runner.run(&git(&self.path).raw("remote update --prune")) {
            tracing::warn!("git remote update failed in {}: {}", self.path, e);
        }
        let output = self.runner.run(&git(&self.path).raw("branch -r"))?;
        Ok(parse_remote_branches(&output))
    }

    pub fn log(&self, branch: &str) -> AppResult<String> {
        self.runner.run(&GitAction::Log(branch.to_string()).command(&self.path))
    }

    pub fn diff(&self) -> AppResult<String> {
        self.runner.run(&git(&self.path).raw("--no-pager diff"))
    }
}
