//! Repository state queries
//!
//! All interpretation of git's text output lives here so it can be tested
//! without running git. Orchestration code asks questions through
//! [`RepoQuery`] and never inspects command output itself.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::git::{GitExecutor, GitOutput};

/// Read-only questions about a working tree
pub struct RepoQuery<'a> {
    executor: &'a dyn GitExecutor,
    repo: &'a Path,
}

impl<'a> RepoQuery<'a> {
    pub fn new(executor: &'a dyn GitExecutor, repo: &'a Path) -> Self {
        Self { executor, repo }
    }

    async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        self.executor
            .run(self.repo, args.iter().map(|a| a.to_string()).collect())
            .await
    }

    pub fn is_repository(&self) -> bool {
        self.repo.join(".git").exists()
    }

    /// Branch HEAD points at, `None` when detached
    pub async fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run(&["branch", "--show-current"]).await?;
        if !output.success {
            return Ok(None);
        }
        let branch = output.stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    pub async fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let output = self.run(&["branch", "--list", branch]).await?;
        Ok(output.success && parse_branch_list(&output.stdout).iter().any(|b| b == branch))
    }

    pub async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let output = self.run(&["branch", "-r"]).await?;
        Ok(output.success && remote_branch_listed(&output.stdout, remote, branch))
    }

    pub async fn has_uncommitted_changes(&self) -> Result<bool> {
        let output = self.run(&["status", "--porcelain"]).await?;
        Ok(output.success && porcelain_has_changes(&output.stdout))
    }

    pub async fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        let output = self.run(&["remote", "get-url", remote]).await?;
        if !output.success {
            return Ok(None);
        }
        Ok(Some(output.stdout.trim().to_string()))
    }

    fn git_dir(&self) -> PathBuf {
        self.repo.join(".git")
    }

    pub fn rebase_in_progress(&self) -> bool {
        let git_dir = self.git_dir();
        git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists()
    }

    pub fn merge_in_progress(&self) -> bool {
        self.git_dir().join("MERGE_HEAD").exists()
    }
}

/// Branch names from `git branch` or `git branch -r` output.
///
/// Drops the current-branch and worktree markers and resolves
/// `origin/HEAD -> origin/main` lines to their left-hand name.
pub fn parse_branch_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("* ")
                .or_else(|| line.strip_prefix("+ "))
                .unwrap_or(line);
            line.split(" -> ").next().unwrap_or(line).trim().to_string()
        })
        .filter(|name| !name.is_empty() && !name.starts_with('('))
        .collect()
}

pub fn remote_branch_listed(output: &str, remote: &str, branch: &str) -> bool {
    let wanted = format!("{}/{}", remote, branch);
    parse_branch_list(output).iter().any(|b| *b == wanted)
}

pub fn porcelain_has_changes(output: &str) -> bool {
    output.lines().any(|line| !line.trim().is_empty())
}

/// Whether a failed pull stopped on a content conflict
pub fn output_mentions_conflict(output: &GitOutput) -> bool {
    [&output.stdout, &output.stderr].iter().any(|text| {
        text.contains("CONFLICT") || text.contains("could not apply") || text.contains("Merge conflict")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stdout: &str, stderr: &str) -> GitOutput {
        GitOutput {
            success: false,
            code: Some(1),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_parse_local_branch_list() {
        let output = "  develop\n* main\n+ worktree-branch\n";
        assert_eq!(parse_branch_list(output), vec!["develop", "main", "worktree-branch"]);
    }

    #[test]
    fn test_parse_detached_head_is_skipped() {
        let output = "* (HEAD detached at 1a2b3c4)\n  main\n";
        assert_eq!(parse_branch_list(output), vec!["main"]);
    }

    #[test]
    fn test_remote_branch_exact_match() {
        let output = "  origin/HEAD -> origin/main\n  origin/main-old\n  origin/feature\n";

        assert!(remote_branch_listed(output, "origin", "HEAD"));
        assert!(remote_branch_listed(output, "origin", "feature"));
        assert!(remote_branch_listed(output, "origin", "main-old"));
        // A substring check would wrongly accept these
        assert!(!remote_branch_listed(output, "origin", "main"));
        assert!(!remote_branch_listed(output, "origin", "feat"));
        assert!(!remote_branch_listed(output, "upstream", "feature"));
    }

    #[test]
    fn test_remote_branch_empty_output() {
        assert!(!remote_branch_listed("", "origin", "main"));
    }

    #[test]
    fn test_porcelain_has_changes() {
        assert!(!porcelain_has_changes(""));
        assert!(!porcelain_has_changes("\n\n"));
        assert!(porcelain_has_changes(" M backups/git/.gitconfig\n"));
        assert!(porcelain_has_changes("?? new-file\n"));
    }

    #[test]
    fn test_conflict_detection() {
        assert!(output_mentions_conflict(&failed(
            "CONFLICT (content): Merge conflict in README.md\n",
            ""
        )));
        assert!(output_mentions_conflict(&failed("", "error: could not apply 1a2b3c4... change\n")));
        assert!(!output_mentions_conflict(&failed(
            "",
            "fatal: couldn't find remote ref main\n"
        )));
    }
}
