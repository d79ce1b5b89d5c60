//! Cloning the Motoko sample repositories listed in `[repos].urls`.
//!
//! Each repository lands in `target_dir/<name>`. Existing checkouts are left
//! alone, so the command can be re-run to pick up newly added URLs. A failed
//! clone is reported and the run continues.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use crate::config::{Config, ReposConfig};
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloneSummary {
    pub cloned: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Repository name from its URL: last path segment without `.git`.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let segment = url.trim_end_matches('/').rsplit('/').next()?;
    let name = segment.strip_suffix(".git").unwrap_or(segment);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Run the `clone` command and print a summary.
pub fn run_clone(config: &Config, dry_run: bool, progress: &dyn ProgressReporter) -> Result<()> {
    let repos = &config.repos;
    if repos.urls.is_empty() {
        println!("No repositories configured under [repos].urls.");
        return Ok(());
    }

    let summary = if dry_run {
        plan_clone(repos)
    } else {
        clone_all(repos, progress)?
    };

    println!(
        "clone {}{}",
        repos.target_dir.display(),
        if dry_run { " (dry-run)" } else { "" }
    );
    println!("  repositories: {}", repos.urls.len());
    println!(
        "  {}: {}",
        if dry_run { "to clone" } else { "cloned" },
        summary.cloned.len()
    );
    println!("  skipped (present): {}", summary.skipped.len());
    if !summary.failed.is_empty() {
        println!("  failed: {}", summary.failed.len());
        for (url, reason) in &summary.failed {
            println!("    {}: {}", url, reason);
        }
    }
    println!("ok");
    Ok(())
}

/// What a real run would do, without touching the filesystem.
fn plan_clone(repos: &ReposConfig) -> CloneSummary {
    let mut summary = CloneSummary::default();
    for url in &repos.urls {
        match repo_name_from_url(url) {
            Some(name) if repos.target_dir.join(&name).exists() => summary.skipped.push(name),
            Some(name) => summary.cloned.push(name),
            None => summary
                .failed
                .push((url.clone(), "cannot derive repository name".to_string())),
        }
    }
    summary
}

pub fn clone_all(repos: &ReposConfig, progress: &dyn ProgressReporter) -> Result<CloneSummary> {
    std::fs::create_dir_all(&repos.target_dir).with_context(|| {
        format!(
            "Failed to create clone directory: {}",
            repos.target_dir.display()
        )
    })?;

    let mut ignored = match &repos.gitignore {
        Some(path) => read_ignore_entries(path)?,
        None => HashSet::new(),
    };

    let total = repos.urls.len() as u64;
    let mut summary = CloneSummary::default();

    for (i, url) in repos.urls.iter().enumerate() {
        let Some(name) = repo_name_from_url(url) else {
            tracing::warn!(url = %url, "skipping URL without a repository name");
            summary
                .failed
                .push((url.clone(), "cannot derive repository name".to_string()));
            continue;
        };

        if let Some(path) = &repos.gitignore {
            let entry = format!("{}/{}", repos.target_dir.display(), name);
            if ignored.insert(entry.clone()) {
                append_ignore_entry(path, &entry)?;
            }
        }

        let dest = repos.target_dir.join(&name);
        if dest.exists() {
            summary.skipped.push(name);
            continue;
        }

        progress.report(ProgressEvent::Cloning {
            repo: name.clone(),
            n: i as u64 + 1,
            total,
        });

        match git_clone(url, repos.shallow, &dest) {
            Ok(()) => {
                tracing::info!(repo = %name, "cloned");
                summary.cloned.push(name);
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "clone failed");
                summary.failed.push((url.clone(), e.to_string()));
            }
        }
    }

    Ok(summary)
}

fn git_clone(url: &str, shallow: bool, dest: &Path) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

fn read_ignore_entries(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn append_ignore_entry(path: &Path, entry: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", entry)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    #[test]
    fn names_from_urls() {
        assert_eq!(
            repo_name_from_url("https://github.com/dfinity/motoko-base").as_deref(),
            Some("motoko-base")
        );
        assert_eq!(
            repo_name_from_url("https://github.com/aviate-labs/json.mo.git").as_deref(),
            Some("json.mo")
        );
        assert_eq!(
            repo_name_from_url("https://github.com/dfinity/sdk/").as_deref(),
            Some("sdk")
        );
        assert_eq!(repo_name_from_url(""), None);
    }

    fn repos_in(tmp: &TempDir, urls: &[&str]) -> ReposConfig {
        ReposConfig {
            target_dir: tmp.path().join("samples"),
            gitignore: Some(tmp.path().join(".gitignore")),
            shallow: true,
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn existing_checkouts_skipped_and_ignored_once() {
        let tmp = TempDir::new().unwrap();
        let repos = repos_in(&tmp, &["https://example.invalid/org/present"]);
        std::fs::create_dir_all(repos.target_dir.join("present")).unwrap();

        let summary = clone_all(&repos, &NoProgress).unwrap();
        assert_eq!(summary.skipped, vec!["present".to_string()]);
        assert!(summary.cloned.is_empty());

        clone_all(&repos, &NoProgress).unwrap();
        let ignore = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        let expected = format!("{}/present", repos.target_dir.display());
        assert_eq!(ignore.lines().filter(|l| *l == expected).count(), 1);
    }

    #[test]
    fn plan_does_not_touch_disk() {
        let tmp = TempDir::new().unwrap();
        let repos = repos_in(&tmp, &["https://example.invalid/org/new-repo.git"]);
        let summary = plan_clone(&repos);
        assert_eq!(summary.cloned, vec!["new-repo".to_string()]);
        assert!(!repos.target_dir.exists());
        assert!(!tmp.path().join(".gitignore").exists());
    }
}
