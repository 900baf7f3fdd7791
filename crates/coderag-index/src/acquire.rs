//! Shallow repository clones under a local storage root.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{IndexError, Result};

/// Clones repositories into `<storage_root>/<project_id>`, replacing any
/// previous checkout wholesale so re-ingestion always sees a fresh tree.
#[derive(Debug, Clone)]
pub struct RepoAcquirer {
    storage_root: PathBuf,
}

impl RepoAcquirer {
    #[must_use]
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    /// Shallow-clone `repo_url` for the given project and return the checkout.
    ///
    /// # Errors
    ///
    /// Returns an error if the old checkout cannot be removed or the clone
    /// fails.
    pub async fn fetch(&self, repo_url: &str, project_id: uuid::Uuid) -> Result<Checkout> {
        let target = self.storage_root.join(project_id.to_string());

        if target.exists() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::create_dir_all(&self.storage_root).await?;

        tracing::info!(repo = repo_url, target = %target.display(), "cloning repository");
        let output = Command::new("git")
            .args(["clone", "--depth", "1", "--single-branch", repo_url])
            .arg(&target)
            .output()
            .await
            .map_err(|e| IndexError::Acquisition(format!("failed to spawn git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IndexError::Acquisition(format!(
                "git clone of {repo_url} failed: {}",
                stderr.trim()
            )));
        }

        Ok(Checkout { root: target })
    }
}

/// A cloned working tree.
#[derive(Debug, Clone)]
pub struct Checkout {
    root: PathBuf,
}

impl Checkout {
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All regular files in the checkout as sorted root-relative paths.
    /// Hidden entries (the `.git` directory included) are skipped; ignore
    /// files inside the repo are not honored, every tracked file counts.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|e| e.path().strip_prefix(&self.root).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        std::fs::write(dir.path().join(".git/config"), "[core]").unwrap();

        let files = Checkout::at(dir.path()).files();
        assert_eq!(
            files,
            vec![PathBuf::from("README.md"), PathBuf::from("src/main.rs")]
        );
    }

    #[tokio::test]
    async fn files_ignore_rules_not_honored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "generated.txt\n").unwrap();
        std::fs::write(dir.path().join("generated.txt"), "output").unwrap();

        let files = Checkout::at(dir.path()).files();
        assert!(files.contains(&PathBuf::from("generated.txt")));
    }

    #[tokio::test]
    async fn fetch_invalid_url_reports_acquisition_error() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = RepoAcquirer::new(dir.path());
        let err = acquirer
            .fetch(
                "file:///nonexistent/definitely-not-a-repo",
                uuid::Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Acquisition(_)));
    }

    #[tokio::test]
    async fn fetch_replaces_previous_checkout() {
        let dir = tempfile::tempdir().unwrap();

        // Build a local origin repository to clone from.
        let origin = dir.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("lib.py"), "def f():\n    pass\n").unwrap();
        for args in [
            vec!["init"],
            vec!["add", "."],
            vec![
                "-c",
                "user.email=test@localhost",
                "-c",
                "user.name=test",
                "commit",
                "-m",
                "initial",
            ],
        ] {
            let status = std::process::Command::new("git")
                .args(&args)
                .current_dir(&origin)
                .output()
                .unwrap();
            assert!(status.status.success(), "git {args:?} failed");
        }

        let storage = dir.path().join("storage");
        let acquirer = RepoAcquirer::new(&storage);
        let project = uuid::Uuid::new_v4();
        let url = format!("file://{}", origin.display());

        let checkout = acquirer.fetch(&url, project).await.unwrap();
        assert_eq!(checkout.files(), vec![PathBuf::from("lib.py")]);

        // A stale file in the target must not survive re-acquisition.
        std::fs::write(checkout.root().join("stale.txt"), "old").unwrap();
        let checkout = acquirer.fetch(&url, project).await.unwrap();
        assert_eq!(checkout.files(), vec![PathBuf::from("lib.py")]);
    }
}
