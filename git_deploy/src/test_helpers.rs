//! Centralized test helpers for git-deploy.
//!
//! Common utilities for hermetic git environment setup and throwaway
//! repository initialization, shared by unit tests and integration tests.

use std::env;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::{tempdir, TempDir};

/// Sets up a hermetic git environment so tests don't pick up the operator's
/// real global/system git config or identity.
pub fn hermetic_git_env() {
    env::set_var("GIT_CONFIG_NOSYSTEM", "true");
    env::set_var("GIT_CONFIG_GLOBAL", "/dev/null");
    env::set_var("GIT_AUTHOR_NAME", "testuser");
    env::set_var("GIT_AUTHOR_EMAIL", "testuser@example.com");
    env::set_var("GIT_COMMITTER_NAME", "testuser");
    env::set_var("GIT_COMMITTER_EMAIL", "testuser@example.com");
}

/// Hermetic git environment variables as `(key, value)` pairs, for passing
/// to `Command::envs()` when spawning a subprocess directly.
pub fn hermetic_git_env_vars() -> [(&'static str, &'static str); 6] {
    [
        ("GIT_CONFIG_NOSYSTEM", "true"),
        ("GIT_CONFIG_GLOBAL", "/dev/null"),
        ("GIT_AUTHOR_NAME", "testuser"),
        ("GIT_AUTHOR_EMAIL", "testuser@example.com"),
        ("GIT_COMMITTER_NAME", "testuser"),
        ("GIT_COMMITTER_EMAIL", "testuser@example.com"),
    ]
}

/// Runs a git command in `dir` under the hermetic environment.
///
/// # Panics
/// Panics if the command fails to spawn or returns a non-zero exit status.
pub fn run_git_command(args: &[&str], dir: &Path) {
    assert!(Command::new("git")
        .args(args)
        .envs(hermetic_git_env_vars())
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("failed to spawn git command")
        .success());
}

/// Initializes a repository with `master` as the initial branch and one
/// empty commit.
pub fn init_repo(dir: &Path) {
    run_git_command(&["init", "--initial-branch", "master"], dir);
    run_git_command(&["commit", "--allow-empty", "-m", "Initial commit"], dir);
}

/// A temporary directory containing a freshly initialized repository.
pub fn dir_with_repo() -> TempDir {
    let tempdir = tempdir().unwrap();
    init_repo(tempdir.path());
    tempdir
}

/// RAII guard that restores the process's current directory on drop, so a
/// test that calls `set_current_dir` can't leak that change to later tests.
pub struct DirGuard {
    original_dir: std::path::PathBuf,
}

impl DirGuard {
    pub fn new(new_dir: &Path) -> Self {
        let original_dir = env::current_dir().expect("failed to get current directory");
        env::set_current_dir(new_dir).expect("failed to change directory");
        DirGuard { original_dir }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.original_dir);
    }
}

/// Runs `f` with the current directory set to a fresh hermetic repository,
/// restoring the original directory afterward.
pub fn with_isolated_cwd_git<F, R>(f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    hermetic_git_env();
    let temp_dir = dir_with_repo();
    let _guard = DirGuard::new(temp_dir.path());
    f(temp_dir.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::set_current_dir;

    #[test]
    fn test_hermetic_git_env() {
        hermetic_git_env();
        assert_eq!(env::var("GIT_CONFIG_NOSYSTEM").unwrap(), "true");
        assert_eq!(env::var("GIT_CONFIG_GLOBAL").unwrap(), "/dev/null");
        assert_eq!(env::var("GIT_AUTHOR_NAME").unwrap(), "testuser");
    }

    #[test]
    fn test_dir_with_repo() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).expect("failed to change dir");

        let output = Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .expect("failed to run git command");

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
    }

    #[test]
    fn test_init_repo_has_one_commit() {
        let tempdir = tempdir().unwrap();
        init_repo(tempdir.path());
        set_current_dir(tempdir.path()).expect("failed to change dir");

        let output = Command::new("git")
            .args(["rev-list", "--count", "HEAD"])
            .output()
            .expect("failed to run git command");

        assert!(output.status.success());
        let count: i32 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap();
        assert_eq!(count, 1);
    }
}
