//! Rollout Session (C5): the on-disk cross-invocation state machine living
//! at `<gitdir>/deploy/`. See SPEC_FULL.md §4.5.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use fs2::FileExt;

use crate::git::git_interop;
use crate::inventory::RefInventory;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a sysadmin has blocked rollouts:\n{0}")]
    SysadminBlocked(String),

    #[error("one is already in progress:\n{0}")]
    SessionExists(String),

    #[error("could not acquire the rollout lock: another process is writing to it right now")]
    LockContended,

    #[error("you are not the owner of this rollout (owned by '{owner}'); use --force to override")]
    NotOwner { owner: String },

    #[error("havent started yet")]
    HaventStartedYet,

    #[error("this rollout is already synced:\n{0}")]
    AlreadySynced(String),

    #[error("this rollout has not been synced yet:\n{0}")]
    NotSyncedYet(String),

    #[error("it looks like someone is just finishing a rollout:\n{0}")]
    FinishInProgress(String),

    #[error("the rollout session is in an unexpected state:\n{0}")]
    BadState(String),

    #[error("'finnish' is not a command; did you mean 'finish'?")]
    FinnishTypo,

    #[error("failed to clean up the rollout session: {0}")]
    CleanupFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Decoded from the line count and first-field prefix of `lock`, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Started,
    Synced,
    Finishing,
}

/// One appended line of the session log: `<action>:\t<ts>\t<branch>\t<head>\t<uid>\t<user>`.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub action: String,
    pub timestamp: String,
    pub branch: String,
    pub head: String,
    pub uid: u32,
    pub username: String,
}

impl LogLine {
    fn format(&self) -> String {
        format!(
            "{}:\t{}\t{}\t{}\t{}\t{}",
            self.action, self.timestamp, self.branch, self.head, self.uid, self.username
        )
    }

    fn parse(line: &str) -> Option<LogLine> {
        let (action_colon, rest) = line.split_once('\t')?;
        let action = action_colon.strip_suffix(':')?.to_string();
        let mut fields = rest.split('\t');
        let timestamp = fields.next()?.to_string();
        let branch = fields.next()?.to_string();
        let head = fields.next()?.to_string();
        let uid = fields.next()?.parse().ok()?;
        let username = fields.next()?.to_string();
        Some(LogLine {
            action,
            timestamp,
            branch,
            head,
            uid,
            username,
        })
    }
}

pub fn deploy_dir(gitdir: &Path) -> PathBuf {
    gitdir.join("deploy")
}

fn lock_path(gitdir: &Path) -> PathBuf {
    deploy_dir(gitdir).join("lock")
}

fn rollout_sidecar_path(gitdir: &Path, kind: TagInfoKind) -> PathBuf {
    deploy_dir(gitdir).join(kind.filename())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagInfoKind {
    Rollout,
    Rollback,
}

impl TagInfoKind {
    fn filename(self) -> &'static str {
        match self {
            TagInfoKind::Rollout => "rollout",
            TagInfoKind::Rollback => "rollback",
        }
    }
}

fn current_username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

/// Builds the status line an action appends, stamped with the current time,
/// branch, HEAD, and user.
fn build_log_line(action: &str) -> Result<LogLine, SessionError> {
    let branch = git_interop::current_branch().unwrap_or_else(|| "(no branch)".to_string());
    let head = git_interop::get_head_revision()?;
    Ok(LogLine {
        action: action.to_string(),
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        branch,
        head,
        uid: current_uid(),
        username: current_username(),
    })
}

fn read_lines(gitdir: &Path) -> Result<Vec<LogLine>, SessionError> {
    let path = lock_path(gitdir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut contents = String::new();
    File::open(&path)?.read_to_string(&mut contents)?;
    Ok(contents.lines().filter_map(LogLine::parse).collect())
}

fn raw_log_text(gitdir: &Path) -> String {
    let path = lock_path(gitdir);
    fs::read_to_string(path).unwrap_or_default()
}

/// Classify the current on-disk state from the log's line count and the
/// action prefix of the second line, per §3.
pub fn session_state(gitdir: &Path) -> Result<SessionState, SessionError> {
    let lines = read_lines(gitdir)?;
    Ok(match lines.len() {
        0 => SessionState::Absent,
        1 => SessionState::Started,
        2 => SessionState::Synced,
        3 => SessionState::Finishing,
        _ => SessionState::Finishing,
    })
}

pub fn log_lines(gitdir: &Path) -> Result<Vec<LogLine>, SessionError> {
    read_lines(gitdir)
}

/// Start algorithm (§4.5): block-file check, `mkdir` + `O_EXCL` lock
/// creation, advisory flock, caller precondition, append.
pub fn start(
    gitdir: &Path,
    block_file: Option<&Path>,
    other_checks: impl FnOnce() -> Result<(), SessionError>,
) -> Result<(), SessionError> {
    if let Some(block_file) = block_file {
        if block_file.exists() {
            let text = fs::read_to_string(block_file).unwrap_or_default();
            return Err(SessionError::SysadminBlocked(text));
        }
    }

    let dir = deploy_dir(gitdir);
    match fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let lock = lock_path(gitdir);
            if lock.exists() {
                let text = fs::read_to_string(&lock).unwrap_or_default();
                if !text.trim().is_empty() {
                    return Err(SessionError::SessionExists(text));
                }
            }
        }
        Err(e) => return Err(SessionError::Io(e)),
    }

    let lock = lock_path(gitdir);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock)
        .map_err(|_| {
            SessionError::SessionExists(fs::read_to_string(&lock).unwrap_or_default())
        })?;

    file.try_lock_exclusive()
        .map_err(|_| SessionError::LockContended)?;

    other_checks()?;

    let line = build_log_line("start")?;
    writeln!(file, "{}", line.format())?;
    FileExt::unlock(&file)?;
    Ok(())
}

/// Validates ownership and action-specific preconditions, then appends
/// `action`'s line to an existing session. Used by `sync`/`release`/
/// `manual-sync`/`finish`/`abort`/`rollback`.
pub fn transition(
    gitdir: &Path,
    action: &str,
    force: bool,
) -> Result<(), SessionError> {
    if action == "finnish" {
        return Err(SessionError::FinnishTypo);
    }

    let lock = lock_path(gitdir);
    if !lock.exists() {
        return Err(SessionError::HaventStartedYet);
    }

    let mut file = OpenOptions::new().read(true).write(true).open(&lock)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let lines: Vec<LogLine> = contents.lines().filter_map(LogLine::parse).collect();

    if lines.is_empty() || lines[0].action != "start" {
        return Err(SessionError::HaventStartedYet);
    }

    if !force && lines[0].username != current_username() {
        return Err(SessionError::NotOwner {
            owner: lines[0].username.clone(),
        });
    }

    if !force {
        validate_precondition(action, &lines, &contents)?;
    }

    file.try_lock_exclusive()
        .map_err(|_| SessionError::LockContended)?;

    let line = build_log_line(action)?;
    writeln!(file, "{}", line.format())?;
    FileExt::unlock(&file)?;
    Ok(())
}

fn validate_precondition(
    action: &str,
    lines: &[LogLine],
    raw: &str,
) -> Result<(), SessionError> {
    match action {
        "sync" | "release" | "manual-sync" => {
            if lines.len() != 1 {
                return Err(SessionError::AlreadySynced(raw.to_string()));
            }
        }
        "finish" | "rollback" => {
            if lines.len() == 3 {
                return Err(SessionError::FinishInProgress(raw.to_string()));
            }
            if lines.len() != 2 {
                return Err(SessionError::NotSyncedYet(raw.to_string()));
            }
            let second = &lines[1].action;
            if !matches!(second.as_str(), "sync" | "release" | "manual-sync") {
                return Err(SessionError::BadState(raw.to_string()));
            }
        }
        "abort" => {
            if lines.len() != 1 {
                return Err(SessionError::BadState(raw.to_string()));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Writes `<sha1> <tag>` to the `rollout`/`rollback` sidecar file.
pub fn store_tag_info(gitdir: &Path, kind: TagInfoKind, sha1: &str, tag: &str) -> Result<(), SessionError> {
    let path = rollout_sidecar_path(gitdir, kind);
    fs::write(&path, format!("{sha1} {tag}\n"))?;
    Ok(())
}

/// Reads the sidecar and re-validates that `sha1` still resolves `tag`'s
/// current commit; a mismatch (tag moved, or file missing) returns `None`.
pub fn fetch_tag_info(
    gitdir: &Path,
    kind: TagInfoKind,
    inventory: &mut RefInventory,
) -> Result<Option<String>, SessionError> {
    let path = rollout_sidecar_path(gitdir, kind);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    let mut parts = contents.trim().splitn(2, ' ');
    let sha1 = match parts.next() {
        Some(s) => s,
        None => return Ok(None),
    };
    let tag = match parts.next() {
        Some(t) => t,
        None => return Ok(None),
    };
    match inventory.name_to_commit(tag) {
        Ok(commit) if commit == sha1 => Ok(Some(tag.to_string())),
        _ => Ok(None),
    }
}

/// Deletes `rollout`, `rollback` (if present), `lock`, optional `lock~`,
/// then removes the now-empty `deploy/` directory.
pub fn unlink_rollout_status(gitdir: &Path) -> Result<(), SessionError> {
    let dir = deploy_dir(gitdir);
    for name in ["rollout", "rollback", "lock", "lock~"] {
        let path = dir.join(name);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| SessionError::CleanupFailed(format!("{}: {e}", path.display())))?;
        }
    }
    if dir.exists() {
        fs::remove_dir(&dir)
            .map_err(|e| SessionError::CleanupFailed(format!("{}: {e}", dir.display())))?;
    }
    Ok(())
}

pub fn session_log_text(gitdir: &Path) -> String {
    raw_log_text(gitdir)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{dir_with_repo, run_git_command};
    use serial_test::serial;
    use std::env::set_current_dir;

    fn gitdir(repo_path: &Path) -> PathBuf {
        repo_path.join(".git")
    }

    #[test]
    #[serial]
    fn test_start_creates_single_line_log() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        start(&gd, None, || Ok(())).unwrap();
        let lines = log_lines(&gd).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].action, "start");
        assert_eq!(lines[0].branch, "master");
        assert_eq!(lines[0].head.len(), 40);
    }

    #[test]
    #[serial]
    fn test_concurrent_start_fails() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        start(&gd, None, || Ok(())).unwrap();
        let err = start(&gd, None, || Ok(())).unwrap_err();
        assert!(err.to_string().contains("one is already in progress"));
    }

    #[test]
    #[serial]
    fn test_abort_clears_state() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        start(&gd, None, || Ok(())).unwrap();
        transition(&gd, "abort", false).unwrap();
        unlink_rollout_status(&gd).unwrap();
        assert_eq!(session_state(&gd).unwrap(), SessionState::Absent);
        assert!(!deploy_dir(&gd).exists());
    }

    #[test]
    #[serial]
    fn test_sync_without_start_fails() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        let err = transition(&gd, "sync", false).unwrap_err();
        assert!(matches!(err, SessionError::HaventStartedYet));
    }

    #[test]
    #[serial]
    fn test_finish_before_sync_fails() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        start(&gd, None, || Ok(())).unwrap();
        let err = transition(&gd, "finish", false).unwrap_err();
        assert!(matches!(err, SessionError::NotSyncedYet(_)));
    }

    #[test]
    #[serial]
    fn test_full_happy_path() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        start(&gd, None, || Ok(())).unwrap();
        transition(&gd, "sync", false).unwrap();
        assert_eq!(session_state(&gd).unwrap(), SessionState::Synced);
        transition(&gd, "finish", false).unwrap();
        unlink_rollout_status(&gd).unwrap();
        assert_eq!(session_state(&gd).unwrap(), SessionState::Absent);
    }

    #[test]
    #[serial]
    fn test_finnish_typo_guard() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        start(&gd, None, || Ok(())).unwrap();
        let err = transition(&gd, "finnish", false).unwrap_err();
        assert!(matches!(err, SessionError::FinnishTypo));
    }

    #[test]
    #[serial]
    fn test_block_file_blocks_start() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        let block = repo.path().join("blocked.txt");
        fs::write(&block, "maintenance window").unwrap();
        let err = start(&gd, Some(&block), || Ok(())).unwrap_err();
        assert!(matches!(err, SessionError::SysadminBlocked(_)));
        assert!(!deploy_dir(&gd).exists());
    }

    #[test]
    #[serial]
    fn test_store_and_fetch_tag_info_roundtrip() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        run_git_command(&["tag", "deploy-start-1"], repo.path());
        let mut inv = RefInventory::new();
        let head = inv.name_to_commit("HEAD").unwrap();
        fs::create_dir_all(deploy_dir(&gd)).unwrap();
        store_tag_info(&gd, TagInfoKind::Rollback, &head, "deploy-start-1").unwrap();
        let fetched = fetch_tag_info(&gd, TagInfoKind::Rollback, &mut inv).unwrap();
        assert_eq!(fetched.as_deref(), Some("deploy-start-1"));
    }

    #[test]
    #[serial]
    fn test_fetch_tag_info_mismatch_returns_none() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let gd = gitdir(repo.path());
        run_git_command(&["tag", "deploy-start-1"], repo.path());
        let mut inv = RefInventory::new();
        fs::create_dir_all(deploy_dir(&gd)).unwrap();
        store_tag_info(&gd, TagInfoKind::Rollback, "0".repeat(40).as_str(), "deploy-start-1").unwrap();
        let fetched = fetch_tag_info(&gd, TagInfoKind::Rollback, &mut inv).unwrap();
        assert!(fetched.is_none());
    }
}
