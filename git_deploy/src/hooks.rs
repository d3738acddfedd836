//! Hook Engine (C6): discovery, ordering, phase dispatch, failure policy.
//! See SPEC_FULL.md §4.6.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::warn;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook '{path}' exited with status {code}:\n{output}")]
    HookFailed {
        path: String,
        code: i32,
        output: String,
    },

    #[error("hook '{path}' terminated by signal {signal}")]
    HookSignalled { path: String, signal: i32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// List `<dir>/<phase>.*` candidates in ascending lexicographic order by
/// file name, skipping (with a warning) entries that aren't executable.
fn discover_phase_dir(dir: &Path, phase: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let prefix = format!("{phase}.");
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .filter(|p| {
            if is_executable(p) {
                true
            } else {
                warn!("hook {} is not executable, skipping", p.display());
                false
            }
        })
        .collect()
}

fn run_one(path: &Path, phase: &str, prefix_env: &str) -> Result<(), HookError> {
    let output = Command::new(path)
        .env("GIT_DEPLOYTOOL_PHASE", phase)
        .env("GIT_DEPLOY_PHASE", phase)
        .env("GIT_DEPLOYTOOL_HOOK_PREFIX", prefix_env)
        .env("GIT_DEPLOY_HOOK_PREFIX", prefix_env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = output.status.signal() {
        return Err(HookError::HookSignalled {
            path: path.display().to_string(),
            signal,
        });
    }

    let code = output.status.code().unwrap_or(-1);
    if code == 0 {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(HookError::HookFailed {
        path: path.display().to_string(),
        code,
        output: combined,
    })
}

/// Dispatch hooks for `(phase, prefix)`: `apps/common/<phase>.*` in order,
/// then `apps/<prefix>/<phase>.*` in order. When `ignore_exit` is true a
/// failing hook only warns and dispatch continues to the next candidate.
pub fn dispatch(
    hook_root: Option<&Path>,
    skip_hooks: bool,
    phase: &str,
    prefix: &str,
    ignore_exit: bool,
) -> Result<(), HookError> {
    let Some(root) = hook_root else {
        return Ok(());
    };
    if skip_hooks {
        warn!("skipping all hooks for phase '{phase}' (hooks disabled)");
        return Ok(());
    }

    let common_dir = root.join("apps").join("common");
    for path in discover_phase_dir(&common_dir, phase) {
        run_phase_hook(&path, phase, "common", ignore_exit)?;
    }

    let app_dir = root.join("apps").join(prefix);
    for path in discover_phase_dir(&app_dir, phase) {
        run_phase_hook(&path, phase, prefix, ignore_exit)?;
    }

    Ok(())
}

fn run_phase_hook(
    path: &Path,
    phase: &str,
    prefix_env: &str,
    ignore_exit: bool,
) -> Result<(), HookError> {
    match run_one(path, phase, prefix_env) {
        Ok(()) => Ok(()),
        Err(e) if ignore_exit => {
            warn!("hook {} failed, ignoring: {e}", path.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// `<root>/sync/<prefix>.sync`, returned only when present and executable.
pub fn get_sync_hook(hook_root: Option<&Path>, prefix: &str) -> Option<PathBuf> {
    let root = hook_root?;
    let path = root.join("sync").join(format!("{prefix}.sync"));
    if !path.exists() {
        return None;
    }
    if !is_executable(&path) {
        warn!("sync hook {} is not executable, skipping", path.display());
        return None;
    }
    Some(path)
}

/// Runs the sync-style hook, if any, with the same environment contract as
/// phase hooks (`prefix` used for both the env `HOOK_PREFIX` and the phase
/// name "sync").
pub fn run_sync_hook(path: &Path, prefix: &str) -> Result<(), HookError> {
    run_one(path, "sync", prefix)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;
    use tempfile::tempdir;

    fn write_script(path: &Path, body: &str) {
        use std::fs::OpenOptions;
        use std::io::Write;
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o755)
            .open(path)
            .unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
    }

    #[test]
    fn test_hook_ordering_and_stop_on_failure() {
        let root = tempdir().unwrap();
        let common = root.path().join("apps").join("common");
        let app = root.path().join("apps").join("myapp");
        fs::create_dir_all(&common).unwrap();
        fs::create_dir_all(&app).unwrap();

        let order_log = root.path().join("order.log");
        write_script(
            &common.join("pre-pull.010_a.sh"),
            &format!("echo a >> {}", order_log.display()),
        );
        write_script(
            &common.join("pre-pull.020_b.sh"),
            &format!("echo b >> {}; exit 1", order_log.display()),
        );
        write_script(
            &app.join("pre-pull.005_c.sh"),
            &format!("echo c >> {}", order_log.display()),
        );

        let err = dispatch(Some(root.path()), false, "pre-pull", "myapp", false);
        assert!(err.is_err());

        let contents = fs::read_to_string(&order_log).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_ignore_exit_continues_dispatch() {
        let root = tempdir().unwrap();
        let common = root.path().join("apps").join("common");
        fs::create_dir_all(&common).unwrap();
        let order_log = root.path().join("order.log");
        write_script(
            &common.join("post-rollback.010_a.sh"),
            &format!("echo a >> {}; exit 1", order_log.display()),
        );
        write_script(
            &common.join("post-rollback.020_b.sh"),
            &format!("echo b >> {}", order_log.display()),
        );

        dispatch(Some(root.path()), false, "post-rollback", "myapp", true).unwrap();
        let contents = fs::read_to_string(&order_log).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_non_executable_hook_is_skipped() {
        let root = tempdir().unwrap();
        let common = root.path().join("apps").join("common");
        fs::create_dir_all(&common).unwrap();
        fs::write(common.join("pre-pull.010_a.sh"), "#!/bin/sh\nexit 1\n").unwrap();
        dispatch(Some(root.path()), false, "pre-pull", "myapp", false).unwrap();
    }

    #[test]
    fn test_no_hook_root_is_noop() {
        dispatch(None, false, "pre-pull", "myapp", false).unwrap();
    }

    #[test]
    fn test_skip_hooks_flag_is_noop() {
        let root = tempdir().unwrap();
        let common = root.path().join("apps").join("common");
        fs::create_dir_all(&common).unwrap();
        write_script(&common.join("pre-pull.010_a.sh"), "exit 1");
        dispatch(Some(root.path()), true, "pre-pull", "myapp", false).unwrap();
    }

    #[test]
    fn test_get_sync_hook_present_and_executable() {
        let root = tempdir().unwrap();
        let sync_dir = root.path().join("sync");
        fs::create_dir_all(&sync_dir).unwrap();
        write_script(&sync_dir.join("myapp.sync"), "exit 0");
        let hook = get_sync_hook(Some(root.path()), "myapp");
        assert!(hook.is_some());
    }

    #[test]
    fn test_get_sync_hook_missing() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("sync")).unwrap();
        assert!(get_sync_hook(Some(root.path()), "myapp").is_none());
    }
}
