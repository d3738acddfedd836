//! Deploy File (C7): the human-readable artifact identifying the deployed
//! commit on a target. See SPEC_FULL.md §4.7.

use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::Local;
use regex::Regex;

use crate::inventory::RefInventory;

/// Default deploy-file name, relative to the repository root, used when
/// `deploy.deploy-file` is unset.
pub const DEFAULT_DEPLOY_FILE_NAME: &str = ".deploy";

fn commit_regex() -> Regex {
    Regex::new(r"\Acommit: ([0-9a-f]{40})").expect("valid regex")
}

/// Assembles the deploy file's text: key/value header, blank line, message
/// body, trailing blank line.
pub fn render(commit: &str, tag: &str, message_lines: &[String]) -> String {
    let deploy_date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let hostname = hostname();
    let deployed_by = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());

    let mut out = String::new();
    out.push_str(&format!("commit: {commit}\n"));
    out.push_str(&format!("tag: {tag}\n"));
    out.push_str(&format!("deploy-date: {deploy_date}\n"));
    out.push_str(&format!("deployed-from: {hostname}\n"));
    out.push_str(&format!("deployed-by: {deployed_by}\n"));
    out.push('\n');
    for line in message_lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Writes the rendered deploy file to `path`, creating/truncating it.
pub fn write(path: &Path, commit: &str, tag: &str, message_lines: &[String]) -> Result<()> {
    let text = render(commit, tag, message_lines);
    fs::write(path, text)?;
    Ok(())
}

/// Reads `path`'s contents, returning them only if the leading `commit:`
/// line matches HEAD's current commit (unless `skip_check` is set). Any
/// I/O error, or a failure to authenticate, returns an empty string rather
/// than propagating.
pub fn read(path: &Path, inventory: &mut RefInventory, skip_check: bool) -> String {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return String::new(),
    };

    if skip_check {
        return contents;
    }

    let re = commit_regex();
    let Some(caps) = re.captures(&contents) else {
        return String::new();
    };
    let file_commit = &caps[1];

    match inventory.name_to_commit("HEAD") {
        Ok(head) if head == file_commit => contents,
        _ => String::new(),
    }
}

/// Resolves the configured deploy-file path, defaulting to `.deploy` under
/// `repo_root`.
pub fn path_for(repo_root: &Path, configured: Option<&Path>) -> std::path::PathBuf {
    match configured {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => repo_root.join(p),
        None => repo_root.join(DEFAULT_DEPLOY_FILE_NAME),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::dir_with_repo;
    use serial_test::serial;
    use std::env::set_current_dir;

    #[test]
    #[serial]
    fn test_write_then_read_roundtrip() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();
        let head = inv.name_to_commit("HEAD").unwrap();

        let path = repo.path().join(".deploy");
        write(&path, &head, "mytag", &["hello %TAG".to_string()]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let first_line = contents.lines().next().unwrap();
        assert_eq!(first_line, format!("commit: {head}"));
        assert!(contents.lines().any(|l| l == "tag: mytag"));
        assert!(contents.contains("hello %TAG"));

        let read_back = read(&path, &mut inv, false);
        assert_eq!(read_back, contents);
    }

    #[test]
    #[serial]
    fn test_read_returns_empty_on_head_mismatch() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();

        let path = repo.path().join(".deploy");
        write(&path, &"a".repeat(40), "mytag", &["msg".to_string()]).unwrap();

        let read_back = read(&path, &mut inv, false);
        assert_eq!(read_back, "");
    }

    #[test]
    #[serial]
    fn test_read_skip_check_ignores_mismatch() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();

        let path = repo.path().join(".deploy");
        write(&path, &"a".repeat(40), "mytag", &["msg".to_string()]).unwrap();

        let read_back = read(&path, &mut inv, true);
        assert!(read_back.contains("msg"));
    }

    #[test]
    fn test_read_missing_file_returns_empty() {
        let mut inv = RefInventory::new();
        let read_back = read(Path::new("/nonexistent/.deploy"), &mut inv, false);
        assert_eq!(read_back, "");
    }

    #[test]
    fn test_path_for_default() {
        let root = Path::new("/repo");
        assert_eq!(path_for(root, None), Path::new("/repo/.deploy"));
    }

    #[test]
    fn test_path_for_relative_configured() {
        let root = Path::new("/repo");
        assert_eq!(
            path_for(root, Some(Path::new("custom/.deploy"))),
            Path::new("/repo/custom/.deploy")
        );
    }
}
