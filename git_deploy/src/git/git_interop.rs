use itertools::Itertools;

use super::git_definitions::{FIELD_SEP, GIT_ORIGIN, RECORD_SEP};
use super::git_lowlevel::{capture_git_output, errcode, run};
use super::git_types::GitError;

pub use super::git_lowlevel::{check_git_version, get_head_revision};
pub(crate) use super::git_lowlevel::{get_git_dir, get_repository_root};

/// The `for-each-ref` fields requested for a ref's own object, in the fixed
/// order the inventory's parser indexes into. Mirrored by
/// [`DEREF_ATOMS`] for the `*`-prefixed equivalents annotated tags resolve
/// to the pointed-to commit.
pub(crate) const OWN_ATOMS: &[&str] = &[
    "%(objectname)",
    "%(authorname)",
    "%(authoremail)",
    "%(authordate:iso-strict)",
    "%(committername)",
    "%(committeremail)",
    "%(committerdate:iso-strict)",
    "%(parent)",
    "%(tree)",
    "%(contents:subject)",
    "%(contents:body)",
    "%(contents)",
];

pub(crate) const DEREF_ATOMS: &[&str] = &[
    "%(*objectname)",
    "%(*authorname)",
    "%(*authoremail)",
    "%(*authordate:iso-strict)",
    "%(*committername)",
    "%(*committeremail)",
    "%(*committerdate:iso-strict)",
    "%(*parent)",
    "%(*tree)",
    "%(*contents:subject)",
    "%(*contents:body)",
    "%(*contents)",
];

/// One `for-each-ref` invocation producing the raw NUL/record-separated
/// dump the ref inventory parses. Kept as a single entry point so the
/// inventory module never has to know the underlying git invocation.
///
/// Field order: `refname`, `%(tag)`, then every [`OWN_ATOMS`] entry, then
/// every [`DEREF_ATOMS`] entry — the `*`-prefixed atoms resolve, for an
/// annotated tag, to the fields of the commit the tag points at rather than
/// the tag object itself.
pub fn for_each_ref_raw() -> Result<String, GitError> {
    let mut atoms = vec!["%(refname)".to_string(), "%(tag)".to_string()];
    atoms.extend(OWN_ATOMS.iter().map(|s| s.to_string()));
    atoms.extend(DEREF_ATOMS.iter().map(|s| s.to_string()));
    let format = atoms.join(FIELD_SEP);

    let format_arg = format!("--format={format}{RECORD_SEP}");
    let output = capture_git_output(&["for-each-ref", &format_arg], &None)?;
    Ok(output.stdout)
}

/// Resolve `name` the way the ref inventory's fallback path does: a plain
/// `git log -1 --pretty=%H <name>`. Used once the cheaper ref-table lookups
/// (`refs/tags/NAME`, `refs/heads/NAME`, ...) have been exhausted.
pub fn resolve_to_commit(name: &str) -> Result<String, GitError> {
    capture_git_output(&["log", "-1", "--pretty=%H", name], &None)
        .map(|o| o.stdout.trim().to_owned())
        .map_err(|_| GitError::RefNotFound {
            reference: name.to_owned(),
        })
}

/// Resolve `name` to a raw object id via `git rev-parse`, the fallback used
/// for `nameToSha1`.
pub fn resolve_to_object_id(name: &str) -> Result<String, GitError> {
    capture_git_output(&["rev-parse", name], &None)
        .map(|o| o.stdout.trim().to_owned())
        .map_err(|_| GitError::RefNotFound {
            reference: name.to_owned(),
        })
}

/// Current branch name, or `None` when HEAD is detached.
pub fn current_branch() -> Option<String> {
    capture_git_output(&["symbolic-ref", "--short", "-q", "HEAD"], &None)
        .ok()
        .map(|o| o.stdout.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// `git branch -a --contains HEAD`, trimmed and stripped of the `*` marker
/// git prints in column 1 for the current branch.
pub fn branches_containing_head() -> Result<Vec<String>, GitError> {
    let output = capture_git_output(&["branch", "-a", "--contains", "HEAD"], &None)?;
    Ok(output
        .stdout
        .lines()
        .map(|l| l.trim_start_matches('*').trim().to_owned())
        .filter(|l| !l.is_empty() && !l.contains("->"))
        .collect_vec())
}

/// `git status` cleanliness check: success iff the output contains the
/// literal substring git prints for a clean tree.
pub fn is_working_tree_clean() -> Result<bool, GitError> {
    let output = capture_git_output(&["status"], &None)?;
    Ok(output.stdout.contains("working directory clean")
        || output.stdout.contains("working tree clean"))
}

/// `git fetch [--tags] <remote> [<branch>]`. Exit code 1 from fetch can mean
/// "nothing to fetch" and is accepted as success, matching the exit-code
/// classification the git executor is required to honor for fetch.
pub fn fetch(remote: &str, branch: Option<&str>, tags: bool) -> Result<(), GitError> {
    let mut args = vec!["fetch"];
    if tags {
        args.push("--tags");
    }
    args.push(remote);
    if let Some(b) = branch {
        args.push(b);
    }
    let (output, code) = run(&args, &None)?;
    if code == 0 || code == 1 {
        Ok(())
    } else {
        Err(GitError::UnexpectedExit {
            command: args.join(" "),
            code,
            output,
        })
    }
}

/// `git push [--tags] [--all] <remote> [<ref>]`.
pub fn push(remote: &str, refspec: Option<&str>, tags: bool, all: bool) -> Result<(), GitError> {
    let mut args = vec!["push"];
    if tags {
        args.push("--tags");
    }
    if all {
        args.push("--all");
    }
    args.push(remote);
    if let Some(r) = refspec {
        args.push(r);
    }
    capture_git_output(&args, &None).map(|_| ())
}

/// `git pull <remote> <branch>`.
pub fn pull(remote: &str, branch: &str) -> Result<(), GitError> {
    capture_git_output(&["pull", remote, branch], &None).map(|_| ())
}

/// `git cherry <remote>/<branch>`: each line is a commit not yet reachable
/// from the remote branch. A non-empty result means there are unpushed
/// commits.
pub fn unpushed_commits(remote: &str, branch: &str) -> Result<Vec<String>, GitError> {
    let target = format!("{remote}/{branch}");
    let output = capture_git_output(&["cherry", &target], &None)?;
    Ok(output
        .stdout
        .lines()
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .collect_vec())
}

/// `git reset --hard [<name>]`.
pub fn reset_hard(target: Option<&str>) -> Result<(), GitError> {
    let mut args = vec!["reset", "--hard"];
    if let Some(t) = target {
        args.push(t);
    }
    capture_git_output(&args, &None).map(|_| ())
}

/// `git checkout -f`.
pub fn checkout_force() -> Result<(), GitError> {
    capture_git_output(&["checkout", "-f"], &None).map(|_| ())
}

/// `git checkout <branch>`.
pub fn checkout_branch(branch: &str) -> Result<(), GitError> {
    capture_git_output(&["checkout", branch], &None).map(|_| ())
}

/// `git diff <range>`, printed verbatim: the one orchestrator action that is
/// a thin pass-through to git rather than an interpreted result.
pub fn diff(range: &str) -> Result<String, GitError> {
    capture_git_output(&["diff", range], &None).map(|o| o.stdout)
}

/// Create a tag. `git tag` is silent on success; any stdout or stderr is
/// treated as a failure, per the tag service's "fail hard, never retry"
/// contract.
pub(crate) fn create_tag(name: &str, message_lines: &[String]) -> Result<(), GitError> {
    let mut args = vec!["tag".to_string()];
    for line in message_lines {
        args.push("-m".to_string());
        args.push(line.clone());
    }
    args.push(name.to_string());
    let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();

    let (output, code) = run(&args_ref, &None)?;
    if code == 0 && output.stdout.is_empty() && output.stderr.is_empty() {
        Ok(())
    } else {
        Err(GitError::TagCreationFailed {
            name: name.to_owned(),
            output,
        })
    }
}

/// Existence probe built on the Git Executor's `errcode` primitive, for
/// callers that only care whether a ref resolves.
pub fn ref_exists(name: &str) -> Result<bool, GitError> {
    Ok(errcode(&["rev-parse", "--verify", "-q", name], &None)? == 0)
}

/// Default remote name consulted when `deploy.remote-site` is unset.
pub fn default_remote() -> &'static str {
    GIT_ORIGIN
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{dir_with_repo, run_git_command};
    use serial_test::serial;
    use std::env::set_current_dir;

    #[test]
    #[serial]
    fn test_is_working_tree_clean() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        assert!(is_working_tree_clean().unwrap());

        std::fs::write(repo.path().join("dirty.txt"), "x").unwrap();
        assert!(!is_working_tree_clean().unwrap());
    }

    #[test]
    #[serial]
    fn test_create_tag_and_resolve() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        create_tag("mytag", &["hello".to_string()]).unwrap();
        let head = get_head_revision().unwrap();
        assert_eq!(resolve_to_commit("mytag").unwrap(), head);
    }

    #[test]
    #[serial]
    fn test_create_tag_collision_fails() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        create_tag("mytag", &["hello".to_string()]).unwrap();
        let err = create_tag("mytag", &["again".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    #[serial]
    fn test_current_branch() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        assert_eq!(current_branch().as_deref(), Some("master"));
    }

    #[test]
    #[serial]
    fn test_branches_containing_head() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        run_git_command(&["branch", "other"], repo.path());
        let branches = branches_containing_head().unwrap();
        assert!(branches.contains(&"master".to_string()));
        assert!(branches.contains(&"other".to_string()));
    }

    #[test]
    #[serial]
    fn test_unpushed_commits_without_remote_errors() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let result = unpushed_commits("origin", "master");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_ref_exists() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        assert!(ref_exists("HEAD").unwrap());
        assert!(!ref_exists("refs/tags/nope").unwrap());
    }
}
