use super::{
    git_definitions::EXPECTED_VERSION,
    git_types::{GitError, GitOutput},
};

use std::{
    env::current_dir,
    io,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{self, Stdio},
};

use log::{debug, trace};

use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;

/// Spawn `git` directly (no `sh -c`): stdout and stderr are captured on
/// separate pipes so callers can merge or keep them apart as needed.
pub(super) fn spawn_git_command(
    args: &[&str],
    working_dir: &Option<&Path>,
) -> Result<process::Child, io::Error> {
    let working_dir = working_dir.map(PathBuf::from).unwrap_or(current_dir()?);
    debug!("execute: git {}", args.iter().join(" "));
    process::Command::new("git")
        .env("LANG", "C.UTF-8")
        .env("LC_ALL", "C.UTF-8")
        .env("LANGUAGE", "C.UTF-8")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(working_dir)
        .args(args)
        .spawn()
}

/// Git Executor primitive: run a command and normalize its outcome. Never
/// fails merely because the exit code was non-zero — that classification is
/// left to `result`/`errcode`.
pub fn run(args: &[&str], working_dir: &Option<&Path>) -> Result<(GitOutput, i32), GitError> {
    let child = spawn_git_command(args, working_dir)?;
    let output = child.wait_with_output()?;

    let stdout = String::from_utf8_lossy(&output.stdout)
        .trim_end()
        .to_string();
    let stderr = String::from_utf8_lossy(&output.stderr)
        .trim_end()
        .to_string();
    trace!("stdout: {stdout}");
    trace!("stderr: {stderr}");

    if let Some(signal) = output.status.signal() {
        return Err(GitError::Signalled {
            signal,
            coredump: output.status.core_dumped(),
        });
    }

    let code = output.status.code().unwrap_or(-1);
    Ok((GitOutput { stdout, stderr }, code))
}

/// `result(cmd, accepted_codes) -> stdout`: fail with `UnexpectedExit`
/// unless the exit code is one of `accepted_codes`.
pub fn result(
    args: &[&str],
    working_dir: &Option<&Path>,
    accepted_codes: &[i32],
) -> Result<GitOutput, GitError> {
    let (output, code) = run(args, working_dir)?;
    if accepted_codes.contains(&code) {
        Ok(output)
    } else {
        Err(GitError::UnexpectedExit {
            command: args.join(" "),
            code,
            output,
        })
    }
}

/// `errcode(cmd) -> exit`: run and surface only the raw exit code.
pub fn errcode(args: &[&str], working_dir: &Option<&Path>) -> Result<i32, GitError> {
    let (_, code) = run(args, working_dir)?;
    Ok(code)
}

/// Convenience wrapper used by most call sites: only exit code 0 is accepted.
pub(super) fn capture_git_output(
    args: &[&str],
    working_dir: &Option<&Path>,
) -> Result<GitOutput, GitError> {
    result(args, working_dir, &[0])
}

pub(super) fn internal_get_head_revision() -> Result<String, GitError> {
    capture_git_output(&["log", "-1", "--pretty=%H", "HEAD"], &None)
        .map_err(|_e| GitError::RefNotFound {
            reference: "HEAD".into(),
        })
        .map(|s| s.stdout.trim().to_owned())
}

pub fn get_head_revision() -> Result<String> {
    Ok(internal_get_head_revision()?)
}

pub(super) fn get_git_dir() -> Result<PathBuf, GitError> {
    capture_git_output(&["rev-parse", "--git-dir"], &None)
        .map_err(|_| GitError::NotARepo)
        .map(|s| PathBuf::from(s.stdout.trim()))
}

pub(super) fn get_repository_root() -> Result<PathBuf, GitError> {
    capture_git_output(&["rev-parse", "--show-toplevel"], &None)
        .map_err(|_| GitError::NotARepo)
        .map(|s| PathBuf::from(s.stdout.trim()))
}

pub(super) fn parse_git_version(version: &str) -> Result<(i32, i32, i32)> {
    let version = version
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| anyhow!("could not find git version in string {version}"))?;
    match version.split('.').collect_vec()[..] {
        [major, minor, patch, ..] => Ok((major.parse()?, minor.parse()?, patch.parse()?)),
        _ => Err(anyhow!("failed to determine semantic version from {version}")),
    }
}

fn get_git_version() -> Result<(i32, i32, i32)> {
    let version = capture_git_output(&["--version"], &None)
        .context("determine git version")?
        .stdout;
    parse_git_version(&version)
}

fn concat_version(version_tuple: (i32, i32, i32)) -> String {
    format!(
        "{}.{}.{}",
        version_tuple.0, version_tuple.1, version_tuple.2
    )
}

pub fn check_git_version() -> Result<()> {
    let version_tuple = get_git_version().context("determining compatible git version")?;
    if version_tuple < EXPECTED_VERSION {
        bail!(
            "git version {} is older than the required {}",
            concat_version(version_tuple),
            concat_version(EXPECTED_VERSION)
        )
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{dir_with_repo, run_git_command};
    use serial_test::serial;
    use std::env::set_current_dir;

    #[test]
    #[serial]
    fn test_get_head_revision() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).expect("failed to change dir");
        let revision = internal_get_head_revision().unwrap();
        assert!(
            revision.chars().all(|c| c.is_ascii_hexdigit()),
            "'{}' contained non hex-digit characters",
            &revision
        );
    }

    #[test]
    #[serial]
    fn test_run_reports_exit_code() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).expect("failed to change dir");
        let (_, code) = run(&["rev-parse", "--verify", "-q", "refs/tags/nope"], &None).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    #[serial]
    fn test_result_rejects_unaccepted_code() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).expect("failed to change dir");
        let err = result(&["rev-parse", "--verify", "-q", "refs/tags/nope"], &None, &[0]);
        assert!(matches!(err, Err(GitError::UnexpectedExit { code: 1, .. })));
    }

    #[test]
    fn test_parse_git_version() {
        let version = parse_git_version("git version 2.45.0");
        assert_eq!(version.unwrap(), (2, 45, 0));

        let version = parse_git_version("git version 2.45.0.windows.1");
        assert_eq!(version.unwrap(), (2, 45, 0));
    }

    #[test]
    #[serial]
    fn test_run_git_command_helper_produces_usable_repo() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).expect("failed to change dir");
        run_git_command(&["tag", "marker"], repo_dir.path());
        let out = capture_git_output(&["tag", "-l"], &None).unwrap();
        assert_eq!(out.stdout.trim(), "marker");
    }
}
