//! Orchestrator (C9): top-level action handlers composing the Config
//! Store, Ref Inventory, Tag Service, Rollout Session, Hook Engine, Deploy
//! File, and Timing Ledger. See SPEC_FULL.md §4.9.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::deploy_file;
use crate::git::git_interop;
use crate::hooks;
use crate::session::{self, SessionError, SessionState, TagInfoKind};
use crate::session_context::SessionContext;
use crate::tags;

fn gitdir() -> Result<PathBuf> {
    Ok(git_interop::get_git_dir()?)
}

fn repo_root() -> Result<PathBuf> {
    Ok(git_interop::get_repository_root()?)
}

fn hook_root(ctx: &mut SessionContext) -> Result<Option<PathBuf>> {
    Ok(ctx.config.get_path_opt("hook-dir")?)
}

fn skip_hooks(ctx: &mut SessionContext) -> Result<bool> {
    Ok(ctx.config.get_bool_or("skip-hooks", false)?)
}

fn tag_prefix_config(ctx: &mut SessionContext) -> Result<String> {
    Ok(ctx.config.get_string_or("tag-prefix", "deploy")?)
}

fn block_file(ctx: &mut SessionContext) -> Result<Option<PathBuf>> {
    Ok(ctx.config.get_path_opt("block-file")?)
}

fn deploy_file_path(ctx: &mut SessionContext, root: &Path) -> Result<PathBuf> {
    let configured = ctx.config.get_path_opt("deploy-file")?;
    Ok(deploy_file::path_for(root, configured.as_deref()))
}

/// Extracts the leading app prefix from a rollout tag name, e.g.
/// `sheep-start-20260101-1200` -> `sheep`.
pub fn app_prefix_from_tag(tag: &str) -> String {
    for marker in ["-start-", "-hotfix-", "-sync-", "-release-"] {
        if let Some(idx) = tag.find(marker) {
            return tag[..idx].to_string();
        }
    }
    tag.to_string()
}

fn current_prefix(gitdir: &Path, ctx: &mut SessionContext) -> Result<String> {
    let tag = session::fetch_tag_info(gitdir, TagInfoKind::Rollback, &mut ctx.inventory)?;
    match tag {
        Some(tag) => Ok(app_prefix_from_tag(&tag)),
        None => bail!("could not determine the app prefix: no rollback tag recorded"),
    }
}

fn resolved_remote(cli_remote: Option<&str>, ctx: &mut SessionContext) -> Result<Option<String>> {
    if let Some(r) = cli_remote {
        return Ok(if r == "none" { None } else { Some(r.to_string()) });
    }
    let configured = ctx
        .config
        .get_string_or("remote-site", git_interop::default_remote())?;
    Ok(if configured == "none" {
        None
    } else {
        Some(configured)
    })
}

/// Shared arguments for `start`/`hotfix`.
pub struct StartArgs<'a> {
    pub prefix: &'a str,
    pub force: bool,
    pub no_check_clean: bool,
    pub no_remote: bool,
    pub remote_site: Option<&'a str>,
    pub remote_branch: Option<&'a str>,
}

fn start_impl(ctx: &mut SessionContext, args: &StartArgs, is_hotfix: bool) -> Result<()> {
    let start_label = if is_hotfix {
        "action_hotfix"
    } else {
        "action_start"
    };
    ctx.timing.push(&format!("{start_label}_start"));

    let gd = gitdir()?;
    let root = repo_root()?;
    std::env::set_current_dir(&root).context("changing to worktree root")?;

    let skip = skip_hooks(ctx)?;
    let hroot = hook_root(ctx)?;

    hooks::dispatch(hroot.as_deref(), skip, "pre-start", args.prefix, false)
        .context("pre-start hook failed")?;

    if !args.no_check_clean {
        let clean = git_interop::is_working_tree_clean()?;
        if !clean {
            bail!("working tree is not clean; pass --no-check-clean to override");
        }
    }

    if !is_hotfix {
        let remote = if args.no_remote {
            None
        } else {
            resolved_remote(args.remote_site, ctx)?
        };

        if let Some(remote) = &remote {
            let branch = args
                .remote_branch
                .map(str::to_string)
                .or_else(git_interop::current_branch)
                .context("could not determine the current branch")?;

            git_interop::fetch(remote, Some(&branch), true).context("git fetch failed")?;

            let unpushed = git_interop::unpushed_commits(remote, &branch).unwrap_or_default();
            if !unpushed.is_empty() {
                if args.force {
                    warn!(
                        "{} unpushed commit(s) on {branch}; continuing because --force was given",
                        unpushed.len()
                    );
                } else {
                    bail!(
                        "{} unpushed commit(s) on {branch}; push them or pass --force",
                        unpushed.len()
                    );
                }
            }

            hooks::dispatch(hroot.as_deref(), skip, "pre-pull", args.prefix, false)
                .context("pre-pull hook failed")?;

            git_interop::pull(remote, &branch).context("git pull failed")?;

            hooks::dispatch(hroot.as_deref(), skip, "post-pull", args.prefix, false)
                .context("post-pull hook failed")?;
        }
    }

    hooks::dispatch(hroot.as_deref(), skip, "post-tree-update", args.prefix, false)
        .context("post-tree-update hook failed")?;

    let marker = if is_hotfix { "hotfix" } else { "start" };
    let tag_name = tags::make_dated_tag(
        &mut ctx.inventory,
        &format!("{}-{marker}", args.prefix),
        "%Y%m%d-%H%M",
        &[format!("{} of {}", marker, args.prefix)],
    )?;
    let sha1 = ctx.inventory.name_to_commit(&tag_name)?;
    let block = block_file(ctx)?;

    session::start(&gd, block.as_deref(), || Ok(()))
        .map_err(map_session_error)
        .context("starting rollout session")?;

    session::store_tag_info(&gd, TagInfoKind::Rollback, &sha1, &tag_name)?;

    ctx.timing.push(&format!("{start_label}_end"));
    info!("started rollout, rollback marker '{tag_name}'");
    Ok(())
}

pub fn start(ctx: &mut SessionContext, args: &StartArgs) -> Result<()> {
    start_impl(ctx, args, false)
}

pub fn hotfix(ctx: &mut SessionContext, args: &StartArgs) -> Result<()> {
    start_impl(ctx, args, true)
}

fn map_session_error(e: SessionError) -> anyhow::Error {
    anyhow::Error::new(e)
}

enum SyncKind {
    Sync,
    Release,
    ManualSync,
}

fn sync_impl(
    ctx: &mut SessionContext,
    kind: SyncKind,
    force: bool,
    message: Option<&str>,
) -> Result<()> {
    ctx.timing.push("action_sync_start");
    let gd = gitdir()?;
    let prefix = current_prefix(&gd, ctx)?;
    let skip = skip_hooks(ctx)?;
    let hroot = hook_root(ctx)?;

    hooks::dispatch(hroot.as_deref(), skip, "pre-sync", &prefix, false)
        .context("pre-sync hook failed")?;

    let action_marker = match kind {
        SyncKind::Sync => "sync",
        SyncKind::Release => "release",
        SyncKind::ManualSync => "manual-sync",
    };

    let tag_name = tags::make_dated_tag(
        &mut ctx.inventory,
        &format!("{prefix}-{action_marker}"),
        "%Y%m%d-%H%M",
        &[format!("{action_marker} of {prefix}")],
    )?;
    let sha1 = ctx.inventory.name_to_commit(&tag_name)?;
    session::store_tag_info(&gd, TagInfoKind::Rollout, &sha1, &tag_name)?;

    let root = repo_root()?;
    let deploy_path = deploy_file_path(ctx, &root)?;
    let message_lines: Vec<String> = message
        .map(|m| m.lines().map(str::to_string).collect())
        .unwrap_or_default();
    deploy_file::write(&deploy_path, &sha1, &tag_name, &message_lines)
        .context("writing deploy file")?;

    match kind {
        SyncKind::Sync => {
            if let Some(hook) = hooks::get_sync_hook(hroot.as_deref(), &prefix) {
                hooks::run_sync_hook(&hook, &prefix).context("sync hook failed")?;
            }
        }
        SyncKind::Release => {
            if let Some(remote) = resolved_remote(None, ctx)? {
                let branch = git_interop::current_branch()
                    .context("could not determine the current branch")?;
                git_interop::push(&remote, Some(&branch), true, false)
                    .context("git push failed during release")?;
            }
        }
        SyncKind::ManualSync => {}
    }

    hooks::dispatch(hroot.as_deref(), skip, "post-sync", &prefix, false)
        .context("post-sync hook failed")?;

    session::transition(&gd, action_marker, force)
        .map_err(map_session_error)
        .context("recording sync step")?;

    ctx.timing.push("action_sync_end");
    Ok(())
}

pub fn sync(ctx: &mut SessionContext, force: bool, message: Option<&str>) -> Result<()> {
    sync_impl(ctx, SyncKind::Sync, force, message)
}

pub fn release(ctx: &mut SessionContext, force: bool, message: Option<&str>) -> Result<()> {
    sync_impl(ctx, SyncKind::Release, force, message)
}

pub fn manual_sync(ctx: &mut SessionContext, force: bool, message: Option<&str>) -> Result<()> {
    sync_impl(ctx, SyncKind::ManualSync, force, message)
}

pub fn finish(ctx: &mut SessionContext, force: bool) -> Result<()> {
    ctx.timing.push("action_finish_start");
    let gd = gitdir()?;
    session::transition(&gd, "finish", force)
        .map_err(map_session_error)
        .context("finishing rollout")?;
    session::unlink_rollout_status(&gd).map_err(map_session_error)?;
    ctx.timing.push("action_finish_end");
    info!("rollout finished");
    Ok(())
}

pub fn abort(ctx: &mut SessionContext, force: bool) -> Result<()> {
    ctx.timing.push("action_abort_start");
    let gd = gitdir()?;
    session::transition(&gd, "abort", force)
        .map_err(map_session_error)
        .context("aborting rollout")?;
    session::unlink_rollout_status(&gd).map_err(map_session_error)?;
    ctx.timing.push("action_abort_end");
    info!("rollout aborted");
    Ok(())
}

pub fn revert(ctx: &mut SessionContext, force: bool) -> Result<()> {
    ctx.timing.push("action_revert_start");
    let gd = gitdir()?;
    let prefix = current_prefix(&gd, ctx)?;
    let skip = skip_hooks(ctx)?;
    let hroot = hook_root(ctx)?;

    session::transition(&gd, "rollback", force)
        .map_err(map_session_error)
        .context("rolling back")?;

    let rollback_tag = session::fetch_tag_info(&gd, TagInfoKind::Rollback, &mut ctx.inventory)?
        .context("no rollback tag recorded for this session")?;

    if ctx.inventory.is_annotated_tag(&rollback_tag)?.is_some()
        || ctx.inventory.name_to_commit(&rollback_tag).is_ok()
    {
        git_interop::reset_hard(Some(&rollback_tag)).context("git reset --hard failed")?;
    } else {
        git_interop::checkout_force().context("git checkout -f failed")?;
        git_interop::checkout_branch(&rollback_tag).context("git checkout <branch> failed")?;
    }

    hooks::dispatch(hroot.as_deref(), skip, "post-tree-update", &prefix, true)
        .context("post-tree-update hook failed")?;
    hooks::dispatch(hroot.as_deref(), skip, "post-rollback", &prefix, true)
        .context("post-rollback hook failed")?;

    session::unlink_rollout_status(&gd).map_err(map_session_error)?;
    ctx.timing.push("action_revert_end");
    info!("reverted to '{rollback_tag}'");
    Ok(())
}

pub fn tag_cmd(ctx: &mut SessionContext, name: &str, message: Option<&str>) -> Result<String> {
    let message_lines: Vec<String> = message
        .map(|m| m.lines().map(str::to_string).collect())
        .unwrap_or_default();
    tags::make_tag(&mut ctx.inventory, name, &message_lines)
}

fn abbreviate(commit: &str) -> &str {
    &commit[..commit.len().min(12)]
}

pub fn show(
    ctx: &mut SessionContext,
    reference: Option<&str>,
    deploy_file_name: Option<&Path>,
    long_digest: bool,
) -> Result<String> {
    let root = repo_root()?;
    let path = match deploy_file_name {
        Some(p) => deploy_file::path_for(&root, Some(p)),
        None => deploy_file_path(ctx, &root)?,
    };

    let target = reference.unwrap_or("HEAD");
    let skip_check = target != "HEAD";
    let text = deploy_file::read(&path, &mut ctx.inventory, skip_check);
    if text.is_empty() {
        bail!("no deploy file matching '{target}' at {}", path.display());
    }

    if long_digest {
        return Ok(text);
    }

    let mut out = String::new();
    for line in text.lines() {
        if let Some(commit) = line.strip_prefix("commit: ") {
            out.push_str(&format!("commit: {}\n", abbreviate(commit)));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}

pub struct ShowTagInfo {
    pub commit: String,
    pub sha1: String,
    pub annotated: bool,
}

pub fn show_tag(ctx: &mut SessionContext, name: &str) -> Result<ShowTagInfo> {
    if let Some((commit, sha1)) = ctx.inventory.is_annotated_tag(name)? {
        return Ok(ShowTagInfo {
            commit,
            sha1,
            annotated: true,
        });
    }
    let commit = ctx.inventory.name_to_commit(name)?;
    Ok(ShowTagInfo {
        commit: commit.clone(),
        sha1: commit,
        annotated: false,
    })
}

pub struct StatusReport {
    pub state: SessionState,
    pub log_text: String,
    pub prefix: Option<String>,
}

pub fn status(ctx: &mut SessionContext) -> Result<StatusReport> {
    let gd = gitdir()?;
    let state = session::session_state(&gd).map_err(map_session_error)?;
    let log_text = session::session_log_text(&gd);
    let prefix = current_prefix(&gd, ctx).ok();
    Ok(StatusReport {
        state,
        log_text,
        prefix,
    })
}

pub fn status_word(state: SessionState) -> &'static str {
    match state {
        SessionState::Absent => "ABSENT",
        SessionState::Started => "STARTED",
        SessionState::Synced => "SYNCED",
        SessionState::Finishing => "FINISHING",
    }
}

pub struct LogArgs {
    pub list_all: bool,
    pub include_branches: bool,
    pub count: Option<usize>,
    pub ignore_older_than: Option<String>,
}

pub fn log_cmd(ctx: &mut SessionContext, args: &LogArgs) -> Result<Vec<String>> {
    let mut tags = ctx.inventory.sorted_tags()?;
    if let Some(cutoff) = &args.ignore_older_than {
        tags = ctx.inventory.filter_by_date(cutoff, &tags);
    }

    let mut names = if args.list_all {
        tags
    } else {
        ctx.inventory.names_matching_head(&tags, false)?
    };

    if args.include_branches {
        names.extend(ctx.inventory.branches_reaching_head()?);
    }

    if let Some(n) = args.count {
        names.truncate(n);
    }

    Ok(names)
}

pub fn diff_cmd(range: Option<&str>, ctx: &mut SessionContext) -> Result<String> {
    let range = match range {
        Some(r) => r.to_string(),
        None => {
            let gd = gitdir()?;
            let rollback =
                session::fetch_tag_info(&gd, TagInfoKind::Rollback, &mut ctx.inventory)?
                    .context("no rollback tag recorded; pass an explicit range")?;
            format!("{rollback}..HEAD")
        }
    };
    Ok(git_interop::diff(&range)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::dir_with_repo;
    use serial_test::serial;
    use std::env::set_current_dir;

    fn default_start_args(prefix: &str) -> StartArgs<'_> {
        StartArgs {
            prefix,
            force: false,
            no_check_clean: true,
            no_remote: true,
            remote_site: Some("none"),
            remote_branch: None,
        }
    }

    #[test]
    fn test_app_prefix_from_tag() {
        assert_eq!(app_prefix_from_tag("sheep-start-20260101-1200"), "sheep");
        assert_eq!(app_prefix_from_tag("sheep-hotfix-20260101-1200"), "sheep");
        assert_eq!(app_prefix_from_tag("notag"), "notag");
    }

    #[test]
    #[serial]
    fn test_start_then_sync_then_finish() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut ctx = SessionContext::new();

        start(&mut ctx, &default_start_args("sheep")).unwrap();
        let gd = gitdir().unwrap();
        assert_eq!(
            session::session_state(&gd).unwrap(),
            SessionState::Started
        );

        manual_sync(&mut ctx, false, Some("deployed")).unwrap();
        assert_eq!(session::session_state(&gd).unwrap(), SessionState::Synced);

        finish(&mut ctx, false).unwrap();
        assert_eq!(session::session_state(&gd).unwrap(), SessionState::Absent);
    }

    #[test]
    #[serial]
    fn test_start_then_abort() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut ctx = SessionContext::new();

        start(&mut ctx, &default_start_args("sheep")).unwrap();
        abort(&mut ctx, false).unwrap();

        let gd = gitdir().unwrap();
        assert_eq!(session::session_state(&gd).unwrap(), SessionState::Absent);
    }

    #[test]
    #[serial]
    fn test_sync_without_start_fails() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut ctx = SessionContext::new();
        let err = manual_sync(&mut ctx, false, None);
        assert!(err.is_err());
    }

    #[test]
    #[serial]
    fn test_tag_cmd_creates_tag() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut ctx = SessionContext::new();
        let name = tag_cmd(&mut ctx, "mymarker", Some("hello %TAG")).unwrap();
        assert_eq!(name, "mymarker");
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate(&"a".repeat(40)), "a".repeat(12));
        assert_eq!(abbreviate("short"), "short");
    }
}
