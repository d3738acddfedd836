use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, name = "git-deploy")]
pub struct Cli {
    /// Increase verbosity level (can be specified multiple times.) The first level sets level
    /// "info", second sets level "debug", and third sets level "trace" for the logger.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Create a versionless command for manpage generation
    pub fn command_without_version() -> clap::Command {
        use clap::CommandFactory;
        let mut cmd = Self::command();
        cmd = cmd.version(None::<&str>);
        cmd
    }
}

/// Shared by `start`/`hotfix`: the default dated-tag format, overridable
/// per invocation.
#[derive(clap::Args)]
pub struct CliDateFmt {
    /// strftime format used for the dated marker tag
    #[arg(long = "date-fmt", default_value = "%Y%m%d-%H%M")]
    pub date_fmt: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a rollout for an application prefix
    Start {
        /// App prefix selecting which hooks to run (e.g. "sheep")
        prefix: String,

        /// Proceed even if ownership/precondition checks would otherwise fail
        #[arg(long)]
        force: bool,

        /// Skip the working-tree cleanliness check
        #[arg(long)]
        no_check_clean: bool,

        /// Skip fetch/pull and the unpushed-commit check entirely
        #[arg(long)]
        no_remote: bool,

        /// Remote to fetch/pull from, or "none" to disable
        #[arg(long)]
        remote_site: Option<String>,

        /// Branch to fetch/pull, default is the current branch
        #[arg(long)]
        remote_branch: Option<String>,

        #[command(flatten)]
        date_fmt: CliDateFmt,
    },

    /// Start an emergency rollout on the current branch, skipping remote checks
    Hotfix {
        /// App prefix selecting which hooks to run
        prefix: String,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        no_check_clean: bool,

        #[command(flatten)]
        date_fmt: CliDateFmt,
    },

    /// Mark the started rollout as synced, running the app's sync hook if present
    Sync {
        #[arg(long)]
        force: bool,

        /// Mark as synced without invoking the app's sync hook (the operator
        /// performed the sync out of band)
        #[arg(long)]
        manual: bool,

        /// Message recorded in the deploy file
        #[arg(long)]
        message: Option<String>,

        #[command(flatten)]
        date_fmt: CliDateFmt,
    },

    /// Like `sync`, but pushes the branch and tags to the remote instead of
    /// invoking a sync hook
    Release {
        #[arg(long)]
        force: bool,

        #[arg(long)]
        message: Option<String>,

        #[command(flatten)]
        date_fmt: CliDateFmt,
    },

    /// Complete a synced rollout, clearing the session
    Finish {
        #[arg(long)]
        force: bool,
    },

    /// Abort a started (not yet synced) rollout, clearing the session
    Abort {
        #[arg(long)]
        force: bool,
    },

    /// Roll the working tree back to the rollback marker and clear the session
    Revert {
        #[arg(long)]
        force: bool,
    },

    /// Create an ad hoc tag, disambiguating with a letter suffix on collision
    Tag {
        /// Desired tag name
        name: String,

        /// Message lines; `%TAG` is replaced with the final chosen name
        #[arg(long)]
        message: Option<String>,
    },

    /// Print the deploy file for a ref (HEAD if omitted)
    Show {
        /// Ref to show the deploy file for
        reference: Option<String>,

        /// Read an alternate deploy file instead of the configured one
        #[arg(long)]
        deploy_file_name: Option<PathBuf>,

        /// Equivalent to --deploy-file-name, kept for operator muscle memory
        #[arg(long)]
        show_deploy_file: Option<PathBuf>,

        /// Print the full 40-hex commit instead of the abbreviated form
        #[arg(long)]
        long_digest: bool,
    },

    /// Print the inventory's resolved (commit, sha1) for a tag name
    ShowTag {
        /// Tag name to resolve
        name: String,
    },

    /// Report the current rollout session state
    Status {
        /// Print only the state keyword
        #[arg(long)]
        show_step: bool,

        /// Print only the app prefix of the active rollout
        #[arg(long)]
        show_prefix: bool,
    },

    /// List tags, most recent first
    Log {
        /// Only tags matching the current HEAD (default unless --list-all)
        #[arg(long)]
        list: bool,

        /// List every tag regardless of HEAD
        #[arg(long)]
        list_all: bool,

        /// Also include branches reaching HEAD
        #[arg(long)]
        include_branches: bool,

        /// Limit the number of entries printed
        #[arg(long)]
        count: Option<usize>,

        /// Drop tags dated before this YYYYMMDD cutoff
        #[arg(long)]
        ignore_older_than: Option<String>,
    },

    /// Print `git diff` between the rollback marker and HEAD, or an explicit range
    Diff {
        /// Explicit "<a>..<b>" range; defaults to "<rollback-tag>..HEAD"
        range: Option<String>,
    },
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }
}
