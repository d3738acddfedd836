use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::Level;

use crate::git::git_interop::check_git_version;
use crate::orchestrator::{self, LogArgs, StartArgs};
use crate::session_context::SessionContext;
use git_deploy_cli_types::{Cli, Commands};

pub fn handle_calls() -> Result<()> {
    let cli = Cli::parse();
    let logger_level = match cli.verbose {
        0 if std::env::var("GIT_DEPLOY_DEBUG").is_ok() => Level::Debug,
        0 => Level::Warn,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace,
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(logger_level.as_str())).init();

    check_git_version()?;

    let mut ctx = SessionContext::new();
    if cli.verbose > 0 || std::env::var("GIT_DEPLOY_DEBUG").is_ok() {
        ctx.timing.enable_flush();
    }
    ctx.timing.push("cli_parse_end");

    let result = dispatch(cli.command, &mut ctx);

    let args: Vec<String> = std::env::args().collect();
    ctx.timing.flush(&args);

    result
}

fn dispatch(command: Commands, ctx: &mut SessionContext) -> Result<()> {
    match command {
        Commands::Start {
            prefix,
            force,
            no_check_clean,
            no_remote,
            remote_site,
            remote_branch,
            date_fmt: _,
        } => orchestrator::start(
            ctx,
            &StartArgs {
                prefix: &prefix,
                force,
                no_check_clean,
                no_remote,
                remote_site: remote_site.as_deref(),
                remote_branch: remote_branch.as_deref(),
            },
        ),

        Commands::Hotfix {
            prefix,
            force,
            no_check_clean,
            date_fmt: _,
        } => orchestrator::hotfix(
            ctx,
            &StartArgs {
                prefix: &prefix,
                force,
                no_check_clean,
                no_remote: true,
                remote_site: Some("none"),
                remote_branch: None,
            },
        ),

        Commands::Sync {
            force,
            manual,
            message,
            date_fmt: _,
        } => {
            if manual {
                orchestrator::manual_sync(ctx, force, message.as_deref())
            } else {
                orchestrator::sync(ctx, force, message.as_deref())
            }
        }

        Commands::Release {
            force,
            message,
            date_fmt: _,
        } => orchestrator::release(ctx, force, message.as_deref()),

        Commands::Finish { force } => orchestrator::finish(ctx, force),

        Commands::Abort { force } => orchestrator::abort(ctx, force),

        Commands::Revert { force } => orchestrator::revert(ctx, force),

        Commands::Tag { name, message } => {
            let final_name = orchestrator::tag_cmd(ctx, &name, message.as_deref())?;
            println!("{final_name}");
            Ok(())
        }

        Commands::Show {
            reference,
            deploy_file_name,
            show_deploy_file,
            long_digest,
        } => {
            let path = deploy_file_name.or(show_deploy_file);
            let text = orchestrator::show(ctx, reference.as_deref(), path.as_deref(), long_digest)?;
            print!("{text}");
            Ok(())
        }

        Commands::ShowTag { name } => {
            let info = orchestrator::show_tag(ctx, &name)?;
            if info.annotated {
                println!("{} {} (annotated)", info.commit, info.sha1);
            } else {
                println!("{}", info.commit);
            }
            Ok(())
        }

        Commands::Status {
            show_step,
            show_prefix,
        } => {
            let report = orchestrator::status(ctx)?;
            if show_step {
                println!("{}", orchestrator::status_word(report.state));
            } else if show_prefix {
                println!("{}", report.prefix.unwrap_or_default());
            } else {
                println!("{}", orchestrator::status_word(report.state));
                print!("{}", report.log_text);
            }
            Ok(())
        }

        Commands::Log {
            list: _,
            list_all,
            include_branches,
            count,
            ignore_older_than,
        } => {
            let names = orchestrator::log_cmd(
                ctx,
                &LogArgs {
                    list_all,
                    include_branches,
                    count,
                    ignore_older_than,
                },
            )?;
            for name in names {
                println!("{name}");
            }
            Ok(())
        }

        Commands::Diff { range } => {
            let text = orchestrator::diff_cmd(range.as_deref(), ctx)?;
            print!("{text}");
            Ok(())
        }
    }
}
