use anyhow::Result;
use git_deploy::cli;

fn main() -> Result<()> {
    cli::handle_calls()
}
