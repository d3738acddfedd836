use clap::CommandFactory;
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let version = env::var("CARGO_PKG_VERSION").unwrap();
    let version: &'static str = Box::leak(version.into_boxed_str());

    let workspace_root = out_dir.join("../../../../../");
    let man_dir = workspace_root.join("man").join("man1");
    let docs_dir = workspace_root.join("docs");

    fs::create_dir_all(&man_dir)?;
    fs::create_dir_all(&docs_dir)?;

    let mut cmd = git_deploy_cli_types::Cli::command();
    cmd = cmd.version(version);
    let man = clap_mangen::Man::new(cmd.clone());
    let mut buffer: Vec<u8> = Default::default();
    man.render(&mut buffer)?;
    fs::write(man_dir.join("git-deploy.1"), &buffer)?;

    for subcmd in cmd.get_subcommands() {
        let man = clap_mangen::Man::new(subcmd.clone());
        let mut buffer: Vec<u8> = Default::default();
        man.render(&mut buffer)?;
        let subcmd_name = subcmd.get_name();
        fs::write(man_dir.join(format!("git-deploy-{subcmd_name}.1")), &buffer)?;
    }

    let main_markdown = clap_markdown::help_markdown::<git_deploy_cli_types::Cli>();
    fs::write(docs_dir.join("manpage.md"), &main_markdown)?;

    println!("cargo:rerun-if-changed=../cli_types/src/lib.rs");

    Ok(())
}
