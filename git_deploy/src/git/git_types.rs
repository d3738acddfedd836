use std::io;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("not inside a git repository")]
    NotARepo,

    #[error("git failed to execute: {command}\n\nstdout:\n{0}\nstderr:\n{1}", output.stdout, output.stderr)]
    ExecError { command: String, output: GitOutput },

    #[error("git exited with unexpected status {code} for: {command}\n\nstdout:\n{0}\nstderr:\n{1}", output.stdout, output.stderr)]
    UnexpectedExit {
        command: String,
        code: i32,
        output: GitOutput,
    },

    #[error("git was terminated by signal {signal}")]
    Signalled { signal: i32, coredump: bool },

    #[error("git failed to start")]
    IoError(#[from] io::Error),

    #[error("could not resolve '{reference}' to a commit")]
    RefNotFound { reference: String },

    #[error("failed to create tag '{name}': git reported output on a normally-silent operation\n{0}\n{1}", output.stdout, output.stderr)]
    TagCreationFailed { name: String, output: GitOutput },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RefCategory {
    Branch,
    Tag,
    Stash,
    Bisect,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RefType {
    Local,
    Remote,
    Object,
    Symbolic,
    Stash,
    Bisect,
}

/// Which directory under `.git/refs` (or the synthetic `refs/stash` /
/// `refs/bisect/...` namespaces) a ref entry was classified from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RefsDir {
    Heads,
    Remotes,
    Tags,
    Stash,
    Bisect,
}
