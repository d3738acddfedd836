/// Minimum git version required for the `for-each-ref` format fields and
/// `update-ref --stdin` syntax this crate relies on.
pub const EXPECTED_VERSION: (i32, i32, i32) = (2, 20, 0);

/// Byte sequence separating fields within a single `for-each-ref` record.
pub const FIELD_SEP: &str = "\x01\x01\x01";

/// Byte sequence separating records in the `for-each-ref` output.
pub const RECORD_SEP: &str = "\x00\x00\x00";

/// Canonical ref prefixes used to classify `for-each-ref` output.
pub const REFS_HEADS: &str = "refs/heads/";
pub const REFS_REMOTES: &str = "refs/remotes/";
pub const REFS_TAGS: &str = "refs/tags/";
pub const REFS_STASH: &str = "refs/stash";
pub const REFS_BISECT: &str = "refs/bisect/";

/// The standard git remote name consulted by default.
pub const GIT_ORIGIN: &str = "origin";
