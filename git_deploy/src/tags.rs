use anyhow::Result;
use chrono::Local;

use crate::git::git_interop;
use crate::inventory::RefInventory;

/// Appends one letter to a `_`-joined suffix string, carrying past `Z` into
/// an extra letter the way Perl's magical string increment does (`Z` -> `AA`,
/// `AZ` -> `BA`, `ZZ` -> `AAA`). Implemented as an explicit loop rather than
/// leaning on any language string-increment operator.
fn increment_suffix(suffix: &str) -> String {
    let mut chars: Vec<char> = suffix.chars().collect();
    let mut i = chars.len();
    loop {
        if i == 0 {
            chars.insert(0, 'A');
            break;
        }
        i -= 1;
        if chars[i] == 'Z' {
            chars[i] = 'A';
        } else {
            chars[i] = ((chars[i] as u8) + 1) as char;
            break;
        }
    }
    chars.into_iter().collect()
}

/// Finds the first `<name>_<suffix>` not already resolvable to a commit,
/// starting the suffix search at `A` and incrementing past `Z` into `AA`.
fn next_free_name(inventory: &mut RefInventory, name: &str) -> Result<String> {
    let mut suffix = "A".to_string();
    loop {
        let candidate = format!("{name}_{suffix}");
        if inventory.name_to_commit(&candidate).is_err() {
            return Ok(candidate);
        }
        suffix = increment_suffix(&suffix);
    }
}

/// Creates a tag named `name`, or `<name>_A`, `<name>_B`, ... if `name`
/// already resolves to a commit. `%TAG` in each message line is replaced
/// with the final chosen name. Returns that final name on success and
/// invalidates the ref inventory, since the tag table it cached is now
/// stale.
pub fn make_tag(
    inventory: &mut RefInventory,
    name: &str,
    message_lines: &[String],
) -> Result<String> {
    let final_name = if inventory.name_to_commit(name).is_ok() {
        next_free_name(inventory, name)?
    } else {
        name.to_string()
    };

    let substituted: Vec<String> = message_lines
        .iter()
        .map(|line| line.replace("%TAG", &final_name))
        .collect();

    git_interop::create_tag(&final_name, &substituted)?;
    inventory.clear();
    Ok(final_name)
}

/// `<prefix>-<now formatted with strftime_fmt>`, delegated to `make_tag`.
pub fn make_dated_tag(
    inventory: &mut RefInventory,
    prefix: &str,
    strftime_fmt: &str,
    message_lines: &[String],
) -> Result<String> {
    let name = format!("{prefix}-{}", Local::now().format(strftime_fmt));
    make_tag(inventory, &name, message_lines)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::dir_with_repo;
    use serial_test::serial;
    use std::env::set_current_dir;

    #[test]
    fn test_increment_suffix() {
        assert_eq!(increment_suffix("A"), "B");
        assert_eq!(increment_suffix("Z"), "AA");
        assert_eq!(increment_suffix("AZ"), "BA");
        assert_eq!(increment_suffix("ZZ"), "AAA");
    }

    #[test]
    #[serial]
    fn test_make_tag_no_collision() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();
        let name = make_tag(&mut inv, "release", &["hello".to_string()]).unwrap();
        assert_eq!(name, "release");
    }

    #[test]
    #[serial]
    fn test_make_tag_collision_suffix() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();
        make_tag(&mut inv, "release", &["first".to_string()]).unwrap();
        let name = make_tag(&mut inv, "release", &["second".to_string()]).unwrap();
        assert_eq!(name, "release_A");
    }

    #[test]
    #[serial]
    fn test_make_tag_substitutes_percent_tag() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();
        let name = make_tag(&mut inv, "release", &["deployed %TAG".to_string()]).unwrap();
        assert_eq!(name, "release");
    }

    #[test]
    #[serial]
    fn test_make_dated_tag() {
        let repo = dir_with_repo();
        set_current_dir(repo.path()).unwrap();
        let mut inv = RefInventory::new();
        let name = make_dated_tag(&mut inv, "deploy", "%Y%m%d", &["msg".to_string()]).unwrap();
        assert!(name.starts_with("deploy-"));
    }
}
