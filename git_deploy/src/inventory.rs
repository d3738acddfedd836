use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use regex::Regex;

use crate::git::git_definitions::{FIELD_SEP, RECORD_SEP, REFS_BISECT, REFS_HEADS, REFS_REMOTES, REFS_STASH, REFS_TAGS};
use crate::git::git_interop;
use crate::git::git_types::{RefCategory, RefType, RefsDir};

/// Subject/body/full-contents triple attached to annotated tags and commits.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub contents: String,
}

/// Name, email and date of a commit's author or committer.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub date: String,
}

/// One entry in the ref table, classified per the refname-prefix rules.
#[derive(Debug, Clone)]
pub struct RefEntry {
    pub refname: String,
    pub category: RefCategory,
    pub ref_type: RefType,
    /// Which `refs/` subdirectory this entry was classified from.
    pub refsdir: RefsDir,
    pub barename: String,
    /// Resolved commit object id. For an annotated tag this is the tag's
    /// target commit, not the tag object itself.
    pub commit: String,
    /// Raw object id of the ref. Differs from `commit` only for annotated tags.
    pub sha1: String,
    pub message: Option<Message>,
}

/// A commit, keyed by object id in the inventory's commit table.
#[derive(Debug, Clone, Default)]
pub struct CommitRecord {
    pub author: Identity,
    pub committer: Identity,
    pub parents: Vec<String>,
    pub tree: String,
    pub message: Message,
    /// Refnames pointing at this commit. The sole back-reference between
    /// the two tables; refs point at commits by id, never the reverse.
    pub refs: Vec<String>,
}

/// Fixed branch priority used to order `branchesReachingHead` results: named
/// branches sort before everything else, in this order, then alphabetical.
const BRANCH_PRIORITY: &[&str] = &["trunk", "master", "origin/trunk", "origin/master"];

fn date_sort_key(name: &str) -> Option<(String, String)> {
    let re = Regex::new(r"\D(20\d{6})[_-]?(\d+)?").ok()?;
    let caps = re.captures(name)?;
    let date = caps.get(1)?.as_str().to_string();
    let seq = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
    Some((date, seq))
}

/// Lazily materialized catalogue of every ref and commit in the repository,
/// built from one batched `for-each-ref` scan. Memoized for the lifetime of
/// the process; any tag-creating mutation discards it via `clear()`.
#[derive(Default)]
pub struct RefInventory {
    refs: Option<HashMap<String, RefEntry>>,
    commits: Option<HashMap<String, CommitRecord>>,
    name_to_commit_cache: HashMap<String, String>,
    name_to_sha1_cache: HashMap<String, String>,
}

impl RefInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.refs.is_some() {
            return Ok(());
        }
        let raw = git_interop::for_each_ref_raw()?;
        let (refs, commits) = parse_for_each_ref_output(&raw)?;
        self.refs = Some(refs);
        self.commits = Some(commits);
        Ok(())
    }

    fn refs(&mut self) -> Result<&HashMap<String, RefEntry>> {
        self.ensure_loaded()?;
        Ok(self.refs.as_ref().unwrap())
    }

    /// Drop all cached state: ref table, commit table, and name lookup
    /// caches. Called after every tag-creating mutation.
    pub fn clear(&mut self) {
        self.refs = None;
        self.commits = None;
        self.name_to_commit_cache.clear();
        self.name_to_sha1_cache.clear();
    }

    fn lookup_refname(&mut self, name: &str) -> Result<Option<String>> {
        let candidates = [
            format!("refs/tags/{name}"),
            format!("refs/heads/{name}"),
            format!("refs/remotes/{name}"),
            name.to_string(),
        ];
        let refs = self.refs()?;
        for candidate in &candidates {
            if let Some(entry) = refs.get(candidate) {
                return Ok(Some(entry.commit.clone()));
            }
        }
        Ok(None)
    }

    /// Resolve `name` to its commit object id. `HEAD` always shells out
    /// rather than consulting the cache, since it moves across invocations
    /// within the same long-running process.
    pub fn name_to_commit(&mut self, name: &str) -> Result<String> {
        if name == "HEAD" {
            return Ok(git_interop::resolve_to_commit("HEAD")?);
        }
        if let Some(cached) = self.name_to_commit_cache.get(name) {
            return Ok(cached.clone());
        }
        let resolved = match self.lookup_refname(name)? {
            Some(commit) => commit,
            None => git_interop::resolve_to_commit(name)?,
        };
        self.name_to_commit_cache
            .insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Resolve `name` to its raw object id (the ref's own sha1, not the
    /// dereferenced commit for annotated tags).
    pub fn name_to_sha1(&mut self, name: &str) -> Result<String> {
        if let Some(cached) = self.name_to_sha1_cache.get(name) {
            return Ok(cached.clone());
        }
        let candidates = [
            format!("refs/tags/{name}"),
            format!("refs/heads/{name}"),
            format!("refs/remotes/{name}"),
            name.to_string(),
        ];
        let resolved = {
            let refs = self.refs()?;
            candidates.iter().find_map(|c| refs.get(c)).map(|e| e.sha1.clone())
        };
        let resolved = match resolved {
            Some(sha1) => sha1,
            None => git_interop::resolve_to_object_id(name)?,
        };
        self.name_to_sha1_cache
            .insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Returns `(commit, sha1)` if `name` is an annotated tag, `None` otherwise.
    pub fn is_annotated_tag(&mut self, name: &str) -> Result<Option<(String, String)>> {
        let key = format!("refs/tags/{name}");
        let refs = self.refs()?;
        Ok(refs.get(&key).and_then(|e| {
            if e.category == RefCategory::Tag && e.ref_type == RefType::Object {
                Some((e.commit.clone(), e.sha1.clone()))
            } else {
                None
            }
        }))
    }

    /// Tag barenames sorted descending by the date embedded in their name
    /// (pattern `\D(20\d{6})[_-]?(\d+)?`); undated tags sort last,
    /// alphabetically among themselves. Ties on the date key keep the
    /// original names in alphabetical order.
    pub fn sorted_tags(&mut self) -> Result<Vec<String>> {
        let refs = self.refs()?;
        let mut tags: Vec<String> = refs
            .values()
            .filter(|e| e.category == RefCategory::Tag)
            .map(|e| e.barename.clone())
            .collect();
        tags.sort();
        tags.sort_by(|a, b| {
            let ka = date_sort_key(a);
            let kb = date_sort_key(b);
            match (ka, kb) {
                (Some(ka), Some(kb)) => kb.cmp(&ka),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.cmp(b),
            }
        });
        Ok(tags)
    }

    /// Retain names whose embedded date is `>= cutoff` (format `YYYYMMDD`);
    /// names with no embedded date are always kept.
    pub fn filter_by_date(&self, cutoff: &str, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|n| match date_sort_key(n) {
                Some((date, _)) => date.as_str() >= cutoff,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Subset of `names` whose resolved commit equals HEAD's commit.
    /// `first == true` returns at most one match.
    pub fn names_matching_head(&mut self, names: &[String], first: bool) -> Result<Vec<String>> {
        let head = self.name_to_commit("HEAD")?;
        let mut matches = Vec::new();
        for name in names {
            if self.name_to_commit(name)? == head {
                matches.push(name.clone());
                if first {
                    break;
                }
            }
        }
        Ok(matches)
    }

    /// `git branch -a --contains HEAD`, ordered by the fixed priority table
    /// first, then alphabetically.
    pub fn branches_reaching_head(&self) -> Result<Vec<String>> {
        let mut branches = git_interop::branches_containing_head()?;
        branches.sort_by_key(|b| {
            let priority = BRANCH_PRIORITY
                .iter()
                .position(|p| p == b)
                .unwrap_or(BRANCH_PRIORITY.len());
            (priority, b.clone())
        });
        Ok(branches)
    }
}

fn classify(refname: &str, tag_field: &str) -> Result<(RefCategory, RefType, RefsDir, String)> {
    if let Some(bare) = refname.strip_prefix(REFS_HEADS) {
        return Ok((RefCategory::Branch, RefType::Local, RefsDir::Heads, bare.to_string()));
    }
    if let Some(bare) = refname.strip_prefix(REFS_REMOTES) {
        return Ok((RefCategory::Branch, RefType::Remote, RefsDir::Remotes, bare.to_string()));
    }
    if let Some(bare) = refname.strip_prefix(REFS_TAGS) {
        if !tag_field.is_empty() {
            return Ok((RefCategory::Tag, RefType::Object, RefsDir::Tags, tag_field.to_string()));
        }
        return Ok((RefCategory::Tag, RefType::Symbolic, RefsDir::Tags, bare.to_string()));
    }
    if refname == REFS_STASH {
        return Ok((RefCategory::Stash, RefType::Stash, RefsDir::Stash, "stash".to_string()));
    }
    if refname.starts_with(REFS_BISECT) {
        return Ok((RefCategory::Bisect, RefType::Bisect, RefsDir::Bisect, "bisect".to_string()));
    }
    bail!("malformed or unrecognized refname: {refname}")
}

/// Index of each atom within the own/deref half of a parsed record, matching
/// the order [`git_interop::OWN_ATOMS`]/[`git_interop::DEREF_ATOMS`] are built in.
mod atom {
    pub const OBJECTNAME: usize = 0;
    pub const AUTHOR_NAME: usize = 1;
    pub const AUTHOR_EMAIL: usize = 2;
    pub const AUTHOR_DATE: usize = 3;
    pub const COMMITTER_NAME: usize = 4;
    pub const COMMITTER_EMAIL: usize = 5;
    pub const COMMITTER_DATE: usize = 6;
    pub const PARENT: usize = 7;
    pub const TREE: usize = 8;
    pub const SUBJECT: usize = 9;
    pub const BODY: usize = 10;
    pub const CONTENTS: usize = 11;
    pub const COUNT: usize = 12;
}

fn author_identity(fields: &[&str], base: usize) -> Identity {
    Identity {
        name: fields[base + atom::AUTHOR_NAME].to_string(),
        email: fields[base + atom::AUTHOR_EMAIL].to_string(),
        date: fields[base + atom::AUTHOR_DATE].to_string(),
    }
}

fn committer_identity(fields: &[&str], base: usize) -> Identity {
    Identity {
        name: fields[base + atom::COMMITTER_NAME].to_string(),
        email: fields[base + atom::COMMITTER_EMAIL].to_string(),
        date: fields[base + atom::COMMITTER_DATE].to_string(),
    }
}

fn message(fields: &[&str], base: usize) -> Message {
    Message {
        subject: fields[base + atom::SUBJECT].to_string(),
        body: fields[base + atom::BODY].to_string(),
        contents: fields[base + atom::CONTENTS].to_string(),
    }
}

fn parents(fields: &[&str], base: usize) -> Vec<String> {
    fields[base + atom::PARENT]
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn parse_for_each_ref_output(
    raw: &str,
) -> Result<(HashMap<String, RefEntry>, HashMap<String, CommitRecord>)> {
    let mut refs = HashMap::new();
    let mut commits: HashMap<String, CommitRecord> = HashMap::new();

    // refname, tag, then 12 own atoms, then 12 deref atoms.
    let own_base = 2;
    let deref_base = own_base + atom::COUNT;
    let expected_fields = deref_base + atom::COUNT;

    for record in raw.split(RECORD_SEP) {
        let record = record.trim_matches('\n');
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.split(FIELD_SEP).collect();
        if fields.len() != expected_fields {
            return Err(anyhow!(
                "unexpected for-each-ref field count ({}, wanted {expected_fields}) in record: {record:?}",
                fields.len()
            ));
        }

        let refname = fields[0];
        let tag_field = fields[1];
        let is_annotated = !tag_field.is_empty();

        let (category, ref_type, refsdir, barename) = classify(refname, tag_field)?;

        let (commit, sha1, author, committer, commit_parents, tree, commit_message) = if is_annotated {
            (
                fields[deref_base + atom::OBJECTNAME].to_string(),
                fields[own_base + atom::OBJECTNAME].to_string(),
                author_identity(&fields, deref_base),
                committer_identity(&fields, deref_base),
                parents(&fields, deref_base),
                fields[deref_base + atom::TREE].to_string(),
                message(&fields, deref_base),
            )
        } else {
            (
                fields[own_base + atom::OBJECTNAME].to_string(),
                fields[own_base + atom::OBJECTNAME].to_string(),
                author_identity(&fields, own_base),
                committer_identity(&fields, own_base),
                parents(&fields, own_base),
                fields[own_base + atom::TREE].to_string(),
                message(&fields, own_base),
            )
        };

        if commit.is_empty() {
            bail!("ref {refname} resolved to an empty commit id");
        }

        let ref_message = if is_annotated {
            Some(message(&fields, own_base))
        } else {
            None
        };

        refs.insert(
            refname.to_string(),
            RefEntry {
                refname: refname.to_string(),
                category,
                ref_type,
                refsdir,
                barename,
                commit: commit.clone(),
                sha1,
                message: ref_message,
            },
        );

        let commit_entry = commits.entry(commit.clone()).or_insert_with(|| CommitRecord {
            author,
            committer,
            parents: commit_parents,
            tree,
            message: commit_message,
            refs: Vec::new(),
        });
        commit_entry.refs.push(refname.to_string());
    }

    Ok((refs, commits))
}
