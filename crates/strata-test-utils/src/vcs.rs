use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use strata_delta::{ChangeKind, FileChange, TrackedFile, VcsError, VersionControl};

type Snapshot = BTreeMap<String, String>;

/// Version control over in-memory snapshots
///
/// Each commit is a full `path → content` map. Diffs count changed lines as a
/// multiset difference of the two files' lines.
#[derive(Debug, Default)]
pub struct InMemoryVcs {
    commits: RwLock<BTreeMap<String, Snapshot>>,
    aliases: RwLock<BTreeMap<String, String>>,
    broken_diffs: RwLock<BTreeSet<String>>,
}

impl InMemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit; `HEAD` moves to it
    pub fn commit<P: AsRef<str>, C: AsRef<str>>(&self, id: &str, files: &[(P, C)]) {
        let snapshot = files
            .iter()
            .map(|(p, c)| (p.as_ref().to_string(), c.as_ref().to_string()))
            .collect();
        self.commits.write().insert(id.to_string(), snapshot);
        self.alias("HEAD", id);
    }

    /// Record a commit derived from `base` with edits applied
    ///
    /// `None` content deletes the path.
    pub fn commit_from(&self, id: &str, base: &str, edits: &[(&str, Option<&str>)]) {
        let mut snapshot = self.commits.read().get(base).cloned().unwrap_or_default();
        for (path, content) in edits {
            match content {
                Some(c) => {
                    snapshot.insert((*path).to_string(), (*c).to_string());
                }
                None => {
                    snapshot.remove(*path);
                }
            }
        }
        self.commits.write().insert(id.to_string(), snapshot);
        self.alias("HEAD", id);
    }

    /// Point a symbolic name at a commit
    pub fn alias(&self, name: &str, id: &str) {
        self.aliases.write().insert(name.to_string(), id.to_string());
    }

    /// Make every diff from `id` fail, as if its history were rewritten away
    pub fn break_diffs_from(&self, id: &str) {
        self.broken_diffs.write().insert(id.to_string());
    }

    fn snapshot(&self, reference: &str) -> Result<Snapshot, VcsError> {
        let id = self.resolve(reference)?;
        self.commits
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| VcsError::UnknownRef(reference.to_string()))
    }
}

/// Numbered file body: `lines` distinct lines tagged with `seed`
pub fn body(seed: &str, lines: usize) -> String {
    (0..lines).map(|i| format!("{seed} line {i}\n")).collect()
}

fn line_delta(old: &str, new: &str) -> (u64, u64) {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for line in old.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    for line in new.lines() {
        *counts.entry(line).or_default() += 1;
    }
    counts.values().fold((0, 0), |(added, removed), &n| {
        if n > 0 {
            (added + n.unsigned_abs(), removed)
        } else {
            (added, removed + n.unsigned_abs())
        }
    })
}

impl VersionControl for InMemoryVcs {
    fn resolve(&self, reference: &str) -> Result<String, VcsError> {
        if self.commits.read().contains_key(reference) {
            return Ok(reference.to_string());
        }
        self.aliases
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| VcsError::UnknownRef(reference.to_string()))
    }

    fn tracked_files(&self, reference: &str) -> Result<Vec<TrackedFile>, VcsError> {
        Ok(self
            .snapshot(reference)?
            .iter()
            .map(|(path, content)| TrackedFile::new(path.clone(), content.lines().count() as u64))
            .collect())
    }

    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileChange>, VcsError> {
        let from_id = self.resolve(from)?;
        if self.broken_diffs.read().contains(&from_id) {
            return Err(VcsError::CommandFailed {
                command: format!("diff {from_id} {to}"),
                status: "exit status: 128".into(),
                stderr: format!("bad object {from_id}"),
            });
        }
        let old = self.snapshot(&from_id)?;
        let new = self.snapshot(to)?;
        let mut changes = Vec::new();
        for (path, content) in &new {
            match old.get(path) {
                None => changes.push(FileChange::text(path.clone(), ChangeKind::Added, content.lines().count() as u64, 0)),
                Some(prior) if prior != content => {
                    let (added, removed) = line_delta(prior, content);
                    changes.push(FileChange::text(path.clone(), ChangeKind::Modified, added, removed));
                }
                Some(_) => {}
            }
        }
        for (path, content) in &old {
            if !new.contains_key(path) {
                changes.push(FileChange::text(path.clone(), ChangeKind::Deleted, 0, content.lines().count() as u64));
            }
        }
        Ok(changes)
    }
}
