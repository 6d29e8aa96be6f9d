//! `git` command-line adapter

use crate::vcs::{ChangeKind, FileChange, TrackedFile, VcsError, VersionControl};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// [`VersionControl`] backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    binary: String,
}

impl GitCli {
    /// Adapter for the repository at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            binary: "git".to_string(),
        }
    }

    /// Use a different git executable
    #[inline]
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Repository root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        debug!(args = ?args, "running git");
        let output = Command::new(&self.binary)
            .arg("-c")
            .arg("core.quotePath=false")
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn count_lines(&self, path: &str) -> u64 {
        match std::fs::read(self.root.join(path)) {
            Ok(bytes) if !bytes.contains(&0) => count_newlines(&bytes),
            _ => 0,
        }
    }
}

impl VersionControl for GitCli {
    fn resolve(&self, reference: &str) -> Result<String, VcsError> {
        let spec = format!("{reference}^{{commit}}");
        self.run(&["rev-parse", "--verify", "--quiet", &spec])
            .map(|out| out.trim().to_string())
            .map_err(|_| VcsError::UnknownRef(reference.to_string()))
    }

    fn tracked_files(&self, reference: &str) -> Result<Vec<TrackedFile>, VcsError> {
        let listing = self.run(&["ls-tree", "-r", "--name-only", reference])?;
        Ok(listing
            .lines()
            .filter(|line| !line.is_empty())
            .map(|path| TrackedFile::new(path, self.count_lines(path)))
            .collect())
    }

    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileChange>, VcsError> {
        let status = self.run(&["diff", "--no-renames", "--name-status", from, to])?;
        let numstat = self.run(&["diff", "--no-renames", "--numstat", from, to])?;
        Ok(merge_diff(
            &parse_name_status(&status)?,
            &parse_numstat(&numstat)?,
        ))
    }
}

fn count_newlines(bytes: &[u8]) -> u64 {
    let newlines = bytes.iter().filter(|b| **b == b'\n').count() as u64;
    if bytes.last().is_some_and(|b| *b != b'\n') {
        newlines + 1
    } else {
        newlines
    }
}

/// Parse `git diff --name-status` output
pub(crate) fn parse_name_status(output: &str) -> Result<Vec<(ChangeKind, String)>, VcsError> {
    let mut entries = Vec::new();
    for line in output.lines().filter(|l| !l.is_empty()) {
        let (code, path) = line.split_once('\t').ok_or_else(|| VcsError::Parse {
            command: "git diff --name-status".to_string(),
            line: line.to_string(),
        })?;
        let kind = match code.chars().next() {
            Some('A') => ChangeKind::Added,
            Some('D') => ChangeKind::Deleted,
            // M, T (type change) and U (unmerged) all mean different content
            Some('M' | 'T' | 'U') => ChangeKind::Modified,
            _ => {
                return Err(VcsError::Parse {
                    command: "git diff --name-status".to_string(),
                    line: line.to_string(),
                })
            }
        };
        entries.push((kind, path.to_string()));
    }
    Ok(entries)
}

/// Parse `git diff --numstat` output; `None` marks a binary file
pub(crate) fn parse_numstat(output: &str) -> Result<HashMap<String, Option<(u64, u64)>>, VcsError> {
    let mut stats = HashMap::new();
    for line in output.lines().filter(|l| !l.is_empty()) {
        let parse_err = || VcsError::Parse {
            command: "git diff --numstat".to_string(),
            line: line.to_string(),
        };
        let mut fields = line.splitn(3, '\t');
        let added = fields.next().ok_or_else(parse_err)?;
        let removed = fields.next().ok_or_else(parse_err)?;
        let path = fields.next().ok_or_else(parse_err)?;
        let counts = if added == "-" || removed == "-" {
            None
        } else {
            Some((
                added.parse().map_err(|_| parse_err())?,
                removed.parse().map_err(|_| parse_err())?,
            ))
        };
        stats.insert(path.to_string(), counts);
    }
    Ok(stats)
}

fn merge_diff(
    status: &[(ChangeKind, String)],
    numstat: &HashMap<String, Option<(u64, u64)>>,
) -> Vec<FileChange> {
    status
        .iter()
        .map(|(kind, path)| match numstat.get(path) {
            Some(Some((added, removed))) => FileChange::text(path, *kind, *added, *removed),
            Some(None) => FileChange::binary(path, *kind),
            // mode-only changes have no numstat line
            None => FileChange::text(path, *kind, 0, 0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_status_parses_kinds() {
        let parsed = parse_name_status("M\tsrc/x.src\nD\ty.src\nA\tnew file.rs\n").unwrap();
        assert_eq!(
            parsed,
            vec![
                (ChangeKind::Modified, "src/x.src".to_string()),
                (ChangeKind::Deleted, "y.src".to_string()),
                (ChangeKind::Added, "new file.rs".to_string()),
            ]
        );
    }

    #[test]
    fn name_status_rejects_garbage() {
        assert!(parse_name_status("no tab here").is_err());
        assert!(parse_name_status("R100\ta\tb").is_err());
    }

    #[test]
    fn numstat_marks_binary() {
        let stats = parse_numstat("10\t5\tx.src\n-\t-\timg.png\n").unwrap();
        assert_eq!(stats["x.src"], Some((10, 5)));
        assert_eq!(stats["img.png"], None);
    }

    #[test]
    fn merge_attaches_counts() {
        let status = parse_name_status("M\tx.src\nM\timg.png\nD\ty.src\n").unwrap();
        let stats = parse_numstat("10\t5\tx.src\n-\t-\timg.png\n0\t40\ty.src\n").unwrap();
        let merged = merge_diff(&status, &stats);
        assert_eq!(merged[0].changed_lines(), 15);
        assert!(merged[1].binary);
        assert_eq!(merged[2].removed, 40);
    }

    #[test]
    fn newline_counting_handles_trailing_line() {
        assert_eq!(count_newlines(b"a\nb\n"), 2);
        assert_eq!(count_newlines(b"a\nb"), 2);
        assert_eq!(count_newlines(b""), 0);
    }
}
