//! Test suite models
//!
//! Invocation targets and the ordered suite list discovered from them.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suite discovery errors
#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Target not found: {0}")]
    NotFound(PathBuf),

    #[error("No .{extension} suite files under {dir}")]
    Empty { dir: PathBuf, extension: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the runner was asked to execute
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every suite file under a directory, recursively
    Directory(PathBuf),
    /// One suite file
    File(PathBuf),
}

/// One suite definition file
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Suite {
    pub path: PathBuf,

    /// Display name (file stem)
    pub name: String,

    /// Unique key used to name staged artifacts
    pub key: String,
}

impl Suite {
    /// Suite named and keyed by its file stem
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = stem(&path);
        Self {
            key: sanitize(&name),
            name,
            path,
        }
    }

    /// Suite keyed by its location relative to `root`
    fn under(root: &Path, path: PathBuf) -> Self {
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path.as_path())
            .with_extension("");
        let key = relative
            .components()
            .map(|c| sanitize(&c.as_os_str().to_string_lossy()))
            .collect::<Vec<_>>()
            .join(".");

        Self {
            name: stem(&path),
            key,
            path,
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Enumerate the suites of a target, in lexical path order
pub fn discover(target: &Target, extension: &str) -> Result<Vec<Suite>, SuiteError> {
    match target {
        Target::File(path) => {
            if !path.is_file() {
                return Err(SuiteError::NotFound(path.clone()));
            }
            Ok(vec![Suite::from_path(path.clone())])
        }
        Target::Directory(dir) => {
            if !dir.is_dir() {
                return Err(SuiteError::NotFound(dir.clone()));
            }

            let mut files = Vec::new();
            collect_files(dir, extension, &mut files)?;
            files.sort();

            if files.is_empty() {
                return Err(SuiteError::Empty {
                    dir: dir.clone(),
                    extension: extension.to_string(),
                });
            }

            let mut suites: Vec<Suite> = files.into_iter().map(|f| Suite::under(dir, f)).collect();
            dedupe_keys(&mut suites);
            Ok(suites)
        }
    }
}

/// Suffix `-2`, `-3`, ... onto keys that sanitize to one already taken
fn dedupe_keys(suites: &mut [Suite]) {
    let mut taken = HashSet::new();
    for suite in suites.iter_mut() {
        if taken.insert(suite.key.clone()) {
            continue;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", suite.key, n);
            if taken.insert(candidate.clone()) {
                suite.key = candidate;
                break;
            }
            n += 1;
        }
    }
}

fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> Result<(), SuiteError> {
    let entries = fs::read_dir(dir).map_err(|source| SuiteError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let path = entry
            .map_err(|source| SuiteError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();

        if path.is_dir() {
            collect_files(&path, extension, out)?;
        } else if path.extension().is_some_and(|e| e == extension) {
            out.push(path);
        }
    }

    Ok(())
}
