//! Deterministic resource names and tag lists.
//!
//! The engine identifies resources by name across applies, so everything
//! here is a pure function of its inputs.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ComponentError, ComponentResult};

/// Minimum number of digits in an ordinal suffix.
pub const MIN_SUFFIX_WIDTH: usize = 2;

/// Tag added to every resource built by this crate.
pub const MANAGED_BY_TAG: &str = "managed-by:ostack";

/// Zero-padded ordinal suffix with at least two digits (`1` → `"01"`).
pub fn ordinal_suffix(counter: usize) -> String {
    format!("{:0width$}", counter, width = MIN_SUFFIX_WIDTH)
}

/// Position of a resource among its siblings.
///
/// The suffix depends only on the index, so growing a group never renames
/// its existing members. Past `99` the suffix gains a digit and plain
/// string order no longer matches numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ordinal {
    index: usize,
}

impl Ordinal {
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn suffix(&self) -> String {
        ordinal_suffix(self.index)
    }

    /// Ordinals for every member of a group of `total` siblings.
    pub fn all(total: usize) -> impl Iterator<Item = Ordinal> {
        (0..total).map(Ordinal::new)
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

fn non_alphanumeric() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-zA-Z0-9]").expect("static pattern is valid"))
}

/// Replace every non-alphanumeric character with `-`.
pub fn sanitize(value: &str) -> String {
    non_alphanumeric().replace_all(value, "-").into_owned()
}

/// Join name segments with `-`, skipping empty ones.
pub fn join_name<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Concatenate tag lists, keeping the first occurrence of each tag.
pub fn merge_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut merged: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.into();
        if !tag.is_empty() && !merged.contains(&tag) {
            merged.push(tag);
        }
    }
    merged
}

/// Naming context shared by every component of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseContext {
    pub env: String,
    pub project: String,
    /// Extra tags added to every resource.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BaseContext {
    pub fn new(env: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            project: project.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn validate(&self) -> ComponentResult<()> {
        if self.env.trim().is_empty() {
            return Err(ComponentError::missing("base context", "env"));
        }
        if self.project.trim().is_empty() {
            return Err(ComponentError::missing("base context", "project"));
        }
        Ok(())
    }

    /// Prefix for generated names: `<project>-<env>`.
    pub fn name_prefix(&self) -> String {
        join_name(&[self.project.as_str(), self.env.as_str()])
    }

    /// Environment, project and ownership tags followed by caller tags.
    pub fn base_tags(&self) -> Vec<String> {
        merge_tags(
            [
                format!("env:{}", self.env),
                format!("project:{}", self.project),
                MANAGED_BY_TAG.to_string(),
            ]
            .into_iter()
            .chain(self.tags.iter().cloned()),
        )
    }

    /// Tags for one named resource: base tags, its name, then `extra`.
    pub fn tags_for(&self, name: &str, extra: &[String]) -> Vec<String> {
        merge_tags(
            self.base_tags()
                .into_iter()
                .chain(std::iter::once(name.to_string()))
                .chain(extra.iter().cloned()),
        )
    }
}
