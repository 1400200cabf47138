//! Immutable description of a locked code region (spec §3.2, §4.2).

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Function,
    Method,
    Class,
    Module,
    File,
}

impl TargetKind {
    fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Function => "function",
            TargetKind::Method => "method",
            TargetKind::Class => "class",
            TargetKind::Module => "module",
            TargetKind::File => "file",
        }
    }
}

/// An addressed code region: `{kind, file_path, name, start_line, end_line,
/// ast_hash?}`. Equality is by all fields; construction validates the
/// invariants so a `SemanticTarget` in hand is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTarget {
    pub kind: TargetKind,
    pub file_path: String,
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub ast_hash: Option<String>,
}

impl SemanticTarget {
    pub fn new(
        kind: TargetKind,
        file_path: impl Into<String>,
        name: impl Into<String>,
        start_line: u32,
        end_line: u32,
        ast_hash: Option<String>,
    ) -> CoreResult<Self> {
        let file_path = file_path.into();
        let name = name.into();
        if file_path.is_empty() {
            return Err(CoreError::InvalidTarget("file_path must not be empty".to_string()));
        }
        if start_line == 0 || start_line > end_line {
            return Err(CoreError::InvalidTarget(format!(
                "invalid line range {start_line}..{end_line}"
            )));
        }
        Ok(SemanticTarget {
            kind,
            file_path,
            name,
            start_line,
            end_line,
            ast_hash,
        })
    }

    /// Canonical key identifying the addressed region; used as the lock
    /// store's secondary index key.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}-{}",
            self.kind.as_str(),
            self.file_path,
            self.name,
            self.start_line,
            self.end_line
        )
    }

    pub fn overlaps(&self, other: &SemanticTarget) -> bool {
        self.file_path == other.file_path && self.start_line <= other.end_line && other.start_line <= self.end_line
    }

    pub fn contains(&self, other: &SemanticTarget) -> bool {
        self.file_path == other.file_path && self.start_line <= other.start_line && self.end_line >= other.end_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(start: u32, end: u32) -> SemanticTarget {
        SemanticTarget::new(TargetKind::Function, "a.go", "f", start, end, None).unwrap()
    }

    #[test]
    fn rejects_empty_path() {
        assert!(SemanticTarget::new(TargetKind::File, "", "f", 1, 2, None).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(SemanticTarget::new(TargetKind::File, "a.go", "f", 10, 1, None).is_err());
    }

    #[test]
    fn rejects_zero_start_line() {
        assert!(SemanticTarget::new(TargetKind::File, "a.go", "f", 0, 1, None).is_err());
    }

    #[test]
    fn overlap_requires_same_file() {
        let a = target(1, 10);
        let b = SemanticTarget::new(TargetKind::Function, "b.go", "f", 1, 10, None).unwrap();
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn overlap_detects_intersecting_ranges() {
        let a = target(1, 10);
        let b = target(5, 15);
        let c = target(11, 20);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn containment_is_directional() {
        let outer = target(1, 100);
        let inner = target(10, 20);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }
}
