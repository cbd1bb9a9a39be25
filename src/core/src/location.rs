//! Source locations within a Dockerfile.
//!
//! Every instruction, error, and lint warning carries a range back to the
//! file it came from so hosts can underline the offending line.

use serde::{Deserialize, Serialize};

/// A position in the source file. Lines are 1-based, columns 0-based,
/// matching the conventions of the upstream Dockerfile tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A half-open range of source positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

impl SourceRange {
    /// Range covering a whole single line.
    pub fn line(line: u32) -> Self {
        SourceRange {
            start: Position { line, column: 0 },
            end: Position { line, column: 0 },
        }
    }

    /// Range spanning from the start of `first` to the end of `last`.
    pub fn span(first: SourceRange, last: SourceRange) -> Self {
        SourceRange {
            start: first.start,
            end: last.end,
        }
    }
}

impl std::fmt::Display for SourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start.line == self.end.line {
            write!(f, "line {}", self.start.line)
        } else {
            write!(f, "lines {}-{}", self.start.line, self.end.line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_range_display() {
        assert_eq!(SourceRange::line(4).to_string(), "line 4");
    }

    #[test]
    fn test_multi_line_range_display() {
        let range = SourceRange::span(SourceRange::line(2), SourceRange::line(5));
        assert_eq!(range.to_string(), "lines 2-5");
    }
}
