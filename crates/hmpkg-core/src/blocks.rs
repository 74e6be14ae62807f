use std::collections::HashSet;
use std::ops::Range;

use crate::lines::leading_whitespace;

pub const PACKAGES_MARKER: &str = ".packages";
pub const SYSTEM_PACKAGES_MARKER: &str = ".systemPackages";
pub const SYSTEM_PACKAGE_TYPE: &str = "system";
pub const CLOSING_MARKER: &str = "];";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("duplicate package block of type '{0}' is not supported")]
    DuplicateType(String),
}

/// One `<type>.packages = [ ... ];` region of a configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBlock {
    pub package_type: String,
    /// First line after the opening marker.
    pub start_line: usize,
    /// Last line before the closing marker. Equals `start_line - 1` for an empty body.
    pub end_line: usize,
    pub start_indent: usize,
}

impl PackageBlock {
    /// Body lines as a half-open range, empty when the closer follows the opener.
    pub fn body(&self) -> Range<usize> {
        self.start_line..self.end_line + 1
    }

    pub fn entry_indent(&self) -> String {
        " ".repeat(self.start_indent + 2)
    }
}

#[derive(Debug)]
enum ScanState {
    Searching,
    InBlock {
        package_type: String,
        start_indent: usize,
        start_line: usize,
    },
}

fn is_comment(line: &str) -> bool {
    line.trim().starts_with('#')
}

fn opening_type(line: &str) -> Option<String> {
    if let Some(pos) = line.find(PACKAGES_MARKER) {
        return Some(line[..pos].trim().to_string());
    }
    if line.contains(SYSTEM_PACKAGES_MARKER) {
        return Some(SYSTEM_PACKAGE_TYPE.to_string());
    }
    None
}

/// Finds package blocks by markers and indentation alone. A block that is still open
/// when the input ends is dropped.
pub fn locate_blocks<S: AsRef<str>>(lines: &[S]) -> Vec<PackageBlock> {
    let mut blocks = Vec::new();
    let mut state = ScanState::Searching;

    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if is_comment(line) {
            continue;
        }
        state = match state {
            ScanState::Searching => match opening_type(line) {
                Some(package_type) => ScanState::InBlock {
                    package_type,
                    start_indent: leading_whitespace(line),
                    start_line: idx + 1,
                },
                None => ScanState::Searching,
            },
            ScanState::InBlock {
                package_type,
                start_indent,
                start_line,
            } => {
                if leading_whitespace(line) == start_indent && line.contains(CLOSING_MARKER) {
                    blocks.push(PackageBlock {
                        package_type,
                        start_line,
                        end_line: idx - 1,
                        start_indent,
                    });
                    ScanState::Searching
                } else {
                    ScanState::InBlock {
                        package_type,
                        start_indent,
                        start_line,
                    }
                }
            }
        };
    }

    if let ScanState::InBlock {
        package_type,
        start_line,
        ..
    } = state
    {
        tracing::debug!(
            package_type = %package_type,
            start_line,
            "discarding unterminated package block"
        );
    }

    blocks
}

/// Rejects block sets where a package type repeats. No blocks at all is fine.
pub fn validate_blocks(blocks: &[PackageBlock]) -> Result<(), StructureError> {
    let mut seen = HashSet::new();
    for block in blocks {
        if !seen.insert(block.package_type.as_str()) {
            return Err(StructureError::DuplicateType(block.package_type.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::blocks::{locate_blocks, validate_blocks, PackageBlock, StructureError};

    fn block(package_type: &str, start: usize, end: usize, indent: usize) -> PackageBlock {
        PackageBlock {
            package_type: package_type.to_string(),
            start_line: start,
            end_line: end,
            start_indent: indent,
        }
    }

    #[test]
    fn locates_single_block_body() {
        let lines = ["home.packages = [", "  pkgs.git", "  pkgs.htop", "];"];
        let blocks = locate_blocks(&lines);
        assert_eq!(blocks, vec![block("home", 1, 2, 0)]);
        assert_eq!(blocks[0].body(), 1..3);
    }

    #[test]
    fn locates_nested_blocks_by_indent() {
        let lines = [
            "{ config, pkgs, ... }:",
            "{",
            "  home.username = \"me\";",
            "  home.packages = [",
            "    pkgs.git",
            "    (pkgs.writeShellScriptBin \"hi\" ''",
            "      echo [ hi ];",
            "    '')",
            "  ];",
            "",
            "  environment.systemPackages = with pkgs; [",
            "    vim",
            "  ];",
            "}",
        ];
        let blocks = locate_blocks(&lines);
        assert_eq!(
            blocks,
            vec![block("home", 4, 7, 2), block("system", 11, 11, 2)]
        );
    }

    #[test]
    fn packages_marker_takes_attribute_path_as_type() {
        let lines = ["  programs.foo.packages = [", "    pkgs.a", "  ];"];
        let blocks = locate_blocks(&lines);
        assert_eq!(blocks[0].package_type, "programs.foo");
    }

    #[test]
    fn empty_body_has_end_before_start() {
        let lines = ["home.packages = [", "];"];
        let blocks = locate_blocks(&lines);
        assert_eq!(blocks, vec![block("home", 1, 0, 0)]);
        assert!(blocks[0].body().is_empty());
    }

    #[test]
    fn unterminated_block_is_dropped() {
        let lines = ["home.packages = [", "  pkgs.git", "  pkgs.htop"];
        assert!(locate_blocks(&lines).is_empty());
    }

    #[test]
    fn closer_must_match_opening_indent_exactly() {
        let lines = [
            "  home.packages = [",
            "    pkgs.git",
            "];",
            "    ];",
            "  ];",
        ];
        assert_eq!(locate_blocks(&lines), vec![block("home", 1, 3, 2)]);
    }

    #[test]
    fn tab_indent_counts_like_a_space() {
        let lines = ["\thome.packages = [", "\t\tpkgs.git", " ];"];
        assert_eq!(locate_blocks(&lines), vec![block("home", 1, 1, 1)]);
    }

    #[test]
    fn commented_markers_are_ignored() {
        let lines = [
            "# home.packages = [",
            "home.packages = [",
            "  pkgs.git",
            "# ];",
            "];",
        ];
        assert_eq!(locate_blocks(&lines), vec![block("home", 2, 3, 0)]);
    }

    #[test]
    fn validate_accepts_empty_and_distinct_types() {
        assert_eq!(validate_blocks(&[]), Ok(()));
        assert_eq!(
            validate_blocks(&[block("home", 1, 2, 0), block("system", 5, 6, 0)]),
            Ok(())
        );
    }

    #[test]
    fn validate_rejects_duplicate_types() {
        let lines = [
            "home.packages = [",
            "  pkgs.git",
            "];",
            "home.packages = [",
            "  pkgs.htop",
            "];",
        ];
        let blocks = locate_blocks(&lines);
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            validate_blocks(&blocks),
            Err(StructureError::DuplicateType("home".to_string()))
        );
    }
}
