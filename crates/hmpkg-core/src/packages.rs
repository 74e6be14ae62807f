use indexmap::IndexSet;
use std::path::Path;

use crate::blocks::{locate_blocks, validate_blocks, PackageBlock, StructureError};
use crate::lines::{read_lines, replace_span, write_lines, LineError};

pub const NIXPKGS_PREFIX: &str = "nixpkgs";
pub const PKGS_PREFIX: &str = "pkgs";
pub const EMPTY_PLACEHOLDER: &str = "#empty";

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Lines(#[from] LineError),
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("no package block of type '{0}' found")]
    MissingBlock(String),
}

/// Structural lines (comments, grouping punctuation, blanks) are not packages.
pub fn is_package_entry(trimmed: &str) -> bool {
    !trimmed.is_empty()
        && !trimmed.starts_with('#')
        && !trimmed.contains(['(', ')', '[', ']'])
}

/// Rewrites a leading `nixpkgs` into `pkgs`; everything else is taken as written.
pub fn normalize_package(name: &str) -> String {
    match name.strip_prefix(NIXPKGS_PREFIX) {
        Some(rest) => format!("{}{}", PKGS_PREFIX, rest),
        None => name.to_string(),
    }
}

/// A configuration file held in memory together with its validated package blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    lines: Vec<String>,
    blocks: Vec<PackageBlock>,
}

impl PackageFile {
    pub fn load(path: &Path) -> Result<PackageFile, PackageError> {
        let lines = read_lines(path)?;
        PackageFile::from_lines(lines)
    }

    pub fn from_lines(lines: Vec<String>) -> Result<PackageFile, PackageError> {
        let blocks = locate_blocks(&lines);
        validate_blocks(&blocks)?;
        tracing::debug!(blocks = blocks.len(), "parsed package blocks");
        Ok(PackageFile { lines, blocks })
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn blocks(&self) -> &[PackageBlock] {
        &self.blocks
    }

    pub fn block(&self, package_type: &str) -> Option<&PackageBlock> {
        self.blocks
            .iter()
            .find(|block| block.package_type == package_type)
    }

    /// Distinct package types in the order their blocks appear.
    pub fn package_types(&self) -> Vec<String> {
        let types: IndexSet<&str> = self
            .blocks
            .iter()
            .map(|block| block.package_type.as_str())
            .collect();
        types.into_iter().map(str::to_string).collect()
    }

    pub fn packages(&self, package_type: &str) -> Vec<String> {
        let mut packages = Vec::new();
        for block in self
            .blocks
            .iter()
            .filter(|block| block.package_type == package_type)
        {
            for line in &self.lines[block.body()] {
                let trimmed = line.trim();
                if is_package_entry(trimmed) {
                    packages.push(trimmed.to_string());
                }
            }
        }
        packages
    }

    /// Rewrites the block of `package_type` and returns the list it now holds.
    pub fn add(
        &mut self,
        package_type: &str,
        names: &[String],
        overwrite: bool,
    ) -> Result<Vec<String>, PackageError> {
        let block = self
            .block(package_type)
            .cloned()
            .ok_or_else(|| PackageError::MissingBlock(package_type.to_string()))?;

        let mut merged: Vec<String> = names.iter().map(|name| normalize_package(name)).collect();
        if merged.is_empty() {
            merged.push(EMPTY_PLACEHOLDER.to_string());
        }
        if !overwrite {
            merged.extend(self.packages(package_type));
        }
        let unique: IndexSet<String> = merged.into_iter().collect();
        let packages: Vec<String> = unique.into_iter().collect();

        let indent = block.entry_indent();
        let mut replacement = Vec::with_capacity(packages.len() + 1);
        replacement.push(String::new());
        replacement.extend(packages.iter().map(|pkg| format!("{}{}", indent, pkg)));
        replace_span(&mut self.lines, block.body(), replacement)?;
        self.blocks = locate_blocks(&self.lines);

        tracing::debug!(
            package_type,
            overwrite,
            count = packages.len(),
            "rewrote package block"
        );
        Ok(packages)
    }

    /// Removes `names` from one type, or from every type when none is given, and
    /// returns what was actually removed.
    pub fn delete(
        &mut self,
        names: &[String],
        package_type: Option<&str>,
    ) -> Result<Vec<String>, PackageError> {
        let types = match package_type {
            Some(package_type) => vec![package_type.to_string()],
            None => self.package_types(),
        };

        let mut deleted = Vec::new();
        for package_type in types {
            if self.block(&package_type).is_none() {
                tracing::debug!(package_type = %package_type, "no block to delete from");
                continue;
            }
            let existing = self.packages(&package_type);
            let to_delete: Vec<String> = names
                .iter()
                .filter(|name| existing.contains(name))
                .cloned()
                .collect();
            let remaining: Vec<String> = existing
                .into_iter()
                .filter(|pkg| !to_delete.contains(pkg))
                .collect();
            self.add(&package_type, &remaining, true)?;
            deleted.extend(to_delete);
        }
        Ok(deleted)
    }

    pub fn save(&self, path: &Path) -> Result<(), PackageError> {
        write_lines(path, &self.lines)?;
        Ok(())
    }
}

pub fn read_packages(path: &Path, package_type: &str) -> Result<Vec<String>, PackageError> {
    Ok(PackageFile::load(path)?.packages(package_type))
}

pub fn add_packages(
    path: &Path,
    package_type: &str,
    names: &[String],
    overwrite: bool,
) -> Result<Vec<String>, PackageError> {
    let mut file = PackageFile::load(path)?;
    let packages = file.add(package_type, names, overwrite)?;
    file.save(path)?;
    Ok(packages)
}

pub fn delete_packages(
    path: &Path,
    names: &[String],
    package_type: Option<&str>,
) -> Result<Vec<String>, PackageError> {
    let mut file = PackageFile::load(path)?;
    let deleted = file.delete(names, package_type)?;
    file.save(path)?;
    Ok(deleted)
}
