//! Sheet discovery: resolve an import path to the sheet files under it.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, SheetsConnectorConfig};
use crate::sheet_reader::SheetFormat;

/// Files to import, in a stable order.
///
/// An explicit `path` wins over `[connectors.sheets].root`. A file path is
/// imported as-is; a directory is walked with the connector's globs.
pub fn discover_sheets(config: &Config, path: Option<&Path>) -> Result<Vec<PathBuf>> {
    let connector = config
        .connectors
        .sheets
        .clone()
        .unwrap_or_default();

    let root = match path {
        Some(p) => p.to_path_buf(),
        None => match &config.connectors.sheets {
            Some(c) => c.root.clone(),
            None => bail!("No import path given and [connectors.sheets] is not configured"),
        },
    };

    if !root.exists() {
        bail!("Import path does not exist: {}", root.display());
    }

    if root.is_file() {
        if SheetFormat::from_path(&root).is_none() {
            bail!(
                "Unsupported sheet format: {} (expected .csv, .tsv or .xlsx)",
                root.display()
            );
        }
        return Ok(vec![root]);
    }

    scan_directory(&root, &connector)
}

pub fn scan_directory(root: &Path, connector: &SheetsConnectorConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&connector.include_globs)?;

    let mut excludes = vec!["**/.git/**".to_string(), "**/~$*".to_string()];
    excludes.extend(connector.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(connector.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        if SheetFormat::from_path(path).is_none() {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, rel: &str) {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, "a,b\n1,2\n").unwrap();
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "b/hosts.csv");
        touch(tmp.path(), "a/ports.tsv");
        touch(tmp.path(), "a/notes.txt");
        touch(tmp.path(), "a/~$locked.xlsx");
        touch(tmp.path(), "skip/old.csv");

        let mut connector = SheetsConnectorConfig::default();
        connector.exclude_globs = vec!["skip/**".to_string()];
        let found = scan_directory(tmp.path(), &connector).unwrap();
        let rel: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rel, vec!["a/ports.tsv", "b/hosts.csv"]);
    }
}
