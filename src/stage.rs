//! Staging of report files into the working directory.
//!
//! Refreshing rewrites a workbook in place, so the pipeline only ever touches
//! copies. Staging is flat (no recursion), overwrites same-named files, and
//! leaves files that have disappeared from the source untouched.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};

/// Copies every regular file in `source` into `destination`.
///
/// Returns the staged paths in file-name order.
pub fn stage_files(source: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(destination)
        .with_context(|| format!("Creating staging directory {destination:?}"))?;

    let mut staged = Vec::new();
    for entry in
        fs::read_dir(source).with_context(|| format!("Listing source directory {source:?}"))?
    {
        let entry = entry.with_context(|| format!("Reading entry in {source:?}"))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("Inspecting {:?}", entry.path()))?;
        if !file_type.is_file() {
            debug!("Skipping non-file entry {:?}", entry.path());
            continue;
        }
        let target = destination.join(entry.file_name());
        fs::copy(entry.path(), &target)
            .with_context(|| format!("Copying {:?} to {target:?}", entry.path()))?;
        staged.push(target);
    }
    staged.sort();
    info!(
        "Staged {} file(s) from {source:?} into {destination:?}",
        staged.len()
    );
    Ok(staged)
}

/// Regular files in `directory` whose extension matches `extension`
/// (case-insensitive), in file-name order.
pub fn select_reports(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let wanted = extension.trim_start_matches('.');
    let mut reports = Vec::new();
    for entry in
        fs::read_dir(directory).with_context(|| format!("Listing directory {directory:?}"))?
    {
        let path = entry
            .with_context(|| format!("Reading entry in {directory:?}"))?
            .path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted));
        if matches && path.is_file() {
            reports.push(path);
        }
    }
    reports.sort();
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_flat_files_and_overwrites() {
        let root = tempdir().expect("temp dir");
        let source = root.path().join("original");
        let destination = root.path().join("source");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::create_dir_all(&destination).unwrap();
        fs::write(source.join("b.xlsx"), "new").unwrap();
        fs::write(source.join("a.txt"), "notes").unwrap();
        fs::write(source.join("nested").join("c.xlsx"), "deep").unwrap();
        fs::write(destination.join("b.xlsx"), "old").unwrap();
        fs::write(destination.join("stale.xlsx"), "stale").unwrap();

        let staged = stage_files(&source, &destination).expect("stage");

        assert_eq!(staged, vec![destination.join("a.txt"), destination.join("b.xlsx")]);
        assert_eq!(fs::read_to_string(destination.join("b.xlsx")).unwrap(), "new");
        assert!(destination.join("stale.xlsx").exists());
        assert!(!destination.join("c.xlsx").exists());
        assert!(!destination.join("nested").exists());
    }

    #[test]
    fn missing_source_is_an_error() {
        let root = tempdir().expect("temp dir");
        let err = stage_files(&root.path().join("absent"), &root.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("Listing source directory"));
    }

    #[test]
    fn selects_by_extension_case_insensitively() {
        let root = tempdir().expect("temp dir");
        fs::write(root.path().join("B.XLSX"), "").unwrap();
        fs::write(root.path().join("a.xlsx"), "").unwrap();
        fs::write(root.path().join("a.xlsx.bak"), "").unwrap();
        fs::write(root.path().join("c.csv"), "").unwrap();

        let reports = select_reports(root.path(), ".xlsx").expect("select");
        let names: Vec<_> = reports
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["B.XLSX", "a.xlsx"]);
    }
}
