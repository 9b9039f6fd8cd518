//! `pojoize scan`: list the packages and activator of class files.

use crate::output::StyledOutput;
use anyhow::Context;
use pojo_manipulator::{ClassScanner, ReferenceSet, ScanConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Scan result for one file
#[derive(Debug, Serialize)]
pub struct ScannedFile {
    /// Class path used for the scan (`org/foo/Bar.class`)
    pub path: String,
    /// What the class refers to
    pub references: ReferenceSet,
}

/// Class path of `file`: relative to `root` when given, `/`-separated
pub fn class_path(file: &Path, root: Option<&Path>) -> String {
    let relative = root
        .and_then(|root| file.strip_prefix(root).ok())
        .unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Scan every file
pub fn scan_files(
    files: &[PathBuf],
    root: Option<&Path>,
    config: &ScanConfig,
) -> anyhow::Result<Vec<ScannedFile>> {
    let scanner = ClassScanner::new(config);
    files
        .iter()
        .map(|file| {
            let bytes =
                std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
            let path = class_path(file, root);
            let references = scanner.scan(&path, &bytes)?;
            Ok(ScannedFile { path, references })
        })
        .collect()
}

pub fn execute(
    files: &[PathBuf],
    root: Option<&Path>,
    json: bool,
    config: &ScanConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let scanned = scan_files(files, root, config)?;
    if json {
        out.line(&serde_json::to_string_pretty(&scanned)?);
        return Ok(());
    }

    for file in &scanned {
        out.bold(&file.path);
        out.newline();
        for package in file.references.packages() {
            out.line(&format!("  {}", package));
        }
        if let Some(activator) = file.references.activator() {
            out.info("  activator: ");
            out.line(activator);
        }
        for warning in file.references.warnings() {
            out.warning("  warning: ");
            out.line(&warning.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_path() {
        let file = Path::new("build/classes/org/example/Foo.class");
        assert_eq!(
            class_path(file, Some(Path::new("build/classes"))),
            "org/example/Foo.class"
        );
        assert_eq!(class_path(file, None), "build/classes/org/example/Foo.class");
        assert_eq!(
            class_path(file, Some(Path::new("elsewhere"))),
            "build/classes/org/example/Foo.class"
        );
    }
}
