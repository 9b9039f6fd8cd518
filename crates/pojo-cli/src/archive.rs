//! Bundle archives (JAR files)

use crate::manifest::MANIFEST_PATH;
use anyhow::Context;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// One archive entry, fully loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub name: String,
    /// Content (empty for directories)
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    /// A file entry
    pub fn file(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Whether this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Whether this entry is a class file
    pub fn is_class(&self) -> bool {
        !self.is_dir() && self.name.ends_with(".class")
    }
}

/// Read every entry of a zip archive, in archive order
pub fn read_archive(path: &Path) -> anyhow::Result<Vec<ArchiveEntry>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a zip archive", path.display()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("cannot read entry {} of {}", i, path.display()))?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("cannot read {}", entry.name()))?;
        entries.push(ArchiveEntry {
            name: entry.name().to_string(),
            data,
        });
    }
    Ok(entries)
}

/// Write entries to a new zip archive, the manifest first
pub fn write_archive(path: &Path, entries: &[ArchiveEntry]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let (manifest, others): (Vec<&ArchiveEntry>, Vec<&ArchiveEntry>) =
        entries.iter().partition(|e| e.name == MANIFEST_PATH);

    for entry in manifest.into_iter().chain(others) {
        if entry.is_dir() {
            zip.add_directory(entry.name.as_str(), options)?;
        } else {
            zip.start_file(entry.name.as_str(), options)
                .with_context(|| format!("cannot add {}", entry.name))?;
            zip.write_all(&entry.data)?;
        }
    }
    zip.finish()?;
    Ok(())
}
