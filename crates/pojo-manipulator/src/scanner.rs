//! Class reference scanner
//!
//! Walks the raw bytes of a class file to find the packages it refers to and
//! whether it implements the activator marker interface. The walk is
//! tolerant: after a valid magic number, any structural problem ends the
//! walk and is reported as a [`ScanWarning`] next to whatever was found so
//! far.

use crate::config::ScanConfig;
use pojo_bytecode::class::MAGIC;
use pojo_bytecode::constants::{
    TAG_CLASS, TAG_DOUBLE, TAG_DYNAMIC, TAG_FIELDREF, TAG_FLOAT, TAG_INTEGER,
    TAG_INTERFACE_METHODREF, TAG_INVOKE_DYNAMIC, TAG_LONG, TAG_METHODREF, TAG_METHOD_HANDLE,
    TAG_METHOD_TYPE, TAG_MODULE, TAG_NAME_AND_TYPE, TAG_PACKAGE, TAG_STRING, TAG_UTF8,
};
use pojo_bytecode::descriptor::referenced_classes;
use pojo_bytecode::encoder::decode_modified_utf8;
use pojo_bytecode::{BytecodeReader, DecodeError};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Fatal scan errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// The data does not start with `0xCAFEBABE`
    #[error("{path} is not a class file ({})", describe_magic(.magic))]
    NotAClassFile {
        /// Path given to the scanner
        path: String,
        /// The first four bytes, when there are four
        magic: Option<u32>,
    },
}

fn describe_magic(magic: &Option<u32>) -> String {
    match magic {
        Some(magic) => format!("magic {:#010x}", magic),
        None => "shorter than the magic number".to_string(),
    }
}

/// Part of the class file being walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanSection {
    /// Versions and pool count
    Header,
    /// Constant pool entries
    ConstantPool,
    /// Access flags, this/super class and interfaces
    ClassInfo,
    /// Field table
    Fields,
    /// Method table
    Methods,
    /// Class attributes
    Attributes,
}

impl fmt::Display for ScanSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanSection::Header => "header",
            ScanSection::ConstantPool => "constant pool",
            ScanSection::ClassInfo => "class info",
            ScanSection::Fields => "fields",
            ScanSection::Methods => "methods",
            ScanSection::Attributes => "attributes",
        })
    }
}

/// A recoverable problem met while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScanWarning {
    /// The data ends inside `section`
    Truncated {
        /// Section being read
        section: ScanSection,
        /// Offset of the failed read
        offset: usize,
    },
    /// A constant pool tag this scanner does not know
    UnknownTag {
        /// The tag byte
        tag: u8,
        /// Pool index of the entry
        index: u16,
        /// Offset of the tag byte
        offset: usize,
    },
    /// A reference to a pool slot that is not a Utf8 string
    DanglingIndex {
        /// The referenced index
        index: u16,
    },
    /// A Utf8 entry that is not valid modified UTF-8
    InvalidUtf8 {
        /// Pool index of the entry
        index: u16,
    },
    /// A descriptor that does not parse
    MalformedDescriptor {
        /// The descriptor text
        descriptor: String,
    },
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanWarning::Truncated { section, offset } => {
                write!(f, "class data ends in the {} at offset {}", section, offset)
            }
            ScanWarning::UnknownTag { tag, index, offset } => write!(
                f,
                "unknown constant pool tag {} for entry {} at offset {}",
                tag, index, offset
            ),
            ScanWarning::DanglingIndex { index } => {
                write!(f, "constant pool index {} is not a Utf8 entry", index)
            }
            ScanWarning::InvalidUtf8 { index } => {
                write!(f, "constant pool entry {} is not valid modified UTF-8", index)
            }
            ScanWarning::MalformedDescriptor { descriptor } => {
                write!(f, "malformed descriptor {:?}", descriptor)
            }
        }
    }
}

/// What one class refers to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceSet {
    packages: BTreeSet<String>,
    activator: Option<String>,
    class_name: Option<String>,
    super_class: Option<String>,
    interfaces: Vec<String>,
    warnings: Vec<ScanWarning>,
}

impl ReferenceSet {
    /// Referenced packages (dotted), excluding the configured prefixes
    pub fn packages(&self) -> &BTreeSet<String> {
        &self.packages
    }

    /// Dotted name of this class when it implements the activator marker
    pub fn activator(&self) -> Option<&str> {
        self.activator.as_deref()
    }

    /// Binary name of the class, when the walk got that far
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Binary name of the super class
    pub fn super_class(&self) -> Option<&str> {
        self.super_class.as_deref()
    }

    /// Binary names of the directly implemented interfaces
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Problems met during the walk
    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    /// Whether the class data ended before the walk was complete
    pub fn is_truncated(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ScanWarning::Truncated { .. }))
    }
}

/// Package containing a class path: `org/foo/Bar.class` gives `org.foo`,
/// a class in the default package gives `.`
pub fn package_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((package, _)) => package.replace('/', "."),
        None => ".".to_string(),
    }
}

/// Dotted class name for a class path: `org/foo/Bar.class` gives `org.foo.Bar`
pub fn class_name_of(path: &str) -> String {
    path.strip_suffix(".class")
        .unwrap_or(path)
        .replace('/', ".")
}

/// Scanner over raw class bytes
#[derive(Debug, Clone)]
pub struct ClassScanner<'c> {
    config: &'c ScanConfig,
}

impl<'c> ClassScanner<'c> {
    /// Create a scanner using `config` for exclusions and the marker type
    pub fn new(config: &'c ScanConfig) -> Self {
        Self { config }
    }

    /// Scan one class; `path` is its location in the archive
    /// (`org/foo/Bar.class`)
    pub fn scan(&self, path: &str, bytes: &[u8]) -> Result<ReferenceSet, ScanError> {
        let mut reader = BytecodeReader::new(bytes);
        let magic = reader.read_u32().map_err(|_| ScanError::NotAClassFile {
            path: path.to_string(),
            magic: None,
        })?;
        if magic != MAGIC {
            return Err(ScanError::NotAClassFile {
                path: path.to_string(),
                magic: Some(magic),
            });
        }

        let mut walk = Walk::default();
        if let Err(warning) = walk.run(&mut reader) {
            walk.warnings.push(warning);
        }
        let references = walk.resolve(path, self.config);

        for warning in &references.warnings {
            warn!(path, %warning, "class scan incomplete");
        }
        debug!(
            path,
            packages = references.packages.len(),
            activator = references.activator.is_some(),
            "scanned class"
        );
        Ok(references)
    }
}

/// Indices collected while walking, resolved once the walk ends
#[derive(Debug, Default)]
struct Walk {
    utf8: FxHashMap<u16, String>,
    /// Class entry index to name index
    classes: FxHashMap<u16, u16>,
    /// Utf8 indices of descriptors
    descriptors: Vec<u16>,
    this_class: Option<u16>,
    super_class: Option<u16>,
    interfaces: Vec<u16>,
    pool_complete: bool,
    warnings: Vec<ScanWarning>,
}

fn truncated(section: ScanSection) -> impl Fn(DecodeError) -> ScanWarning {
    move |error| {
        let offset = match error {
            DecodeError::UnexpectedEnd(offset)
            | DecodeError::InvalidUtf8(offset)
            | DecodeError::InvalidOpcode(_, offset) => offset,
        };
        ScanWarning::Truncated { section, offset }
    }
}

impl Walk {
    fn run(&mut self, reader: &mut BytecodeReader<'_>) -> Result<(), ScanWarning> {
        let header = truncated(ScanSection::Header);
        reader.skip(4).map_err(&header)?;
        let count = reader.read_u16().map_err(&header)?;
        self.walk_pool(reader, count)?;
        self.pool_complete = true;

        let info = truncated(ScanSection::ClassInfo);
        reader.skip(2).map_err(&info)?;
        self.this_class = Some(reader.read_u16().map_err(&info)?);
        self.super_class = Some(reader.read_u16().map_err(&info)?).filter(|&i| i != 0);
        let interfaces = reader.read_u16().map_err(&info)?;
        for _ in 0..interfaces {
            self.interfaces.push(reader.read_u16().map_err(&info)?);
        }

        self.walk_members(reader, ScanSection::Fields)?;
        self.walk_members(reader, ScanSection::Methods)?;

        let attributes = truncated(ScanSection::Attributes);
        let count = reader.read_u16().map_err(&attributes)?;
        skip_attributes(reader, count).map_err(&attributes)
    }

    fn walk_pool(&mut self, reader: &mut BytecodeReader<'_>, count: u16) -> Result<(), ScanWarning> {
        let eof = truncated(ScanSection::ConstantPool);
        // u32 so a trailing Long/Double cannot overflow the index
        let mut index: u32 = 1;
        while index < count as u32 {
            let slot = index as u16;
            let offset = reader.position();
            let tag = reader.read_u8().map_err(&eof)?;
            match tag {
                TAG_UTF8 => {
                    let len = reader.read_u16().map_err(&eof)? as usize;
                    let bytes = reader.read_bytes(len).map_err(&eof)?;
                    match decode_modified_utf8(bytes) {
                        Some(value) => {
                            self.utf8.insert(slot, value);
                        }
                        None => self.warnings.push(ScanWarning::InvalidUtf8 { index: slot }),
                    }
                }
                TAG_INTEGER | TAG_FLOAT => reader.skip(4).map_err(&eof)?,
                TAG_LONG | TAG_DOUBLE => {
                    reader.skip(8).map_err(&eof)?;
                    index += 1;
                }
                TAG_CLASS => {
                    let name_index = reader.read_u16().map_err(&eof)?;
                    self.classes.insert(slot, name_index);
                }
                TAG_STRING | TAG_MODULE | TAG_PACKAGE => reader.skip(2).map_err(&eof)?,
                TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF | TAG_DYNAMIC
                | TAG_INVOKE_DYNAMIC => reader.skip(4).map_err(&eof)?,
                TAG_NAME_AND_TYPE => {
                    reader.skip(2).map_err(&eof)?;
                    self.descriptors.push(reader.read_u16().map_err(&eof)?);
                }
                TAG_METHOD_HANDLE => reader.skip(3).map_err(&eof)?,
                TAG_METHOD_TYPE => self.descriptors.push(reader.read_u16().map_err(&eof)?),
                tag => {
                    return Err(ScanWarning::UnknownTag {
                        tag,
                        index: slot,
                        offset,
                    })
                }
            }
            index += 1;
        }
        Ok(())
    }

    fn walk_members(
        &mut self,
        reader: &mut BytecodeReader<'_>,
        section: ScanSection,
    ) -> Result<(), ScanWarning> {
        let eof = truncated(section);
        let count = reader.read_u16().map_err(&eof)?;
        for _ in 0..count {
            reader.skip(4).map_err(&eof)?;
            self.descriptors.push(reader.read_u16().map_err(&eof)?);
            let attributes = reader.read_u16().map_err(&eof)?;
            skip_attributes(reader, attributes).map_err(&eof)?;
        }
        Ok(())
    }

    fn class_name(&self, class_index: u16) -> Option<String> {
        let name_index = *self.classes.get(&class_index)?;
        self.utf8.get(&name_index).cloned()
    }

    fn resolve(mut self, path: &str, config: &ScanConfig) -> ReferenceSet {
        let mut references = ReferenceSet {
            class_name: self.this_class.and_then(|i| self.class_name(i)),
            super_class: self.super_class.and_then(|i| self.class_name(i)),
            ..ReferenceSet::default()
        };
        references.interfaces = self
            .interfaces
            .iter()
            .filter_map(|&i| self.class_name(i))
            .collect();

        let mut name_indices: Vec<u16> = self.classes.values().copied().collect();
        name_indices.sort_unstable();
        for name_index in name_indices {
            match self.utf8.get(&name_index) {
                Some(name) if *name == config.activator_type => {
                    references.activator = Some(class_name_of(path));
                }
                Some(name) => {
                    if let Some(package) = class_reference_package(name) {
                        add_package(&mut references, package, config);
                    }
                }
                None if self.pool_complete => self
                    .warnings
                    .push(ScanWarning::DanglingIndex { index: name_index }),
                None => {}
            }
        }

        for index in std::mem::take(&mut self.descriptors) {
            let Some(descriptor) = self.utf8.get(&index) else {
                if self.pool_complete {
                    self.warnings.push(ScanWarning::DanglingIndex { index });
                }
                continue;
            };
            match referenced_classes(descriptor) {
                Ok(classes) => {
                    for class in classes {
                        add_package(&mut references, package_of(&class), config);
                    }
                }
                Err(_) => self.warnings.push(ScanWarning::MalformedDescriptor {
                    descriptor: descriptor.clone(),
                }),
            }
        }

        references.warnings = self.warnings;
        references
    }
}

fn skip_attributes(reader: &mut BytecodeReader<'_>, count: u16) -> Result<(), DecodeError> {
    for _ in 0..count {
        reader.skip(2)?;
        let len = reader.read_u32()? as usize;
        reader.skip(len)?;
    }
    Ok(())
}

/// Package of a Class entry name, which may be an array descriptor
/// (`[Lorg/foo/Bar;`); primitive arrays have none
fn class_reference_package(name: &str) -> Option<String> {
    let element = name.trim_start_matches('[');
    let binary = if element.len() == name.len() {
        element
    } else {
        element.strip_prefix('L')?.strip_suffix(';')?
    };
    Some(package_of(binary))
}

fn add_package(references: &mut ReferenceSet, package: String, config: &ScanConfig) {
    if !config.is_excluded(&package) {
        references.packages.insert(package);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pojo_bytecode::BytecodeWriter;

    fn header(writer: &mut BytecodeWriter, pool_count: u16) {
        writer.emit_u32(MAGIC);
        writer.emit_u16(0);
        writer.emit_u16(52);
        writer.emit_u16(pool_count);
    }

    fn utf8(writer: &mut BytecodeWriter, value: &str) {
        writer.emit_u8(TAG_UTF8);
        writer.emit_utf8(value);
    }

    fn class(writer: &mut BytecodeWriter, name_index: u16) {
        writer.emit_u8(TAG_CLASS);
        writer.emit_u16(name_index);
    }

    #[test]
    fn test_activator_marker_detected() {
        let mut w = BytecodeWriter::new();
        header(&mut w, 3);
        utf8(&mut w, "org/osgi/framework/BundleActivator");
        class(&mut w, 1);

        let config = ScanConfig::default();
        let refs = ClassScanner::new(&config)
            .scan("org/example/Activator.class", w.buffer())
            .unwrap();
        assert_eq!(refs.activator(), Some("org.example.Activator"));
        assert!(refs.packages().is_empty());
        // The class body is missing entirely
        assert!(refs.is_truncated());
    }

    #[test]
    fn test_wide_entries_take_two_indices() {
        let mut w = BytecodeWriter::new();
        // 1: Long (takes 1 and 2), 3: Utf8, 4: Class -> 3
        header(&mut w, 5);
        w.emit_u8(TAG_LONG);
        w.emit_u64(42);
        utf8(&mut w, "org/foo/Bar");
        class(&mut w, 3);
        w.emit_u16(0x21);
        w.emit_u16(4);
        w.emit_u16(0);
        w.emit_u16(0);
        w.emit_u16(0);
        w.emit_u16(0);
        w.emit_u16(0);

        let config = ScanConfig::default();
        let refs = ClassScanner::new(&config)
            .scan("org/foo/Bar.class", w.buffer())
            .unwrap();
        assert!(refs.warnings().is_empty(), "{:?}", refs.warnings());
        assert_eq!(refs.class_name(), Some("org/foo/Bar"));
        assert_eq!(refs.super_class(), None);
        assert!(refs.packages().contains("org.foo"));
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let config = ScanConfig::default();
        let scanner = ClassScanner::new(&config);
        assert_eq!(
            scanner.scan("x.class", &[0xCA, 0xFE, 0xBA, 0xBF, 0, 0]),
            Err(ScanError::NotAClassFile {
                path: "x.class".into(),
                magic: Some(0xCAFE_BABF)
            })
        );
        assert_eq!(
            scanner.scan("x.class", &[0xCA, 0xFE]),
            Err(ScanError::NotAClassFile {
                path: "x.class".into(),
                magic: None
            })
        );
    }

    #[test]
    fn test_truncated_pool_keeps_partial_result() {
        let mut w = BytecodeWriter::new();
        header(&mut w, 10);
        utf8(&mut w, "org/foo/Bar");
        class(&mut w, 1);
        utf8(&mut w, "(Lorg/baz/Qux;)V");
        w.emit_u8(TAG_UTF8);
        w.emit_u16(20);
        w.emit_bytes(b"abc");

        let config = ScanConfig::default();
        let refs = ClassScanner::new(&config)
            .scan("org/foo/Bar.class", w.buffer())
            .unwrap();
        assert!(refs.is_truncated());
        assert!(matches!(
            refs.warnings()[0],
            ScanWarning::Truncated {
                section: ScanSection::ConstantPool,
                ..
            }
        ));
        assert!(refs.packages().contains("org.foo"));
    }

    #[test]
    fn test_unknown_tag_stops_walk() {
        let mut w = BytecodeWriter::new();
        header(&mut w, 4);
        utf8(&mut w, "org/foo/Bar");
        class(&mut w, 1);
        w.emit_u8(2);

        let config = ScanConfig::default();
        let refs = ClassScanner::new(&config)
            .scan("Bar.class", w.buffer())
            .unwrap();
        assert_eq!(
            refs.warnings(),
            &[ScanWarning::UnknownTag {
                tag: 2,
                index: 3,
                offset: 27
            }]
        );
        assert!(refs.packages().contains("org.foo"));
    }

    #[test]
    fn test_class_reference_packages() {
        assert_eq!(
            class_reference_package("[[Lorg/foo/Bar;"),
            Some("org.foo".to_string())
        );
        assert_eq!(class_reference_package("[I"), None);
        assert_eq!(class_reference_package("Bar"), Some(".".to_string()));
        assert_eq!(package_of("org/foo/Bar.class"), "org.foo");
        assert_eq!(class_name_of("org/foo/Bar.class"), "org.foo.Bar");
    }
}
