//! Constant pool
//!
//! Indices are 1-based as in the class file. `Long` and `Double` occupy two
//! slots; the second slot is unusable and stored as `None`.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use rustc_hash::FxHashMap;
use thiserror::Error;

// Tag values from the class-file format.
pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// Constant pool errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstantPoolError {
    /// Decoding failed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Unknown tag byte
    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownTag {
        /// The tag byte
        tag: u8,
        /// Pool index being decoded
        index: u16,
    },

    /// Index is zero, out of range or the unusable half of a wide entry
    #[error("Invalid constant pool index {0}")]
    InvalidIndex(u16),

    /// Entry exists but has the wrong kind
    #[error("Constant pool entry {index} is not a {expected}")]
    WrongKind {
        /// Pool index
        index: u16,
        /// Expected entry kind
        expected: &'static str,
    },

    /// Adding an entry would exceed 65535 slots
    #[error("Constant pool overflow")]
    Overflow,
}

/// A constant pool entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Modified UTF-8 string
    Utf8(String),
    /// `int` constant
    Integer(i32),
    /// `float` constant (raw bits, so NaN payloads survive)
    Float(u32),
    /// `long` constant
    Long(i64),
    /// `double` constant (raw bits)
    Double(u64),
    /// Class or array type
    Class {
        /// Utf8 index of the binary name
        name_index: u16,
    },
    /// String literal
    String {
        /// Utf8 index
        string_index: u16,
    },
    /// Field reference
    FieldRef {
        /// Owner class index
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// Method reference
    MethodRef {
        /// Owner class index
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Owner interface index
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Utf8 index of the name
        name_index: u16,
        /// Utf8 index of the descriptor
        descriptor_index: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1-9)
        reference_kind: u8,
        /// Referenced member index
        reference_index: u16,
    },
    /// Method type
    MethodType {
        /// Utf8 index of the method descriptor
        descriptor_index: u16,
    },
    /// Dynamically computed constant
    Dynamic {
        /// BootstrapMethods attribute index
        bootstrap_method_attr_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// BootstrapMethods attribute index
        bootstrap_method_attr_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// Module
    Module {
        /// Utf8 index
        name_index: u16,
    },
    /// Package
    Package {
        /// Utf8 index
        name_index: u16,
    },
}

impl Constant {
    /// The tag byte of this entry
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => TAG_UTF8,
            Constant::Integer(_) => TAG_INTEGER,
            Constant::Float(_) => TAG_FLOAT,
            Constant::Long(_) => TAG_LONG,
            Constant::Double(_) => TAG_DOUBLE,
            Constant::Class { .. } => TAG_CLASS,
            Constant::String { .. } => TAG_STRING,
            Constant::FieldRef { .. } => TAG_FIELDREF,
            Constant::MethodRef { .. } => TAG_METHODREF,
            Constant::InterfaceMethodRef { .. } => TAG_INTERFACE_METHODREF,
            Constant::NameAndType { .. } => TAG_NAME_AND_TYPE,
            Constant::MethodHandle { .. } => TAG_METHOD_HANDLE,
            Constant::MethodType { .. } => TAG_METHOD_TYPE,
            Constant::Dynamic { .. } => TAG_DYNAMIC,
            Constant::InvokeDynamic { .. } => TAG_INVOKE_DYNAMIC,
            Constant::Module { .. } => TAG_MODULE,
            Constant::Package { .. } => TAG_PACKAGE,
        }
    }

    /// Whether this entry takes two pool slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn decode(reader: &mut BytecodeReader<'_>, index: u16) -> Result<Self, ConstantPoolError> {
        let tag = reader.read_u8()?;
        let constant = match tag {
            TAG_UTF8 => Constant::Utf8(reader.read_utf8()?),
            TAG_INTEGER => Constant::Integer(reader.read_i32()?),
            TAG_FLOAT => Constant::Float(reader.read_u32()?),
            TAG_LONG => Constant::Long(reader.read_u64()? as i64),
            TAG_DOUBLE => Constant::Double(reader.read_u64()?),
            TAG_CLASS => Constant::Class {
                name_index: reader.read_u16()?,
            },
            TAG_STRING => Constant::String {
                string_index: reader.read_u16()?,
            },
            TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => {
                let class_index = reader.read_u16()?;
                let name_and_type_index = reader.read_u16()?;
                match tag {
                    TAG_FIELDREF => Constant::FieldRef {
                        class_index,
                        name_and_type_index,
                    },
                    TAG_METHODREF => Constant::MethodRef {
                        class_index,
                        name_and_type_index,
                    },
                    _ => Constant::InterfaceMethodRef {
                        class_index,
                        name_and_type_index,
                    },
                }
            }
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name_index: reader.read_u16()?,
                descriptor_index: reader.read_u16()?,
            },
            TAG_METHOD_HANDLE => Constant::MethodHandle {
                reference_kind: reader.read_u8()?,
                reference_index: reader.read_u16()?,
            },
            TAG_METHOD_TYPE => Constant::MethodType {
                descriptor_index: reader.read_u16()?,
            },
            TAG_DYNAMIC => Constant::Dynamic {
                bootstrap_method_attr_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method_attr_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            TAG_MODULE => Constant::Module {
                name_index: reader.read_u16()?,
            },
            TAG_PACKAGE => Constant::Package {
                name_index: reader.read_u16()?,
            },
            tag => return Err(ConstantPoolError::UnknownTag { tag, index }),
        };
        Ok(constant)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u8(self.tag());
        match self {
            Constant::Utf8(value) => writer.emit_utf8(value),
            Constant::Integer(value) => writer.emit_i32(*value),
            Constant::Float(bits) => writer.emit_u32(*bits),
            Constant::Long(value) => writer.emit_u64(*value as u64),
            Constant::Double(bits) => writer.emit_u64(*bits),
            Constant::Class { name_index }
            | Constant::Module { name_index }
            | Constant::Package { name_index } => writer.emit_u16(*name_index),
            Constant::String { string_index } => writer.emit_u16(*string_index),
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                writer.emit_u16(*class_index);
                writer.emit_u16(*name_and_type_index);
            }
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => {
                writer.emit_u16(*name_index);
                writer.emit_u16(*descriptor_index);
            }
            Constant::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                writer.emit_u8(*reference_kind);
                writer.emit_u16(*reference_index);
            }
            Constant::MethodType { descriptor_index } => writer.emit_u16(*descriptor_index),
            Constant::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                writer.emit_u16(*bootstrap_method_attr_index);
                writer.emit_u16(*name_and_type_index);
            }
        }
    }
}

/// A resolved field or method reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Owner binary name
    pub class: &'a str,
    /// Member name
    pub name: &'a str,
    /// Member descriptor
    pub descriptor: &'a str,
}

/// Constant pool of one class file
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// Slot 0 is never used
    entries: Vec<Option<Constant>>,
    lookup: FxHashMap<Constant, u16>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            entries: vec![None],
            lookup: FxHashMap::default(),
        }
    }

    /// Decode `count - 1` entries (the class-file `constant_pool_count`)
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, ConstantPoolError> {
        let count = reader.read_u16()?;
        let mut pool = Self::new();
        pool.entries.reserve(count as usize);
        let mut index: u16 = 1;
        while index < count {
            let constant = Constant::decode(reader, index)?;
            let wide = constant.is_wide();
            pool.lookup.entry(constant.clone()).or_insert(index);
            pool.entries.push(Some(constant));
            if wide {
                pool.entries.push(None);
                index = index.saturating_add(2);
            } else {
                index += 1;
            }
        }
        Ok(pool)
    }

    /// Encode as `constant_pool_count` followed by the entries
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.entries.len() as u16);
        for constant in self.entries.iter().flatten() {
            constant.encode(writer);
        }
    }

    /// The `constant_pool_count` value (number of slots plus one)
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Get the entry at `index`
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    /// Iterate `(index, entry)` pairs in pool order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u16, c)))
    }

    fn entry(&self, index: u16) -> Result<&Constant, ConstantPoolError> {
        self.get(index).ok_or(ConstantPoolError::InvalidIndex(index))
    }

    /// Resolve a Utf8 entry
    pub fn utf8(&self, index: u16) -> Result<&str, ConstantPoolError> {
        match self.entry(index)? {
            Constant::Utf8(value) => Ok(value),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Resolve a Class entry to its binary name
    pub fn class_name(&self, index: u16) -> Result<&str, ConstantPoolError> {
        match self.entry(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "Class",
            }),
        }
    }

    /// Resolve a NameAndType entry to `(name, descriptor)`
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ConstantPoolError> {
        match self.entry(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a FieldRef entry
    pub fn field_ref(&self, index: u16) -> Result<MemberRef<'_>, ConstantPoolError> {
        match self.entry(index)? {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            } => self.member_ref(*class_index, *name_and_type_index),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "FieldRef",
            }),
        }
    }

    /// Resolve a MethodRef or InterfaceMethodRef entry
    pub fn method_ref(&self, index: u16) -> Result<MemberRef<'_>, ConstantPoolError> {
        match self.entry(index)? {
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => self.member_ref(*class_index, *name_and_type_index),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "MethodRef",
            }),
        }
    }

    fn member_ref(
        &self,
        class_index: u16,
        name_and_type_index: u16,
    ) -> Result<MemberRef<'_>, ConstantPoolError> {
        let class = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class,
            name,
            descriptor,
        })
    }

    // ===== Adding Entries =====

    /// Add an entry, reusing an identical existing one
    pub fn add(&mut self, constant: Constant) -> Result<u16, ConstantPoolError> {
        if let Some(&index) = self.lookup.get(&constant) {
            return Ok(index);
        }
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(ConstantPoolError::Overflow);
        }
        let index = self.entries.len() as u16;
        self.lookup.insert(constant.clone(), index);
        self.entries.push(Some(constant));
        if slots == 2 {
            self.entries.push(None);
        }
        Ok(index)
    }

    /// Add (or find) a Utf8 entry
    pub fn add_utf8(&mut self, value: &str) -> Result<u16, ConstantPoolError> {
        self.add(Constant::Utf8(value.to_owned()))
    }

    /// Add (or find) a Class entry
    pub fn add_class(&mut self, name: &str) -> Result<u16, ConstantPoolError> {
        let name_index = self.add_utf8(name)?;
        self.add(Constant::Class { name_index })
    }

    /// Add (or find) a String entry
    pub fn add_string(&mut self, value: &str) -> Result<u16, ConstantPoolError> {
        let string_index = self.add_utf8(value)?;
        self.add(Constant::String { string_index })
    }

    /// Add (or find) a NameAndType entry
    pub fn add_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ConstantPoolError> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Add (or find) a FieldRef entry
    pub fn add_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ConstantPoolError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Add (or find) a MethodRef entry
    pub fn add_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ConstantPoolError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Add (or find) an InterfaceMethodRef entry
    pub fn add_interface_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ConstantPoolError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("org/foo/Bar").unwrap();
        let b = pool.add_class("org/foo/Bar").unwrap();
        assert_eq!(a, b);
        // Utf8 + Class
        assert_eq!(pool.count(), 3);
        assert_eq!(pool.class_name(a).unwrap(), "org/foo/Bar");
    }

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add(Constant::Long(42)).unwrap();
        let next = pool.add_utf8("x").unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert_eq!(pool.get(2), None);
        assert_eq!(pool.utf8(2), Err(ConstantPoolError::InvalidIndex(2)));
    }

    #[test]
    fn test_encode_decode_preserves_indices() {
        let mut pool = ConstantPool::new();
        pool.add(Constant::Double(1.5f64.to_bits())).unwrap();
        let field = pool.add_field_ref("org/foo/Bar", "count", "I").unwrap();
        let method = pool
            .add_method_ref("java/lang/Object", "<init>", "()V")
            .unwrap();

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap();

        assert_eq!(decoded.count(), pool.count());
        let f = decoded.field_ref(field).unwrap();
        assert_eq!((f.class, f.name, f.descriptor), ("org/foo/Bar", "count", "I"));
        let m = decoded.method_ref(method).unwrap();
        assert_eq!(m.name, "<init>");
    }

    #[test]
    fn test_interface_method_ref_is_distinct() {
        let mut pool = ConstantPool::new();
        let interface = pool
            .add_interface_method_ref("java/util/Set", "contains", "(Ljava/lang/Object;)Z")
            .unwrap();
        let class = pool
            .add_method_ref("java/util/Set", "contains", "(Ljava/lang/Object;)Z")
            .unwrap();
        assert_ne!(interface, class);
        assert!(matches!(
            pool.get(interface),
            Some(Constant::InterfaceMethodRef { .. })
        ));
        assert_eq!(pool.method_ref(interface).unwrap().name, "contains");
    }

    #[test]
    fn test_wrong_kind() {
        let mut pool = ConstantPool::new();
        let utf8 = pool.add_utf8("org/foo/Bar").unwrap();
        assert_eq!(
            pool.class_name(utf8),
            Err(ConstantPoolError::WrongKind {
                index: utf8,
                expected: "Class"
            })
        );
    }

    #[test]
    fn test_unknown_tag() {
        let bytes = [0x00, 0x02, 0x02, 0x00];
        let err = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap_err();
        assert_eq!(err, ConstantPoolError::UnknownTag { tag: 2, index: 1 });
    }

    #[test]
    fn test_truncated_pool() {
        let bytes = [0x00, 0x03, TAG_UTF8, 0x00, 0x05, b'a'];
        let err = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, ConstantPoolError::Decode(DecodeError::UnexpectedEnd(_))));
    }
}
