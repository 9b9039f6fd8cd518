//! Class file structure
//!
//! Parses the top-level class-file layout and writes it back. Attributes
//! are kept as opaque bytes; only `Code` is interpreted, on demand, through
//! [`Member::code`] and [`Member::set_code`].

use crate::constants::{ConstantPool, ConstantPoolError};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::instruction::{CodeError, InstructionStream};
use thiserror::Error;

/// Class file magic number
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Access flag: public
pub const ACC_PUBLIC: u16 = 0x0001;
/// Access flag: private
pub const ACC_PRIVATE: u16 = 0x0002;
/// Access flag: protected
pub const ACC_PROTECTED: u16 = 0x0004;
/// Access flag: static
pub const ACC_STATIC: u16 = 0x0008;
/// Access flag: final
pub const ACC_FINAL: u16 = 0x0010;
/// Class flag: modern `invokespecial` semantics
pub const ACC_SUPER: u16 = 0x0020;
/// Access flag: native method
pub const ACC_NATIVE: u16 = 0x0100;
/// Access flag: interface
pub const ACC_INTERFACE: u16 = 0x0200;
/// Access flag: abstract
pub const ACC_ABSTRACT: u16 = 0x0400;
/// Access flag: compiler generated
pub const ACC_SYNTHETIC: u16 = 0x1000;

const CODE: &str = "Code";

/// Errors that can occur while reading or writing a class file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected 0xCAFEBABE, got {0:#010x}")]
    InvalidMagic(u32),

    /// Constant pool error
    #[error("Constant pool error: {0}")]
    ConstantPool(#[from] ConstantPoolError),

    /// Code attribute error
    #[error("Code attribute error: {0}")]
    Code(#[from] CodeError),

    /// Bytes remain after the last attribute
    #[error("{0} trailing bytes after class data")]
    TrailingBytes(usize),
}

/// An attribute: a pool-named opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Utf8 index of the attribute name
    pub name_index: u16,
    /// Attribute payload
    pub info: Vec<u8>,
}

impl Attribute {
    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name_index = reader.read_u16()?;
        let len = reader.read_u32()? as usize;
        let info = reader.read_bytes(len)?.to_vec();
        Ok(Self { name_index, info })
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.name_index);
        writer.emit_u32(self.info.len() as u32);
        writer.emit_bytes(&self.info);
    }
}

fn decode_attributes(reader: &mut BytecodeReader<'_>) -> Result<Vec<Attribute>, DecodeError> {
    let count = reader.read_u16()?;
    (0..count).map(|_| Attribute::decode(reader)).collect()
}

fn encode_attributes(attributes: &[Attribute], writer: &mut BytecodeWriter) {
    writer.emit_u16(attributes.len() as u16);
    for attribute in attributes {
        attribute.encode(writer);
    }
}

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Access flags
    pub access_flags: u16,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Attributes
    pub attributes: Vec<Attribute>,
}

impl Member {
    /// Create a member without attributes, adding its name and descriptor
    pub fn new(
        pool: &mut ConstantPool,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<Self, ConstantPoolError> {
        Ok(Self {
            access_flags,
            name_index: pool.add_utf8(name)?,
            descriptor_index: pool.add_utf8(descriptor)?,
            attributes: Vec::new(),
        })
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access_flags: reader.read_u16()?,
            name_index: reader.read_u16()?,
            descriptor_index: reader.read_u16()?,
            attributes: decode_attributes(reader)?,
        })
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.access_flags);
        writer.emit_u16(self.name_index);
        writer.emit_u16(self.descriptor_index);
        encode_attributes(&self.attributes, writer);
    }

    /// Member name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ConstantPoolError> {
        pool.utf8(self.name_index)
    }

    /// Member descriptor
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ConstantPoolError> {
        pool.utf8(self.descriptor_index)
    }

    /// Whether `ACC_STATIC` is set
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    /// Whether `ACC_SYNTHETIC` is set
    pub fn is_synthetic(&self) -> bool {
        self.access_flags & ACC_SYNTHETIC != 0
    }

    /// Find an attribute by name
    pub fn attribute(&self, pool: &ConstantPool, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| pool.utf8(a.name_index).map_or(false, |n| n == name))
    }

    /// Decode this method's `Code` attribute, if it has one
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<InstructionStream>, ClassFileError> {
        match self.attribute(pool, CODE) {
            Some(attribute) => Ok(Some(InstructionStream::decode(&attribute.info, pool)?)),
            None => Ok(None),
        }
    }

    /// Encode `stream` and store it as this method's `Code` attribute
    pub fn set_code(
        &mut self,
        pool: &mut ConstantPool,
        stream: &InstructionStream,
    ) -> Result<(), ClassFileError> {
        let info = stream.encode(pool)?;
        let name_index = pool.add_utf8(CODE)?;
        let existing = self
            .attributes
            .iter_mut()
            .find(|a| pool.utf8(a.name_index).map_or(false, |n| n == CODE));
        match existing {
            Some(attribute) => attribute.info = info,
            None => self.attributes.push(Attribute { name_index, info }),
        }
        Ok(())
    }
}

/// A parsed class file
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: u16,
    /// Class index of this class
    pub this_class: u16,
    /// Class index of the super class, 0 for `java/lang/Object`
    pub super_class: u16,
    /// Class indices of direct interfaces
    pub interfaces: Vec<u16>,
    /// Fields
    pub fields: Vec<Member>,
    /// Methods
    pub methods: Vec<Member>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Decode class-file bytes
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = BytecodeReader::new(data);

        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        let constant_pool = ConstantPool::decode(&mut reader)?;
        let access_flags = reader.read_u16()?;
        let this_class = reader.read_u16()?;
        let super_class = reader.read_u16()?;

        let interface_count = reader.read_u16()?;
        let interfaces = (0..interface_count)
            .map(|_| reader.read_u16())
            .collect::<Result<Vec<_>, _>>()?;

        let field_count = reader.read_u16()?;
        let fields = (0..field_count)
            .map(|_| Member::decode(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;

        let method_count = reader.read_u16()?;
        let methods = (0..method_count)
            .map(|_| Member::decode(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;

        let attributes = decode_attributes(&mut reader)?;

        if reader.has_more() {
            return Err(ClassFileError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Encode to class-file bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::with_capacity(1024);
        writer.emit_u32(MAGIC);
        writer.emit_u16(self.minor_version);
        writer.emit_u16(self.major_version);
        self.constant_pool.encode(&mut writer);
        writer.emit_u16(self.access_flags);
        writer.emit_u16(self.this_class);
        writer.emit_u16(self.super_class);

        writer.emit_u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            writer.emit_u16(*interface);
        }

        writer.emit_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u16(self.methods.len() as u16);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        encode_attributes(&self.attributes, &mut writer);
        writer.into_bytes()
    }

    /// Binary name of this class
    pub fn name(&self) -> Result<&str, ConstantPoolError> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Binary name of the super class (`None` only for `java/lang/Object`)
    pub fn super_name(&self) -> Result<Option<&str>, ConstantPoolError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    /// Binary names of the direct interfaces
    pub fn interface_names(&self) -> Result<Vec<&str>, ConstantPoolError> {
        self.interfaces
            .iter()
            .map(|&index| self.constant_pool.class_name(index))
            .collect()
    }

    /// Whether this class file declares an interface
    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&Member> {
        self.fields
            .iter()
            .find(|f| f.name(&self.constant_pool).map_or(false, |n| n == name))
    }

    /// Find a method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Member> {
        self.methods.iter().find(|m| {
            m.name(&self.constant_pool).map_or(false, |n| n == name)
                && m.descriptor(&self.constant_pool)
                    .map_or(false, |d| d == descriptor)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::opcode::Opcode;

    fn minimal_class() -> ClassFile {
        let mut pool = ConstantPool::new();
        let this_class = pool.add_class("org/example/Foo").unwrap();
        let super_class = pool.add_class("java/lang/Object").unwrap();
        ClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: ACC_PUBLIC,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52];
        assert_eq!(
            ClassFile::decode(&bytes).unwrap_err(),
            ClassFileError::InvalidMagic(0xDEADBEEF)
        );
    }

    #[test]
    fn test_encode_decode_identity() {
        let mut class = minimal_class();
        let field = Member::new(&mut class.constant_pool, ACC_PRIVATE, "count", "I").unwrap();
        class.fields.push(field);

        let bytes = class.encode();
        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded.name().unwrap(), "org/example/Foo");
        assert_eq!(decoded.super_name().unwrap(), Some("java/lang/Object"));
        assert!(decoded.field("count").is_some());
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_set_code_replaces_existing() {
        let mut class = minimal_class();
        let mut method =
            Member::new(&mut class.constant_pool, ACC_PUBLIC, "run", "()V").unwrap();

        let mut stream = InstructionStream::new(0, 1);
        stream.push(Instruction::Simple(Opcode::Return));
        method.set_code(&mut class.constant_pool, &stream).unwrap();
        method.set_code(&mut class.constant_pool, &stream).unwrap();
        assert_eq!(method.attributes.len(), 1);

        let decoded = method.code(&class.constant_pool).unwrap().unwrap();
        assert_eq!(decoded.max_locals, 1);
        assert_eq!(
            decoded.iter().collect::<Vec<_>>(),
            vec![&Instruction::Simple(Opcode::Return)]
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = minimal_class().encode();
        bytes.push(0);
        assert_eq!(
            ClassFile::decode(&bytes).unwrap_err(),
            ClassFileError::TrailingBytes(1)
        );
    }
}
