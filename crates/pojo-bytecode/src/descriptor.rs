//! Field and method descriptors
//!
//! ```text
//! FieldType  := B | C | D | F | I | J | S | Z | L<binary name>; | [FieldType
//! Method     := ( FieldType* ) ( FieldType | V )
//! ```

use crate::opcode::LocalKind;
use std::fmt;
use thiserror::Error;

/// Descriptor parse error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed descriptor {descriptor:?} at position {position}")]
pub struct DescriptorError {
    /// The descriptor text
    pub descriptor: String,
    /// Byte position where parsing failed
    pub position: usize,
}

/// Element type of a field type (the type after all array dimensions)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BaseType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<name>;`
    Object(String),
}

impl BaseType {
    fn from_char(c: u8) -> Option<Self> {
        Some(match c {
            b'B' => BaseType::Byte,
            b'C' => BaseType::Char,
            b'D' => BaseType::Double,
            b'F' => BaseType::Float,
            b'I' => BaseType::Int,
            b'J' => BaseType::Long,
            b'S' => BaseType::Short,
            b'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    fn java_name(&self) -> String {
        match self {
            BaseType::Byte => "byte".into(),
            BaseType::Char => "char".into(),
            BaseType::Double => "double".into(),
            BaseType::Float => "float".into(),
            BaseType::Int => "int".into(),
            BaseType::Long => "long".into(),
            BaseType::Short => "short".into(),
            BaseType::Boolean => "boolean".into(),
            BaseType::Object(name) => name.replace('/', "."),
        }
    }
}

/// A field type: an element type plus zero or more array dimensions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldType {
    /// Number of leading `[`
    pub dimensions: u8,
    /// Element type
    pub base: BaseType,
}

/// Wrapper class for a primitive, with its boxing and unboxing methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boxing {
    /// Wrapper binary name, e.g. `java/lang/Integer`
    pub class: &'static str,
    /// `valueOf` descriptor, e.g. `(I)Ljava/lang/Integer;`
    pub value_of: &'static str,
    /// Unboxing method name, e.g. `intValue`
    pub unbox_name: &'static str,
    /// Unboxing method descriptor, e.g. `()I`
    pub unbox_descriptor: &'static str,
}

impl FieldType {
    /// Parse a complete field descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        let (ty, end) = parse_field_at(descriptor, bytes, 0)?;
        if end != bytes.len() {
            return Err(DescriptorError {
                descriptor: descriptor.to_owned(),
                position: end,
            });
        }
        Ok(ty)
    }

    /// An object type for a binary class name
    pub fn object(name: impl Into<String>) -> Self {
        Self {
            dimensions: 0,
            base: BaseType::Object(name.into()),
        }
    }

    /// Whether this is an array type
    pub fn is_array(&self) -> bool {
        self.dimensions > 0
    }

    /// Whether this is a reference (object or array)
    pub fn is_reference(&self) -> bool {
        self.is_array() || matches!(self.base, BaseType::Object(_))
    }

    /// The binary class name of the element type, if it is an object type
    pub fn class_name(&self) -> Option<&str> {
        match &self.base {
            BaseType::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Local slots a value of this type occupies
    pub fn slots(&self) -> u16 {
        self.kind().slots()
    }

    /// Value category for load/store/return selection
    pub fn kind(&self) -> LocalKind {
        if self.is_array() {
            return LocalKind::Reference;
        }
        match self.base {
            BaseType::Long => LocalKind::Long,
            BaseType::Double => LocalKind::Double,
            BaseType::Float => LocalKind::Float,
            BaseType::Object(_) => LocalKind::Reference,
            _ => LocalKind::Int,
        }
    }

    /// Boxing information for primitive (non-array) types
    pub fn boxing(&self) -> Option<Boxing> {
        if self.is_array() {
            return None;
        }
        let boxing = match self.base {
            BaseType::Byte => Boxing {
                class: "java/lang/Byte",
                value_of: "(B)Ljava/lang/Byte;",
                unbox_name: "byteValue",
                unbox_descriptor: "()B",
            },
            BaseType::Char => Boxing {
                class: "java/lang/Character",
                value_of: "(C)Ljava/lang/Character;",
                unbox_name: "charValue",
                unbox_descriptor: "()C",
            },
            BaseType::Double => Boxing {
                class: "java/lang/Double",
                value_of: "(D)Ljava/lang/Double;",
                unbox_name: "doubleValue",
                unbox_descriptor: "()D",
            },
            BaseType::Float => Boxing {
                class: "java/lang/Float",
                value_of: "(F)Ljava/lang/Float;",
                unbox_name: "floatValue",
                unbox_descriptor: "()F",
            },
            BaseType::Int => Boxing {
                class: "java/lang/Integer",
                value_of: "(I)Ljava/lang/Integer;",
                unbox_name: "intValue",
                unbox_descriptor: "()I",
            },
            BaseType::Long => Boxing {
                class: "java/lang/Long",
                value_of: "(J)Ljava/lang/Long;",
                unbox_name: "longValue",
                unbox_descriptor: "()J",
            },
            BaseType::Short => Boxing {
                class: "java/lang/Short",
                value_of: "(S)Ljava/lang/Short;",
                unbox_name: "shortValue",
                unbox_descriptor: "()S",
            },
            BaseType::Boolean => Boxing {
                class: "java/lang/Boolean",
                value_of: "(Z)Ljava/lang/Boolean;",
                unbox_name: "booleanValue",
                unbox_descriptor: "()Z",
            },
            BaseType::Object(_) => return None,
        };
        Some(boxing)
    }

    /// Operand for `CHECKCAST`: the class name, or the descriptor for arrays
    pub fn checkcast_name(&self) -> String {
        match (&self.base, self.is_array()) {
            (BaseType::Object(name), false) => name.clone(),
            _ => self.to_string(),
        }
    }

    /// Java source spelling: `int`, `java.lang.String`, `byte[][]`
    pub fn java_name(&self) -> String {
        let mut name = self.base.java_name();
        for _ in 0..self.dimensions {
            name.push_str("[]");
        }
        name
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.dimensions {
            f.write_str("[")?;
        }
        match &self.base {
            BaseType::Byte => f.write_str("B"),
            BaseType::Char => f.write_str("C"),
            BaseType::Double => f.write_str("D"),
            BaseType::Float => f.write_str("F"),
            BaseType::Int => f.write_str("I"),
            BaseType::Long => f.write_str("J"),
            BaseType::Short => f.write_str("S"),
            BaseType::Boolean => f.write_str("Z"),
            BaseType::Object(name) => write!(f, "L{};", name),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in order
    pub parameters: Vec<FieldType>,
    /// Return type, `None` for `V`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse a method descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        let error = |position| DescriptorError {
            descriptor: descriptor.to_owned(),
            position,
        };
        if bytes.first() != Some(&b'(') {
            return Err(error(0));
        }
        let mut pos = 1;
        let mut parameters = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (ty, end) = parse_field_at(descriptor, bytes, pos)?;
                    parameters.push(ty);
                    pos = end;
                }
                None => return Err(error(pos)),
            }
        }
        let return_type = if bytes.get(pos) == Some(&b'V') {
            pos += 1;
            None
        } else {
            let (ty, end) = parse_field_at(descriptor, bytes, pos)?;
            pos = end;
            Some(ty)
        };
        if pos != bytes.len() {
            return Err(error(pos));
        }
        Ok(Self {
            parameters,
            return_type,
        })
    }

    /// Total local slots taken by the parameters (excluding `this`)
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(FieldType::slots).sum()
    }

    /// Same descriptor with `ty` inserted as the first parameter
    pub fn with_leading_parameter(&self, ty: FieldType) -> Self {
        let mut parameters = Vec::with_capacity(self.parameters.len() + 1);
        parameters.push(ty);
        parameters.extend(self.parameters.iter().cloned());
        Self {
            parameters,
            return_type: self.return_type.clone(),
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for parameter in &self.parameters {
            write!(f, "{}", parameter)?;
        }
        f.write_str(")")?;
        match &self.return_type {
            Some(ty) => write!(f, "{}", ty),
            None => f.write_str("V"),
        }
    }
}

/// Parse either a method descriptor or a lone field descriptor and collect
/// every object class name it mentions
pub fn referenced_classes(descriptor: &str) -> Result<Vec<String>, DescriptorError> {
    let types = if descriptor.starts_with('(') {
        let method = MethodDescriptor::parse(descriptor)?;
        let mut types = method.parameters;
        types.extend(method.return_type);
        types
    } else {
        vec![FieldType::parse(descriptor)?]
    };
    Ok(types
        .into_iter()
        .filter_map(|ty| match ty.base {
            BaseType::Object(name) => Some(name),
            _ => None,
        })
        .collect())
}

fn parse_field_at(
    descriptor: &str,
    bytes: &[u8],
    start: usize,
) -> Result<(FieldType, usize), DescriptorError> {
    let error = |position| DescriptorError {
        descriptor: descriptor.to_owned(),
        position,
    };
    let mut pos = start;
    let mut dimensions: u8 = 0;
    while bytes.get(pos) == Some(&b'[') {
        dimensions = dimensions.checked_add(1).ok_or_else(|| error(pos))?;
        pos += 1;
    }
    let c = *bytes.get(pos).ok_or_else(|| error(pos))?;
    if c == b'L' {
        let name_start = pos + 1;
        let len = bytes[name_start..]
            .iter()
            .position(|&b| b == b';')
            .ok_or_else(|| error(pos))?;
        if len == 0 {
            return Err(error(name_start));
        }
        let name = &descriptor[name_start..name_start + len];
        return Ok((
            FieldType {
                dimensions,
                base: BaseType::Object(name.to_owned()),
            },
            name_start + len + 1,
        ));
    }
    let base = BaseType::from_char(c).ok_or_else(|| error(pos))?;
    Ok((FieldType { dimensions, base }, pos + 1))
}
