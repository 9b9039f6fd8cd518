//! Label-based instruction streams
//!
//! A `Code` attribute is decoded into an [`InstructionStream`] where every
//! offset (branch targets, exception ranges, line numbers, local variable
//! ranges, stack map frames) is a [`Label`] placed between instructions.
//! Instructions can then be inserted, removed or replaced freely;
//! [`InstructionStream::encode`] lays the code out again and recomputes every
//! offset.

use crate::class::Attribute;
use crate::constants::{ConstantPool, ConstantPoolError};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::Opcode;
use crate::stackmap::{self, StackMapFrame};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while decoding or encoding a `Code` attribute
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// Byte-level decoding failed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Constant pool lookup or insertion failed
    #[error(transparent)]
    ConstantPool(#[from] ConstantPoolError),

    /// An offset does not fall on an instruction boundary
    #[error("Offset {0} is not an instruction boundary")]
    InvalidOffset(i64),

    /// `WIDE` applied to an opcode that has no wide form
    #[error("WIDE cannot modify {opcode:?} at offset {offset}")]
    InvalidWide {
        /// The modified opcode
        opcode: Opcode,
        /// Offset of the `WIDE` prefix
        offset: usize,
    },

    /// Switch bounds are inconsistent
    #[error("Malformed switch at offset {0}")]
    InvalidSwitch(usize),

    /// A label is referenced but never placed in the stream
    #[error("Label {0} is not placed in the instruction stream")]
    UnboundLabel(u32),

    /// A 16-bit branch cannot reach its target after re-layout
    #[error("Branch at offset {offset} cannot reach delta {delta}")]
    BranchOutOfRange {
        /// Branch instruction offset
        offset: u32,
        /// Required delta
        delta: i64,
    },

    /// Encoded code exceeds the 65535-byte limit
    #[error("Code length {0} exceeds the class-file limit")]
    CodeTooLarge(usize),

    /// A code attribute carries offsets this model cannot relocate
    #[error("Unsupported code attribute {0}")]
    UnsupportedAttribute(String),

    /// Unknown stack map frame type
    #[error("Invalid stack map frame type {0}")]
    InvalidFrame(u8),

    /// Unknown verification type tag
    #[error("Invalid verification type tag {0}")]
    InvalidVerificationType(u8),

    /// Stack map frames are not in strictly increasing offset order
    #[error("Stack map frame at offset {0} is out of order")]
    FrameOrder(u32),
}

/// A position in an instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    /// Label identifier (unique within its stream)
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Offset-to-label allocation used while decoding
#[derive(Debug, Default)]
pub(crate) struct LabelMap {
    by_offset: BTreeMap<u32, Label>,
    next: u32,
}

impl LabelMap {
    pub(crate) fn label_at(&mut self, offset: u32) -> Label {
        let next = &mut self.next;
        *self.by_offset.entry(offset).or_insert_with(|| {
            let label = Label(*next);
            *next += 1;
            label
        })
    }

    #[cfg(test)]
    pub(crate) fn offset_of(&self, label: Label) -> Option<u32> {
        self.by_offset
            .iter()
            .find(|(_, l)| **l == label)
            .map(|(offset, _)| *offset)
    }

    fn label_at_signed(&mut self, offset: i64, code_len: usize) -> Result<Label, CodeError> {
        if offset < 0 || offset > code_len as i64 {
            return Err(CodeError::InvalidOffset(offset));
        }
        Ok(self.label_at(offset as u32))
    }
}

/// One instruction (or a label marking a position)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Position marker; occupies no bytes
    Label(Label),
    /// Opcode without operands
    Simple(Opcode),
    /// `BIPUSH` / `SIPUSH`
    Push {
        /// `BIPUSH` or `SIPUSH`
        opcode: Opcode,
        /// Pushed value
        value: i16,
    },
    /// `LDC` / `LDC_W` / `LDC2_W`
    Constant {
        /// Load opcode
        opcode: Opcode,
        /// Pool index
        index: u16,
    },
    /// Long-form local load/store or `RET`; short forms decode to this
    Local {
        /// Long-form opcode (`ILOAD`, `ASTORE`, `RET`, ...)
        opcode: Opcode,
        /// Slot
        index: u16,
    },
    /// `IINC`
    Iinc {
        /// Slot
        index: u16,
        /// Increment
        delta: i16,
    },
    /// `GETFIELD`, `PUTFIELD`, `GETSTATIC`, `PUTSTATIC`
    Field {
        /// Field opcode
        opcode: Opcode,
        /// FieldRef index
        index: u16,
    },
    /// `INVOKEVIRTUAL`, `INVOKESPECIAL`, `INVOKESTATIC`
    Method {
        /// Invocation opcode
        opcode: Opcode,
        /// MethodRef or InterfaceMethodRef index
        index: u16,
    },
    /// `INVOKEINTERFACE`
    InvokeInterface {
        /// InterfaceMethodRef index
        index: u16,
        /// Argument slot count including the receiver
        count: u8,
    },
    /// `INVOKEDYNAMIC`
    InvokeDynamic {
        /// InvokeDynamic index
        index: u16,
    },
    /// `NEW`, `ANEWARRAY`, `CHECKCAST`, `INSTANCEOF`
    Type {
        /// Type opcode
        opcode: Opcode,
        /// Class index
        index: u16,
    },
    /// `NEWARRAY`
    NewArray {
        /// Primitive array type code
        atype: u8,
    },
    /// `MULTIANEWARRAY`
    MultiANewArray {
        /// Class index
        index: u16,
        /// Dimensions
        dimensions: u8,
    },
    /// Conditional or unconditional branch (including `JSR`)
    Jump {
        /// Branch opcode
        opcode: Opcode,
        /// Target
        target: Label,
    },
    /// `TABLESWITCH`
    TableSwitch {
        /// Default target
        default: Label,
        /// Lowest key
        low: i32,
        /// Targets for `low..=low + targets.len() - 1`
        targets: Vec<Label>,
    },
    /// `LOOKUPSWITCH`
    LookupSwitch {
        /// Default target
        default: Label,
        /// Sorted `(key, target)` pairs
        pairs: Vec<(i32, Label)>,
    },
}

impl Instruction {
    /// The opcode this instruction encodes to (`None` for labels)
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Instruction::Label(_) => return None,
            Instruction::Simple(opcode)
            | Instruction::Push { opcode, .. }
            | Instruction::Constant { opcode, .. }
            | Instruction::Local { opcode, .. }
            | Instruction::Field { opcode, .. }
            | Instruction::Method { opcode, .. }
            | Instruction::Type { opcode, .. }
            | Instruction::Jump { opcode, .. } => *opcode,
            Instruction::Iinc { .. } => Opcode::Iinc,
            Instruction::InvokeInterface { .. } => Opcode::Invokeinterface,
            Instruction::InvokeDynamic { .. } => Opcode::Invokedynamic,
            Instruction::NewArray { .. } => Opcode::Newarray,
            Instruction::MultiANewArray { .. } => Opcode::Multianewarray,
            Instruction::TableSwitch { .. } => Opcode::Tableswitch,
            Instruction::LookupSwitch { .. } => Opcode::Lookupswitch,
        })
    }

    /// Local load/store shorthand
    pub fn local(opcode: Opcode, index: u16) -> Self {
        match opcode.expand_short_local() {
            Some((long, slot)) => Instruction::Local {
                opcode: long,
                index: slot,
            },
            None => Instruction::Local { opcode, index },
        }
    }

    /// Labels this instruction branches to
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Instruction::Jump { target, .. } => vec![*target],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Instruction::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, l)| *l))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn size(&self, offset: u32) -> u32 {
        match self {
            Instruction::Label(_) => 0,
            Instruction::Simple(_) => 1,
            Instruction::Push { opcode, .. } => {
                if *opcode == Opcode::Bipush {
                    2
                } else {
                    3
                }
            }
            Instruction::Constant { opcode, index } => {
                if *opcode == Opcode::Ldc && *index <= 0xFF {
                    2
                } else {
                    3
                }
            }
            Instruction::Local { opcode, index } => {
                if opcode.short_local(*index).is_some() {
                    1
                } else if *index <= 0xFF {
                    2
                } else {
                    4
                }
            }
            Instruction::Iinc { index, delta } => {
                if *index <= 0xFF && i8::try_from(*delta).is_ok() {
                    3
                } else {
                    6
                }
            }
            Instruction::Field { .. } | Instruction::Method { .. } | Instruction::Type { .. } => 3,
            Instruction::InvokeInterface { .. } | Instruction::InvokeDynamic { .. } => 5,
            Instruction::NewArray { .. } => 2,
            Instruction::MultiANewArray { .. } => 4,
            Instruction::Jump { opcode, .. } => {
                if opcode.is_wide_jump() {
                    5
                } else {
                    3
                }
            }
            Instruction::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len() as u32
            }
            Instruction::LookupSwitch { pairs, .. } => {
                1 + switch_padding(offset) + 8 + 8 * pairs.len() as u32
            }
        }
    }
}

fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

/// An exception table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start: Label,
    /// End of the protected range (exclusive)
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// Class index of the caught type, 0 for any
    pub catch_type: u16,
}

/// A `LineNumberTable` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    /// First instruction of the line
    pub start: Label,
    /// Source line
    pub line: u16,
}

/// A `LocalVariableTable` or `LocalVariableTypeTable` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Start of the live range
    pub start: Label,
    /// End of the live range (exclusive)
    pub end: Label,
    /// Utf8 index of the variable name
    pub name_index: u16,
    /// Utf8 index of the descriptor (or signature, in the type table)
    pub descriptor_index: u16,
    /// Slot
    pub index: u16,
}

/// Decoded `Code` attribute
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstructionStream {
    /// Instructions and labels in order
    pub instructions: Vec<Instruction>,
    /// Exception table
    pub exception_table: Vec<ExceptionHandler>,
    /// Line numbers
    pub line_numbers: Vec<LineNumber>,
    /// Local variable debug entries
    pub local_variables: Vec<LocalVariable>,
    /// Local variable generic signature entries
    pub local_variable_types: Vec<LocalVariable>,
    /// Stack map frames, when the method has a `StackMapTable`
    pub stack_map: Option<Vec<StackMapFrame>>,
    /// Code attributes this model does not interpret
    pub other_attributes: Vec<Attribute>,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local slots
    pub max_locals: u16,
    next_label: u32,
}

const LINE_NUMBER_TABLE: &str = "LineNumberTable";
const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
const STACK_MAP_TABLE: &str = "StackMapTable";
const TYPE_ANNOTATION_ATTRIBUTES: [&str; 2] = [
    "RuntimeVisibleTypeAnnotations",
    "RuntimeInvisibleTypeAnnotations",
];

impl InstructionStream {
    /// An empty stream
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            max_stack,
            max_locals,
            ..Self::default()
        }
    }

    /// Allocate a fresh label (place it with `Instruction::Label`)
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Append an instruction
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Iterate real instructions, skipping labels
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions
            .iter()
            .filter(|i| !matches!(i, Instruction::Label(_)))
    }

    /// Decode the payload of a `Code` attribute
    pub fn decode(info: &[u8], pool: &ConstantPool) -> Result<Self, CodeError> {
        let mut reader = BytecodeReader::new(info);
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;

        let mut labels = LabelMap::default();
        let decoded = decode_code(code, &mut labels)?;

        let handler_count = reader.read_u16()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start = reader.read_u16()? as i64;
            let end = reader.read_u16()? as i64;
            let handler = reader.read_u16()? as i64;
            exception_table.push(ExceptionHandler {
                start: labels.label_at_signed(start, code_len)?,
                end: labels.label_at_signed(end, code_len)?,
                handler: labels.label_at_signed(handler, code_len)?,
                catch_type: reader.read_u16()?,
            });
        }

        let mut stream = Self {
            exception_table,
            max_stack,
            max_locals,
            ..Self::default()
        };

        let attribute_count = reader.read_u16()?;
        for _ in 0..attribute_count {
            let name_index = reader.read_u16()?;
            let len = reader.read_u32()? as usize;
            let body = reader.read_bytes(len)?;
            let name = pool.utf8(name_index)?;
            match name {
                LINE_NUMBER_TABLE => {
                    let mut r = BytecodeReader::new(body);
                    let count = r.read_u16()?;
                    for _ in 0..count {
                        let start = r.read_u16()? as i64;
                        stream.line_numbers.push(LineNumber {
                            start: labels.label_at_signed(start, code_len)?,
                            line: r.read_u16()?,
                        });
                    }
                }
                LOCAL_VARIABLE_TABLE | LOCAL_VARIABLE_TYPE_TABLE => {
                    let entries = decode_local_variables(body, &mut labels, code_len)?;
                    if name == LOCAL_VARIABLE_TABLE {
                        stream.local_variables.extend(entries);
                    } else {
                        stream.local_variable_types.extend(entries);
                    }
                }
                STACK_MAP_TABLE => {
                    stream.stack_map = Some(stackmap::decode_frames(body, &mut labels)?);
                }
                name if TYPE_ANNOTATION_ATTRIBUTES.contains(&name) => {
                    return Err(CodeError::UnsupportedAttribute(name.to_owned()));
                }
                _ => stream.other_attributes.push(Attribute {
                    name_index,
                    info: body.to_vec(),
                }),
            }
        }

        // Place labels in front of the instruction at their offset.
        let mut pending = labels.by_offset.iter().peekable();
        let mut instructions = Vec::with_capacity(decoded.len() + labels.by_offset.len());
        for (offset, instruction) in decoded {
            while let Some((&at, &label)) = pending.peek() {
                if at > offset {
                    break;
                }
                if at < offset {
                    return Err(CodeError::InvalidOffset(at as i64));
                }
                instructions.push(Instruction::Label(label));
                pending.next();
            }
            instructions.push(instruction);
        }
        for (&at, &label) in pending {
            if at as usize != code_len {
                return Err(CodeError::InvalidOffset(at as i64));
            }
            instructions.push(Instruction::Label(label));
        }

        stream.instructions = instructions;
        stream.next_label = labels.next;
        Ok(stream)
    }

    /// Lay out the stream and encode the payload of a `Code` attribute
    pub fn encode(&self, pool: &mut ConstantPool) -> Result<Vec<u8>, CodeError> {
        let mut positions: Vec<Option<u32>> = vec![None; self.next_label as usize];
        let mut offset: u32 = 0;
        for instruction in &self.instructions {
            if let Instruction::Label(label) = instruction {
                if let Some(slot) = positions.get_mut(label.0 as usize) {
                    *slot = Some(offset);
                }
            } else {
                offset += instruction.size(offset);
                if offset as usize > u16::MAX as usize {
                    return Err(CodeError::CodeTooLarge(offset as usize));
                }
            }
        }
        let resolve = |label: Label| -> Result<u32, CodeError> {
            positions
                .get(label.0 as usize)
                .copied()
                .flatten()
                .ok_or(CodeError::UnboundLabel(label.0))
        };

        let mut code = BytecodeWriter::with_capacity(offset as usize);
        for instruction in &self.instructions {
            encode_instruction(instruction, &mut code, &resolve)?;
        }
        let code = code.into_bytes();

        let mut writer = BytecodeWriter::with_capacity(code.len() + 64);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(code.len() as u32);
        writer.emit_bytes(&code);

        writer.emit_u16(self.exception_table.len() as u16);
        for entry in &self.exception_table {
            writer.emit_u16(resolve(entry.start)? as u16);
            writer.emit_u16(resolve(entry.end)? as u16);
            writer.emit_u16(resolve(entry.handler)? as u16);
            writer.emit_u16(entry.catch_type);
        }

        let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
        if !self.line_numbers.is_empty() {
            let mut body = BytecodeWriter::new();
            body.emit_u16(self.line_numbers.len() as u16);
            for entry in &self.line_numbers {
                body.emit_u16(resolve(entry.start)? as u16);
                body.emit_u16(entry.line);
            }
            attributes.push((pool.add_utf8(LINE_NUMBER_TABLE)?, body.into_bytes()));
        }
        for (name, table) in [
            (LOCAL_VARIABLE_TABLE, &self.local_variables),
            (LOCAL_VARIABLE_TYPE_TABLE, &self.local_variable_types),
        ] {
            if table.is_empty() {
                continue;
            }
            let mut body = BytecodeWriter::new();
            body.emit_u16(table.len() as u16);
            for entry in table {
                let start = resolve(entry.start)?;
                let end = resolve(entry.end)?;
                body.emit_u16(start as u16);
                body.emit_u16(end.saturating_sub(start) as u16);
                body.emit_u16(entry.name_index);
                body.emit_u16(entry.descriptor_index);
                body.emit_u16(entry.index);
            }
            attributes.push((pool.add_utf8(name)?, body.into_bytes()));
        }
        if let Some(frames) = self.stack_map.as_ref().filter(|f| !f.is_empty()) {
            let mut body = BytecodeWriter::new();
            stackmap::encode_frames(frames, &mut body, resolve)?;
            attributes.push((pool.add_utf8(STACK_MAP_TABLE)?, body.into_bytes()));
        }
        for raw in &self.other_attributes {
            attributes.push((raw.name_index, raw.info.clone()));
        }

        writer.emit_u16(attributes.len() as u16);
        for (name_index, body) in attributes {
            writer.emit_u16(name_index);
            writer.emit_u32(body.len() as u32);
            writer.emit_bytes(&body);
        }
        Ok(writer.into_bytes())
    }
}

fn decode_local_variables(
    body: &[u8],
    labels: &mut LabelMap,
    code_len: usize,
) -> Result<Vec<LocalVariable>, CodeError> {
    let mut r = BytecodeReader::new(body);
    let count = r.read_u16()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = r.read_u16()? as i64;
        let length = r.read_u16()? as i64;
        entries.push(LocalVariable {
            start: labels.label_at_signed(start, code_len)?,
            end: labels.label_at_signed(start + length, code_len)?,
            name_index: r.read_u16()?,
            descriptor_index: r.read_u16()?,
            index: r.read_u16()?,
        });
    }
    Ok(entries)
}

fn decode_code(
    code: &[u8],
    labels: &mut LabelMap,
) -> Result<Vec<(u32, Instruction)>, CodeError> {
    let code_len = code.len();
    let mut reader = BytecodeReader::new(code);
    let mut decoded = Vec::new();

    while reader.has_more() {
        let start = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, start))?;
        let base = start as i64;

        let instruction = match opcode {
            Opcode::Bipush => Instruction::Push {
                opcode,
                value: reader.read_i8()? as i16,
            },
            Opcode::Sipush => Instruction::Push {
                opcode,
                value: reader.read_i16()?,
            },
            Opcode::Ldc => Instruction::Constant {
                opcode,
                index: reader.read_u8()? as u16,
            },
            Opcode::LdcW | Opcode::Ldc2W => Instruction::Constant {
                opcode,
                index: reader.read_u16()?,
            },
            Opcode::Iinc => Instruction::Iinc {
                index: reader.read_u8()? as u16,
                delta: reader.read_i8()? as i16,
            },
            op if op.has_local_operand() => Instruction::Local {
                opcode: op,
                index: reader.read_u8()? as u16,
            },
            op if op.expand_short_local().is_some() => Instruction::local(op, 0),
            op if op.is_field_access() => Instruction::Field {
                opcode: op,
                index: reader.read_u16()?,
            },
            Opcode::Invokevirtual | Opcode::Invokespecial | Opcode::Invokestatic => {
                Instruction::Method {
                    opcode,
                    index: reader.read_u16()?,
                }
            }
            Opcode::Invokeinterface => {
                let index = reader.read_u16()?;
                let count = reader.read_u8()?;
                reader.skip(1)?;
                Instruction::InvokeInterface { index, count }
            }
            Opcode::Invokedynamic => {
                let index = reader.read_u16()?;
                reader.skip(2)?;
                Instruction::InvokeDynamic { index }
            }
            Opcode::New | Opcode::Anewarray | Opcode::Checkcast | Opcode::Instanceof => {
                Instruction::Type {
                    opcode,
                    index: reader.read_u16()?,
                }
            }
            Opcode::Newarray => Instruction::NewArray {
                atype: reader.read_u8()?,
            },
            Opcode::Multianewarray => Instruction::MultiANewArray {
                index: reader.read_u16()?,
                dimensions: reader.read_u8()?,
            },
            op if op.is_jump() => {
                let delta = if op.is_wide_jump() {
                    reader.read_i32()? as i64
                } else {
                    reader.read_i16()? as i64
                };
                Instruction::Jump {
                    opcode: op,
                    target: labels.label_at_signed(base + delta, code_len)?,
                }
            }
            Opcode::Tableswitch => {
                reader.align4(0)?;
                let default = reader.read_i32()? as i64;
                let low = reader.read_i32()?;
                let high = reader.read_i32()?;
                if high < low {
                    return Err(CodeError::InvalidSwitch(start));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count * 4 > reader.remaining() {
                    return Err(DecodeError::UnexpectedEnd(reader.position()).into());
                }
                let default = labels.label_at_signed(base + default, code_len)?;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    let delta = reader.read_i32()? as i64;
                    targets.push(labels.label_at_signed(base + delta, code_len)?);
                }
                Instruction::TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            Opcode::Lookupswitch => {
                reader.align4(0)?;
                let default = reader.read_i32()? as i64;
                let npairs = reader.read_i32()?;
                if npairs < 0 {
                    return Err(CodeError::InvalidSwitch(start));
                }
                if npairs as usize * 8 > reader.remaining() {
                    return Err(DecodeError::UnexpectedEnd(reader.position()).into());
                }
                let default = labels.label_at_signed(base + default, code_len)?;
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = reader.read_i32()?;
                    let delta = reader.read_i32()? as i64;
                    pairs.push((key, labels.label_at_signed(base + delta, code_len)?));
                }
                Instruction::LookupSwitch { default, pairs }
            }
            Opcode::Wide => {
                let byte = reader.read_u8()?;
                let modified = Opcode::from_u8(byte)
                    .ok_or(DecodeError::InvalidOpcode(byte, start + 1))?;
                match modified {
                    Opcode::Iinc => Instruction::Iinc {
                        index: reader.read_u16()?,
                        delta: reader.read_i16()?,
                    },
                    op if op.has_local_operand() => Instruction::Local {
                        opcode: op,
                        index: reader.read_u16()?,
                    },
                    opcode => return Err(CodeError::InvalidWide { opcode, offset: start }),
                }
            }
            _ => Instruction::Simple(opcode),
        };
        decoded.push((start as u32, instruction));
    }
    Ok(decoded)
}

fn encode_instruction<F>(
    instruction: &Instruction,
    code: &mut BytecodeWriter,
    resolve: &F,
) -> Result<(), CodeError>
where
    F: Fn(Label) -> Result<u32, CodeError>,
{
    let start = code.offset() as u32;
    match instruction {
        Instruction::Label(_) => {}
        Instruction::Simple(opcode) => code.emit_u8(opcode.to_u8()),
        Instruction::Push { opcode, value } => {
            code.emit_u8(opcode.to_u8());
            if *opcode == Opcode::Bipush {
                code.emit_i8(*value as i8);
            } else {
                code.emit_i16(*value);
            }
        }
        Instruction::Constant { opcode, index } => {
            if *opcode == Opcode::Ldc && *index <= 0xFF {
                code.emit_u8(Opcode::Ldc.to_u8());
                code.emit_u8(*index as u8);
            } else {
                let opcode = if *opcode == Opcode::Ldc { Opcode::LdcW } else { *opcode };
                code.emit_u8(opcode.to_u8());
                code.emit_u16(*index);
            }
        }
        Instruction::Local { opcode, index } => {
            if let Some(short) = opcode.short_local(*index) {
                code.emit_u8(short.to_u8());
            } else if *index <= 0xFF {
                code.emit_u8(opcode.to_u8());
                code.emit_u8(*index as u8);
            } else {
                code.emit_u8(Opcode::Wide.to_u8());
                code.emit_u8(opcode.to_u8());
                code.emit_u16(*index);
            }
        }
        Instruction::Iinc { index, delta } => match i8::try_from(*delta) {
            Ok(small) if *index <= 0xFF => {
                code.emit_u8(Opcode::Iinc.to_u8());
                code.emit_u8(*index as u8);
                code.emit_i8(small);
            }
            _ => {
                code.emit_u8(Opcode::Wide.to_u8());
                code.emit_u8(Opcode::Iinc.to_u8());
                code.emit_u16(*index);
                code.emit_i16(*delta);
            }
        },
        Instruction::Field { opcode, index }
        | Instruction::Method { opcode, index }
        | Instruction::Type { opcode, index } => {
            code.emit_u8(opcode.to_u8());
            code.emit_u16(*index);
        }
        Instruction::InvokeInterface { index, count } => {
            code.emit_u8(Opcode::Invokeinterface.to_u8());
            code.emit_u16(*index);
            code.emit_u8(*count);
            code.emit_u8(0);
        }
        Instruction::InvokeDynamic { index } => {
            code.emit_u8(Opcode::Invokedynamic.to_u8());
            code.emit_u16(*index);
            code.emit_u16(0);
        }
        Instruction::NewArray { atype } => {
            code.emit_u8(Opcode::Newarray.to_u8());
            code.emit_u8(*atype);
        }
        Instruction::MultiANewArray { index, dimensions } => {
            code.emit_u8(Opcode::Multianewarray.to_u8());
            code.emit_u16(*index);
            code.emit_u8(*dimensions);
        }
        Instruction::Jump { opcode, target } => {
            let delta = resolve(*target)? as i64 - start as i64;
            code.emit_u8(opcode.to_u8());
            if opcode.is_wide_jump() {
                code.emit_i32(delta as i32);
            } else {
                let short = i16::try_from(delta).map_err(|_| CodeError::BranchOutOfRange {
                    offset: start,
                    delta,
                })?;
                code.emit_i16(short);
            }
        }
        Instruction::TableSwitch {
            default,
            low,
            targets,
        } => {
            code.emit_u8(Opcode::Tableswitch.to_u8());
            code.align4();
            code.emit_i32(resolve(*default)? as i32 - start as i32);
            code.emit_i32(*low);
            code.emit_i32(*low + targets.len() as i32 - 1);
            for target in targets {
                code.emit_i32(resolve(*target)? as i32 - start as i32);
            }
        }
        Instruction::LookupSwitch { default, pairs } => {
            code.emit_u8(Opcode::Lookupswitch.to_u8());
            code.align4();
            code.emit_i32(resolve(*default)? as i32 - start as i32);
            code.emit_i32(pairs.len() as i32);
            for (key, target) in pairs {
                code.emit_i32(*key);
                code.emit_i32(resolve(*target)? as i32 - start as i32);
            }
        }
    }
    Ok(())
}
