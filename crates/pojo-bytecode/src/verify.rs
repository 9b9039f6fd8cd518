//! Structural verification of instruction streams
//!
//! This is not the JVM type-checking verifier. It checks what a rewrite can
//! break: operand kinds in the constant pool, local slots against
//! `max_locals`, label placement, and that control cannot fall off the end.

use crate::constants::{Constant, ConstantPool};
use crate::instruction::{Instruction, InstructionStream, Label};
use crate::opcode::Opcode;
use crate::stackmap::{StackMapFrame, VerificationType};
use rustc_hash::FxHashSet;

/// Structural verification errors
///
/// Positions are indices into `InstructionStream::instructions`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The stream contains no instructions
    #[error("Code is empty")]
    EmptyCode,

    /// A label is placed more than once
    #[error("Label {0} is placed more than once")]
    DuplicateLabel(u32),

    /// A referenced label is never placed
    #[error("Label {label} referenced at position {position} is never placed")]
    UnboundLabel {
        /// Label id
        label: u32,
        /// Index of the referencing instruction
        position: usize,
    },

    /// A constant pool operand has the wrong kind or does not exist
    #[error("Constant pool index {index} at position {position} is not a {expected}")]
    InvalidConstantRef {
        /// Constant pool index
        index: u16,
        /// Index of the instruction
        position: usize,
        /// Expected constant kind
        expected: &'static str,
    },

    /// A local slot is outside `max_locals`
    #[error("Invalid local variable reference: index {index} (max {max}) at position {position}")]
    InvalidLocalRef {
        /// Slot the instruction touches
        index: u32,
        /// `max_locals` of the code
        max: u16,
        /// Index of the instruction
        position: usize,
    },

    /// Execution falls off the end of the code
    #[error("Execution falls off end of code at position {0}")]
    FallOffEnd(usize),
}

/// Verify an instruction stream against its constant pool
pub fn verify_code(stream: &InstructionStream, pool: &ConstantPool) -> Result<(), VerifyError> {
    let last = stream
        .instructions
        .iter()
        .rposition(|i| !matches!(i, Instruction::Label(_)))
        .ok_or(VerifyError::EmptyCode)?;

    let placed = collect_labels(stream)?;
    let check_label = |label: Label, position: usize| {
        if placed.contains(&label) {
            Ok(())
        } else {
            Err(VerifyError::UnboundLabel {
                label: label.id(),
                position,
            })
        }
    };

    for (position, instruction) in stream.instructions.iter().enumerate() {
        for target in instruction.targets() {
            check_label(target, position)?;
        }
        verify_constant_refs(instruction, position, pool)?;
        verify_local_refs(instruction, position, stream.max_locals)?;
    }

    let end = stream.instructions.len();
    for handler in &stream.exception_table {
        for label in [handler.start, handler.end, handler.handler] {
            check_label(label, end)?;
        }
        if handler.catch_type != 0 {
            expect_constant(pool, handler.catch_type, end, "Class", |c| {
                matches!(c, Constant::Class { .. })
            })?;
        }
    }
    for line in &stream.line_numbers {
        check_label(line.start, end)?;
    }
    for local in stream
        .local_variables
        .iter()
        .chain(&stream.local_variable_types)
    {
        check_label(local.start, end)?;
        check_label(local.end, end)?;
    }
    for frame in stream.stack_map.iter().flatten() {
        check_label(frame.target(), end)?;
        for ty in frame_types(frame) {
            if let VerificationType::Uninitialized(label) = ty {
                check_label(*label, end)?;
            }
        }
    }

    let terminates = stream.instructions[last]
        .opcode()
        .map_or(false, Opcode::is_terminator);
    if !terminates {
        return Err(VerifyError::FallOffEnd(last));
    }

    Ok(())
}

fn collect_labels(stream: &InstructionStream) -> Result<FxHashSet<Label>, VerifyError> {
    let mut placed = FxHashSet::default();
    for instruction in &stream.instructions {
        if let Instruction::Label(label) = instruction {
            if !placed.insert(*label) {
                return Err(VerifyError::DuplicateLabel(label.id()));
            }
        }
    }
    Ok(placed)
}

fn frame_types(frame: &StackMapFrame) -> Vec<&VerificationType> {
    match frame {
        StackMapFrame::SameLocals1StackItem { stack, .. } => vec![stack],
        StackMapFrame::Append { locals, .. } => locals.iter().collect(),
        StackMapFrame::Full { locals, stack, .. } => locals.iter().chain(stack).collect(),
        StackMapFrame::Same { .. } | StackMapFrame::Chop { .. } => Vec::new(),
    }
}

fn expect_constant(
    pool: &ConstantPool,
    index: u16,
    position: usize,
    expected: &'static str,
    accept: impl Fn(&Constant) -> bool,
) -> Result<(), VerifyError> {
    match pool.get(index) {
        Some(constant) if accept(constant) => Ok(()),
        _ => Err(VerifyError::InvalidConstantRef {
            index,
            position,
            expected,
        }),
    }
}

fn verify_constant_refs(
    instruction: &Instruction,
    position: usize,
    pool: &ConstantPool,
) -> Result<(), VerifyError> {
    match instruction {
        Instruction::Field { index, .. } => {
            expect_constant(pool, *index, position, "FieldRef", |c| {
                matches!(c, Constant::FieldRef { .. })
            })
        }
        Instruction::Method { opcode, index } => {
            let interface_ok = *opcode != Opcode::Invokevirtual;
            expect_constant(pool, *index, position, "MethodRef", |c| match c {
                Constant::MethodRef { .. } => true,
                Constant::InterfaceMethodRef { .. } => interface_ok,
                _ => false,
            })
        }
        Instruction::InvokeInterface { index, .. } => {
            expect_constant(pool, *index, position, "InterfaceMethodRef", |c| {
                matches!(c, Constant::InterfaceMethodRef { .. })
            })
        }
        Instruction::InvokeDynamic { index } => {
            expect_constant(pool, *index, position, "InvokeDynamic", |c| {
                matches!(c, Constant::InvokeDynamic { .. })
            })
        }
        Instruction::Type { index, .. } | Instruction::MultiANewArray { index, .. } => {
            expect_constant(pool, *index, position, "Class", |c| {
                matches!(c, Constant::Class { .. })
            })
        }
        Instruction::Constant { opcode, index } => {
            if *opcode == Opcode::Ldc2W {
                expect_constant(pool, *index, position, "Long or Double", |c| {
                    matches!(
                        c,
                        Constant::Long(_) | Constant::Double(_) | Constant::Dynamic { .. }
                    )
                })
            } else {
                expect_constant(pool, *index, position, "loadable constant", |c| {
                    matches!(
                        c,
                        Constant::Integer(_)
                            | Constant::Float(_)
                            | Constant::String { .. }
                            | Constant::Class { .. }
                            | Constant::MethodType { .. }
                            | Constant::MethodHandle { .. }
                            | Constant::Dynamic { .. }
                    )
                })
            }
        }
        _ => Ok(()),
    }
}

fn verify_local_refs(
    instruction: &Instruction,
    position: usize,
    max_locals: u16,
) -> Result<(), VerifyError> {
    let (index, slots) = match instruction {
        Instruction::Local { opcode, index } => {
            let slots = opcode
                .load_kind()
                .or_else(|| opcode.store_kind())
                .map_or(1, |kind| kind.slots());
            (*index, slots)
        }
        Instruction::Iinc { index, .. } => (*index, 1),
        _ => return Ok(()),
    };
    if index as u32 + slots as u32 > max_locals as u32 {
        return Err(VerifyError::InvalidLocalRef {
            index: index as u32,
            max: max_locals,
            position,
        });
    }
    Ok(())
}
