//! Class-file model for the pojoize manipulator
//!
//! This crate reads and writes JVM class files: the big-endian encoder, the
//! opcode table, the constant pool, descriptors, and a label-based
//! instruction stream that keeps branch targets, exception ranges, debug
//! tables and stack map frames attached to their instructions while code is
//! rewritten.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod constants;
pub mod descriptor;
pub mod encoder;
pub mod instruction;
pub mod opcode;
pub mod stackmap;
pub mod verify;

pub use class::{Attribute, ClassFile, ClassFileError, Member};
pub use constants::{Constant, ConstantPool, ConstantPoolError, MemberRef};
pub use descriptor::{BaseType, DescriptorError, FieldType, MethodDescriptor};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use instruction::{
    CodeError, ExceptionHandler, Instruction, InstructionStream, Label, LineNumber, LocalVariable,
};
pub use opcode::{LocalKind, Opcode};
pub use stackmap::{StackMapFrame, VerificationType};
pub use verify::{verify_code, VerifyError};
