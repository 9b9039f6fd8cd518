//! Errors for class manipulation

use crate::rewriter::RewriteError;
use pojo_bytecode::{ClassFileError, CodeError, ConstantPoolError, DescriptorError, VerifyError};
use thiserror::Error;

/// Errors that abort the manipulation of a class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManipulationError {
    /// The class file could not be read or written
    #[error("Class file error: {0}")]
    ClassFile(#[from] ClassFileError),

    /// Constant pool error
    #[error("Constant pool error: {0}")]
    ConstantPool(#[from] ConstantPoolError),

    /// A field or method descriptor does not parse
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A method body could not be encoded
    #[error("Code error: {0}")]
    Code(#[from] CodeError),

    /// A constructor could not be rewritten
    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    /// A rewritten or generated method failed verification
    #[error("Method {method} failed verification: {source}")]
    Verify {
        /// `name` + descriptor of the method
        method: String,
        /// Verification failure
        source: VerifyError,
    },

    /// The class already declares the manager field
    #[error("Class {0} is already manipulated")]
    AlreadyManipulated(String),

    /// Interfaces have no instances to manage
    #[error("{0} is an interface")]
    Interface(String),

    /// A method that must have a body does not
    #[error("Method {0} has no Code attribute")]
    MissingCode(String),
}
