//! Class manipulation for iPOJO-style components
//!
//! - [`scanner`] lists the packages a class refers to and detects bundle
//!   activators without fully decoding the class.
//! - [`rewriter`] rewrites constructor and method bodies so the instance
//!   manager sees every field access.
//! - [`manipulator`] applies the rewrite to a whole class and adds the
//!   generated members.
//! - [`imports`] turns the scan results of a bundle into manifest headers.
//!
//! ```no_run
//! use pojo_manipulator::{Manipulator, ManipulatorConfig};
//!
//! let config = ManipulatorConfig::default();
//! let bytes = std::fs::read("Hello.class").unwrap();
//! let class = Manipulator::new(&config.manipulation).manipulate(&bytes).unwrap();
//! println!("{}", class.metadata.to_manifest_string());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod accessors;
pub mod config;
pub mod error;
pub mod imports;
pub mod manipulator;
pub mod rewriter;
pub mod scanner;

pub use config::{ConfigError, ManipulationConfig, ManipulatorConfig, ScanConfig};
pub use error::ManipulationError;
pub use imports::{handler_package, merge_import_header, BundleAnalysis};
pub use manipulator::{manipulation_element, missing_fields, ManipulatedClass, Manipulator};
pub use rewriter::{
    is_super_call, redirect_field_access, ConstructorRewriter, InterceptedField, RewriteError,
    RewriteOutcome, RewriteState,
};
pub use scanner::{ClassScanner, ReferenceSet, ScanError, ScanSection, ScanWarning};
