//! Component metadata for the pojoize manipulator
//!
//! Metadata is written in a small element language, usually found in the
//! `iPOJO-Components` manifest header:
//!
//! ```text
//! component { $className=org.example.Foo h:handler { $level=3 } }
//! ```
//!
//! [`parse`] turns one such description into an [`Element`] tree,
//! [`Element::to_manifest_string`] prints it back, and [`instances`] decodes
//! the `instance` declarations of a header.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cursor;
pub mod element;
pub mod instance;
pub mod parser;

pub use element::{Attribute, Element};
pub use instance::{components, instances, InstanceConfiguration, InstanceError, PropertyValue};
pub use parser::{parse, parse_header, MetadataError, HEADER_ROOT};
