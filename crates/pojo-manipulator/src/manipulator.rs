//! Class-level manipulation
//!
//! Ties the rewriter and the accessor factory together: every constructor
//! takes the manager as a new first parameter, every access to an instance
//! field goes through generated accessors, and the class gains the manager
//! field, the marker interface and `getComponentInstance()`. Each original
//! constructor is kept as a delegate passing a `null` manager.

use crate::accessors::{AccessorFactory, GeneratedMethod, GET_COMPONENT_INSTANCE};
use crate::config::ManipulationConfig;
use crate::error::ManipulationError;
use crate::rewriter::{redirect_field_access, ConstructorRewriter, InterceptedField};
use pojo_bytecode::class::ACC_PRIVATE;
use pojo_bytecode::{
    verify_code, ClassFile, ConstantPool, FieldType, InstructionStream, Member, MethodDescriptor,
};
use pojo_metadata::{Attribute, Element};
use tracing::debug;

/// Name of the element describing a manipulated class
pub const MANIPULATION_ELEMENT: &str = "Manipulation";

const CONSTRUCTOR: &str = "<init>";

/// A manipulated class
#[derive(Debug, Clone)]
pub struct ManipulatedClass {
    /// Rewritten class file
    pub bytes: Vec<u8>,
    /// Binary name of the class
    pub class_name: String,
    /// Binary names of the interfaces the class declared before manipulation
    pub interfaces: Vec<String>,
    /// Fields whose accesses now go through the manager
    pub fields: Vec<InterceptedField>,
    /// `Manipulation` element for the component metadata
    pub metadata: Element,
}

/// Rewrites component classes so an instance manager can intercept them
#[derive(Debug, Clone)]
pub struct Manipulator<'c> {
    config: &'c ManipulationConfig,
}

fn verify(
    stream: &InstructionStream,
    pool: &ConstantPool,
    name: &str,
    descriptor: &str,
) -> Result<(), ManipulationError> {
    verify_code(stream, pool).map_err(|source| ManipulationError::Verify {
        method: format!("{}{}", name, descriptor),
        source,
    })
}

impl<'c> Manipulator<'c> {
    /// Create a manipulator using the injected names from `config`
    pub fn new(config: &'c ManipulationConfig) -> Self {
        Self { config }
    }

    /// Manipulate one class file
    pub fn manipulate(&self, bytes: &[u8]) -> Result<ManipulatedClass, ManipulationError> {
        let mut class = ClassFile::decode(bytes)?;
        let class_name = class.name()?.to_string();
        if class.is_interface() {
            return Err(ManipulationError::Interface(class_name));
        }
        if class.field(&self.config.manager_field).is_some() {
            return Err(ManipulationError::AlreadyManipulated(class_name));
        }

        let interfaces: Vec<String> = class
            .interface_names()?
            .into_iter()
            .map(str::to_string)
            .collect();
        let fields = intercepted_fields(&class)?;

        let (constructors, redirected) = self.rewrite_methods(&mut class, &class_name, &fields)?;
        self.add_members(&mut class, &class_name, &fields, &interfaces)?;
        self.add_delegating_constructors(&mut class, &class_name, &constructors)?;

        debug!(
            class = %class_name,
            fields = fields.len(),
            constructors = constructors.len(),
            redirected,
            "manipulated class"
        );

        let metadata = manipulation_element(&interfaces, &fields)?;
        Ok(ManipulatedClass {
            bytes: class.encode(),
            class_name,
            interfaces,
            fields,
            metadata,
        })
    }

    /// Rewrite constructors and redirect field accesses in every other
    /// method; returns the original constructors (access flags and
    /// descriptor) and the number of redirected accesses
    fn rewrite_methods(
        &self,
        class: &mut ClassFile,
        owner: &str,
        fields: &[InterceptedField],
    ) -> Result<(Vec<(u16, MethodDescriptor)>, usize), ManipulationError> {
        let pool = &mut class.constant_pool;
        let manager = FieldType::object(self.config.manager_type.clone());
        let mut constructors = Vec::new();
        let mut redirected = 0;

        for method in class.methods.iter_mut() {
            let name = method.name(pool)?.to_string();
            let descriptor = method.descriptor(pool)?.to_string();
            let code = method.code(pool)?;

            if name == CONSTRUCTOR {
                let stream = code.ok_or_else(|| {
                    ManipulationError::MissingCode(format!("{}.{}{}", owner, name, descriptor))
                })?;
                let outcome =
                    ConstructorRewriter::new(owner, fields, self.config).rewrite(stream, pool)?;
                let original = MethodDescriptor::parse(&descriptor)?;
                let new_descriptor = original
                    .with_leading_parameter(manager.clone())
                    .to_string();

                verify(&outcome.stream, pool, &name, &new_descriptor)?;
                method.descriptor_index = pool.add_utf8(&new_descriptor)?;
                method.set_code(pool, &outcome.stream)?;
                constructors.push((method.access_flags, original));
                redirected += outcome.redirected_fields;
                continue;
            }

            // abstract and native methods have no body
            let Some(mut stream) = code else {
                continue;
            };
            let count = redirect_field_access(&mut stream, owner, fields, pool)?;
            if count > 0 {
                verify(&stream, pool, &name, &descriptor)?;
                method.set_code(pool, &stream)?;
                redirected += count;
            }
        }

        Ok((constructors, redirected))
    }

    fn add_members(
        &self,
        class: &mut ClassFile,
        owner: &str,
        fields: &[InterceptedField],
        interfaces: &[String],
    ) -> Result<(), ManipulationError> {
        let config = self.config;
        let factory = AccessorFactory::new(owner, config);

        let manager_field = Member::new(
            &mut class.constant_pool,
            ACC_PRIVATE,
            &config.manager_field,
            &config.manager_descriptor(),
        )?;
        class.fields.push(manager_field);
        for field in fields {
            let flag = Member::new(&mut class.constant_pool, ACC_PRIVATE, &field.flag_name(), "Z")?;
            class.fields.push(flag);
        }

        let mut generated = vec![factory.manager_setter(fields, &mut class.constant_pool)?];
        for field in fields {
            generated.push(factory.getter(field, &mut class.constant_pool)?);
            generated.push(factory.setter(field, &mut class.constant_pool)?);
        }

        if !interfaces.iter().any(|i| *i == config.pojo_interface) {
            let index = class.constant_pool.add_class(&config.pojo_interface)?;
            class.interfaces.push(index);
        }
        let instance = factory.component_instance(&mut class.constant_pool)?;
        if class.method(&instance.name, &instance.descriptor).is_none() {
            generated.push(instance);
        } else {
            debug!(class = %owner, "{} already declared", GET_COMPONENT_INSTANCE);
        }

        for method in generated {
            let member = build_method(&mut class.constant_pool, &method)?;
            class.methods.push(member);
        }
        Ok(())
    }

    /// Give back every original constructor signature, unless a rewritten
    /// constructor now owns it
    fn add_delegating_constructors(
        &self,
        class: &mut ClassFile,
        owner: &str,
        constructors: &[(u16, MethodDescriptor)],
    ) -> Result<(), ManipulationError> {
        let factory = AccessorFactory::new(owner, self.config);
        for (access_flags, original) in constructors {
            let descriptor = original.to_string();
            if class.method(CONSTRUCTOR, &descriptor).is_some() {
                debug!(class = %owner, %descriptor, "constructor signature taken, no delegate");
                continue;
            }
            let method =
                factory.delegating_constructor(*access_flags, original, &mut class.constant_pool)?;
            let member = build_method(&mut class.constant_pool, &method)?;
            class.methods.push(member);
        }
        Ok(())
    }
}

fn build_method(
    pool: &mut ConstantPool,
    method: &GeneratedMethod,
) -> Result<Member, ManipulationError> {
    verify(&method.code, pool, &method.name, &method.descriptor)?;
    let mut member = Member::new(pool, method.access_flags, &method.name, &method.descriptor)?;
    member.set_code(pool, &method.code)?;
    Ok(member)
}

/// Instance fields of `class` that get accessors; static and synthetic
/// fields are left alone
fn intercepted_fields(class: &ClassFile) -> Result<Vec<InterceptedField>, ManipulationError> {
    let pool = &class.constant_pool;
    class
        .fields
        .iter()
        .filter(|f| !f.is_static() && !f.is_synthetic())
        .map(|f| Ok(InterceptedField::new(f.name(pool)?, f.descriptor(pool)?)))
        .collect()
}

/// Build the `Manipulation` element: one `Interface` per declared interface
/// and one `Field` per intercepted field, with Java-style names
pub fn manipulation_element(
    interfaces: &[String],
    fields: &[InterceptedField],
) -> Result<Element, ManipulationError> {
    let mut element = Element::new(MANIPULATION_ELEMENT);
    for interface in interfaces {
        element.add_element(
            Element::new("Interface").with_attribute(Attribute::new(
                "name",
                interface.replace('/', "."),
            )),
        );
    }
    for field in fields {
        let ty = FieldType::parse(&field.descriptor)?;
        element.add_element(
            Element::new("Field")
                .with_attribute(Attribute::new("name", field.name.as_str()))
                .with_attribute(Attribute::new("type", ty.java_name())),
        );
    }
    Ok(element)
}

/// Field names referenced by `field` attributes anywhere under `component`
/// that the class does not declare
pub fn missing_fields(component: &Element, fields: &[InterceptedField]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    let mut stack = vec![component];
    while let Some(element) = stack.pop() {
        if let Some(name) = element.attribute("field") {
            if !fields.iter().any(|f| f.name == name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        }
        stack.extend(element.elements().iter().rev());
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use pojo_metadata::parse;

    #[test]
    fn test_manipulation_element() {
        let element = manipulation_element(
            &["org/example/Hello".to_string()],
            &[
                InterceptedField::new("count", "I"),
                InterceptedField::new("name", "Ljava/lang/String;"),
                InterceptedField::new("data", "[[B"),
            ],
        )
        .unwrap();

        assert_eq!(
            element.to_manifest_string(),
            "Manipulation { Interface { $name=org.example.Hello } \
             Field { $name=count $type=int } \
             Field { $name=name $type=java.lang.String } \
             Field { $name=data $type=byte[][] } }"
        );
    }

    #[test]
    fn test_missing_fields() {
        let component = parse(
            "component { $className=org.example.Foo \
             requires { $field=log } \
             properties { property { $field=count } property { $field=gone } property { $field=gone } } }",
        )
        .unwrap();
        let fields = [
            InterceptedField::new("log", "Lorg/osgi/service/log/LogService;"),
            InterceptedField::new("count", "I"),
        ];
        assert_eq!(missing_fields(&component, &fields), vec!["gone".to_string()]);
    }

    #[test]
    fn test_not_a_class() {
        let config = ManipulationConfig::default();
        let err = Manipulator::new(&config)
            .manipulate(&[0xCA, 0xFE, 0xBA, 0xBE])
            .unwrap_err();
        assert!(matches!(err, ManipulationError::ClassFile(_)));
    }
}
