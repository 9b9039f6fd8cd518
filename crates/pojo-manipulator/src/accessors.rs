//! Generated members of a manipulated class
//!
//! Every intercepted field gets a boolean flag. Accessors read the flag and
//! touch the field directly while it is clear, so an object created without
//! a manager (through a delegating constructor) behaves like the plain
//! class. `_setManager` raises the flags of the fields the manager watches.

use crate::config::ManipulationConfig;
use crate::error::ManipulationError;
use crate::rewriter::InterceptedField;
use pojo_bytecode::class::{ACC_PRIVATE, ACC_PUBLIC};
use pojo_bytecode::{
    ConstantPool, FieldType, Instruction, InstructionStream, Label, MethodDescriptor, Opcode,
    StackMapFrame, VerificationType,
};

/// Name of the method returning the manager as a component instance
pub const GET_COMPONENT_INSTANCE: &str = "getComponentInstance";

const OBJECT: &str = "java/lang/Object";
const SET: &str = "java/util/Set";
const GETTER_CALLBACK: (&str, &str) = (
    "getterCallback",
    "(Ljava/lang/String;Ljava/lang/Object;)Ljava/lang/Object;",
);
const SETTER_CALLBACK: (&str, &str) = (
    "setterCallback",
    "(Ljava/lang/String;Ljava/lang/Object;)V",
);
const REGISTERED_FIELDS: (&str, &str) = ("getRegistredFields", "()Ljava/util/Set;");
const SET_CONTAINS: (&str, &str) = ("contains", "(Ljava/lang/Object;)Z");

/// A method to add to the class
#[derive(Debug, Clone)]
pub struct GeneratedMethod {
    /// Access flags
    pub access_flags: u16,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Body
    pub code: InstructionStream,
}

/// Builds accessor bodies for one class
pub struct AccessorFactory<'a> {
    owner: &'a str,
    config: &'a ManipulationConfig,
}

fn aload(index: u16) -> Instruction {
    Instruction::Local {
        opcode: Opcode::Aload,
        index,
    }
}

impl<'a> AccessorFactory<'a> {
    /// Create a factory for `owner`
    pub fn new(owner: &'a str, config: &'a ManipulationConfig) -> Self {
        Self { owner, config }
    }

    fn load_manager(
        &self,
        code: &mut InstructionStream,
        pool: &mut ConstantPool,
    ) -> Result<(), ManipulationError> {
        let field = pool.add_field_ref(
            self.owner,
            &self.config.manager_field,
            &self.config.manager_descriptor(),
        )?;
        code.push(aload(0));
        code.push(Instruction::Field {
            opcode: Opcode::Getfield,
            index: field,
        });
        Ok(())
    }

    fn push_name(
        code: &mut InstructionStream,
        pool: &mut ConstantPool,
        name: &str,
    ) -> Result<(), ManipulationError> {
        code.push(Instruction::Constant {
            opcode: Opcode::Ldc,
            index: pool.add_string(name)?,
        });
        Ok(())
    }

    fn box_value(
        code: &mut InstructionStream,
        pool: &mut ConstantPool,
        ty: &FieldType,
    ) -> Result<(), ManipulationError> {
        if let Some(boxing) = ty.boxing() {
            code.push(Instruction::Method {
                opcode: Opcode::Invokestatic,
                index: pool.add_method_ref(boxing.class, "valueOf", boxing.value_of)?,
            });
        }
        Ok(())
    }

    /// Jump to the returned label when the field's flag is raised; the code
    /// that follows is the unmanaged path
    fn branch_if_managed(
        &self,
        code: &mut InstructionStream,
        pool: &mut ConstantPool,
        field: &InterceptedField,
    ) -> Result<Label, ManipulationError> {
        let managed = code.new_label();
        code.push(aload(0));
        code.push(Instruction::Field {
            opcode: Opcode::Getfield,
            index: pool.add_field_ref(self.owner, &field.flag_name(), "Z")?,
        });
        code.push(Instruction::Jump {
            opcode: Opcode::Ifne,
            target: managed,
        });
        Ok(managed)
    }

    /// Place `managed`; locals there are the method's parameters
    fn enter_managed(code: &mut InstructionStream, managed: Label) {
        code.push(Instruction::Label(managed));
        code.stack_map = Some(vec![StackMapFrame::Same { target: managed }]);
    }

    /// `_get<field>()`: the field itself, or the manager's value for it once
    /// the field is managed
    pub fn getter(
        &self,
        field: &InterceptedField,
        pool: &mut ConstantPool,
    ) -> Result<GeneratedMethod, ManipulationError> {
        let ty = FieldType::parse(&field.descriptor)?;
        let mut code = InstructionStream::new(4, 1);
        let field_ref = pool.add_field_ref(self.owner, &field.name, &field.descriptor)?;
        let ret = Instruction::Simple(Opcode::return_for(Some(ty.kind())));

        let managed = self.branch_if_managed(&mut code, pool, field)?;
        code.push(aload(0));
        code.push(Instruction::Field {
            opcode: Opcode::Getfield,
            index: field_ref,
        });
        code.push(ret.clone());
        Self::enter_managed(&mut code, managed);

        self.load_manager(&mut code, pool)?;
        Self::push_name(&mut code, pool, &field.name)?;
        code.push(aload(0));
        code.push(Instruction::Field {
            opcode: Opcode::Getfield,
            index: field_ref,
        });
        Self::box_value(&mut code, pool, &ty)?;
        let (name, descriptor) = GETTER_CALLBACK;
        code.push(Instruction::Method {
            opcode: Opcode::Invokevirtual,
            index: pool.add_method_ref(&self.config.manager_type, name, descriptor)?,
        });

        match ty.boxing() {
            Some(boxing) => {
                code.push(Instruction::Type {
                    opcode: Opcode::Checkcast,
                    index: pool.add_class(boxing.class)?,
                });
                code.push(Instruction::Method {
                    opcode: Opcode::Invokevirtual,
                    index: pool.add_method_ref(
                        boxing.class,
                        boxing.unbox_name,
                        boxing.unbox_descriptor,
                    )?,
                });
            }
            None if ty.class_name() == Some(OBJECT) && !ty.is_array() => {}
            None => code.push(Instruction::Type {
                opcode: Opcode::Checkcast,
                index: pool.add_class(&ty.checkcast_name())?,
            }),
        }
        code.push(ret);

        Ok(GeneratedMethod {
            access_flags: ACC_PUBLIC,
            name: field.getter_name(),
            descriptor: field.getter_descriptor(),
            code,
        })
    }

    /// `_set<field>(value)`: stores the value, then notifies the manager
    /// when the field is managed
    pub fn setter(
        &self,
        field: &InterceptedField,
        pool: &mut ConstantPool,
    ) -> Result<GeneratedMethod, ManipulationError> {
        let ty = FieldType::parse(&field.descriptor)?;
        let load = Instruction::Local {
            opcode: Opcode::load_for(ty.kind()),
            index: 1,
        };
        let store = Instruction::Field {
            opcode: Opcode::Putfield,
            index: pool.add_field_ref(self.owner, &field.name, &field.descriptor)?,
        };
        let mut code = InstructionStream::new(4, 1 + ty.slots());

        let managed = self.branch_if_managed(&mut code, pool, field)?;
        code.push(aload(0));
        code.push(load.clone());
        code.push(store.clone());
        code.push(Instruction::Simple(Opcode::Return));
        Self::enter_managed(&mut code, managed);

        code.push(aload(0));
        code.push(load.clone());
        code.push(store);
        self.load_manager(&mut code, pool)?;
        Self::push_name(&mut code, pool, &field.name)?;
        code.push(load);
        Self::box_value(&mut code, pool, &ty)?;
        let (name, descriptor) = SETTER_CALLBACK;
        code.push(Instruction::Method {
            opcode: Opcode::Invokevirtual,
            index: pool.add_method_ref(&self.config.manager_type, name, descriptor)?,
        });
        code.push(Instruction::Simple(Opcode::Return));

        Ok(GeneratedMethod {
            access_flags: ACC_PRIVATE,
            name: field.setter_name(),
            descriptor: field.setter_descriptor(),
            code,
        })
    }

    /// `_setManager(manager)`: ignores `null`, otherwise stores the manager
    /// and raises the flag of every field it registered
    pub fn manager_setter(
        &self,
        fields: &[InterceptedField],
        pool: &mut ConstantPool,
    ) -> Result<GeneratedMethod, ManipulationError> {
        let manager = self.config.manager_descriptor();
        let mut code = InstructionStream::new(2, 3);
        let present = code.new_label();
        let done = code.new_label();

        code.push(aload(1));
        code.push(Instruction::Jump {
            opcode: Opcode::Ifnonnull,
            target: present,
        });
        code.push(Instruction::Simple(Opcode::Return));
        code.push(Instruction::Label(present));
        let mut frames = vec![StackMapFrame::Same { target: present }];

        code.push(aload(0));
        code.push(aload(1));
        code.push(Instruction::Field {
            opcode: Opcode::Putfield,
            index: pool.add_field_ref(self.owner, &self.config.manager_field, &manager)?,
        });

        let (name, descriptor) = REGISTERED_FIELDS;
        code.push(aload(1));
        code.push(Instruction::Method {
            opcode: Opcode::Invokevirtual,
            index: pool.add_method_ref(&self.config.manager_type, name, descriptor)?,
        });
        code.push(Instruction::Local {
            opcode: Opcode::Astore,
            index: 2,
        });
        code.push(aload(2));
        code.push(Instruction::Jump {
            opcode: Opcode::Ifnull,
            target: done,
        });

        let (contains, contains_descriptor) = SET_CONTAINS;
        let contains = pool.add_interface_method_ref(SET, contains, contains_descriptor)?;
        for (i, field) in fields.iter().enumerate() {
            let next = if i + 1 == fields.len() {
                done
            } else {
                code.new_label()
            };
            code.push(aload(2));
            Self::push_name(&mut code, pool, &field.name)?;
            code.push(Instruction::InvokeInterface {
                index: contains,
                count: 2,
            });
            code.push(Instruction::Jump {
                opcode: Opcode::Ifeq,
                target: next,
            });
            code.push(aload(0));
            code.push(Instruction::Simple(Opcode::Iconst1));
            code.push(Instruction::Field {
                opcode: Opcode::Putfield,
                index: pool.add_field_ref(self.owner, &field.flag_name(), "Z")?,
            });
            code.push(Instruction::Label(next));
            frames.push(StackMapFrame::Same { target: next });
        }
        if fields.is_empty() {
            code.push(Instruction::Label(done));
            frames.push(StackMapFrame::Same { target: done });
        }
        // the first frame after ASTORE 2 declares the set local
        frames[1] = StackMapFrame::Append {
            target: frames[1].target(),
            locals: vec![VerificationType::Object(pool.add_class(SET)?)],
        };
        code.push(Instruction::Simple(Opcode::Return));
        code.stack_map = Some(frames);

        Ok(GeneratedMethod {
            access_flags: ACC_PRIVATE,
            name: self.config.manager_setter.clone(),
            descriptor: format!("({})V", manager),
            code,
        })
    }

    /// A constructor keeping the original descriptor `original`: calls the
    /// manipulated constructor with a `null` manager and the same arguments
    pub fn delegating_constructor(
        &self,
        access_flags: u16,
        original: &MethodDescriptor,
        pool: &mut ConstantPool,
    ) -> Result<GeneratedMethod, ManipulationError> {
        let slots = original.parameter_slots();
        let target = original
            .with_leading_parameter(FieldType::object(self.config.manager_type.clone()))
            .to_string();
        let mut code = InstructionStream::new(slots.saturating_add(2), slots.saturating_add(1));

        code.push(aload(0));
        code.push(Instruction::Simple(Opcode::AconstNull));
        let mut slot = 1;
        for parameter in &original.parameters {
            code.push(Instruction::Local {
                opcode: Opcode::load_for(parameter.kind()),
                index: slot,
            });
            slot += parameter.slots();
        }
        code.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: pool.add_method_ref(self.owner, "<init>", &target)?,
        });
        code.push(Instruction::Simple(Opcode::Return));

        Ok(GeneratedMethod {
            access_flags,
            name: "<init>".to_string(),
            descriptor: original.to_string(),
            code,
        })
    }

    /// `getComponentInstance()`: returns the manager
    pub fn component_instance(
        &self,
        pool: &mut ConstantPool,
    ) -> Result<GeneratedMethod, ManipulationError> {
        let mut code = InstructionStream::new(1, 1);
        self.load_manager(&mut code, pool)?;
        code.push(Instruction::Simple(Opcode::Areturn));

        Ok(GeneratedMethod {
            access_flags: ACC_PUBLIC,
            name: GET_COMPONENT_INSTANCE.to_string(),
            descriptor: format!("()L{};", self.config.component_instance_type),
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pojo_bytecode::verify_code;

    const OWNER: &str = "org/example/Foo";

    fn opcodes(method: &GeneratedMethod) -> Vec<Opcode> {
        method.code.iter().filter_map(Instruction::opcode).collect()
    }

    #[test]
    fn test_primitive_getter_boxes_and_unboxes() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let factory = AccessorFactory::new(OWNER, &config);
        let getter = factory
            .getter(&InterceptedField::new("count", "I"), &mut pool)
            .unwrap();

        assert_eq!(getter.name, "_getcount");
        assert_eq!(getter.descriptor, "()I");
        assert_eq!(
            opcodes(&getter),
            vec![
                Opcode::Aload,
                Opcode::Getfield,
                Opcode::Ifne,
                Opcode::Aload,
                Opcode::Getfield,
                Opcode::Ireturn,
                Opcode::Aload,
                Opcode::Getfield,
                Opcode::Ldc,
                Opcode::Aload,
                Opcode::Getfield,
                Opcode::Invokestatic,
                Opcode::Invokevirtual,
                Opcode::Checkcast,
                Opcode::Invokevirtual,
                Opcode::Ireturn,
            ]
        );
        verify_code(&getter.code, &pool).unwrap();
    }

    #[test]
    fn test_reference_getter_casts() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let factory = AccessorFactory::new(OWNER, &config);

        let string = factory
            .getter(&InterceptedField::new("name", "Ljava/lang/String;"), &mut pool)
            .unwrap();
        let ops = opcodes(&string);
        assert_eq!(
            ops[ops.len() - 3..].to_vec(),
            vec![Opcode::Invokevirtual, Opcode::Checkcast, Opcode::Areturn]
        );

        let array = factory
            .getter(&InterceptedField::new("data", "[J"), &mut pool)
            .unwrap();
        let cast = array
            .code
            .iter()
            .find_map(|i| match i {
                Instruction::Type { index, .. } => Some(*index),
                _ => None,
            })
            .unwrap();
        assert_eq!(pool.class_name(cast).unwrap(), "[J");

        let object = factory
            .getter(&InterceptedField::new("any", "Ljava/lang/Object;"), &mut pool)
            .unwrap();
        assert!(!opcodes(&object).contains(&Opcode::Checkcast));
    }

    #[test]
    fn test_wide_setter_uses_two_slots() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let setter = AccessorFactory::new(OWNER, &config)
            .setter(&InterceptedField::new("total", "D"), &mut pool)
            .unwrap();
        assert_eq!(setter.descriptor, "(D)V");
        assert_eq!(setter.access_flags, ACC_PRIVATE);
        assert_eq!(setter.code.max_locals, 3);
        assert_eq!(
            opcodes(&setter),
            vec![
                Opcode::Aload,
                Opcode::Getfield,
                Opcode::Ifne,
                Opcode::Aload,
                Opcode::Dload,
                Opcode::Putfield,
                Opcode::Return,
                Opcode::Aload,
                Opcode::Dload,
                Opcode::Putfield,
                Opcode::Aload,
                Opcode::Getfield,
                Opcode::Ldc,
                Opcode::Dload,
                Opcode::Invokestatic,
                Opcode::Invokevirtual,
                Opcode::Return,
            ]
        );
        verify_code(&setter.code, &pool).unwrap();
    }

    #[test]
    fn test_manager_members() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let factory = AccessorFactory::new(OWNER, &config);

        let setter = factory.manager_setter(&[], &mut pool).unwrap();
        assert_eq!(setter.name, "_setManager");
        assert_eq!(setter.descriptor, "(Lorg/apache/felix/ipojo/InstanceManager;)V");
        assert_eq!(setter.access_flags, ACC_PRIVATE);
        verify_code(&setter.code, &pool).unwrap();

        let instance = factory.component_instance(&mut pool).unwrap();
        assert_eq!(
            instance.descriptor,
            "()Lorg/apache/felix/ipojo/ComponentInstance;"
        );
        assert_eq!(
            opcodes(&instance),
            vec![Opcode::Aload, Opcode::Getfield, Opcode::Areturn]
        );
    }

    #[test]
    fn test_accessors_branch_on_field_flag() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let factory = AccessorFactory::new(OWNER, &config);
        let field = InterceptedField::new("count", "I");

        for method in [
            factory.getter(&field, &mut pool).unwrap(),
            factory.setter(&field, &mut pool).unwrap(),
        ] {
            let flag = match &method.code.instructions[1] {
                Instruction::Field { index, .. } => *index,
                other => panic!("unexpected {:?}", other),
            };
            let flag = pool.field_ref(flag).unwrap();
            assert_eq!(flag.name, "__Fcount");
            assert_eq!(flag.descriptor, "Z");

            let target = match &method.code.instructions[2] {
                Instruction::Jump { target, .. } => *target,
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(
                method.code.stack_map,
                Some(vec![StackMapFrame::Same { target }])
            );
            // the unmanaged path never touches the manager
            let unmanaged = method
                .code
                .iter()
                .position(|i| *i == Instruction::Label(target))
                .unwrap();
            assert!(method.code.instructions[3..unmanaged]
                .iter()
                .all(|i| !matches!(i, Instruction::Method { .. })));
            verify_code(&method.code, &pool).unwrap();
        }
    }

    #[test]
    fn test_manager_setter_ignores_null_and_raises_flags() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let fields = [
            InterceptedField::new("count", "I"),
            InterceptedField::new("name", "Ljava/lang/String;"),
        ];
        let setter = AccessorFactory::new(OWNER, &config)
            .manager_setter(&fields, &mut pool)
            .unwrap();
        assert_eq!(setter.code.max_locals, 3);

        let ops = opcodes(&setter);
        assert_eq!(
            ops[..6].to_vec(),
            vec![
                Opcode::Aload,
                Opcode::Ifnonnull,
                Opcode::Return,
                Opcode::Aload,
                Opcode::Aload,
                Opcode::Putfield,
            ]
        );
        assert_eq!(
            ops.iter().filter(|op| **op == Opcode::Invokeinterface).count(),
            2
        );

        let raised: Vec<&str> = setter
            .code
            .iter()
            .filter_map(|i| match i {
                Instruction::Field {
                    opcode: Opcode::Putfield,
                    index,
                } => Some(pool.field_ref(*index).unwrap().name),
                _ => None,
            })
            .collect();
        assert_eq!(raised, vec!["_cm", "__Fcount", "__Fname"]);

        let frames = setter.code.stack_map.as_ref().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], StackMapFrame::Same { .. }));
        assert!(matches!(frames[1], StackMapFrame::Append { ref locals, .. } if locals.len() == 1));
        verify_code(&setter.code, &pool).unwrap();
    }

    #[test]
    fn test_delegating_constructor_passes_null_manager() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let original = MethodDescriptor::parse("(Lorg/osgi/framework/BundleContext;J)V").unwrap();
        let constructor = AccessorFactory::new(OWNER, &config)
            .delegating_constructor(ACC_PUBLIC, &original, &mut pool)
            .unwrap();

        assert_eq!(constructor.name, "<init>");
        assert_eq!(constructor.descriptor, "(Lorg/osgi/framework/BundleContext;J)V");
        assert_eq!(constructor.code.max_locals, 4);
        assert_eq!(constructor.code.max_stack, 5);
        assert_eq!(
            opcodes(&constructor),
            vec![
                Opcode::Aload,
                Opcode::AconstNull,
                Opcode::Aload,
                Opcode::Lload,
                Opcode::Invokespecial,
                Opcode::Return,
            ]
        );
        let target = constructor
            .code
            .iter()
            .find_map(|i| match i {
                Instruction::Method { index, .. } => Some(*index),
                _ => None,
            })
            .unwrap();
        let target = pool.method_ref(target).unwrap();
        assert_eq!(target.class, OWNER);
        assert_eq!(
            target.descriptor,
            "(Lorg/apache/felix/ipojo/InstanceManager;Lorg/osgi/framework/BundleContext;J)V"
        );
        verify_code(&constructor.code, &pool).unwrap();
    }

    #[test]
    fn test_bad_descriptor_is_an_error() {
        let config = ManipulationConfig::default();
        let mut pool = ConstantPool::new();
        let err = AccessorFactory::new(OWNER, &config)
            .getter(&InterceptedField::new("x", "Q"), &mut pool)
            .unwrap_err();
        assert!(matches!(err, ManipulationError::Descriptor(_)));
    }
}
