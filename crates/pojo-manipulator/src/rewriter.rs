//! Constructor and field-access rewriting
//!
//! A manipulated constructor takes the manager as a new first parameter.
//! [`ConstructorRewriter`] turns one original constructor body into the
//! manipulated one:
//!
//! ```text
//! ALOAD_0                          ALOAD_0
//! INVOKESPECIAL super.<init>  ->   INVOKESPECIAL super.<init>
//! RETURN                           ALOAD_0
//!                                  ALOAD_1
//!                                  INVOKESPECIAL this._setManager
//!                                  RETURN
//! ```
//!
//! Every local slot above 0 moves up by one to make room for the manager at
//! slot 1, and reads and writes of intercepted fields become calls to the
//! generated `_get<field>` / `_set<field>` accessors.

use crate::config::ManipulationConfig;
use pojo_bytecode::{
    ConstantPool, ConstantPoolError, Instruction, InstructionStream, LocalVariable, Opcode,
    StackMapFrame, VerificationType,
};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Prefix of generated getters
pub const GETTER_PREFIX: &str = "_get";
/// Prefix of generated setters
pub const SETTER_PREFIX: &str = "_set";
/// Prefix of the per-field flags telling accessors to consult the manager
pub const FIELD_FLAG_PREFIX: &str = "__F";

/// Errors that abort a rewrite
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    /// The constructor never invokes a method, so there is no super call
    /// to hook the manager injection onto
    #[error("Constructor of {owner} has no super constructor call")]
    UnsupportedConstructorShape {
        /// Declaring class
        owner: String,
    },

    /// Slot shifting pushed a limit past 65535
    #[error("{what} exceeds 65535 after rewriting")]
    LimitExceeded {
        /// Which limit
        what: &'static str,
    },

    /// Constant pool error
    #[error("Constant pool error: {0}")]
    ConstantPool(#[from] ConstantPoolError),
}

/// A field whose reads and writes go through generated accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedField {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
}

impl InterceptedField {
    /// Create an intercepted field
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Name of the generated getter
    pub fn getter_name(&self) -> String {
        format!("{}{}", GETTER_PREFIX, self.name)
    }

    /// Descriptor of the generated getter
    pub fn getter_descriptor(&self) -> String {
        format!("(){}", self.descriptor)
    }

    /// Name of the generated setter
    pub fn setter_name(&self) -> String {
        format!("{}{}", SETTER_PREFIX, self.name)
    }

    /// Descriptor of the generated setter
    pub fn setter_descriptor(&self) -> String {
        format!("({})V", self.descriptor)
    }

    /// Name of the boolean flag field set when the manager watches this field
    pub fn flag_name(&self) -> String {
        format!("{}{}", FIELD_FLAG_PREFIX, self.name)
    }
}

/// Where a constructor rewrite stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteState {
    /// The super constructor call has not been seen yet
    AwaitingSuperCall,
    /// The manager is stored; locals are being shifted
    Rewriting,
}

/// Result of a successful constructor rewrite
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// The rewritten body
    pub stream: InstructionStream,
    /// Local loads/stores dropped before the super call (not counting the
    /// `ALOAD_0` that is re-emitted with the call)
    pub dropped_locals: usize,
    /// Field accesses replaced by accessor calls
    pub redirected_fields: usize,
}

/// Whether `instruction` is taken as the super constructor call
///
/// The first invocation in a constructor is, for compiler output, the call
/// to the super (or sibling) constructor. Only direct invocations count.
pub fn is_super_call(instruction: &Instruction) -> bool {
    matches!(
        instruction,
        Instruction::Method { .. } | Instruction::InvokeInterface { .. }
    )
}

/// Local slot after the manager is inserted at slot 1
fn shift_slot(index: u16) -> Result<u16, RewriteError> {
    match index {
        0 => Ok(0),
        n => n.checked_add(1).ok_or(RewriteError::LimitExceeded {
            what: "local variable index",
        }),
    }
}

/// Field-access redirection shared by constructors and plain methods
struct FieldRedirect<'a> {
    owner: &'a str,
    fields: FxHashMap<&'a str, &'a InterceptedField>,
}

impl<'a> FieldRedirect<'a> {
    fn new(owner: &'a str, fields: &'a [InterceptedField]) -> Self {
        Self {
            owner,
            fields: fields.iter().map(|f| (f.name.as_str(), f)).collect(),
        }
    }

    /// Accessor call replacing a `GETFIELD`/`PUTFIELD` on an intercepted
    /// field of the owner, if this is one
    fn redirect(
        &self,
        opcode: Opcode,
        index: u16,
        pool: &mut ConstantPool,
    ) -> Result<Option<Instruction>, RewriteError> {
        if !matches!(opcode, Opcode::Getfield | Opcode::Putfield) {
            return Ok(None);
        }
        let field = {
            let target = pool.field_ref(index)?;
            if target.class != self.owner {
                return Ok(None);
            }
            match self.fields.get(target.name) {
                Some(field) if field.descriptor == target.descriptor => *field,
                _ => return Ok(None),
            }
        };

        let instruction = if opcode == Opcode::Getfield {
            Instruction::Method {
                opcode: Opcode::Invokevirtual,
                index: pool.add_method_ref(
                    self.owner,
                    &field.getter_name(),
                    &field.getter_descriptor(),
                )?,
            }
        } else {
            Instruction::Method {
                opcode: Opcode::Invokespecial,
                index: pool.add_method_ref(
                    self.owner,
                    &field.setter_name(),
                    &field.setter_descriptor(),
                )?,
            }
        };
        Ok(Some(instruction))
    }
}

/// Redirect intercepted field accesses in a method that is not a
/// constructor; returns how many were replaced
pub fn redirect_field_access(
    stream: &mut InstructionStream,
    owner: &str,
    fields: &[InterceptedField],
    pool: &mut ConstantPool,
) -> Result<usize, RewriteError> {
    let redirect = FieldRedirect::new(owner, fields);
    let mut count = 0;
    for instruction in stream.instructions.iter_mut() {
        if let Instruction::Field { opcode, index } = *instruction {
            if let Some(call) = redirect.redirect(opcode, index, pool)? {
                *instruction = call;
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Rewrites one constructor body
///
/// One rewriter handles exactly one constructor; [`ConstructorRewriter::rewrite`]
/// consumes it.
pub struct ConstructorRewriter<'a> {
    redirect: FieldRedirect<'a>,
    config: &'a ManipulationConfig,
    state: RewriteState,
    dropped_locals: usize,
    redirected_fields: usize,
}

impl<'a> ConstructorRewriter<'a> {
    /// Create a rewriter for a constructor of `owner`
    pub fn new(
        owner: &'a str,
        fields: &'a [InterceptedField],
        config: &'a ManipulationConfig,
    ) -> Self {
        Self {
            redirect: FieldRedirect::new(owner, fields),
            config,
            state: RewriteState::AwaitingSuperCall,
            dropped_locals: 0,
            redirected_fields: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> RewriteState {
        self.state
    }

    /// Rewrite `stream`, adding the entries it needs to `pool`
    pub fn rewrite(
        mut self,
        mut stream: InstructionStream,
        pool: &mut ConstantPool,
    ) -> Result<RewriteOutcome, RewriteError> {
        let owner = self.redirect.owner;
        let manager_descriptor = self.config.manager_descriptor();
        let setter = pool.add_method_ref(
            owner,
            &self.config.manager_setter,
            &format!("({})V", manager_descriptor),
        )?;

        let original = std::mem::take(&mut stream.instructions);
        let mut instructions = Vec::with_capacity(original.len() + 4);
        for instruction in original {
            self.step(instruction, setter, pool, &mut instructions)?;
        }

        if self.state == RewriteState::AwaitingSuperCall {
            return Err(RewriteError::UnsupportedConstructorShape {
                owner: owner.to_string(),
            });
        }
        stream.instructions = instructions;

        self.rewrite_local_variables(&mut stream, pool, &manager_descriptor)?;
        if let Some(frames) = stream.stack_map.as_mut() {
            let manager_class = pool.add_class(&self.config.manager_type)?;
            insert_manager_in_frames(frames, manager_class);
        }

        stream.max_locals = stream
            .max_locals
            .checked_add(1)
            .ok_or(RewriteError::LimitExceeded { what: "max_locals" })?;
        stream.max_stack = stream
            .max_stack
            .checked_add(2)
            .ok_or(RewriteError::LimitExceeded { what: "max_stack" })?;

        if self.dropped_locals > 0 {
            warn!(
                owner,
                dropped = self.dropped_locals,
                "dropped local variable instructions before the super constructor call"
            );
        }
        debug!(
            owner,
            redirected = self.redirected_fields,
            max_locals = stream.max_locals,
            "rewrote constructor"
        );

        Ok(RewriteOutcome {
            stream,
            dropped_locals: self.dropped_locals,
            redirected_fields: self.redirected_fields,
        })
    }

    fn step(
        &mut self,
        instruction: Instruction,
        setter: u16,
        pool: &mut ConstantPool,
        out: &mut Vec<Instruction>,
    ) -> Result<(), RewriteError> {
        match instruction {
            Instruction::Field { opcode, index } => {
                match self.redirect.redirect(opcode, index, pool)? {
                    Some(call) => {
                        self.redirected_fields += 1;
                        out.push(call);
                    }
                    None => out.push(instruction),
                }
            }
            call if self.state == RewriteState::AwaitingSuperCall && is_super_call(&call) => {
                out.push(Instruction::Local {
                    opcode: Opcode::Aload,
                    index: 0,
                });
                out.push(call);
                out.push(Instruction::Local {
                    opcode: Opcode::Aload,
                    index: 0,
                });
                out.push(Instruction::Local {
                    opcode: Opcode::Aload,
                    index: 1,
                });
                out.push(Instruction::Method {
                    opcode: Opcode::Invokespecial,
                    index: setter,
                });
                self.state = RewriteState::Rewriting;
            }
            Instruction::Local { opcode, index } => match self.state {
                RewriteState::AwaitingSuperCall => {
                    if !(opcode == Opcode::Aload && index == 0) {
                        self.dropped_locals += 1;
                    }
                }
                RewriteState::Rewriting => out.push(Instruction::Local {
                    opcode,
                    index: shift_slot(index)?,
                }),
            },
            Instruction::Iinc { index, delta } => out.push(Instruction::Iinc {
                index: shift_slot(index)?,
                delta,
            }),
            other => out.push(other),
        }
        Ok(())
    }

    fn rewrite_local_variables(
        &self,
        stream: &mut InstructionStream,
        pool: &mut ConstantPool,
        manager_descriptor: &str,
    ) -> Result<(), RewriteError> {
        let mut locals = Vec::with_capacity(stream.local_variables.len() + 1);
        for variable in std::mem::take(&mut stream.local_variables) {
            if variable.index == 0 {
                let manager = LocalVariable {
                    start: variable.start,
                    end: variable.end,
                    name_index: pool.add_utf8(&self.config.manager_local_name)?,
                    descriptor_index: pool.add_utf8(manager_descriptor)?,
                    index: 1,
                };
                locals.push(variable);
                locals.push(manager);
            } else {
                locals.push(LocalVariable {
                    index: shift_slot(variable.index)?,
                    ..variable
                });
            }
        }
        stream.local_variables = locals;

        for variable in stream.local_variable_types.iter_mut() {
            variable.index = shift_slot(variable.index)?;
        }
        Ok(())
    }
}

/// Full frames list every local, so the manager goes in right after slot 0;
/// relative frames build on the initial frame, which already has it
fn insert_manager_in_frames(frames: &mut [StackMapFrame], manager_class: u16) {
    for frame in frames.iter_mut() {
        if let StackMapFrame::Full { locals, .. } = frame {
            if locals.is_empty() {
                locals.push(VerificationType::Top);
            }
            locals.insert(1, VerificationType::Object(manager_class));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pojo_bytecode::ExceptionHandler;

    const OWNER: &str = "org/example/Foo";

    struct Fixture {
        pool: ConstantPool,
        config: ManipulationConfig,
        fields: Vec<InterceptedField>,
        super_init: u16,
        count_field: u16,
        other_field: u16,
    }

    fn fixture() -> Fixture {
        let mut pool = ConstantPool::new();
        let super_init = pool
            .add_method_ref("java/lang/Object", "<init>", "()V")
            .unwrap();
        let count_field = pool.add_field_ref(OWNER, "count", "I").unwrap();
        let other_field = pool.add_field_ref("org/example/Bar", "count", "I").unwrap();
        Fixture {
            pool,
            config: ManipulationConfig::default(),
            fields: vec![InterceptedField::new("count", "I")],
            super_init,
            count_field,
            other_field,
        }
    }

    fn aload(index: u16) -> Instruction {
        Instruction::Local {
            opcode: Opcode::Aload,
            index,
        }
    }

    fn method_name(pool: &ConstantPool, instruction: &Instruction) -> String {
        match instruction {
            Instruction::Method { index, .. } => pool.method_ref(*index).unwrap().name.to_string(),
            other => panic!("expected a method call, got {:?}", other),
        }
    }

    #[test]
    fn test_minimal_constructor_gets_manager_injection() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 1);
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(Instruction::Simple(Opcode::Return));

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        let code = &outcome.stream.instructions;
        assert_eq!(code.len(), 6);
        assert_eq!(code[0], aload(0));
        assert_eq!(
            code[1],
            Instruction::Method {
                opcode: Opcode::Invokespecial,
                index: f.super_init
            }
        );
        assert_eq!(code[2], aload(0));
        assert_eq!(code[3], aload(1));
        assert_eq!(method_name(&f.pool, &code[4]), "_setManager");
        assert_eq!(code[4].opcode(), Some(Opcode::Invokespecial));
        assert_eq!(code[5], Instruction::Simple(Opcode::Return));
        assert_eq!(outcome.stream.max_locals, 2);
        assert_eq!(outcome.stream.max_stack, 3);
        assert_eq!(outcome.dropped_locals, 0);

        let setter = match code[4] {
            Instruction::Method { index, .. } => f.pool.method_ref(index).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(setter.class, OWNER);
        assert_eq!(setter.descriptor, "(Lorg/apache/felix/ipojo/InstanceManager;)V");
    }

    #[test]
    fn test_locals_shift_and_fields_redirect() {
        let mut f = fixture();
        // Foo(int x) { super(); count = x; x++; }
        let mut stream = InstructionStream::new(2, 2);
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(aload(0));
        stream.push(Instruction::Local {
            opcode: Opcode::Iload,
            index: 1,
        });
        stream.push(Instruction::Field {
            opcode: Opcode::Putfield,
            index: f.count_field,
        });
        stream.push(Instruction::Iinc { index: 1, delta: 1 });
        stream.push(aload(0));
        stream.push(Instruction::Field {
            opcode: Opcode::Getfield,
            index: f.count_field,
        });
        stream.push(Instruction::Simple(Opcode::Pop));
        stream.push(Instruction::Simple(Opcode::Return));

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        let code = &outcome.stream.instructions;
        assert_eq!(code[5], aload(0));
        assert_eq!(
            code[6],
            Instruction::Local {
                opcode: Opcode::Iload,
                index: 2
            }
        );
        assert_eq!(code[7].opcode(), Some(Opcode::Invokespecial));
        assert_eq!(method_name(&f.pool, &code[7]), "_setcount");
        assert_eq!(code[8], Instruction::Iinc { index: 2, delta: 1 });
        assert_eq!(code[10].opcode(), Some(Opcode::Invokevirtual));
        assert_eq!(method_name(&f.pool, &code[10]), "_getcount");
        assert_eq!(outcome.redirected_fields, 2);
        assert_eq!(outcome.stream.max_locals, 3);
    }

    #[test]
    fn test_exactly_one_injection_after_first_call() {
        let mut f = fixture();
        let helper = f.pool.add_method_ref(OWNER, "init", "()V").unwrap();
        let mut stream = InstructionStream::new(1, 1);
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokevirtual,
            index: helper,
        });
        stream.push(Instruction::Simple(Opcode::Return));

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        let injections = outcome
            .stream
            .iter()
            .filter(|i| matches!(i, Instruction::Method { .. }))
            .filter(|i| method_name(&f.pool, i) == "_setManager")
            .count();
        assert_eq!(injections, 1);
        assert_eq!(method_name(&f.pool, &outcome.stream.instructions[4]), "_setManager");
        assert_eq!(method_name(&f.pool, &outcome.stream.instructions[6]), "init");
    }

    #[test]
    fn test_loads_before_super_call_are_dropped() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(2, 2);
        stream.push(aload(0));
        stream.push(Instruction::Local {
            opcode: Opcode::Iload,
            index: 1,
        });
        stream.push(Instruction::Simple(Opcode::Pop));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(Instruction::Simple(Opcode::Return));

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        assert_eq!(outcome.dropped_locals, 1);
        assert_eq!(
            outcome.stream.instructions[0],
            Instruction::Simple(Opcode::Pop)
        );
        assert_eq!(outcome.stream.instructions[1], aload(0));
    }

    #[test]
    fn test_no_call_is_unsupported() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 1);
        stream.push(Instruction::Simple(Opcode::Return));
        let err = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap_err();
        assert_eq!(
            err,
            RewriteError::UnsupportedConstructorShape {
                owner: OWNER.to_string()
            }
        );
    }

    #[test]
    fn test_other_owner_fields_are_untouched() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 1);
        stream.push(aload(0));
        stream.push(Instruction::Field {
            opcode: Opcode::Getfield,
            index: f.other_field,
        });
        stream.push(Instruction::Simple(Opcode::Ireturn));
        let count = redirect_field_access(&mut stream, OWNER, &f.fields, &mut f.pool).unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            stream.instructions[1],
            Instruction::Field {
                opcode: Opcode::Getfield,
                index: f.other_field
            }
        );
    }

    #[test]
    fn test_plain_method_redirects_without_shifting() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(2, 2);
        stream.push(aload(0));
        stream.push(Instruction::Local {
            opcode: Opcode::Iload,
            index: 1,
        });
        stream.push(Instruction::Field {
            opcode: Opcode::Putfield,
            index: f.count_field,
        });
        stream.push(Instruction::Simple(Opcode::Return));
        let count = redirect_field_access(&mut stream, OWNER, &f.fields, &mut f.pool).unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            stream.instructions[1],
            Instruction::Local {
                opcode: Opcode::Iload,
                index: 1
            }
        );
        assert_eq!(method_name(&f.pool, &stream.instructions[2]), "_setcount");
        assert_eq!(stream.max_locals, 2);
    }

    #[test]
    fn test_debug_tables_and_frames_follow_the_shift() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 2);
        let start = stream.new_label();
        let end = stream.new_label();
        let this_name = f.pool.add_utf8("this").unwrap();
        let this_desc = f.pool.add_utf8("Lorg/example/Foo;").unwrap();
        let x_name = f.pool.add_utf8("x").unwrap();
        let int_desc = f.pool.add_utf8("I").unwrap();
        let foo_class = f.pool.add_class(OWNER).unwrap();

        stream.push(Instruction::Label(start));
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(Instruction::Label(end));
        stream.push(Instruction::Simple(Opcode::Return));
        stream.local_variables = vec![
            LocalVariable {
                start,
                end,
                name_index: this_name,
                descriptor_index: this_desc,
                index: 0,
            },
            LocalVariable {
                start,
                end,
                name_index: x_name,
                descriptor_index: int_desc,
                index: 1,
            },
        ];
        stream.exception_table = vec![ExceptionHandler {
            start,
            end,
            handler: end,
            catch_type: 0,
        }];
        stream.stack_map = Some(vec![
            StackMapFrame::Full {
                target: end,
                locals: vec![VerificationType::Object(foo_class), VerificationType::Integer],
                stack: Vec::new(),
            },
            StackMapFrame::Same { target: end },
        ]);

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        let locals = &outcome.stream.local_variables;
        assert_eq!(locals.len(), 3);
        assert_eq!(locals[0].index, 0);
        assert_eq!(locals[1].index, 1);
        assert_eq!(f.pool.utf8(locals[1].name_index).unwrap(), "_manager");
        assert_eq!(
            f.pool.utf8(locals[1].descriptor_index).unwrap(),
            "Lorg/apache/felix/ipojo/InstanceManager;"
        );
        assert_eq!((locals[1].start, locals[1].end), (start, end));
        assert_eq!(locals[2].index, 2);

        let manager = f
            .pool
            .add_class("org/apache/felix/ipojo/InstanceManager")
            .unwrap();
        let frames = outcome.stream.stack_map.as_ref().unwrap();
        assert_eq!(
            frames[0],
            StackMapFrame::Full {
                target: end,
                locals: vec![
                    VerificationType::Object(foo_class),
                    VerificationType::Object(manager),
                    VerificationType::Integer
                ],
                stack: Vec::new(),
            }
        );
        assert_eq!(frames[1], StackMapFrame::Same { target: end });
        assert_eq!(outcome.stream.exception_table[0].handler, end);
    }

    #[test]
    fn test_local_variable_type_table_follows_the_shift() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 3);
        let start = stream.new_label();
        let end = stream.new_label();
        let name = f.pool.add_utf8("items").unwrap();
        let signature = f.pool.add_utf8("Ljava/util/List<Ljava/lang/String;>;").unwrap();

        stream.push(Instruction::Label(start));
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(Instruction::Label(end));
        stream.push(Instruction::Simple(Opcode::Return));
        stream.local_variable_types = vec![
            LocalVariable {
                start,
                end,
                name_index: name,
                descriptor_index: signature,
                index: 0,
            },
            LocalVariable {
                start,
                end,
                name_index: name,
                descriptor_index: signature,
                index: 2,
            },
        ];

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        let types = &outcome.stream.local_variable_types;
        // no manager entry: the manager has no generic signature
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].index, 0);
        assert_eq!(types[1].index, 3);
        assert_eq!(types[1].descriptor_index, signature);
    }

    #[test]
    fn test_iinc_before_super_call_and_ret_shift() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 4);
        stream.push(Instruction::Iinc { index: 1, delta: 1 });
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(Instruction::Local {
            opcode: Opcode::Ret,
            index: 3,
        });

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        let code = &outcome.stream.instructions;
        assert_eq!(outcome.dropped_locals, 0);
        assert_eq!(code[0], Instruction::Iinc { index: 2, delta: 1 });
        assert_eq!(code[1], aload(0));
        assert_eq!(method_name(&f.pool, &code[5]), "_setManager");
        assert_eq!(
            code[6],
            Instruction::Local {
                opcode: Opcode::Ret,
                index: 4
            }
        );
        assert_eq!(outcome.stream.max_locals, 5);
    }

    #[test]
    fn test_slot_255_moves_to_wide_form() {
        let mut f = fixture();
        let mut stream = InstructionStream::new(1, 256);
        stream.push(aload(0));
        stream.push(Instruction::Method {
            opcode: Opcode::Invokespecial,
            index: f.super_init,
        });
        stream.push(Instruction::Simple(Opcode::Iconst0));
        stream.push(Instruction::Local {
            opcode: Opcode::Istore,
            index: 255,
        });
        stream.push(Instruction::Iinc {
            index: 255,
            delta: 1,
        });
        stream.push(Instruction::Simple(Opcode::Return));

        let outcome = ConstructorRewriter::new(OWNER, &f.fields, &f.config)
            .rewrite(stream, &mut f.pool)
            .unwrap();
        assert_eq!(outcome.stream.max_locals, 257);

        let bytes = outcome.stream.encode(&mut f.pool).unwrap();
        let code = &bytes[8..];
        let wide = Opcode::Wide.to_u8();
        assert!(code
            .windows(4)
            .any(|w| w == [wide, Opcode::Istore.to_u8(), 0x01, 0x00]));
        assert!(code
            .windows(6)
            .any(|w| w == [wide, Opcode::Iinc.to_u8(), 0x01, 0x00, 0x00, 0x01]));

        let decoded = InstructionStream::decode(&bytes, &f.pool).unwrap();
        assert!(decoded.iter().any(|i| *i
            == Instruction::Local {
                opcode: Opcode::Istore,
                index: 256
            }));
        assert!(decoded.iter().any(|i| *i
            == Instruction::Iinc {
                index: 256,
                delta: 1
            }));
    }

    #[test]
    fn test_slot_overflow_is_an_error() {
        assert_eq!(shift_slot(0), Ok(0));
        assert_eq!(shift_slot(7), Ok(8));
        assert!(matches!(
            shift_slot(u16::MAX),
            Err(RewriteError::LimitExceeded { .. })
        ));
    }
}
