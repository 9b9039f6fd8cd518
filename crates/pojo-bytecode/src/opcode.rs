//! JVM instruction opcodes
//!
//! Every opcode in the range 0x00-0xC9 is represented. The reserved
//! `breakpoint`/`impdep` opcodes never appear in class files and decode as
//! invalid.

macro_rules! opcodes {
    ($($variant:ident = $value:literal => $mnemonic:literal,)*) => {
        /// JVM opcode enumeration
        ///
        /// Opcodes are single bytes; operands (if any) follow in the code
        /// array. Categories:
        /// - 0x00-0x14: Constants
        /// - 0x15-0x35: Loads
        /// - 0x36-0x56: Stores
        /// - 0x57-0x5F: Stack manipulation
        /// - 0x60-0x84: Arithmetic
        /// - 0x85-0x93: Conversions
        /// - 0x94-0xA6: Comparisons
        /// - 0xA7-0xB1: Control flow
        /// - 0xB2-0xC3: References
        /// - 0xC4-0xC9: Extended
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $(
                #[doc = concat!("`", $mnemonic, "`")]
                $variant = $value,
            )*
        }

        impl Opcode {
            /// Convert a byte to an opcode
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            /// Get the instruction mnemonic (upper case)
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    // ===== Constants (0x00-0x14) =====
    Nop = 0x00 => "NOP",
    AconstNull = 0x01 => "ACONST_NULL",
    IconstM1 = 0x02 => "ICONST_M1",
    Iconst0 = 0x03 => "ICONST_0",
    Iconst1 = 0x04 => "ICONST_1",
    Iconst2 = 0x05 => "ICONST_2",
    Iconst3 = 0x06 => "ICONST_3",
    Iconst4 = 0x07 => "ICONST_4",
    Iconst5 = 0x08 => "ICONST_5",
    Lconst0 = 0x09 => "LCONST_0",
    Lconst1 = 0x0A => "LCONST_1",
    Fconst0 = 0x0B => "FCONST_0",
    Fconst1 = 0x0C => "FCONST_1",
    Fconst2 = 0x0D => "FCONST_2",
    Dconst0 = 0x0E => "DCONST_0",
    Dconst1 = 0x0F => "DCONST_1",
    Bipush = 0x10 => "BIPUSH",
    Sipush = 0x11 => "SIPUSH",
    Ldc = 0x12 => "LDC",
    LdcW = 0x13 => "LDC_W",
    Ldc2W = 0x14 => "LDC2_W",

    // ===== Loads (0x15-0x35) =====
    Iload = 0x15 => "ILOAD",
    Lload = 0x16 => "LLOAD",
    Fload = 0x17 => "FLOAD",
    Dload = 0x18 => "DLOAD",
    Aload = 0x19 => "ALOAD",
    Iload0 = 0x1A => "ILOAD_0",
    Iload1 = 0x1B => "ILOAD_1",
    Iload2 = 0x1C => "ILOAD_2",
    Iload3 = 0x1D => "ILOAD_3",
    Lload0 = 0x1E => "LLOAD_0",
    Lload1 = 0x1F => "LLOAD_1",
    Lload2 = 0x20 => "LLOAD_2",
    Lload3 = 0x21 => "LLOAD_3",
    Fload0 = 0x22 => "FLOAD_0",
    Fload1 = 0x23 => "FLOAD_1",
    Fload2 = 0x24 => "FLOAD_2",
    Fload3 = 0x25 => "FLOAD_3",
    Dload0 = 0x26 => "DLOAD_0",
    Dload1 = 0x27 => "DLOAD_1",
    Dload2 = 0x28 => "DLOAD_2",
    Dload3 = 0x29 => "DLOAD_3",
    Aload0 = 0x2A => "ALOAD_0",
    Aload1 = 0x2B => "ALOAD_1",
    Aload2 = 0x2C => "ALOAD_2",
    Aload3 = 0x2D => "ALOAD_3",
    Iaload = 0x2E => "IALOAD",
    Laload = 0x2F => "LALOAD",
    Faload = 0x30 => "FALOAD",
    Daload = 0x31 => "DALOAD",
    Aaload = 0x32 => "AALOAD",
    Baload = 0x33 => "BALOAD",
    Caload = 0x34 => "CALOAD",
    Saload = 0x35 => "SALOAD",

    // ===== Stores (0x36-0x56) =====
    Istore = 0x36 => "ISTORE",
    Lstore = 0x37 => "LSTORE",
    Fstore = 0x38 => "FSTORE",
    Dstore = 0x39 => "DSTORE",
    Astore = 0x3A => "ASTORE",
    Istore0 = 0x3B => "ISTORE_0",
    Istore1 = 0x3C => "ISTORE_1",
    Istore2 = 0x3D => "ISTORE_2",
    Istore3 = 0x3E => "ISTORE_3",
    Lstore0 = 0x3F => "LSTORE_0",
    Lstore1 = 0x40 => "LSTORE_1",
    Lstore2 = 0x41 => "LSTORE_2",
    Lstore3 = 0x42 => "LSTORE_3",
    Fstore0 = 0x43 => "FSTORE_0",
    Fstore1 = 0x44 => "FSTORE_1",
    Fstore2 = 0x45 => "FSTORE_2",
    Fstore3 = 0x46 => "FSTORE_3",
    Dstore0 = 0x47 => "DSTORE_0",
    Dstore1 = 0x48 => "DSTORE_1",
    Dstore2 = 0x49 => "DSTORE_2",
    Dstore3 = 0x4A => "DSTORE_3",
    Astore0 = 0x4B => "ASTORE_0",
    Astore1 = 0x4C => "ASTORE_1",
    Astore2 = 0x4D => "ASTORE_2",
    Astore3 = 0x4E => "ASTORE_3",
    Iastore = 0x4F => "IASTORE",
    Lastore = 0x50 => "LASTORE",
    Fastore = 0x51 => "FASTORE",
    Dastore = 0x52 => "DASTORE",
    Aastore = 0x53 => "AASTORE",
    Bastore = 0x54 => "BASTORE",
    Castore = 0x55 => "CASTORE",
    Sastore = 0x56 => "SASTORE",

    // ===== Stack Manipulation (0x57-0x5F) =====
    Pop = 0x57 => "POP",
    Pop2 = 0x58 => "POP2",
    Dup = 0x59 => "DUP",
    DupX1 = 0x5A => "DUP_X1",
    DupX2 = 0x5B => "DUP_X2",
    Dup2 = 0x5C => "DUP2",
    Dup2X1 = 0x5D => "DUP2_X1",
    Dup2X2 = 0x5E => "DUP2_X2",
    Swap = 0x5F => "SWAP",

    // ===== Arithmetic (0x60-0x84) =====
    Iadd = 0x60 => "IADD",
    Ladd = 0x61 => "LADD",
    Fadd = 0x62 => "FADD",
    Dadd = 0x63 => "DADD",
    Isub = 0x64 => "ISUB",
    Lsub = 0x65 => "LSUB",
    Fsub = 0x66 => "FSUB",
    Dsub = 0x67 => "DSUB",
    Imul = 0x68 => "IMUL",
    Lmul = 0x69 => "LMUL",
    Fmul = 0x6A => "FMUL",
    Dmul = 0x6B => "DMUL",
    Idiv = 0x6C => "IDIV",
    Ldiv = 0x6D => "LDIV",
    Fdiv = 0x6E => "FDIV",
    Ddiv = 0x6F => "DDIV",
    Irem = 0x70 => "IREM",
    Lrem = 0x71 => "LREM",
    Frem = 0x72 => "FREM",
    Drem = 0x73 => "DREM",
    Ineg = 0x74 => "INEG",
    Lneg = 0x75 => "LNEG",
    Fneg = 0x76 => "FNEG",
    Dneg = 0x77 => "DNEG",
    Ishl = 0x78 => "ISHL",
    Lshl = 0x79 => "LSHL",
    Ishr = 0x7A => "ISHR",
    Lshr = 0x7B => "LSHR",
    Iushr = 0x7C => "IUSHR",
    Lushr = 0x7D => "LUSHR",
    Iand = 0x7E => "IAND",
    Land = 0x7F => "LAND",
    Ior = 0x80 => "IOR",
    Lor = 0x81 => "LOR",
    Ixor = 0x82 => "IXOR",
    Lxor = 0x83 => "LXOR",
    Iinc = 0x84 => "IINC",

    // ===== Conversions (0x85-0x93) =====
    I2l = 0x85 => "I2L",
    I2f = 0x86 => "I2F",
    I2d = 0x87 => "I2D",
    L2i = 0x88 => "L2I",
    L2f = 0x89 => "L2F",
    L2d = 0x8A => "L2D",
    F2i = 0x8B => "F2I",
    F2l = 0x8C => "F2L",
    F2d = 0x8D => "F2D",
    D2i = 0x8E => "D2I",
    D2l = 0x8F => "D2L",
    D2f = 0x90 => "D2F",
    I2b = 0x91 => "I2B",
    I2c = 0x92 => "I2C",
    I2s = 0x93 => "I2S",

    // ===== Comparisons (0x94-0xA6) =====
    Lcmp = 0x94 => "LCMP",
    Fcmpl = 0x95 => "FCMPL",
    Fcmpg = 0x96 => "FCMPG",
    Dcmpl = 0x97 => "DCMPL",
    Dcmpg = 0x98 => "DCMPG",
    Ifeq = 0x99 => "IFEQ",
    Ifne = 0x9A => "IFNE",
    Iflt = 0x9B => "IFLT",
    Ifge = 0x9C => "IFGE",
    Ifgt = 0x9D => "IFGT",
    Ifle = 0x9E => "IFLE",
    IfIcmpeq = 0x9F => "IF_ICMPEQ",
    IfIcmpne = 0xA0 => "IF_ICMPNE",
    IfIcmplt = 0xA1 => "IF_ICMPLT",
    IfIcmpge = 0xA2 => "IF_ICMPGE",
    IfIcmpgt = 0xA3 => "IF_ICMPGT",
    IfIcmple = 0xA4 => "IF_ICMPLE",
    IfAcmpeq = 0xA5 => "IF_ACMPEQ",
    IfAcmpne = 0xA6 => "IF_ACMPNE",

    // ===== Control Flow (0xA7-0xB1) =====
    Goto = 0xA7 => "GOTO",
    Jsr = 0xA8 => "JSR",
    Ret = 0xA9 => "RET",
    Tableswitch = 0xAA => "TABLESWITCH",
    Lookupswitch = 0xAB => "LOOKUPSWITCH",
    Ireturn = 0xAC => "IRETURN",
    Lreturn = 0xAD => "LRETURN",
    Freturn = 0xAE => "FRETURN",
    Dreturn = 0xAF => "DRETURN",
    Areturn = 0xB0 => "ARETURN",
    Return = 0xB1 => "RETURN",

    // ===== References (0xB2-0xC3) =====
    Getstatic = 0xB2 => "GETSTATIC",
    Putstatic = 0xB3 => "PUTSTATIC",
    Getfield = 0xB4 => "GETFIELD",
    Putfield = 0xB5 => "PUTFIELD",
    Invokevirtual = 0xB6 => "INVOKEVIRTUAL",
    Invokespecial = 0xB7 => "INVOKESPECIAL",
    Invokestatic = 0xB8 => "INVOKESTATIC",
    Invokeinterface = 0xB9 => "INVOKEINTERFACE",
    Invokedynamic = 0xBA => "INVOKEDYNAMIC",
    New = 0xBB => "NEW",
    Newarray = 0xBC => "NEWARRAY",
    Anewarray = 0xBD => "ANEWARRAY",
    Arraylength = 0xBE => "ARRAYLENGTH",
    Athrow = 0xBF => "ATHROW",
    Checkcast = 0xC0 => "CHECKCAST",
    Instanceof = 0xC1 => "INSTANCEOF",
    Monitorenter = 0xC2 => "MONITORENTER",
    Monitorexit = 0xC3 => "MONITOREXIT",

    // ===== Extended (0xC4-0xC9) =====
    Wide = 0xC4 => "WIDE",
    Multianewarray = 0xC5 => "MULTIANEWARRAY",
    Ifnull = 0xC6 => "IFNULL",
    Ifnonnull = 0xC7 => "IFNONNULL",
    GotoW = 0xC8 => "GOTO_W",
    JsrW = 0xC9 => "JSR_W",
}

/// Value category of a local-variable instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalKind {
    /// `int` (and `boolean`, `byte`, `char`, `short`)
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Reference
    Reference,
}

impl LocalKind {
    /// Number of local slots a value of this kind occupies
    pub fn slots(self) -> u16 {
        match self {
            LocalKind::Long | LocalKind::Double => 2,
            _ => 1,
        }
    }

    fn index(self) -> u8 {
        match self {
            LocalKind::Int => 0,
            LocalKind::Long => 1,
            LocalKind::Float => 2,
            LocalKind::Double => 3,
            LocalKind::Reference => 4,
        }
    }

    fn from_index(index: u8) -> Self {
        match index {
            0 => LocalKind::Int,
            1 => LocalKind::Long,
            2 => LocalKind::Float,
            3 => LocalKind::Double,
            _ => LocalKind::Reference,
        }
    }
}

impl Opcode {
    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this opcode is a branch with a label operand
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Ifeq
                | Opcode::Ifne
                | Opcode::Iflt
                | Opcode::Ifge
                | Opcode::Ifgt
                | Opcode::Ifle
                | Opcode::IfIcmpeq
                | Opcode::IfIcmpne
                | Opcode::IfIcmplt
                | Opcode::IfIcmpge
                | Opcode::IfIcmpgt
                | Opcode::IfIcmple
                | Opcode::IfAcmpeq
                | Opcode::IfAcmpne
                | Opcode::Goto
                | Opcode::Jsr
                | Opcode::Ifnull
                | Opcode::Ifnonnull
                | Opcode::GotoW
                | Opcode::JsrW
        )
    }

    /// Check if this jump uses a 32-bit offset
    pub fn is_wide_jump(self) -> bool {
        matches!(self, Opcode::GotoW | Opcode::JsrW)
    }

    /// Check if this opcode is a method invocation
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Opcode::Invokevirtual
                | Opcode::Invokespecial
                | Opcode::Invokestatic
                | Opcode::Invokeinterface
                | Opcode::Invokedynamic
        )
    }

    /// Check if this opcode accesses a field
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield
        )
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Opcode::Ireturn
                | Opcode::Lreturn
                | Opcode::Freturn
                | Opcode::Dreturn
                | Opcode::Areturn
                | Opcode::Return
        )
    }

    /// Check if this opcode terminates a basic block
    pub fn is_terminator(self) -> bool {
        self.is_return()
            || matches!(
                self,
                Opcode::Athrow
                    | Opcode::Goto
                    | Opcode::GotoW
                    | Opcode::Ret
                    | Opcode::Tableswitch
                    | Opcode::Lookupswitch
            )
    }

    /// For a local load (any form), its value kind
    pub fn load_kind(self) -> Option<LocalKind> {
        let b = self.to_u8();
        match b {
            0x15..=0x19 => Some(LocalKind::from_index(b - 0x15)),
            0x1A..=0x2D => Some(LocalKind::from_index((b - 0x1A) / 4)),
            _ => None,
        }
    }

    /// For a local store (any form), its value kind
    pub fn store_kind(self) -> Option<LocalKind> {
        let b = self.to_u8();
        match b {
            0x36..=0x3A => Some(LocalKind::from_index(b - 0x36)),
            0x3B..=0x4E => Some(LocalKind::from_index((b - 0x3B) / 4)),
            _ => None,
        }
    }

    /// Decompose a short local form (`ALOAD_2`) into its long form and slot
    pub fn expand_short_local(self) -> Option<(Opcode, u16)> {
        let b = self.to_u8();
        let (base, first) = match b {
            0x1A..=0x2D => (0x15, 0x1A),
            0x3B..=0x4E => (0x36, 0x3B),
            _ => return None,
        };
        let offset = b - first;
        Opcode::from_u8(base + offset / 4).map(|op| (op, (offset % 4) as u16))
    }

    /// Short form for a long-form local load/store at `slot`, if one exists
    pub fn short_local(self, slot: u16) -> Option<Opcode> {
        if slot > 3 {
            return None;
        }
        let first = if let Some(kind) = self.load_kind().filter(|_| self.is_long_local()) {
            0x1A + kind.index() * 4
        } else if let Some(kind) = self.store_kind().filter(|_| self.is_long_local()) {
            0x3B + kind.index() * 4
        } else {
            return None;
        };
        Opcode::from_u8(first + slot as u8)
    }

    /// Long-form local load for a value kind
    pub fn load_for(kind: LocalKind) -> Opcode {
        match kind {
            LocalKind::Int => Opcode::Iload,
            LocalKind::Long => Opcode::Lload,
            LocalKind::Float => Opcode::Fload,
            LocalKind::Double => Opcode::Dload,
            LocalKind::Reference => Opcode::Aload,
        }
    }

    /// Return instruction for a value kind (`None` gives `RETURN`)
    pub fn return_for(kind: Option<LocalKind>) -> Opcode {
        match kind {
            Some(LocalKind::Int) => Opcode::Ireturn,
            Some(LocalKind::Long) => Opcode::Lreturn,
            Some(LocalKind::Float) => Opcode::Freturn,
            Some(LocalKind::Double) => Opcode::Dreturn,
            Some(LocalKind::Reference) => Opcode::Areturn,
            None => Opcode::Return,
        }
    }

    fn is_long_local(self) -> bool {
        matches!(self.to_u8(), 0x15..=0x19 | 0x36..=0x3A)
    }

    /// Check if this opcode addresses a local variable slot by operand
    /// (long-form loads/stores, `IINC`, `RET`)
    pub fn has_local_operand(self) -> bool {
        self.is_long_local() || matches!(self, Opcode::Iinc | Opcode::Ret)
    }
}
