//! Instruction opcodes for Weft class bodies
//!
//! The numbering follows the classic stack-machine encoding so that dumps of
//! synthesized classes read the same as the instruction listings they were
//! derived from. Only the subset the runtime executes is defined.

/// Bytecode opcode enumeration
///
/// Every opcode is a single byte. Operands, when present, are described by
/// [`OperandForm`] and follow the opcode byte in the encoded stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Constants (0x00-0x14) =====
    /// No operation
    Nop = 0x00,
    /// Push null reference
    AconstNull = 0x01,
    /// Push int -1
    IconstM1 = 0x02,
    /// Push int 0
    Iconst0 = 0x03,
    /// Push int 1
    Iconst1 = 0x04,
    /// Push int 2
    Iconst2 = 0x05,
    /// Push int 3
    Iconst3 = 0x06,
    /// Push int 4
    Iconst4 = 0x07,
    /// Push int 5
    Iconst5 = 0x08,
    /// Push long 0
    Lconst0 = 0x09,
    /// Push long 1
    Lconst1 = 0x0A,
    /// Push float 0.0
    Fconst0 = 0x0B,
    /// Push float 1.0
    Fconst1 = 0x0C,
    /// Push float 2.0
    Fconst2 = 0x0D,
    /// Push double 0.0
    Dconst0 = 0x0E,
    /// Push double 1.0
    Dconst1 = 0x0F,
    /// Push sign-extended byte (operand: i8)
    Bipush = 0x10,
    /// Push sign-extended short (operand: i16)
    Sipush = 0x11,
    /// Push a constant (operand: tagged constant)
    Ldc = 0x12,

    // ===== Locals (0x15-0x3A) =====
    /// Load int from local (operand: u16 slot)
    Iload = 0x15,
    /// Load long from local
    Lload = 0x16,
    /// Load float from local
    Fload = 0x17,
    /// Load double from local
    Dload = 0x18,
    /// Load reference from local
    Aload = 0x19,
    /// Store int to local
    Istore = 0x36,
    /// Store long to local
    Lstore = 0x37,
    /// Store float to local
    Fstore = 0x38,
    /// Store double to local
    Dstore = 0x39,
    /// Store reference to local
    Astore = 0x3A,

    // ===== Stack (0x57-0x5F) =====
    /// Pop one word
    Pop = 0x57,
    /// Pop two words
    Pop2 = 0x58,
    /// Duplicate top word
    Dup = 0x59,
    /// Swap top two words
    Swap = 0x5F,

    // ===== Arithmetic (0x60-0x94) =====
    /// Int addition
    Iadd = 0x60,
    /// Long addition
    Ladd = 0x61,
    /// Float addition
    Fadd = 0x62,
    /// Double addition
    Dadd = 0x63,
    /// Int subtraction
    Isub = 0x64,
    /// Long subtraction
    Lsub = 0x65,
    /// Int multiplication
    Imul = 0x68,
    /// Long multiplication
    Lmul = 0x69,
    /// Int division
    Idiv = 0x6C,
    /// Int remainder
    Irem = 0x70,
    /// Int negation
    Ineg = 0x74,
    /// Increment int local (operands: u16 slot, i16 delta)
    Iinc = 0x84,
    /// Widen int to long
    I2l = 0x85,
    /// Narrow long to int
    L2i = 0x88,
    /// Compare longs, push -1/0/1
    Lcmp = 0x94,

    // ===== Branches (0x99-0xA7) =====
    /// Branch if int == 0
    Ifeq = 0x99,
    /// Branch if int != 0
    Ifne = 0x9A,
    /// Branch if int < 0
    Iflt = 0x9B,
    /// Branch if int >= 0
    Ifge = 0x9C,
    /// Branch if int > 0
    Ifgt = 0x9D,
    /// Branch if int <= 0
    Ifle = 0x9E,
    /// Branch if ints equal
    IfIcmpeq = 0x9F,
    /// Branch if ints differ
    IfIcmpne = 0xA0,
    /// Branch if a < b
    IfIcmplt = 0xA1,
    /// Branch if a >= b
    IfIcmpge = 0xA2,
    /// Branch if a > b
    IfIcmpgt = 0xA3,
    /// Branch if a <= b
    IfIcmple = 0xA4,
    /// Branch if references are identical
    IfAcmpeq = 0xA5,
    /// Branch if references differ
    IfAcmpne = 0xA6,
    /// Unconditional branch
    Goto = 0xA7,

    // ===== Returns (0xAC-0xB1) =====
    /// Return int
    Ireturn = 0xAC,
    /// Return long
    Lreturn = 0xAD,
    /// Return float
    Freturn = 0xAE,
    /// Return double
    Dreturn = 0xAF,
    /// Return reference
    Areturn = 0xB0,
    /// Return void
    Return = 0xB1,

    // ===== Members (0xB2-0xB9) =====
    /// Read static field (operand: member ref)
    Getstatic = 0xB2,
    /// Write static field
    Putstatic = 0xB3,
    /// Read instance field
    Getfield = 0xB4,
    /// Write instance field
    Putfield = 0xB5,
    /// Virtual dispatch
    Invokevirtual = 0xB6,
    /// Non-virtual dispatch (constructors, super calls, private helpers)
    Invokespecial = 0xB7,
    /// Static call
    Invokestatic = 0xB8,
    /// Interface dispatch
    Invokeinterface = 0xB9,

    // ===== Types (0xBB-0xC7) =====
    /// Allocate an uninitialized instance (operand: class name)
    New = 0xBB,
    /// Check reference type, fail if incompatible
    Checkcast = 0xC0,
    /// Push 1 if reference is an instance of a type
    Instanceof = 0xC1,
    /// Branch if null
    Ifnull = 0xC6,
    /// Branch if not null
    Ifnonnull = 0xC7,
}

/// Operand layout following an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandForm {
    /// No operand
    None,
    /// Signed immediate (BIPUSH, SIPUSH)
    Int,
    /// Tagged constant (LDC)
    Constant,
    /// Local slot
    Var,
    /// Local slot plus delta (IINC)
    Iinc,
    /// Branch label
    Jump,
    /// Field reference
    Field,
    /// Method reference
    Method,
    /// Class name
    Type,
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a known opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        let op = match byte {
            0x00 => Nop,
            0x01 => AconstNull,
            0x02 => IconstM1,
            0x03 => Iconst0,
            0x04 => Iconst1,
            0x05 => Iconst2,
            0x06 => Iconst3,
            0x07 => Iconst4,
            0x08 => Iconst5,
            0x09 => Lconst0,
            0x0A => Lconst1,
            0x0B => Fconst0,
            0x0C => Fconst1,
            0x0D => Fconst2,
            0x0E => Dconst0,
            0x0F => Dconst1,
            0x10 => Bipush,
            0x11 => Sipush,
            0x12 => Ldc,
            0x15 => Iload,
            0x16 => Lload,
            0x17 => Fload,
            0x18 => Dload,
            0x19 => Aload,
            0x36 => Istore,
            0x37 => Lstore,
            0x38 => Fstore,
            0x39 => Dstore,
            0x3A => Astore,
            0x57 => Pop,
            0x58 => Pop2,
            0x59 => Dup,
            0x5F => Swap,
            0x60 => Iadd,
            0x61 => Ladd,
            0x62 => Fadd,
            0x63 => Dadd,
            0x64 => Isub,
            0x65 => Lsub,
            0x68 => Imul,
            0x69 => Lmul,
            0x6C => Idiv,
            0x70 => Irem,
            0x74 => Ineg,
            0x84 => Iinc,
            0x85 => I2l,
            0x88 => L2i,
            0x94 => Lcmp,
            0x99 => Ifeq,
            0x9A => Ifne,
            0x9B => Iflt,
            0x9C => Ifge,
            0x9D => Ifgt,
            0x9E => Ifle,
            0x9F => IfIcmpeq,
            0xA0 => IfIcmpne,
            0xA1 => IfIcmplt,
            0xA2 => IfIcmpge,
            0xA3 => IfIcmpgt,
            0xA4 => IfIcmple,
            0xA5 => IfAcmpeq,
            0xA6 => IfAcmpne,
            0xA7 => Goto,
            0xAC => Ireturn,
            0xAD => Lreturn,
            0xAE => Freturn,
            0xAF => Dreturn,
            0xB0 => Areturn,
            0xB1 => Return,
            0xB2 => Getstatic,
            0xB3 => Putstatic,
            0xB4 => Getfield,
            0xB5 => Putfield,
            0xB6 => Invokevirtual,
            0xB7 => Invokespecial,
            0xB8 => Invokestatic,
            0xB9 => Invokeinterface,
            0xBB => New,
            0xC0 => Checkcast,
            0xC1 => Instanceof,
            0xC6 => Ifnull,
            0xC7 => Ifnonnull,
            _ => return None,
        };
        Some(op)
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the mnemonic used in listings and error messages
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            AconstNull => "ACONST_NULL",
            IconstM1 => "ICONST_M1",
            Iconst0 => "ICONST_0",
            Iconst1 => "ICONST_1",
            Iconst2 => "ICONST_2",
            Iconst3 => "ICONST_3",
            Iconst4 => "ICONST_4",
            Iconst5 => "ICONST_5",
            Lconst0 => "LCONST_0",
            Lconst1 => "LCONST_1",
            Fconst0 => "FCONST_0",
            Fconst1 => "FCONST_1",
            Fconst2 => "FCONST_2",
            Dconst0 => "DCONST_0",
            Dconst1 => "DCONST_1",
            Bipush => "BIPUSH",
            Sipush => "SIPUSH",
            Ldc => "LDC",
            Iload => "ILOAD",
            Lload => "LLOAD",
            Fload => "FLOAD",
            Dload => "DLOAD",
            Aload => "ALOAD",
            Istore => "ISTORE",
            Lstore => "LSTORE",
            Fstore => "FSTORE",
            Dstore => "DSTORE",
            Astore => "ASTORE",
            Pop => "POP",
            Pop2 => "POP2",
            Dup => "DUP",
            Swap => "SWAP",
            Iadd => "IADD",
            Ladd => "LADD",
            Fadd => "FADD",
            Dadd => "DADD",
            Isub => "ISUB",
            Lsub => "LSUB",
            Imul => "IMUL",
            Lmul => "LMUL",
            Idiv => "IDIV",
            Irem => "IREM",
            Ineg => "INEG",
            Iinc => "IINC",
            I2l => "I2L",
            L2i => "L2I",
            Lcmp => "LCMP",
            Ifeq => "IFEQ",
            Ifne => "IFNE",
            Iflt => "IFLT",
            Ifge => "IFGE",
            Ifgt => "IFGT",
            Ifle => "IFLE",
            IfIcmpeq => "IF_ICMPEQ",
            IfIcmpne => "IF_ICMPNE",
            IfIcmplt => "IF_ICMPLT",
            IfIcmpge => "IF_ICMPGE",
            IfIcmpgt => "IF_ICMPGT",
            IfIcmple => "IF_ICMPLE",
            IfAcmpeq => "IF_ACMPEQ",
            IfAcmpne => "IF_ACMPNE",
            Goto => "GOTO",
            Ireturn => "IRETURN",
            Lreturn => "LRETURN",
            Freturn => "FRETURN",
            Dreturn => "DRETURN",
            Areturn => "ARETURN",
            Return => "RETURN",
            Getstatic => "GETSTATIC",
            Putstatic => "PUTSTATIC",
            Getfield => "GETFIELD",
            Putfield => "PUTFIELD",
            Invokevirtual => "INVOKEVIRTUAL",
            Invokespecial => "INVOKESPECIAL",
            Invokestatic => "INVOKESTATIC",
            Invokeinterface => "INVOKEINTERFACE",
            New => "NEW",
            Checkcast => "CHECKCAST",
            Instanceof => "INSTANCEOF",
            Ifnull => "IFNULL",
            Ifnonnull => "IFNONNULL",
        }
    }

    /// Operand layout of this opcode
    pub fn form(self) -> OperandForm {
        use Opcode::*;
        match self {
            Bipush | Sipush => OperandForm::Int,
            Ldc => OperandForm::Constant,
            Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore | Dstore | Astore => {
                OperandForm::Var
            }
            Iinc => OperandForm::Iinc,
            Getstatic | Putstatic | Getfield | Putfield => OperandForm::Field,
            Invokevirtual | Invokespecial | Invokestatic | Invokeinterface => OperandForm::Method,
            New | Checkcast | Instanceof => OperandForm::Type,
            _ if self.is_jump() => OperandForm::Jump,
            _ => OperandForm::None,
        }
    }

    /// Check if this opcode is a branch
    pub fn is_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Ifeq | Ifne
                | Iflt
                | Ifge
                | Ifgt
                | Ifle
                | IfIcmpeq
                | IfIcmpne
                | IfIcmplt
                | IfIcmpge
                | IfIcmpgt
                | IfIcmple
                | IfAcmpeq
                | IfAcmpne
                | Goto
                | Ifnull
                | Ifnonnull
        )
    }

    /// Check if this opcode is a method invocation
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::Invokevirtual | Self::Invokespecial | Self::Invokestatic | Self::Invokeinterface
        )
    }

    /// Check if this opcode returns from the current body
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Self::Ireturn
                | Self::Lreturn
                | Self::Freturn
                | Self::Dreturn
                | Self::Areturn
                | Self::Return
        )
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return() || self == Self::Goto
    }

    /// Stack words popped and pushed by opcodes whose effect does not depend
    /// on a descriptor or constant.
    ///
    /// Returns None for LDC and member instructions; the verifier resolves
    /// those from their operands.
    pub fn stack_effect(self) -> Option<(u16, u16)> {
        use Opcode::*;
        let effect = match self {
            Nop | Goto | Iinc | Return => (0, 0),
            AconstNull | IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5
            | Fconst0 | Fconst1 | Fconst2 | Bipush | Sipush => (0, 1),
            Lconst0 | Lconst1 | Dconst0 | Dconst1 => (0, 2),
            Iload | Fload | Aload => (0, 1),
            Lload | Dload => (0, 2),
            Istore | Fstore | Astore => (1, 0),
            Lstore | Dstore => (2, 0),
            Pop => (1, 0),
            Pop2 => (2, 0),
            Dup => (1, 2),
            Swap => (2, 2),
            Iadd | Fadd | Isub | Imul | Idiv | Irem => (2, 1),
            Ladd | Dadd | Lsub | Lmul => (4, 2),
            Ineg => (1, 1),
            I2l => (1, 2),
            L2i => (2, 1),
            Lcmp => (4, 1),
            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | Ifnull | Ifnonnull => (1, 0),
            IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple | IfAcmpeq
            | IfAcmpne => (2, 0),
            Ireturn | Freturn | Areturn => (1, 0),
            Lreturn | Dreturn => (2, 0),
            New => (0, 1),
            Checkcast | Instanceof => (1, 1),
            Ldc | Getstatic | Putstatic | Getfield | Putfield | Invokevirtual | Invokespecial
            | Invokestatic | Invokeinterface => return None,
        };
        Some(effect)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
