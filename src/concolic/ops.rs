/// Operator and type tables shared by the expression DAG, the interpreter and the wire format.
/// Numeric codes for operators follow the instrumentation call surface; the serialization codes
/// are the per-enum discriminants.

use std::fmt;

pub type Value = i64;
pub type Addr = u64;
pub type VarId = u32;
pub type BranchId = i32;
pub type FunctionId = u32;

// Virtual branch ids used to mark function calls and returns in the path.
pub const CALL_ID: BranchId = -1;
pub const RETURN_ID: BranchId = -2;

// Mask covering the low `size` bytes of a 64-bit word.
pub fn byte_mask(size: usize) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * size)) - 1
    }
}

// Interpret the low `size` bytes of `raw` as a two's-complement number.
pub fn sign_extend(raw: u64, size: usize) -> Value {
    if size == 0 || size >= 8 {
        return raw as Value;
    }
    let shift = 64 - 8 * size as u32;
    ((raw << shift) as Value) >> shift
}

/// C numeric types known to the instrumentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    UChar,
    Char,
    UShort,
    Short,
    UInt,
    Int,
    ULong,
    Long,
    ULongLong,
    LongLong,
    // Aggregates: the concrete value carried alongside is the size in bytes.
    Struct,
}

impl ValueType {
    pub fn from_code(code: i32) -> Option<Self> {
        let ty = match code {
            0 => ValueType::UChar,
            1 => ValueType::Char,
            2 => ValueType::UShort,
            3 => ValueType::Short,
            4 => ValueType::UInt,
            5 => ValueType::Int,
            6 => ValueType::ULong,
            7 => ValueType::Long,
            8 => ValueType::ULongLong,
            9 => ValueType::LongLong,
            10 => ValueType::Struct,
            _ => return None,
        };
        Some(ty)
    }

    pub fn code(self) -> i32 {
        match self {
            ValueType::UChar => 0,
            ValueType::Char => 1,
            ValueType::UShort => 2,
            ValueType::Short => 3,
            ValueType::UInt => 4,
            ValueType::Int => 5,
            ValueType::ULong => 6,
            ValueType::Long => 7,
            ValueType::ULongLong => 8,
            ValueType::LongLong => 9,
            ValueType::Struct => 10,
        }
    }

    /// Size in bytes of a scalar of this type. Aggregates report 0; use `size_of` instead.
    pub fn size(self) -> usize {
        match self {
            ValueType::UChar | ValueType::Char => 1,
            ValueType::UShort | ValueType::Short => 2,
            ValueType::UInt | ValueType::Int => 4,
            ValueType::ULong | ValueType::Long | ValueType::ULongLong | ValueType::LongLong => 8,
            ValueType::Struct => 0,
        }
    }

    /// Size of a value of this type, taking the aggregate size from the concrete value.
    pub fn size_of(self, concrete: Value) -> usize {
        match self {
            ValueType::Struct => concrete as usize,
            _ => self.size(),
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ValueType::Char | ValueType::Short | ValueType::Int | ValueType::Long | ValueType::LongLong
        )
    }

    pub fn is_struct(self) -> bool {
        self == ValueType::Struct
    }

    // Truncate a value to this type's width and re-extend it according to its signedness.
    pub fn normalize(self, value: Value) -> Value {
        match self {
            ValueType::Struct => value,
            _ if self.is_signed() => sign_extend(value as u64, self.size()),
            _ => (value as u64 & byte_mask(self.size())) as Value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
    UnsignedCast,
    SignedCast,
}

impl UnaryOp {
    pub fn from_code(code: u8) -> Option<Self> {
        let op = match code {
            0 => UnaryOp::Negate,
            1 => UnaryOp::LogicalNot,
            2 => UnaryOp::BitwiseNot,
            3 => UnaryOp::UnsignedCast,
            4 => UnaryOp::SignedCast,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::LogicalNot => "!",
            UnaryOp::BitwiseNot => "~",
            UnaryOp::UnsignedCast => "(unsigned)",
            UnaryOp::SignedCast => "(signed)",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Div,
    SDiv,
    Mod,
    SMod,
    ShiftL,
    ShiftR,
    SShiftR,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Concat,
    Extract,
}

impl BinaryOp {
    pub fn from_code(code: u8) -> Option<Self> {
        let op = match code {
            0 => BinaryOp::Add,
            1 => BinaryOp::Subtract,
            2 => BinaryOp::Multiply,
            3 => BinaryOp::Div,
            4 => BinaryOp::SDiv,
            5 => BinaryOp::Mod,
            6 => BinaryOp::SMod,
            7 => BinaryOp::ShiftL,
            8 => BinaryOp::ShiftR,
            9 => BinaryOp::SShiftR,
            10 => BinaryOp::BitwiseAnd,
            11 => BinaryOp::BitwiseOr,
            12 => BinaryOp::BitwiseXor,
            13 => BinaryOp::Concat,
            14 => BinaryOp::Extract,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::ShiftL | BinaryOp::ShiftR | BinaryOp::SShiftR)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Div => "/",
            BinaryOp::SDiv => "/s",
            BinaryOp::Mod => "%",
            BinaryOp::SMod => "%s",
            BinaryOp::ShiftL => "<<",
            BinaryOp::ShiftR => ">>",
            BinaryOp::SShiftR => ">>s",
            BinaryOp::BitwiseAnd => "&",
            BinaryOp::BitwiseOr => "|",
            BinaryOp::BitwiseXor => "^",
            BinaryOp::Concat => "concat",
            BinaryOp::Extract => "extract",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Le,
    Lt,
    Ge,
    SGt,
    SLe,
    SLt,
    SGe,
}

impl CompareOp {
    pub fn from_code(code: u8) -> Option<Self> {
        let op = match code {
            0 => CompareOp::Eq,
            1 => CompareOp::Neq,
            2 => CompareOp::Gt,
            3 => CompareOp::Le,
            4 => CompareOp::Lt,
            5 => CompareOp::Ge,
            6 => CompareOp::SGt,
            7 => CompareOp::SLe,
            8 => CompareOp::SLt,
            9 => CompareOp::SGe,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// The operator that holds exactly when this one does not.
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Neq,
            CompareOp::Neq => CompareOp::Eq,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::SGt => CompareOp::SLe,
            CompareOp::SLe => CompareOp::SGt,
            CompareOp::SLt => CompareOp::SGe,
            CompareOp::SGe => CompareOp::SLt,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, CompareOp::SGt | CompareOp::SLe | CompareOp::SLt | CompareOp::SGe)
    }

    // Evaluate on raw operand bits already brought to a common width of `size` bytes.
    pub fn evaluate(self, left: u64, right: u64, size: usize) -> bool {
        let (sl, sr) = (sign_extend(left, size), sign_extend(right, size));
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Neq => left != right,
            CompareOp::Gt => left > right,
            CompareOp::Le => left <= right,
            CompareOp::Lt => left < right,
            CompareOp::Ge => left >= right,
            CompareOp::SGt => sl > sr,
            CompareOp::SLe => sl <= sr,
            CompareOp::SLt => sl < sr,
            CompareOp::SGe => sl >= sr,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::SGt => ">s",
            CompareOp::SLe => "<=s",
            CompareOp::SLt => "<s",
            CompareOp::SGe => ">=s",
        }
    }
}

/// Pointer arithmetic: pointer +/- integer (optionally with a signed index) and pointer - pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerOp {
    AddPI,
    SAddPI,
    SubtractPI,
    SSubtractPI,
    SubtractPP,
}

impl PointerOp {
    pub fn is_add(self) -> bool {
        matches!(self, PointerOp::AddPI | PointerOp::SAddPI)
    }

    pub fn has_signed_index(self) -> bool {
        matches!(self, PointerOp::SAddPI | PointerOp::SSubtractPI)
    }
}

/// An operator as encoded by the instrumentation (`Apply1`, `Apply2`, `PtrApply2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentedOp {
    Binary(BinaryOp),
    Compare(CompareOp),
    // Operators the symbolic model does not track: the result is kept concrete.
    Concrete,
    Unary(UnaryOp),
    Pointer(PointerOp),
}

impl InstrumentedOp {
    pub fn from_code(code: i32) -> Option<Self> {
        use InstrumentedOp::*;
        let op = match code {
            0 => Binary(BinaryOp::Add),
            1 => Binary(BinaryOp::Subtract),
            2 => Binary(BinaryOp::Multiply),
            3 => Binary(BinaryOp::Div),
            4 => Binary(BinaryOp::SDiv),
            5 => Binary(BinaryOp::Mod),
            6 => Binary(BinaryOp::SMod),
            7 => Binary(BinaryOp::ShiftL),
            8 => Binary(BinaryOp::ShiftR),
            9 => Binary(BinaryOp::SShiftR),
            10 => Binary(BinaryOp::BitwiseAnd),
            11 => Binary(BinaryOp::BitwiseOr),
            12 => Binary(BinaryOp::BitwiseXor),
            13 => Compare(CompareOp::Eq),
            14 => Compare(CompareOp::Neq),
            15 => Compare(CompareOp::Gt),
            16 => Compare(CompareOp::SGt),
            17 => Compare(CompareOp::Le),
            18 => Compare(CompareOp::SLe),
            19 => Compare(CompareOp::Lt),
            20 => Compare(CompareOp::SLt),
            21 => Compare(CompareOp::Ge),
            22 => Compare(CompareOp::SGe),
            23 => Concrete,
            24 => Unary(UnaryOp::Negate),
            25 => Unary(UnaryOp::BitwiseNot),
            26 => Unary(UnaryOp::LogicalNot),
            27 => Unary(UnaryOp::UnsignedCast),
            28 => Unary(UnaryOp::SignedCast),
            29 => Pointer(PointerOp::AddPI),
            30 => Pointer(PointerOp::SubtractPI),
            31 => Pointer(PointerOp::SubtractPP),
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::UChar => "unsigned char",
            ValueType::Char => "char",
            ValueType::UShort => "unsigned short",
            ValueType::Short => "short",
            ValueType::UInt => "unsigned int",
            ValueType::Int => "int",
            ValueType::ULong => "unsigned long",
            ValueType::Long => "long",
            ValueType::ULongLong => "unsigned long long",
            ValueType::LongLong => "long long",
            ValueType::Struct => "struct",
        };
        write!(f, "{}", name)
    }
}
