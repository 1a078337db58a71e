/// Binary wire format for expressions. Each node is `[value: i64][size: u64][tag: u8]` followed
/// by its payload, all little-endian.

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::state::symbolic_memory::{Slab, SymbolicMemory, SLAB_CAPACITY};
use crate::state::symbolic_object::SymbolicObject;

use super::ops::{Addr, BinaryOp, CompareOp, UnaryOp, Value};
use super::symbolic_expr::SymbolicExpr;

const TAG_SYMBOL: u8 = b'0';
const TAG_COMPARE: u8 = b'1';
const TAG_BINARY: u8 = b'2';
const TAG_UNARY: u8 = b'3';
const TAG_DEREF: u8 = b'4';
const TAG_CONST: u8 = b'5';

/// Deepest expression nesting accepted from a trace.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug)]
pub enum TraceError {
    Io(io::Error),
    Truncated,
    UnknownTag(u8),
    UnknownOperator { kind: &'static str, code: u8 },
    UnknownType(i32),
    InvalidSize(u64),
    InvalidExtract { offset: Value, size: usize, width: usize },
    InvalidObject { start: Addr, size: u64 },
    TooDeep,
    MalformedInput { line: usize, token: String },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Io(err) => write!(f, "I/O error: {}", err),
            TraceError::Truncated => write!(f, "truncated trace data"),
            TraceError::UnknownTag(tag) => write!(f, "unknown expression tag 0x{:02x}", tag),
            TraceError::UnknownOperator { kind, code } => write!(f, "unknown {} operator code {}", kind, code),
            TraceError::UnknownType(code) => write!(f, "unknown value type code {}", code),
            TraceError::InvalidSize(size) => write!(f, "expression of {} bytes", size),
            TraceError::InvalidExtract { offset, size, width } => {
                write!(f, "extract of {} bytes at offset {} from a {}-byte value", size, offset, width)
            }
            TraceError::InvalidObject { start, size } => {
                write!(f, "object of {} bytes at 0x{:x} wraps the address space", size, start)
            }
            TraceError::TooDeep => write!(f, "expression nested deeper than {} levels", MAX_DEPTH),
            TraceError::MalformedInput { line, token } => {
                write!(f, "malformed input value '{}' on line {}", token, line)
            }
        }
    }
}

impl Error for TraceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TraceError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TraceError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TraceError::Truncated
        } else {
            TraceError::Io(err)
        }
    }
}

pub fn serialize_expr<W: Write>(expr: &SymbolicExpr, out: &mut W) -> io::Result<()> {
    out.write_i64::<LittleEndian>(expr.value())?;
    out.write_u64::<LittleEndian>(expr.size() as u64)?;
    match expr {
        SymbolicExpr::Const { .. } => out.write_u8(TAG_CONST),
        SymbolicExpr::Symbol { var, .. } => {
            out.write_u8(TAG_SYMBOL)?;
            out.write_u32::<LittleEndian>(*var)
        }
        SymbolicExpr::Unary { op, child, .. } => {
            out.write_u8(TAG_UNARY)?;
            out.write_u8(op.code())?;
            serialize_expr(child, out)
        }
        SymbolicExpr::Binary { op, left, right, .. } => {
            out.write_u8(TAG_BINARY)?;
            out.write_u8(op.code())?;
            serialize_expr(left, out)?;
            serialize_expr(right, out)
        }
        SymbolicExpr::Compare { op, left, right, .. } => {
            out.write_u8(TAG_COMPARE)?;
            out.write_u8(op.code())?;
            serialize_expr(left, out)?;
            serialize_expr(right, out)
        }
        SymbolicExpr::Deref { addr, object, concrete_bytes, .. } => {
            out.write_u8(TAG_DEREF)?;
            serialize_object(object, out)?;
            serialize_expr(addr, out)?;
            out.write_u64::<LittleEndian>(concrete_bytes.len() as u64)?;
            out.write_all(concrete_bytes)
        }
    }
}

pub fn parse_expr<R: Read>(input: &mut R) -> Result<SymbolicExpr, TraceError> {
    parse_node(input, 0)
}

fn parse_node<R: Read>(input: &mut R, depth: usize) -> Result<SymbolicExpr, TraceError> {
    if depth > MAX_DEPTH {
        return Err(TraceError::TooDeep);
    }
    let value = input.read_i64::<LittleEndian>()?;
    let raw_size = input.read_u64::<LittleEndian>()?;
    if !(1..=8).contains(&raw_size) {
        return Err(TraceError::InvalidSize(raw_size));
    }
    let size = raw_size as usize;
    let tag = input.read_u8()?;
    let expr = match tag {
        TAG_CONST => SymbolicExpr::Const { size, value },
        TAG_SYMBOL => {
            let var = input.read_u32::<LittleEndian>()?;
            SymbolicExpr::Symbol { size, value, var }
        }
        TAG_UNARY => {
            let code = input.read_u8()?;
            let op = UnaryOp::from_code(code).ok_or(TraceError::UnknownOperator { kind: "unary", code })?;
            let child = Box::new(parse_node(input, depth + 1)?);
            SymbolicExpr::Unary { op, child, size, value }
        }
        TAG_BINARY => {
            let code = input.read_u8()?;
            let op = BinaryOp::from_code(code).ok_or(TraceError::UnknownOperator { kind: "binary", code })?;
            let left = Box::new(parse_node(input, depth + 1)?);
            let right = Box::new(parse_node(input, depth + 1)?);
            if op == BinaryOp::Extract {
                check_extract(&left, &right, size)?;
            }
            SymbolicExpr::Binary { op, left, right, size, value }
        }
        TAG_COMPARE => {
            let code = input.read_u8()?;
            let op = CompareOp::from_code(code).ok_or(TraceError::UnknownOperator { kind: "compare", code })?;
            let left = Box::new(parse_node(input, depth + 1)?);
            let right = Box::new(parse_node(input, depth + 1)?);
            SymbolicExpr::Compare { op, left, right, size, value }
        }
        TAG_DEREF => {
            let object = Box::new(parse_object_at(input, depth + 1)?);
            let addr = Box::new(parse_node(input, depth + 1)?);
            let len = input.read_u64::<LittleEndian>()?;
            let concrete_bytes = read_exact_vec(input, len)?;
            SymbolicExpr::Deref { addr, object, concrete_bytes, size, value }
        }
        other => return Err(TraceError::UnknownTag(other)),
    };
    Ok(expr)
}

// The offset must be a constant and the extracted bytes must lie inside the operand.
fn check_extract(whole: &SymbolicExpr, offset: &SymbolicExpr, size: usize) -> Result<(), TraceError> {
    let invalid = || TraceError::InvalidExtract { offset: offset.value(), size, width: whole.size() };
    if !matches!(offset, SymbolicExpr::Const { .. }) {
        return Err(invalid());
    }
    let start = usize::try_from(offset.value()).map_err(|_| invalid())?;
    match start.checked_add(size) {
        Some(end) if end <= whole.size() => Ok(()),
        _ => Err(invalid()),
    }
}

// Read `len` bytes without trusting `len` for the allocation size.
fn read_exact_vec<R: Read>(input: &mut R, len: u64) -> Result<Vec<u8>, TraceError> {
    let mut bytes = Vec::new();
    input.by_ref().take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(TraceError::Truncated);
    }
    Ok(bytes)
}

fn serialize_memory<W: Write>(memory: &SymbolicMemory, out: &mut W) -> io::Result<()> {
    let slabs: Vec<_> = memory.slabs().collect();
    out.write_u64::<LittleEndian>(slabs.len() as u64)?;
    for (addr, slab) in slabs {
        out.write_u64::<LittleEndian>(*addr)?;
        for slot in slab.slots() {
            match slot {
                Some(expr) => {
                    out.write_u8(1)?;
                    serialize_expr(expr, out)?;
                }
                None => out.write_u8(0)?,
            }
        }
    }
    Ok(())
}

fn parse_memory<R: Read>(input: &mut R, depth: usize) -> Result<SymbolicMemory, TraceError> {
    let count = input.read_u64::<LittleEndian>()?;
    let mut memory = SymbolicMemory::new();
    for _ in 0..count {
        let addr: Addr = input.read_u64::<LittleEndian>()?;
        let mut slots: [Option<SymbolicExpr>; SLAB_CAPACITY] = Default::default();
        for slot in slots.iter_mut() {
            if input.read_u8()? != 0 {
                *slot = Some(parse_node(input, depth + 1)?);
            }
        }
        memory.insert_slab(addr, Slab::from_slots(slots));
    }
    Ok(memory)
}

pub fn serialize_object<W: Write>(object: &SymbolicObject, out: &mut W) -> io::Result<()> {
    out.write_u64::<LittleEndian>(object.start())?;
    out.write_u64::<LittleEndian>(object.size() as u64)?;
    serialize_memory(object.memory(), out)?;
    out.write_u64::<LittleEndian>(object.writes().len() as u64)?;
    for (addr, value) in object.writes() {
        serialize_expr(addr, out)?;
        serialize_expr(value, out)?;
    }
    Ok(())
}

pub fn parse_object<R: Read>(input: &mut R) -> Result<SymbolicObject, TraceError> {
    parse_object_at(input, 0)
}

fn parse_object_at<R: Read>(input: &mut R, depth: usize) -> Result<SymbolicObject, TraceError> {
    let start = input.read_u64::<LittleEndian>()?;
    let raw_size = input.read_u64::<LittleEndian>()?;
    if start.checked_add(raw_size).is_none() || usize::try_from(raw_size).is_err() {
        return Err(TraceError::InvalidObject { start, size: raw_size });
    }
    let size = raw_size as usize;
    let memory = parse_memory(input, depth)?;
    let count = input.read_u64::<LittleEndian>()?;
    let mut writes = Vec::new();
    for _ in 0..count {
        let addr = parse_node(input, depth + 1)?;
        let value = parse_node(input, depth + 1)?;
        writes.push((addr, value));
    }
    Ok(SymbolicObject::from_parts(start, size, memory, writes))
}
