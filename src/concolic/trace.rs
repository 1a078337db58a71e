/// Execution trace of one run: the inputs it was started with, the declared type of every input
/// variable and the path of branches it followed.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};

use super::expr_codec::{parse_expr, serialize_expr, TraceError};
use super::ops::{BranchId, Value, ValueType, VarId};
use super::symbolic_expr::SymbolicExpr;

#[derive(Clone, Debug, PartialEq)]
pub struct PathEntry {
    pub branch: BranchId,
    pub predicate: Option<SymbolicExpr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionTrace {
    pub inputs: Vec<Value>,
    pub vars: BTreeMap<VarId, ValueType>,
    pub path: Vec<PathEntry>,
}

impl ExecutionTrace {
    pub fn new(inputs: Vec<Value>) -> Self {
        ExecutionTrace { inputs, vars: BTreeMap::new(), path: Vec::new() }
    }

    pub fn declare_var(&mut self, var: VarId, ty: ValueType) {
        self.vars.insert(var, ty);
    }

    /// Concrete value of input `index`, growing the input vector with zeros when it is missing.
    pub fn input_or_default(&mut self, index: usize) -> Value {
        if index >= self.inputs.len() {
            self.inputs.resize(index + 1, 0);
        }
        self.inputs[index]
    }

    pub fn push_branch(&mut self, branch: BranchId, predicate: Option<SymbolicExpr>) {
        self.path.push(PathEntry { branch, predicate });
    }

    /// Predicates of the symbolic branches, in path order.
    pub fn constraints(&self) -> Vec<&SymbolicExpr> {
        self.path.iter().filter_map(|entry| entry.predicate.as_ref()).collect()
    }

    /// Branch ids of the symbolic branches, aligned with `constraints()`.
    pub fn symbolic_branches(&self) -> Vec<BranchId> {
        self.path
            .iter()
            .filter(|entry| entry.predicate.is_some())
            .map(|entry| entry.branch)
            .collect()
    }

    /// Query that keeps the first `k` symbolic branches and negates branch `k`.
    pub fn flip(&self, k: usize) -> Option<Vec<SymbolicExpr>> {
        let constraints = self.constraints();
        let target = constraints.get(k)?;
        let mut query: Vec<SymbolicExpr> = constraints[..k].iter().map(|c| (*c).clone()).collect();
        query.push((*target).clone().negate_predicate());
        Some(query)
    }

    /// Input vector for the next run: the current inputs with `solution` applied.
    pub fn next_inputs(&self, solution: &BTreeMap<VarId, Value>) -> Vec<Value> {
        let mut inputs = self.inputs.clone();
        for (var, value) in solution {
            let index = *var as usize;
            if index >= inputs.len() {
                inputs.resize(index + 1, 0);
            }
            inputs[index] = *value;
        }
        inputs
    }

    pub fn serialize<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u64::<LittleEndian>(self.inputs.len() as u64)?;
        for value in &self.inputs {
            out.write_i64::<LittleEndian>(*value)?;
        }
        out.write_u64::<LittleEndian>(self.vars.len() as u64)?;
        for (var, ty) in &self.vars {
            out.write_u32::<LittleEndian>(*var)?;
            out.write_i8(ty.code() as i8)?;
        }
        out.write_u64::<LittleEndian>(self.path.len() as u64)?;
        for entry in &self.path {
            out.write_i32::<LittleEndian>(entry.branch)?;
            match &entry.predicate {
                Some(predicate) => {
                    out.write_u8(1)?;
                    serialize_expr(predicate, out)?;
                }
                None => out.write_u8(0)?,
            }
        }
        Ok(())
    }

    pub fn parse<R: Read>(input: &mut R) -> Result<Self, TraceError> {
        let mut trace = ExecutionTrace::default();
        let count = input.read_u64::<LittleEndian>()?;
        for _ in 0..count {
            trace.inputs.push(input.read_i64::<LittleEndian>()?);
        }
        let count = input.read_u64::<LittleEndian>()?;
        for _ in 0..count {
            let var = input.read_u32::<LittleEndian>()?;
            let code = input.read_i8()? as i32;
            let ty = ValueType::from_code(code).ok_or(TraceError::UnknownType(code))?;
            trace.vars.insert(var, ty);
        }
        let count = input.read_u64::<LittleEndian>()?;
        for _ in 0..count {
            let branch = input.read_i32::<LittleEndian>()?;
            let predicate = match input.read_u8()? {
                0 => None,
                _ => Some(parse_expr(input)?),
            };
            trace.path.push(PathEntry { branch, predicate });
        }
        Ok(trace)
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TraceError> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        self.serialize(&mut out)?;
        out.flush()?;
        debug!(
            "wrote trace with {} inputs and {} path entries to {}",
            self.inputs.len(),
            self.path.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        let mut input = BufReader::new(File::open(path)?);
        Self::parse(&mut input)
    }
}

/// Parse whitespace-separated integers.
pub fn parse_inputs(text: &str) -> Result<Vec<Value>, TraceError> {
    let mut inputs = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        for token in line.split_whitespace() {
            let value = token.parse::<Value>().map_err(|_| TraceError::MalformedInput {
                line: line_no + 1,
                token: token.to_string(),
            })?;
            inputs.push(value);
        }
    }
    Ok(inputs)
}

/// Read the input file of a run. A missing file means a first run with no inputs.
pub fn read_inputs_file<P: AsRef<Path>>(path: P) -> Result<Vec<Value>, TraceError> {
    match fs::read_to_string(path.as_ref()) {
        Ok(text) => parse_inputs(&text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("no input file at {}, starting from zero inputs", path.as_ref().display());
            Ok(Vec::new())
        }
        Err(err) => Err(TraceError::Io(err)),
    }
}

pub fn write_inputs_file<P: AsRef<Path>>(path: P, inputs: &[Value]) -> Result<(), TraceError> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in inputs {
        writeln!(out, "{}", value)?;
    }
    out.flush()?;
    Ok(())
}
