use std::error::Error;
use std::fmt::Display;

use super::instruction::Instruction;

/// Detected when a program is loaded, before execution starts: duplicate
/// labels, or a jump whose target never appears in the label table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadError {
    pub message: String,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for LoadError {}

/// Everything that can go wrong while a loaded program is running.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    StackUnderflow,
    UnknownLabel(String),
    UnknownRegister(String),
    IndexOutOfRange { index: i64, len: usize },
    ArgOutOfRange { index: usize, argc: usize },
    OutfileAbsolutePath(String),
    MissingFile,
    NotImplemented(&'static str),
    UnknownBuiltin(String),
    TypeError(String),
}

impl Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeErrorKind::StackUnderflow => f.write_str("data stack underflow"),
            RuntimeErrorKind::UnknownLabel(l) => write!(f, "unknown label '{l}'"),
            RuntimeErrorKind::UnknownRegister(r) => write!(f, "unknown register '{r}'"),
            RuntimeErrorKind::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for list of length {len}")
            }
            RuntimeErrorKind::ArgOutOfRange { index, argc } => write!(
                f,
                "template requested argument {index} but only {argc} were given"
            ),
            RuntimeErrorKind::OutfileAbsolutePath(path) => {
                write!(f, "#outfile path '{path}' must be relative")
            }
            RuntimeErrorKind::MissingFile => {
                f.write_str("__FILE__ must be set in the environment before #outfile runs")
            }
            RuntimeErrorKind::NotImplemented(what) => write!(f, "{what} is not implemented"),
            RuntimeErrorKind::UnknownBuiltin(name) => write!(f, "unknown builtin '{name}'"),
            RuntimeErrorKind::TypeError(message) => f.write_str(message),
        }
    }
}

/// A runtime error, surfaced with the program counter and the failing
/// instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub pc: usize,
    pub instruction: String,
    pub kind: RuntimeErrorKind,
}

impl RuntimeError {
    pub fn new(pc: usize, instruction: &Instruction, kind: RuntimeErrorKind) -> Self {
        Self {
            pc,
            instruction: instruction.to_string(),
            kind,
        }
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at pc={} ({})",
            self.kind, self.pc, self.instruction
        )
    }
}

impl Error for RuntimeError {}
