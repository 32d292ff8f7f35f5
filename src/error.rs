use std::error::Error;
use std::fmt::Display;

use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::{LoadError, RuntimeError};

/// Closed union of everything that can end a template run early, so the
/// driver and CLI can use `?` throughout while still matching on the kind
/// (the CLI picks an exit status from it).
#[derive(Debug)]
pub enum TemplateError {
    Lex(LexError),
    Parse(ParseError),
    Load(LoadError),
    Runtime(RuntimeError),
    Interpolate(String),
    Io(std::io::Error),
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::Lex(e) => write!(f, "lex error: {e}"),
            TemplateError::Parse(e) => write!(f, "parse error: {e}"),
            TemplateError::Load(e) => write!(f, "load error: {e}"),
            TemplateError::Runtime(e) => write!(f, "runtime error: {e}"),
            TemplateError::Interpolate(msg) => write!(f, "interpolation error: {msg}"),
            TemplateError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TemplateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TemplateError::Lex(e) => Some(e),
            TemplateError::Parse(e) => Some(e),
            TemplateError::Load(e) => Some(e),
            TemplateError::Runtime(e) => Some(e),
            TemplateError::Interpolate(_) => None,
            TemplateError::Io(e) => Some(e),
        }
    }
}

impl From<LexError> for TemplateError {
    fn from(e: LexError) -> Self {
        TemplateError::Lex(e)
    }
}

impl From<ParseError> for TemplateError {
    fn from(e: ParseError) -> Self {
        TemplateError::Parse(e)
    }
}

impl From<LoadError> for TemplateError {
    fn from(e: LoadError) -> Self {
        TemplateError::Load(e)
    }
}

impl From<RuntimeError> for TemplateError {
    fn from(e: RuntimeError) -> Self {
        TemplateError::Runtime(e)
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(e: std::io::Error) -> Self {
        TemplateError::Io(e)
    }
}
