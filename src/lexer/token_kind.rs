use std::fmt::Display;

/// The six comparison operators `bexpr` supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompOp::Eq => "==",
            CompOp::Ne => "!=",
            CompOp::Lt => "<",
            CompOp::Le => "<=",
            CompOp::Gt => ">",
            CompOp::Ge => ">=",
        }
    }

    pub fn from_lexeme(lexeme: &str) -> Option<Self> {
        Some(match lexeme {
            "==" => CompOp::Eq,
            "!=" => CompOp::Ne,
            "<=" => CompOp::Le,
            ">=" => CompOp::Ge,
            "<" => CompOp::Lt,
            ">" => CompOp::Gt,
            _ => return None,
        })
    }
}

impl Display for CompOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed sum of everything the tokenizer can produce. `Space` and `Eol` only
/// ever exist inside the lexer; the public token stream filters them out
/// before the parser ever sees a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    // directive heads
    Include,
    Template,
    Define,
    If,
    Ifdef,
    Ifndef,
    Else,
    Endif,
    Halt,
    Outfile,
    Foreach,
    Endforeach,

    // expression atoms
    Symbol,
    String,
    True,
    False,

    // operators
    Comp(CompOp),
    Unary,
    Assign,
    Comma,
    LPar,
    RPar,

    // builtin names
    Defined,
    Basename,
    Dirname,
    Interpolate,
    Indices,
    In,

    // bulk text and internal-only tokens
    Text,
    Space,
    Eol,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
