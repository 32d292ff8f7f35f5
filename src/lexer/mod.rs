mod token;
mod token_kind;
mod tokens;

pub use token::Token;
pub use token_kind::{CompOp, TokenKind};
pub use tokens::Tokens;

use std::error::Error;
use std::fmt::Display;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::window::InputWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub row: usize,
    pub column: usize,
}

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.message,
            self.row + 1,
            self.column + 1
        )
    }
}

impl Error for LexError {}

pub type LexResult<T> = Result<T, LexError>;

/// What a matched rule turns into once we know its matched text.
enum Build {
    Fixed(TokenKind),
    Comp,
    Symbol,
    String,
}

/// Column-zero rules: directive heads. Order matters: `Ifdef`/`Ifndef` must
/// precede `If` so that a regex engine without longest-match semantics still
/// prefers the longer keyword (the `\b` anchors make this redundant in
/// practice, but the ordering is kept to match the dialect's own rule table).
static RULES0: Lazy<Vec<(Regex, Build)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^#\s*include\b").unwrap(), Build::Fixed(TokenKind::Include)),
        (Regex::new(r"^#\s*template\b").unwrap(), Build::Fixed(TokenKind::Template)),
        (Regex::new(r"^#\s*define\b").unwrap(), Build::Fixed(TokenKind::Define)),
        (Regex::new(r"^#\s*ifdef\b").unwrap(), Build::Fixed(TokenKind::Ifdef)),
        (Regex::new(r"^#\s*ifndef\b").unwrap(), Build::Fixed(TokenKind::Ifndef)),
        (Regex::new(r"^#\s*if\b").unwrap(), Build::Fixed(TokenKind::If)),
        (Regex::new(r"^#\s*else\b").unwrap(), Build::Fixed(TokenKind::Else)),
        (Regex::new(r"^#\s*endif\b").unwrap(), Build::Fixed(TokenKind::Endif)),
        (Regex::new(r"^#\s*halt\b").unwrap(), Build::Fixed(TokenKind::Halt)),
        (Regex::new(r"^#\s*outfile\b").unwrap(), Build::Fixed(TokenKind::Outfile)),
        (Regex::new(r"^#\s*for\b").unwrap(), Build::Fixed(TokenKind::Foreach)),
        (Regex::new(r"^#\s*endfor\b").unwrap(), Build::Fixed(TokenKind::Endforeach)),
    ]
});

/// In-line rules, tried once the cursor is past column zero.
static RULES1: Lazy<Vec<(Regex, Build)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^\btrue\b").unwrap(), Build::Fixed(TokenKind::True)),
        (Regex::new(r"^\bfalse\b").unwrap(), Build::Fixed(TokenKind::False)),
        (Regex::new(r"^[\t ]+").unwrap(), Build::Fixed(TokenKind::Space)),
        (Regex::new(r"^(==|!=|<=|>=|<|>)").unwrap(), Build::Comp),
        (Regex::new(r"^!").unwrap(), Build::Fixed(TokenKind::Unary)),
        (Regex::new(r"^=").unwrap(), Build::Fixed(TokenKind::Assign)),
        (Regex::new(r"^\bdefined\b").unwrap(), Build::Fixed(TokenKind::Defined)),
        (Regex::new(r"^\bbasename\b").unwrap(), Build::Fixed(TokenKind::Basename)),
        (Regex::new(r"^\bdirname\b").unwrap(), Build::Fixed(TokenKind::Dirname)),
        (Regex::new(r"^\binterpolate\b").unwrap(), Build::Fixed(TokenKind::Interpolate)),
        (Regex::new(r"^\bindices\b").unwrap(), Build::Fixed(TokenKind::Indices)),
        (Regex::new(r"^\bin\b").unwrap(), Build::Fixed(TokenKind::In)),
        (Regex::new(r"^\(").unwrap(), Build::Fixed(TokenKind::LPar)),
        (Regex::new(r"^\)").unwrap(), Build::Fixed(TokenKind::RPar)),
        (Regex::new(r"^,").unwrap(), Build::Fixed(TokenKind::Comma)),
        (Regex::new(r"^[@A-Za-z_][@A-Za-z0-9_]*").unwrap(), Build::Symbol),
        (Regex::new(r#"^"[^"]*""#).unwrap(), Build::String),
        (Regex::new(r"^\n").unwrap(), Build::Fixed(TokenKind::Eol)),
    ]
});

/// Dual-mode, regex-driven scanner. Column zero selects the directive-head
/// table; everything else uses the in-line table.
pub struct Lexer {
    window: InputWindow,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            window: InputWindow::from_str(input),
            tokens: Vec::new(),
        }
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        while !self.window.at_eof() {
            self.lex_one()?;
        }
        Ok(self
            .tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Space | TokenKind::Eol))
            .collect())
    }

    fn lex_one(&mut self) -> LexResult<()> {
        let (row, column) = self.window.position();
        let view = self.window.current_view();
        let table: &[(Regex, Build)] = if column == 0 { &RULES0 } else { &RULES1 };

        for (pattern, build) in table {
            if let Some(m) = pattern.find(view) {
                let lexeme = m.as_str().to_owned();
                self.window.skip(lexeme.len());
                let kind = match build {
                    Build::Fixed(kind) => kind.clone(),
                    Build::Comp => TokenKind::Comp(CompOp::from_lexeme(&lexeme).ok_or_else(|| {
                        LexError {
                            message: format!("unrecognized comparison operator '{lexeme}'"),
                            row,
                            column,
                        }
                    })?),
                    Build::Symbol => TokenKind::Symbol,
                    Build::String => TokenKind::String,
                };
                self.tokens.push(Token::new(kind, lexeme, row, column));
                return Ok(());
            }
        }

        if column == 0 {
            let mut line = view.to_owned();
            if !line.ends_with('\n') {
                line.push('\n');
            }
            let consume = view.len();
            self.window.skip(consume.max(1));
            self.tokens.push(Token::new(TokenKind::Text, line, row, column));
            return Ok(());
        }

        Err(LexError {
            message: format!("failed to lex '{view}'"),
            row,
            column,
        })
    }
}
