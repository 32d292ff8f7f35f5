use std::error::Error;
use std::fmt::Display;

use crate::lexer::{CompOp, Token, TokenKind, Tokens};
use crate::vm::{Builtin, Eval1Op, Instruction, Value};

/// Grammar mismatch, reported with the row/column of the offending token.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub row: usize,
    pub column: usize,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.row + 1, self.column + 1)
    }
}

impl Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

const PROVENANCE_HEADER: &str = "\n\
#\n\
# WARNING: This file was created automatically from the template located in:\n\
#   __FILE__\n\
# Any changes made here will be lost the next time the template is processed.\n\
# Please update the template file to make durable changes.\n\
#\n";

/// Recursive-descent reader over a token cursor that emits bytecode directly;
/// there is no intermediate syntax tree. One `CodeGen` compiles exactly one
/// template, so its label counter can start from zero every time.
pub struct CodeGen {
    tokens: Tokens,
    label_seq: u32,
}

/// Compiles a token stream into a flat program, ending with an implicit `HALT`.
pub fn compile(tokens: Vec<Token>) -> ParseResult<Vec<Instruction>> {
    let mut gen = CodeGen {
        tokens: Tokens::from(tokens),
        label_seq: 0,
    };
    let mut program = gen.block(&[])?;
    program.push(Instruction::Halt);
    if let Some(tok) = gen.tokens.peek() {
        return Err(gen.error(tok, "unexpected trailing token"));
    }
    Ok(program)
}

impl CodeGen {
    fn gensym(&mut self, prefix: &str) -> String {
        self.label_seq += 1;
        format!("{prefix}{}", self.label_seq)
    }

    fn error(&self, token: &Token, message: &str) -> ParseError {
        ParseError {
            message: format!("{message} (found {})", token.kind),
            row: token.row,
            column: token.column,
        }
    }

    fn eof_error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_owned(),
            row: 0,
            column: 0,
        }
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.peek_kind()
    }

    fn next(&mut self) -> ParseResult<Token> {
        self.tokens
            .next()
            .ok_or_else(|| self.eof_error("unexpected end of input"))
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ParseResult<Token> {
        let token = self.next()?;
        if &token.kind == kind {
            Ok(token)
        } else {
            Err(self.error(&token, &format!("expected {what}")))
        }
    }

    fn expect_symbol(&mut self) -> ParseResult<String> {
        let token = self.next()?;
        if token.kind == TokenKind::Symbol {
            Ok(token.lexeme)
        } else {
            Err(self.error(&token, "expected a symbol"))
        }
    }

    /// Parses `anyitem*` until a token in `terminators` is next (or EOF).
    fn block(&mut self, terminators: &[TokenKind]) -> ParseResult<Vec<Instruction>> {
        let mut code = Vec::new();
        loop {
            match self.peek_kind() {
                None => break,
                Some(kind) if terminators.contains(kind) => break,
                _ => code.extend(self.anyitem()?),
            }
        }
        Ok(code)
    }

    fn anyitem(&mut self) -> ParseResult<Vec<Instruction>> {
        match self.peek_kind() {
            Some(TokenKind::Text) => self.body(),
            Some(TokenKind::Include) => self.include(),
            Some(TokenKind::Define) => self.define(),
            Some(TokenKind::Template) => self.template(),
            Some(TokenKind::Halt) => {
                self.next()?;
                Ok(vec![Instruction::Halt])
            }
            Some(TokenKind::Outfile) => {
                self.next()?;
                let mut code = self.expr()?;
                code.push(Instruction::Outfile);
                Ok(code)
            }
            Some(TokenKind::If) => self.condbody(),
            Some(TokenKind::Ifdef) | Some(TokenKind::Ifndef) => self.condbody2(),
            Some(TokenKind::Foreach) => self.foreach(),
            _ => {
                let token = self.next()?;
                Err(self.error(&token, "expected a directive or text"))
            }
        }
    }

    fn body(&mut self) -> ParseResult<Vec<Instruction>> {
        let mut code = Vec::new();
        while matches!(self.peek_kind(), Some(TokenKind::Text)) {
            let token = self.next()?;
            code.push(Instruction::Emit(token.lexeme));
        }
        Ok(code)
    }

    fn include(&mut self) -> ParseResult<Vec<Instruction>> {
        self.next()?; // INCLUDE
        let token = self.expect(&TokenKind::String, "a quoted path")?;
        Ok(vec![Instruction::Include(unquote(&token.lexeme))])
    }

    fn define(&mut self) -> ParseResult<Vec<Instruction>> {
        self.next()?; // DEFINE
        let sym = self.expect_symbol()?;
        let value = if self.starts_expr() {
            self.expr()?
        } else {
            vec![Instruction::Const(Value::Bool(true))]
        };
        let mut code = value;
        code.push(Instruction::Set(sym));
        Ok(code)
    }

    fn template(&mut self) -> ParseResult<Vec<Instruction>> {
        self.next()?; // TEMPLATE
        let names = self.arglist()?;
        let mut code = vec![Instruction::Emit(PROVENANCE_HEADER.to_owned())];
        for (i, name) in names.into_iter().enumerate() {
            code.push(Instruction::Arg(i, name));
        }
        Ok(code)
    }

    fn arglist(&mut self) -> ParseResult<Vec<String>> {
        let mut names = vec![self.expect_symbol()?];
        while matches!(self.peek_kind(), Some(TokenKind::Comma)) {
            self.next()?;
            names.push(self.expect_symbol()?);
        }
        Ok(names)
    }

    fn exprlist(&mut self) -> ParseResult<Vec<Vec<Instruction>>> {
        let mut exprs = vec![self.expr()?];
        while matches!(self.peek_kind(), Some(TokenKind::Comma)) {
            self.next()?;
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn condbody(&mut self) -> ParseResult<Vec<Instruction>> {
        self.next()?; // IF
        let bexpr = self.bexpr()?;
        let true_block = self.block(&[TokenKind::Else, TokenKind::Endif])?;
        let false_block = if matches!(self.peek_kind(), Some(TokenKind::Else)) {
            self.next()?;
            self.block(&[TokenKind::Endif])?
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::Endif, "#endif")?;

        Ok(lower_branch(bexpr, true_block, false_block, self))
    }

    fn condbody2(&mut self) -> ParseResult<Vec<Instruction>> {
        let head = self.next()?; // IFDEF | IFNDEF
        let sym = self.expect_symbol()?;
        let mut bexpr = vec![
            Instruction::Const(Value::Str(sym)),
            Instruction::Eval1(Eval1Op::Defined),
        ];
        if head.kind == TokenKind::Ifndef {
            bexpr.push(Instruction::Eval1(Eval1Op::Not));
        }

        let true_block = self.block(&[TokenKind::Else, TokenKind::Endif])?;
        let false_block = if matches!(self.peek_kind(), Some(TokenKind::Else)) {
            self.next()?;
            self.block(&[TokenKind::Endif])?
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::Endif, "#endif")?;

        Ok(lower_branch(bexpr, true_block, false_block, self))
    }

    fn foreach(&mut self) -> ParseResult<Vec<Instruction>> {
        self.next()?; // FOREACH
        let arglist = self.arglist()?;
        self.expect(&TokenKind::In, "'in'")?;
        let exprlist = self.exprlist()?;
        let block = self.block(&[TokenKind::Endforeach])?;
        self.expect(&TokenKind::Endforeach, "#endfor")?;

        if arglist.len() != exprlist.len() {
            return Err(ParseError {
                message: format!(
                    "foreach expects {} expressions for {} variables, found {}",
                    arglist.len(),
                    arglist.len(),
                    exprlist.len()
                ),
                row: 0,
                column: 0,
            });
        }

        let n = arglist.len();
        let mut code = Vec::new();

        // save caller registers R0..R{n+1}
        for r in 0..=(n + 1) {
            code.push(Instruction::Push(format!("R{r}")));
        }
        code.push(Instruction::Const(Value::Int(0)));
        code.push(Instruction::Pop("R0".to_owned()));

        for (i, expr_code) in exprlist.into_iter().enumerate() {
            code.extend(expr_code);
            if i == 0 {
                code.push(Instruction::Dup);
                code.push(Instruction::XCall(Builtin::Len));
                code.push(Instruction::Pop("R1".to_owned()));
            }
            code.push(Instruction::Pop(format!("R{}", i + 2)));
        }

        let loop_label = self.gensym("loop");
        let break_label = self.gensym("brk");

        code.push(Instruction::Label(loop_label.clone()));
        code.push(Instruction::Push("R0".to_owned()));
        code.push(Instruction::Push("R1".to_owned()));
        code.push(Instruction::Eval2(CompOp::Le));
        code.push(Instruction::JmpIf(break_label.clone()));

        for (i, name) in arglist.into_iter().enumerate() {
            code.push(Instruction::GetIdx(format!("R{}", i + 2), "R0".to_owned()));
            code.push(Instruction::Set(name));
        }

        code.extend(block);
        code.push(Instruction::Add("R0".to_owned(), 1));
        code.push(Instruction::Jmp(loop_label));
        code.push(Instruction::Label(break_label));

        // restore caller registers, highest first
        for r in (0..=(n + 1)).rev() {
            code.push(Instruction::Pop(format!("R{r}")));
        }

        Ok(code)
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(TokenKind::Symbol)
                | Some(TokenKind::String)
                | Some(TokenKind::Basename)
                | Some(TokenKind::Dirname)
                | Some(TokenKind::Interpolate)
                | Some(TokenKind::Indices)
        )
    }

    fn bexpr(&mut self) -> ParseResult<Vec<Instruction>> {
        match self.peek_kind() {
            Some(TokenKind::Unary) => {
                self.next()?;
                let mut inner = self.bexpr()?;
                inner.push(Instruction::Eval1(Eval1Op::Not));
                Ok(inner)
            }
            Some(TokenKind::Defined) => {
                self.next()?;
                self.expect(&TokenKind::LPar, "'('")?;
                let sym = self.expect_symbol()?;
                self.expect(&TokenKind::RPar, "')'")?;
                Ok(vec![
                    Instruction::Const(Value::Str(sym)),
                    Instruction::Eval1(Eval1Op::Defined),
                ])
            }
            Some(TokenKind::True) => {
                self.next()?;
                Ok(vec![Instruction::Const(Value::Bool(true))])
            }
            Some(TokenKind::False) => {
                self.next()?;
                Ok(vec![Instruction::Const(Value::Bool(false))])
            }
            _ => {
                let left = self.expr()?;
                let op_token = self.next()?;
                let op = match op_token.kind {
                    TokenKind::Comp(op) => op,
                    _ => return Err(self.error(&op_token, "expected a comparison operator")),
                };
                let right = self.expr()?;
                // push right first so EVAL2's pop-then-pop yields left OP right
                let mut code = right;
                code.extend(left);
                code.push(Instruction::Eval2(op));
                Ok(code)
            }
        }
    }

    fn expr(&mut self) -> ParseResult<Vec<Instruction>> {
        let builtin = match self.peek_kind() {
            Some(TokenKind::Basename) => Some(Builtin::Basename),
            Some(TokenKind::Dirname) => Some(Builtin::Dirname),
            Some(TokenKind::Interpolate) => Some(Builtin::Interpolate),
            Some(TokenKind::Indices) => Some(Builtin::Indices),
            _ => None,
        };
        if let Some(builtin) = builtin {
            self.next()?;
            self.expect(&TokenKind::LPar, "'('")?;
            let mut inner = self.expr()?;
            self.expect(&TokenKind::RPar, "')'")?;
            inner.push(Instruction::XCall(builtin));
            return Ok(inner);
        }

        let token = self.next()?;
        match token.kind {
            TokenKind::Symbol => Ok(vec![Instruction::Get(token.lexeme)]),
            TokenKind::String => Ok(vec![Instruction::Const(Value::Str(unquote(&token.lexeme)))]),
            _ => Err(self.error(&token, "expected an expression")),
        }
    }
}

/// Shared lowering for `#if`/`#ifdef`/`#ifndef`: the block right after the
/// condition only runs when it's true (it follows the jump target label);
/// the `#else` block runs on fallthrough.
fn lower_branch(
    bexpr: Vec<Instruction>,
    true_block: Vec<Instruction>,
    false_block: Vec<Instruction>,
    gen: &mut CodeGen,
) -> Vec<Instruction> {
    let true_label = gen.gensym("true");
    let cont_label = gen.gensym("xcont");

    let mut code = bexpr;
    code.push(Instruction::JmpIf(true_label.clone()));
    code.extend(false_block);
    code.push(Instruction::Jmp(cont_label.clone()));
    code.push(Instruction::Label(true_label));
    code.extend(true_block);
    code.push(Instruction::Label(cont_label));
    code
}

fn unquote(lexeme: &str) -> String {
    lexeme
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(lexeme)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn compiled(src: &str) -> Vec<Instruction> {
        let tokens = Lexer::new(src).lex().unwrap();
        compile(tokens).unwrap()
    }

    #[test]
    fn plain_text_becomes_emit() {
        let program = compiled("hello\n");
        assert_eq!(
            program,
            vec![Instruction::Emit("hello\n".into()), Instruction::Halt]
        );
    }

    #[test]
    fn define_without_expr_defaults_to_true() {
        let program = compiled("#define FOO\n");
        assert_eq!(
            program,
            vec![
                Instruction::Const(Value::Bool(true)),
                Instruction::Set("FOO".into()),
                Instruction::Halt,
            ]
        );
    }

    #[test]
    fn if_lowers_true_branch_after_label_false_branch_fallthrough() {
        // The dialect has no integer-literal token (only SYMBOL/STRING/
        // TRUE/FALSE), so the operand-order check uses quoted strings:
        // "1" < "2" holds lexicographically, same shape as the numeric case.
        let program = compiled("#if \"1\" < \"2\"\nyes\n#else\nno\n#endif\n");
        // right("2") then left("1"), EVAL2(Lt), JMPIF true, [else: EMIT no], JMP cont,
        // LABEL true, EMIT yes, LABEL cont
        match program.as_slice() {
            [
                Instruction::Const(Value::Str(two)),
                Instruction::Const(Value::Str(one)),
                Instruction::Eval2(CompOp::Lt),
                Instruction::JmpIf(true_label),
                Instruction::Emit(no),
                Instruction::Jmp(cont_label),
                Instruction::Label(true_label2),
                Instruction::Emit(yes),
                Instruction::Label(cont_label2),
                Instruction::Halt,
            ] => {
                assert_eq!(two, "2");
                assert_eq!(one, "1");
                assert_eq!(no, "no\n");
                assert_eq!(yes, "yes\n");
                assert_eq!(true_label, true_label2);
                assert_eq!(cont_label, cont_label2);
            }
            other => panic!("unexpected lowering: {other:#?}"),
        }
    }

    #[test]
    fn ifdef_checks_membership_ifndef_negates() {
        let program = compiled("#ifdef X\na\n#endif\n");
        assert_eq!(program[0], Instruction::Const(Value::Str("X".into())));
        assert_eq!(program[1], Instruction::Eval1(Eval1Op::Defined));

        let program = compiled("#ifndef X\na\n#endif\n");
        assert_eq!(program[2], Instruction::Eval1(Eval1Op::Not));
    }

    #[test]
    fn template_emits_header_then_positional_args() {
        let program = compiled("#template @N, @V\n");
        assert!(matches!(program[0], Instruction::Emit(_)));
        assert_eq!(program[1], Instruction::Arg(0, "@N".into()));
        assert_eq!(program[2], Instruction::Arg(1, "@V".into()));
    }

    #[test]
    fn foreach_over_two_lists_uses_three_registers() {
        let program = compiled("#for @A, @B in @N, @V\n@A=@B\n#endfor\n");
        // 4 saved registers (R0..R3) up front, same 4 restored at the end
        let pushes: Vec<_> = program
            .iter()
            .take(4)
            .map(|i| matches!(i, Instruction::Push(_)))
            .collect();
        assert_eq!(pushes, vec![true, true, true, true]);
        let last_instrs = &program[program.len() - 5..program.len() - 1];
        assert!(last_instrs.iter().all(|i| matches!(i, Instruction::Pop(_))));
    }

    #[test]
    fn outfile_compiles_expr_then_outfile_opcode() {
        let program = compiled("#outfile \"out.py\"\n");
        assert_eq!(
            program,
            vec![
                Instruction::Const(Value::Str("out.py".into())),
                Instruction::Outfile,
                Instruction::Halt,
            ]
        );
    }

    #[test]
    fn basename_wraps_inner_expr_with_xcall() {
        let program = compiled("#define X basename(@P)\n");
        assert_eq!(
            program,
            vec![
                Instruction::Get("@P".into()),
                Instruction::XCall(Builtin::Basename),
                Instruction::Set("X".into()),
                Instruction::Halt,
            ]
        );
    }

    #[test]
    fn labels_are_unique_across_independent_compilations() {
        let a = compiled("#if \"1\" < \"2\"\nx\n#endif\n");
        let b = compiled("#if \"1\" < \"2\"\nx\n#endif\n");
        // each compilation starts its own counter from zero, so identical
        // source produces identical (not globally-unique) label names
        assert_eq!(a, b);
    }
}
