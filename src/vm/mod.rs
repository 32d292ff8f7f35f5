mod error;
mod instruction;

pub use error::{LoadError, RuntimeError, RuntimeErrorKind};
pub use instruction::{Builtin, Eval1Op, Instruction, Value};

use std::collections::HashMap;
use std::path::Path;

use crate::lexer::CompOp;

/// At least 64 in the reference implementation; used as scratch storage by
/// `FOREACH` lowering.
pub const REGISTER_COUNT: usize = 64;

/// Stack + register + environment interpreter. One `Vm` executes exactly one
/// template; it is never reused across runs.
pub struct Vm {
    program: Vec<Instruction>,
    labels: HashMap<String, usize>,
    pc: usize,
    running: bool,
    stack: Vec<Value>,
    env: HashMap<String, Value>,
    registers: Vec<Value>,
    argv: Vec<Value>,
    pub output: Vec<String>,
    pub outfile: Option<String>,
}

impl Vm {
    pub fn new(env: HashMap<String, Value>, argv: Vec<Value>) -> Self {
        Self {
            program: vec![Instruction::Label("main".to_owned())],
            labels: HashMap::new(),
            pc: 0,
            running: false,
            stack: Vec::new(),
            env,
            registers: vec![Value::Int(0); REGISTER_COUNT],
            argv,
            output: Vec::new(),
            outfile: None,
        }
    }

    /// Appends a compiled program and rescans labels, per the data model's
    /// prescan invariant. Call this once; the VM isn't designed for the
    /// incremental `#include` growth the reserved opcode would need.
    pub fn load(&mut self, mut instructions: Vec<Instruction>) -> Result<(), LoadError> {
        self.program.append(&mut instructions);
        self.scan_labels()?;
        self.validate_jumps()?;
        Ok(())
    }

    fn scan_labels(&mut self) -> Result<(), LoadError> {
        self.labels.clear();
        for (pc, instr) in self.program.iter().enumerate() {
            if let Instruction::Label(name) = instr {
                if self.labels.insert(name.clone(), pc).is_some() {
                    return Err(LoadError {
                        message: format!("duplicate label '{name}'"),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_jumps(&self) -> Result<(), LoadError> {
        for instr in &self.program {
            let target = match instr {
                Instruction::Jmp(label) | Instruction::JmpIf(label) => Some(label),
                _ => None,
            };
            if let Some(label) = target {
                if !self.labels.contains_key(label) {
                    return Err(LoadError {
                        message: format!("unresolved jump target '{label}'"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn execute(&mut self) -> Result<(), RuntimeError> {
        self.pc = self.labels["main"];
        self.running = true;
        while self.running {
            self.step()?;
        }
        Ok(())
    }

    fn reg_index(&self, instr: &Instruction, pc: usize, name: &str) -> Result<usize, RuntimeError> {
        let index = name
            .strip_prefix('R')
            .and_then(|rest| rest.parse::<usize>().ok())
            .filter(|i| *i < REGISTER_COUNT);
        index.ok_or_else(|| {
            RuntimeError::new(pc, instr, RuntimeErrorKind::UnknownRegister(name.to_owned()))
        })
    }

    fn pop(&mut self, instr: &Instruction, pc: usize) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new(pc, instr, RuntimeErrorKind::StackUnderflow))
    }

    /// Substitutes every environment name appearing in `text` with its
    /// stringified value, longest names first so e.g. `@FOO` is tried before
    /// a same-prefixed shorter name `@F`.
    fn interpolate(&self, text: &str) -> String {
        let mut names: Vec<&String> = self.env.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut result = text.to_owned();
        for name in names {
            let value = self.env[name].to_string();
            result = result.replace(name.as_str(), &value);
        }
        result
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        let pc = self.pc;
        let instr = self.program[pc].clone();
        self.pc += 1;

        match &instr {
            Instruction::Label(_) => {}
            Instruction::Jmp(label) => {
                self.pc = self.labels[label];
            }
            Instruction::JmpIf(label) => {
                let cond = self.pop(&instr, pc)?;
                if cond.is_truthy() {
                    self.pc = self.labels[label];
                }
            }
            Instruction::Emit(text) => {
                let rendered = self.interpolate(text);
                self.output.push(rendered);
            }
            Instruction::Const(value) => self.stack.push(value.clone()),
            Instruction::Get(sym) => {
                let value = self.env.get(sym).cloned().unwrap_or(Value::Str(String::new()));
                self.stack.push(value);
            }
            Instruction::Set(sym) => {
                let value = self.pop(&instr, pc)?;
                self.env.insert(sym.clone(), value);
            }
            Instruction::Dup => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| RuntimeError::new(pc, &instr, RuntimeErrorKind::StackUnderflow))?;
                self.stack.push(top);
            }
            Instruction::Push(reg) => {
                let idx = self.reg_index(&instr, pc, reg)?;
                self.stack.push(self.registers[idx].clone());
            }
            Instruction::Pop(reg) => {
                let idx = self.reg_index(&instr, pc, reg)?;
                let value = self.pop(&instr, pc)?;
                self.registers[idx] = value;
            }
            Instruction::Add(reg, k) => {
                let idx = self.reg_index(&instr, pc, reg)?;
                let current = match &self.registers[idx] {
                    Value::Int(n) => *n,
                    other => {
                        return Err(RuntimeError::new(
                            pc,
                            &instr,
                            RuntimeErrorKind::TypeError(format!(
                                "ADD requires an integer register, found {}",
                                other.type_name()
                            )),
                        ))
                    }
                };
                self.registers[idx] = Value::Int(current + k);
            }
            Instruction::GetIdx(arr_reg, idx_reg) => {
                let arr_idx = self.reg_index(&instr, pc, arr_reg)?;
                let idx_idx = self.reg_index(&instr, pc, idx_reg)?;
                let index = match &self.registers[idx_idx] {
                    Value::Int(n) => *n,
                    other => {
                        return Err(RuntimeError::new(
                            pc,
                            &instr,
                            RuntimeErrorKind::TypeError(format!(
                                "GETIDX requires an integer index, found {}",
                                other.type_name()
                            )),
                        ))
                    }
                };
                let list = match &self.registers[arr_idx] {
                    Value::List(items) => items,
                    other => {
                        return Err(RuntimeError::new(
                            pc,
                            &instr,
                            RuntimeErrorKind::TypeError(format!(
                                "GETIDX requires a list register, found {}",
                                other.type_name()
                            )),
                        ))
                    }
                };
                let value = usize::try_from(index)
                    .ok()
                    .and_then(|i| list.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        RuntimeError::new(
                            pc,
                            &instr,
                            RuntimeErrorKind::IndexOutOfRange {
                                index,
                                len: list.len(),
                            },
                        )
                    })?;
                self.stack.push(value);
            }
            Instruction::Eval1(op) => {
                let a = self.pop(&instr, pc)?;
                let result = match op {
                    Eval1Op::Not => Value::Bool(!a.is_truthy()),
                    Eval1Op::Defined => match &a {
                        Value::Str(name) => Value::Bool(self.env.contains_key(name)),
                        other => {
                            return Err(RuntimeError::new(
                                pc,
                                &instr,
                                RuntimeErrorKind::TypeError(format!(
                                    "defined() requires a symbol name, found {}",
                                    other.type_name()
                                )),
                            ))
                        }
                    },
                };
                self.stack.push(result);
            }
            Instruction::Eval2(op) => {
                let a = self.pop(&instr, pc)?;
                let b = self.pop(&instr, pc)?;
                let result = eval2(*op, &a, &b)
                    .map_err(|kind| RuntimeError::new(pc, &instr, kind))?;
                self.stack.push(Value::Bool(result));
            }
            Instruction::XCall(builtin) => {
                let arg = self.pop(&instr, pc)?;
                let result = self.call_builtin(*builtin, arg, pc, &instr)?;
                self.stack.push(result);
            }
            Instruction::Arg(index, sym) => {
                let value = self.argv.get(*index).cloned().ok_or_else(|| {
                    RuntimeError::new(
                        pc,
                        &instr,
                        RuntimeErrorKind::ArgOutOfRange {
                            index: *index,
                            argc: self.argv.len(),
                        },
                    )
                })?;
                self.env.insert(sym.clone(), value);
            }
            Instruction::Outfile => {
                let filename = match self.pop(&instr, pc)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(RuntimeError::new(
                            pc,
                            &instr,
                            RuntimeErrorKind::TypeError(format!(
                                "#outfile requires a string, found {}",
                                other.type_name()
                            )),
                        ))
                    }
                };
                if filename.starts_with('/') {
                    return Err(RuntimeError::new(
                        pc,
                        &instr,
                        RuntimeErrorKind::OutfileAbsolutePath(filename),
                    ));
                }
                let file = match self.env.get("__FILE__") {
                    Some(Value::Str(f)) => f.clone(),
                    _ => return Err(RuntimeError::new(pc, &instr, RuntimeErrorKind::MissingFile)),
                };
                let basedir = Path::new(&file).parent().unwrap_or_else(|| Path::new(""));
                self.outfile = Some(basedir.join(filename).to_string_lossy().into_owned());
            }
            Instruction::Halt => {
                self.running = false;
            }
            Instruction::Include(_) => {
                return Err(RuntimeError::new(
                    pc,
                    &instr,
                    RuntimeErrorKind::NotImplemented("#include"),
                ))
            }
            Instruction::Print => {
                let value = self.pop(&instr, pc)?;
                log::info!("{value}");
            }
        }

        Ok(())
    }

    fn call_builtin(
        &self,
        builtin: Builtin,
        arg: Value,
        pc: usize,
        instr: &Instruction,
    ) -> Result<Value, RuntimeError> {
        let type_err = |expected: &str, found: &Value| {
            RuntimeError::new(
                pc,
                instr,
                RuntimeErrorKind::TypeError(format!(
                    "{}() requires a {expected}, found {}",
                    builtin.name(),
                    found.type_name()
                )),
            )
        };

        match builtin {
            Builtin::Basename => match &arg {
                Value::Str(s) => Ok(Value::Str(
                    Path::new(s)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                )),
                other => Err(type_err("string", other)),
            },
            Builtin::Dirname => match &arg {
                Value::Str(s) => Ok(Value::Str(
                    Path::new(s)
                        .parent()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                )),
                other => Err(type_err("string", other)),
            },
            Builtin::Interpolate => match &arg {
                Value::Str(s) => Ok(Value::Str(self.interpolate(s))),
                other => Err(type_err("string", other)),
            },
            Builtin::Len => match &arg {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(type_err("string or list", other)),
            },
            Builtin::Indices => match &arg {
                Value::List(items) => {
                    Ok(Value::List((0..items.len() as i64).map(Value::Int).collect()))
                }
                other => Err(type_err("list", other)),
            },
        }
    }
}

fn eval2(op: CompOp, a: &Value, b: &Value) -> Result<bool, RuntimeErrorKind> {
    if op == CompOp::Eq {
        return Ok(a == b);
    }
    if op == CompOp::Ne {
        return Ok(a != b);
    }

    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => {
            return Err(RuntimeErrorKind::TypeError(format!(
                "cannot compare {} and {}",
                a.type_name(),
                b.type_name()
            )))
        }
    };

    Ok(match op {
        CompOp::Lt => ordering.is_lt(),
        CompOp::Le => ordering.is_le(),
        CompOp::Gt => ordering.is_gt(),
        CompOp::Ge => ordering.is_ge(),
        CompOp::Eq | CompOp::Ne => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(program: Vec<Instruction>) -> Vm {
        let mut vm = Vm::new(HashMap::new(), Vec::new());
        vm.load(program).unwrap();
        vm.execute().unwrap();
        vm
    }

    #[test]
    fn emit_joins_in_program_order() {
        let vm = run(vec![
            Instruction::Emit("a".into()),
            Instruction::Emit("b".into()),
            Instruction::Halt,
        ]);
        assert_eq!(vm.output, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn comparison_pops_a_then_b_and_computes_a_op_b() {
        // push right (2) then left (1); EVAL2 pops a=1, b=2, computes 1 < 2
        let vm = {
            let mut vm = Vm::new(HashMap::new(), Vec::new());
            vm.load(vec![
                Instruction::Const(Value::Int(2)),
                Instruction::Const(Value::Int(1)),
                Instruction::Eval2(CompOp::Lt),
                Instruction::Set("result".into()),
                Instruction::Halt,
            ])
            .unwrap();
            vm.execute().unwrap();
            vm
        };
        assert_eq!(vm.env.get("result"), Some(&Value::Bool(true)));
    }

    #[test]
    fn indices_returns_zero_based_range() {
        let mut vm = Vm::new(HashMap::new(), Vec::new());
        vm.load(vec![
            Instruction::Const(Value::List(vec![Value::Int(9), Value::Int(9), Value::Int(9)])),
            Instruction::XCall(Builtin::Indices),
            Instruction::Set("idx".into()),
            Instruction::Halt,
        ])
        .unwrap();
        vm.execute().unwrap();
        assert_eq!(
            vm.env.get("idx"),
            Some(&Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn halt_stops_further_emission() {
        let vm = run(vec![
            Instruction::Halt,
            Instruction::Emit("never".into()),
        ]);
        assert!(vm.output.is_empty());
    }

    #[test]
    fn duplicate_labels_are_a_load_error() {
        let mut vm = Vm::new(HashMap::new(), Vec::new());
        let err = vm
            .load(vec![Instruction::Label("main".into())])
            .unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn unresolved_jump_is_a_load_error() {
        let mut vm = Vm::new(HashMap::new(), Vec::new());
        let err = vm.load(vec![Instruction::Jmp("nowhere".into())]).unwrap_err();
        assert!(err.message.contains("unresolved"));
    }

    #[test]
    fn stack_underflow_reports_pc_and_instruction() {
        let mut vm = Vm::new(HashMap::new(), Vec::new());
        vm.load(vec![Instruction::Set("x".into()), Instruction::Halt])
            .unwrap();
        let err = vm.execute().unwrap_err();
        assert_eq!(err.pc, 1); // past the implicit `main:` label at pc 0
        assert_eq!(err.kind, RuntimeErrorKind::StackUnderflow);
    }

    #[test]
    fn outfile_rejects_absolute_paths() {
        let mut env = HashMap::new();
        env.insert("__FILE__".to_string(), Value::Str("tpl/foo.py.template".into()));
        let mut vm = Vm::new(env, Vec::new());
        vm.load(vec![
            Instruction::Const(Value::Str("/etc/passwd".into())),
            Instruction::Outfile,
            Instruction::Halt,
        ])
        .unwrap();
        let err = vm.execute().unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::OutfileAbsolutePath(_)));
    }

    #[test]
    fn outfile_joins_under_template_directory() {
        let mut env = HashMap::new();
        env.insert("__FILE__".to_string(), Value::Str("tpl/foo.py.template".into()));
        let mut vm = Vm::new(env, Vec::new());
        vm.load(vec![
            Instruction::Const(Value::Str("out.py".into())),
            Instruction::Outfile,
            Instruction::Halt,
        ])
        .unwrap();
        vm.execute().unwrap();
        assert_eq!(vm.outfile.as_deref(), Some("tpl/out.py"));
    }

    #[test]
    fn foreach_restores_registers_after_the_loop() {
        // Mirrors the FOREACH lowering for a single-variable loop: save
        // R0..R2 (index, length, list), run a loop over a 3-item list, then
        // restore the registers to their pre-loop values.
        let mut vm = Vm::new(HashMap::new(), Vec::new());
        vm.registers[0] = Value::Str("sentinel0".into());
        vm.registers[1] = Value::Str("sentinel1".into());
        vm.registers[2] = Value::Str("sentinel2".into());

        let program = vec![
            Instruction::Push("R0".into()),
            Instruction::Push("R1".into()),
            Instruction::Push("R2".into()),
            Instruction::Const(0i64.into()),
            Instruction::Pop("R0".into()),
            Instruction::Const(Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
            Instruction::Dup,
            Instruction::XCall(Builtin::Len),
            Instruction::Pop("R1".into()),
            Instruction::Pop("R2".into()),
            Instruction::Label("loop".into()),
            Instruction::Push("R0".into()),
            Instruction::Push("R1".into()),
            Instruction::Eval2(CompOp::Le),
            Instruction::JmpIf("brk".into()),
            Instruction::GetIdx("R2".into(), "R0".into()),
            Instruction::Set("item".into()),
            Instruction::Add("R0".into(), 1),
            Instruction::Jmp("loop".into()),
            Instruction::Label("brk".into()),
            Instruction::Pop("R2".into()),
            Instruction::Pop("R1".into()),
            Instruction::Pop("R0".into()),
            Instruction::Halt,
        ];
        vm.load(program).unwrap();
        vm.execute().unwrap();

        assert_eq!(vm.env.get("item"), Some(&Value::Int(3)));
        assert_eq!(vm.registers[0], Value::Str("sentinel0".into()));
        assert_eq!(vm.registers[1], Value::Str("sentinel1".into()));
        assert_eq!(vm.registers[2], Value::Str("sentinel2".into()));
    }
}
