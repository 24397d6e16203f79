//! Tree-walking interpreter over the compiled IR
//!
//! Compute units are consumed by the `Checkpoint` statements the compiler
//! placed at the head of every block, by the host calls (storage, logging,
//! context) and library capabilities, and by the size of every value the
//! interpreter copies or builds.

use sandlot_compiler::ir::{CmpOp, Expr, Function, Stmt};
use sandlot_compiler::{Annotation, Artifact, FunctionId};
use sandlot_environment::{Capability, CapabilityKind, Environment};
use sandlot_program_runtime::{ExecResult, ExecutionError, InvokeContext};
use sandlot_syscalls::{context, logging, storage};
use sandlot_types::{Value, MAX_COLLECTION_LEN, MAX_VALUE_DEPTH};

use crate::ContractRegistry;

/// How a block finished
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Locals of one active function
struct Frame<'f> {
    artifact: &'f Artifact,
    locals: Vec<Value>,
}

impl Frame<'_> {
    fn local(&self, id: usize) -> ExecResult<&Value> {
        self.locals
            .get(id)
            .ok_or_else(|| ExecutionError::fault(format!("invalid local {id}")))
    }

    fn local_mut(&mut self, id: usize) -> ExecResult<&mut Value> {
        self.locals
            .get_mut(id)
            .ok_or_else(|| ExecutionError::fault(format!("invalid local {id}")))
    }
}

pub(crate) struct Machine<'a> {
    pub(crate) ctx: InvokeContext<'a>,
    stdlib: &'static Environment,
    contracts: &'a dyn ContractRegistry,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(ctx: InvokeContext<'a>, stdlib: &'static Environment, contracts: &'a dyn ContractRegistry) -> Self {
        Self {
            ctx,
            stdlib,
            contracts,
        }
    }

    /// Refuse artifacts built against another capability table
    pub(crate) fn check_version(&self, artifact: &Artifact) -> ExecResult<()> {
        if artifact.stdlib_version != self.stdlib.version() {
            return Err(ExecutionError::LibraryVersionMismatch {
                contract: artifact.name.clone(),
                artifact: artifact.stdlib_version,
                runtime: self.stdlib.version(),
            });
        }
        Ok(())
    }

    /// Run function `id` of `artifact` in a new frame
    pub(crate) fn call_function(
        &mut self,
        artifact: &Artifact,
        id: FunctionId,
        args: Vec<Value>,
        caller: String,
    ) -> ExecResult<Value> {
        let function = artifact
            .functions
            .get(id)
            .ok_or_else(|| ExecutionError::fault(format!("invalid function id {id}")))?;

        self.ctx.push_frame(artifact.name.clone(), caller)?;
        let result = self.run(artifact, function, args);
        self.ctx.pop_frame();
        result
    }

    fn run(&mut self, artifact: &Artifact, function: &Function, args: Vec<Value>) -> ExecResult<Value> {
        if args.len() != function.params.len() {
            return Err(ExecutionError::fault(format!(
                "{}() takes {} arguments but {} were given",
                function.name,
                function.params.len(),
                args.len()
            )));
        }

        let mut locals = vec![Value::None; function.locals.len().max(args.len())];
        for ((slot, param), arg) in locals.iter_mut().zip(&function.params).zip(args) {
            *slot = match param.annotation {
                Some(annotation) => coerce(&function.name, &param.name, annotation, arg)?,
                None => arg,
            };
        }

        let mut frame = Frame { artifact, locals };
        match self.block(&mut frame, &function.body)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn block(&mut self, frame: &mut Frame<'_>, body: &[Stmt]) -> ExecResult<Flow> {
        for stmt in body {
            match self.stmt(frame, stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&mut self, frame: &mut Frame<'_>, stmt: &Stmt) -> ExecResult<Flow> {
        match stmt {
            Stmt::Checkpoint(cost) => self.ctx.consume_checked(*cost)?,
            Stmt::Assign { local, value } => {
                let value = self.eval(frame, value)?;
                *frame.local_mut(*local)? = value;
            }
            Stmt::SetIndex { local, index, value } => {
                let index = self.eval(frame, index)?;
                let value = self.eval(frame, value)?;
                set_index(frame.local_mut(*local)?, index, value)?;
            }
            Stmt::StorageWrite { slot, subkey, value, .. } => {
                let subkey = self.eval_all(frame, subkey)?;
                let value = self.eval(frame, value)?;
                storage::storage_write(&mut self.ctx, &frame.artifact.manifest, *slot, &subkey, value)?;
            }
            Stmt::StorageUpdate {
                slot, subkey, op, value, ..
            } => {
                let subkey = self.eval_all(frame, subkey)?;
                let current = storage::storage_read(&mut self.ctx, &frame.artifact.manifest, *slot, &subkey)?;
                let rhs = self.eval(frame, value)?;
                let updated = current.binary(*op, &rhs)?;
                self.ctx.charge_value(&updated)?;
                storage::storage_write(&mut self.ctx, &frame.artifact.manifest, *slot, &subkey, updated)?;
            }
            Stmt::Expr(expr) => {
                self.eval(frame, expr)?;
            }
            Stmt::If { cond, then, orelse } => {
                let branch = if self.eval(frame, cond)?.is_truthy() { then } else { orelse };
                return self.block(frame, branch);
            }
            Stmt::ForRange {
                local,
                start,
                stop,
                step,
                body,
            } => {
                let start = range_bound(self.eval(frame, start)?)?;
                let stop = range_bound(self.eval(frame, stop)?)?;
                let step = range_bound(self.eval(frame, step)?)?;
                if step == 0 {
                    return Err(ExecutionError::fault("range() arg 3 must not be zero"));
                }

                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    *frame.local_mut(*local)? = Value::Int(i);
                    match self.block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    match i.checked_add(step) {
                        Some(next) => i = next,
                        None => break,
                    }
                }
            }
            Stmt::ForEach { local, iter, body } => {
                let items = iterate(self.eval(frame, iter)?)?;
                for item in items {
                    *frame.local_mut(*local)? = item;
                    match self.block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Assert { cond, message, span } => {
                if !self.eval(frame, cond)?.is_truthy() {
                    let message = match message {
                        Some(expr) => self.eval(frame, expr)?.render()?,
                        None => span.to_string(),
                    };
                    return Err(ExecutionError::AssertionFailed(message));
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn eval_all(&mut self, frame: &mut Frame<'_>, exprs: &[Expr]) -> ExecResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(frame, e)).collect()
    }

    fn eval(&mut self, frame: &mut Frame<'_>, expr: &Expr) -> ExecResult<Value> {
        let value = match expr {
            Expr::Const(value) => {
                self.ctx.charge_value(value)?;
                value.clone()
            }
            Expr::Local(id) => {
                let local = frame.local(*id)?;
                self.ctx.charge_value(local)?;
                local.clone()
            }
            Expr::List(items) => {
                let list = Value::list(self.eval_all(frame, items)?)?;
                self.ctx.charge_value(&list)?;
                list
            }
            Expr::Dict(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(frame, key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(ExecutionError::fault(format!(
                                "dict keys must be str, not '{}'",
                                other.type_name()
                            )))
                        }
                    };
                    let value = self.eval(frame, value)?;
                    map.insert(key, value);
                }
                let map = Value::map(map)?;
                self.ctx.charge_value(&map)?;
                map
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                let result = lhs.binary(*op, &rhs)?;
                self.ctx.charge_value(&result)?;
                result
            }
            Expr::Neg(operand) => self.eval(frame, operand)?.negate()?,
            Expr::Plus(operand) => match self.eval(frame, operand)? {
                v @ (Value::Int(_) | Value::Decimal(_)) => v,
                other => {
                    return Err(ExecutionError::fault(format!(
                        "bad operand type for unary +: '{}'",
                        other.type_name()
                    )))
                }
            },
            Expr::Not(operand) => Value::Bool(!self.eval(frame, operand)?.is_truthy()),
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                Value::Bool(compare(*op, &lhs, &rhs)?)
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(frame, lhs)?;
                if lhs.is_truthy() {
                    self.eval(frame, rhs)?
                } else {
                    lhs
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(frame, lhs)?;
                if lhs.is_truthy() {
                    lhs
                } else {
                    self.eval(frame, rhs)?
                }
            }
            Expr::IfExp { cond, then, orelse } => {
                if self.eval(frame, cond)?.is_truthy() {
                    self.eval(frame, then)?
                } else {
                    self.eval(frame, orelse)?
                }
            }
            Expr::Index { value, index } => {
                let value = self.eval(frame, value)?;
                let index = self.eval(frame, index)?;
                let item = value.index(&index)?;
                self.ctx.charge_value(&item)?;
                item
            }
            Expr::StorageRead { slot, subkey } => {
                let subkey = self.eval_all(frame, subkey)?;
                storage::storage_read(&mut self.ctx, &frame.artifact.manifest, *slot, &subkey)?
            }
            Expr::Context(field) => context::context_value(&mut self.ctx, *field)?,
            Expr::CallLocal { function, args } => {
                let args = self.eval_all(frame, args)?;
                // Private calls keep the caller of the enclosing frame
                let caller = self.ctx.current_frame()?.caller.clone();
                self.call_function(frame.artifact, *function, args, caller)?
            }
            Expr::CallContract {
                import, function, args, ..
            } => {
                let args = self.eval_all(frame, args)?;
                self.call_contract(frame.artifact, *import, function, args)?
            }
            Expr::Builtin { name, args } => {
                let args = self.eval_all(frame, args)?;
                let capability = self.capability(name)?;
                self.ctx.consume_checked(capability.cost(&args))?;
                let result = capability.invoke(&args).map_err(ExecutionError::fault)?;
                self.ctx.charge_value(&result)?;
                result
            }
            Expr::Print(args) => {
                let args = self.eval_all(frame, args)?;
                let line = args.iter().map(Value::render).collect::<Result<Vec<_>, _>>()?.join(" ");
                logging::log(&mut self.ctx, line)?;
                Value::None
            }
        };
        Ok(value)
    }

    fn call_contract(&mut self, artifact: &Artifact, import: usize, function: &str, args: Vec<Value>) -> ExecResult<Value> {
        let name = artifact
            .imports
            .get(import)
            .ok_or_else(|| ExecutionError::fault(format!("invalid import {import}")))?;
        let contracts = self.contracts;
        let callee = contracts
            .artifact(name)
            .ok_or_else(|| ExecutionError::fault(format!("contract '{name}' is not deployed")))?;
        self.check_version(callee)?;
        let id = callee.export_id(function).ok_or_else(|| ExecutionError::UnknownFunction {
            contract: name.clone(),
            function: function.to_string(),
        })?;

        log::trace!("{} -> {}.{}", artifact.name, name, function);
        self.call_function(callee, id, args, artifact.name.clone())
    }

    fn capability(&self, name: &str) -> ExecResult<&'static Capability> {
        let stdlib: &'static Environment = self.stdlib;
        let capability = match name.split_once('.') {
            Some((namespace, member)) => stdlib.member(namespace, member),
            None => stdlib.function(name),
        };
        match capability {
            Some(capability) if matches!(capability.kind, CapabilityKind::Native(_)) => Ok(capability),
            _ => Err(ExecutionError::fault(format!("'{name}' is not a callable library function"))),
        }
    }
}

fn coerce(function: &str, param: &str, annotation: Annotation, value: Value) -> ExecResult<Value> {
    annotation.coerce(value).map_err(|value| {
        ExecutionError::fault(format!(
            "argument '{param}' of {function}() must be {}, got '{}'",
            annotation.name(),
            value.type_name()
        ))
    })
}

fn range_bound(value: Value) -> ExecResult<i128> {
    match value {
        Value::Int(i) => Ok(i),
        other => Err(ExecutionError::fault(format!(
            "range() arguments must be int, not '{}'",
            other.type_name()
        ))),
    }
}

fn iterate(value: Value) -> ExecResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Map(entries) => Ok(entries.into_keys().map(Value::Str).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(ExecutionError::fault(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> ExecResult<bool> {
    use std::cmp::Ordering;

    Ok(match op {
        CmpOp::Eq => lhs.loose_eq(rhs),
        CmpOp::NotEq => !lhs.loose_eq(rhs),
        CmpOp::Lt => lhs.compare(rhs)? == Ordering::Less,
        CmpOp::Le => lhs.compare(rhs)? != Ordering::Greater,
        CmpOp::Gt => lhs.compare(rhs)? == Ordering::Greater,
        CmpOp::Ge => lhs.compare(rhs)? != Ordering::Less,
        CmpOp::In => rhs.contains(lhs)?,
        CmpOp::NotIn => !rhs.contains(lhs)?,
        CmpOp::Is => lhs == rhs,
        CmpOp::IsNot => lhs != rhs,
    })
}

fn set_index(container: &mut Value, index: Value, value: Value) -> ExecResult<()> {
    if value.depth() >= MAX_VALUE_DEPTH {
        return Err(ExecutionError::fault(format!("value nested deeper than {MAX_VALUE_DEPTH} levels")));
    }
    match (container, index) {
        (Value::List(items), Value::Int(i)) => {
            let len = items.len();
            let resolved = if i < 0 {
                i128::try_from(len).ok().and_then(|n| n.checked_add(i))
            } else {
                Some(i)
            };
            let slot = resolved
                .and_then(|r| usize::try_from(r).ok())
                .and_then(|r| items.get_mut(r))
                .ok_or_else(|| ExecutionError::fault(format!("list assignment index {i} out of range")))?;
            *slot = value;
        }
        (Value::Map(entries), Value::Str(key)) => {
            if !entries.contains_key(&key) && entries.len() >= MAX_COLLECTION_LEN {
                return Err(ExecutionError::fault("dict exceeds the maximum collection size"));
            }
            entries.insert(key, value);
        }
        (container, index) => {
            return Err(ExecutionError::fault(format!(
                "'{}' does not support item assignment with '{}' index",
                container.type_name(),
                index.type_name()
            )))
        }
    }
    Ok(())
}
