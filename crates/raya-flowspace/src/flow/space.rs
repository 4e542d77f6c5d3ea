//! The evaluator
//!
//! Abstract implementations of the operations the frame needs. Each one
//! either folds to a constant, records an operation, or forks the block
//! on an outcome that cannot be decided at construction time.

use tracing::{debug, warn};

use super::context::FlowContext;
use super::operation::{self, Folding};
use super::specialcase::SpecialKey;
use super::{Flow, FlowException, Signal};
use crate::error::FlowError;
use crate::host::lookup_builtin;
use crate::model::{BlockKind, Builtin, ExcClass, ExitSwitch, HostObject, Outcome, Value};

impl FlowContext<'_> {
    /// Record `name` without considering exceptions
    pub fn do_operation(&mut self, name: &'static str, args: Vec<Value>) -> Flow<Value> {
        self.append(name, args).map(Value::Var)
    }

    /// Record `name`, then fork on the exceptions it may raise
    pub fn do_operation_with_implicit_exceptions(
        &mut self,
        name: &'static str,
        args: Vec<Value>,
    ) -> Flow<Value> {
        let result = self.do_operation(name, args)?;
        self.handle_implicit_exceptions(operation::implicit_exceptions(name))?;
        Ok(result)
    }

    /// Fork on `classes` after the last recorded operation; on the
    /// exceptional paths the walk continues with an implicit raise
    pub fn handle_implicit_exceptions(&mut self, classes: &[ExcClass]) -> Flow<()> {
        if classes.is_empty() {
            return Ok(());
        }
        match self.guessexception(classes)? {
            None => Ok(()),
            Some(exc) => Err(Signal::Raise(exc)),
        }
    }

    /// Apply a primitive operation: fold it when every operand is a
    /// foldable constant, record it otherwise
    pub fn perform(&mut self, name: &'static str, args: Vec<Value>) -> Flow<Value> {
        let spec = match operation::lookup(name) {
            Some(spec) => spec,
            None => panic!("unknown primitive operation {}", name),
        };
        assert_eq!(spec.arity, args.len(), "wrong number of operands for {}", name);

        if let Some(fold) = spec.fold.filter(|_| self.config.constant_folding) {
            let consts: Option<Vec<HostObject>> =
                args.iter().map(|a| a.foldable().cloned()).collect();
            if let Some(consts) = consts {
                match fold(&consts) {
                    Ok(result) => return Ok(Value::Const(result)),
                    Err(Folding::Decline) => {}
                    Err(Folding::Raise(exc, message)) => {
                        if spec.fatal_on_fold_failure || self.config.strict_folding {
                            return Err(FlowError::AlwaysRaises { exc, message }.into());
                        }
                        warn!(
                            graph = %self.graph.name,
                            op = name,
                            %exc,
                            "constant operation raises; recording it"
                        );
                    }
                }
            }
        }
        self.do_operation_with_implicit_exceptions(name, args)
    }

    /// Truth value of `w`, forking when it is not a constant
    pub fn is_true(&mut self, w: Value) -> Flow<bool> {
        if let Some(truth) = w.foldable().and_then(HostObject::truth) {
            return Ok(truth);
        }
        let cond = self.do_operation("is_true", vec![w])?;
        self.guessbool(cond)
    }

    /// Fork on a boolean condition
    pub fn guessbool(&mut self, cond: Value) -> Flow<bool> {
        match self.fork(ExitSwitch::Value(cond), &[Outcome::Bool(false), Outcome::Bool(true)])? {
            Outcome::Bool(b) => Ok(b),
            other => panic!("boolean fork resolved to {:?}", other),
        }
    }

    /// Fork on whether the last operation raised one of `classes`
    pub fn guessexception(&mut self, classes: &[ExcClass]) -> Flow<Option<FlowException>> {
        let mut cases = Vec::with_capacity(classes.len() + 1);
        cases.push(Outcome::NoException);
        cases.extend(classes.iter().map(|&cls| Outcome::Exception(cls)));
        match self.fork(ExitSwitch::LastException, &cases)? {
            Outcome::NoException => Ok(None),
            Outcome::Exception(_) => {
                let egg = match self.recorder.current_block() {
                    Some(egg) => self.graph.block(egg),
                    None => panic!("exception outcome without a block"),
                };
                let n = egg.inputs.len();
                let w_type = match &egg.kind {
                    BlockKind::Secondary { last_exception: Some(Value::Const(c)), .. } => {
                        Value::Const(c.clone())
                    }
                    _ => Value::Var(egg.inputs[n - 2]),
                };
                let w_value = Value::Var(egg.inputs[n - 1]);
                Ok(Some(FlowException { w_type, w_value, implicit: true }))
            }
            other => panic!("exception fork resolved to {:?}", other),
        }
    }

    pub fn newtuple(&mut self, items: Vec<Value>) -> Flow<Value> {
        let consts: Option<Vec<HostObject>> = items.iter().map(|a| a.foldable().cloned()).collect();
        match consts {
            Some(consts) => Ok(Value::Const(HostObject::tuple(consts))),
            None => self.do_operation("newtuple", items),
        }
    }

    pub fn newlist(&mut self, items: Vec<Value>) -> Flow<Value> {
        self.do_operation("newlist", items)
    }

    /// Resolve a global name: the procedure's globals, then builtins
    pub fn find_global(&mut self, name: &str) -> Flow<Value> {
        if let Some(value) = self.func.globals.get(name) {
            return Ok(Value::Const(value.clone()));
        }
        match lookup_builtin(name) {
            Some(value) => Ok(Value::Const(value)),
            None => Err(FlowError::UndefinedGlobal(name.to_string()).into()),
        }
    }

    pub fn getattr(&mut self, obj: Value, name: &str) -> Flow<Value> {
        self.perform("getattr", vec![obj, Value::Const(HostObject::str(name))])
    }

    pub fn setattr(&mut self, obj: Value, name: &str, value: Value) -> Flow<()> {
        self.perform("setattr", vec![obj, Value::Const(HostObject::str(name)), value])?;
        Ok(())
    }

    pub fn setitem(&mut self, obj: Value, key: Value, value: Value) -> Flow<()> {
        self.perform("setitem", vec![obj, key, value])?;
        Ok(())
    }

    /// Import a module known to the procedure's globals
    pub fn import_name(&mut self, name: &str) -> Flow<Value> {
        match self.func.globals.module(name) {
            Some(module) => Ok(Value::Const(HostObject::Module(module.clone()))),
            None => Err(Signal::Raise(FlowException::constant(
                ExcClass::ImportError,
                &format!("No module named {}", name),
            ))),
        }
    }

    /// `from module import name`
    pub fn import_from(&mut self, module: Value, name: &str) -> Flow<Value> {
        let cannot_import = || {
            let message = format!("cannot import name '{}'", name);
            Signal::Raise(FlowException::constant(ExcClass::ImportError, &message))
        };
        match self.getattr(module, name) {
            Err(Signal::Fatal(FlowError::AlwaysRaises { exc: ExcClass::AttributeError, .. })) => {
                Err(cannot_import())
            }
            Err(Signal::Raise(e)) if e.matches(ExcClass::AttributeError) => Err(cannot_import()),
            other => other,
        }
    }

    pub fn iter(&mut self, w: Value) -> Flow<Value> {
        self.perform("iter", vec![w])
    }

    /// Advance an iterator. Exhaustion is an explicit `StopIteration` so
    /// that `FOR_ITER` can catch it.
    pub fn next(&mut self, it: Value) -> Flow<Value> {
        let result = self.do_operation("next", vec![it])?;
        match self.guessexception(&[ExcClass::StopIteration, ExcClass::RuntimeError])? {
            None => Ok(result),
            Some(mut exc) => {
                if exc.matches(ExcClass::StopIteration) {
                    exc.implicit = false;
                }
                Err(Signal::Raise(exc))
            }
        }
    }

    pub fn call_function(&mut self, callee: Value, args: Vec<Value>) -> Flow<Value> {
        let special_cases = self.special_cases;
        let handler =
            callee.as_const().and_then(SpecialKey::of).and_then(|key| special_cases.get(&key));
        if let Some(handler) = handler {
            return handler(self, &args);
        }
        let implicit: &[ExcClass] = match callee.as_const() {
            Some(HostObject::Builtin(b)) => b.implicit_exceptions(),
            Some(HostObject::ExcClass(_)) => &[],
            _ => &[ExcClass::Exception],
        };
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(callee);
        call_args.extend(args);
        let result = self.do_operation("simple_call", call_args)?;
        self.handle_implicit_exceptions(implicit)?;
        Ok(result)
    }

    /// Whether the exception type `w_type` is caught by the guard `w_check`
    pub fn exception_match(&mut self, w_type: Value, w_check: Value) -> Flow<bool> {
        let classes: Vec<ExcClass> = match w_check.as_const() {
            Some(HostObject::ExcClass(cls)) => vec![*cls],
            Some(HostObject::Tuple(items)) => {
                let classes: Option<Vec<ExcClass>> =
                    items.iter().map(HostObject::as_exc_class).collect();
                classes.ok_or(FlowError::NonConstantGuard)?
            }
            _ => return Err(FlowError::NonConstantGuard.into()),
        };
        let refused = classes
            .iter()
            .find(|&&c| matches!(c, ExcClass::AssertionError | ExcClass::NotImplementedError));
        if let Some(&cls) = refused {
            return Err(FlowError::InvalidCatch(cls).into());
        }
        let matched = self.perform("issubtype", vec![w_type, w_check])?;
        self.is_true(matched)
    }

    /// Split `w` into exactly `n` items
    pub fn unpack_sequence(&mut self, w: Value, n: usize) -> Flow<Vec<Value>> {
        let wrong_length = |got: usize| {
            Signal::Raise(FlowException::constant(
                ExcClass::ValueError,
                &format!("expected {} values to unpack, got {}", n, got),
            ))
        };
        match w.foldable() {
            Some(HostObject::Tuple(items)) => {
                if items.len() != n {
                    return Err(wrong_length(items.len()));
                }
                Ok(items.iter().cloned().map(Value::Const).collect())
            }
            Some(HostObject::Str(s)) => {
                let chars: Vec<Value> =
                    s.chars().map(|c| Value::Const(HostObject::str(&c.to_string()))).collect();
                if chars.len() != n {
                    return Err(wrong_length(chars.len()));
                }
                Ok(chars)
            }
            Some(other) => Err(FlowError::NotUnpackable(other.to_string()).into()),
            None => {
                let len = self.perform("len", vec![w.clone()])?;
                let same = self.perform("eq", vec![len, Value::Const(HostObject::Int(n as i64))])?;
                if !self.is_true(same)? {
                    return Err(Signal::Raise(FlowException::constant(
                        ExcClass::ValueError,
                        &format!("expected {} values to unpack", n),
                    )));
                }
                (0..n)
                    .map(|i| {
                        let index = Value::Const(HostObject::Int(i as i64));
                        self.do_operation("getitem", vec![w.clone(), index])
                    })
                    .collect()
            }
        }
    }

    /// Normalize the operand of `raise` into an exception
    pub fn exception_from(&mut self, w: Value) -> Flow<FlowException> {
        match w.foldable() {
            Some(HostObject::ExcClass(cls)) => Ok(FlowException::constant(*cls, "")),
            Some(HostObject::ExcValue(cls, _)) => {
                let w_type = Value::Const(HostObject::ExcClass(*cls));
                Ok(FlowException { w_type, w_value: w.clone(), implicit: false })
            }
            Some(other) => {
                debug!(value = %other, "raising a non-exception constant");
                Ok(FlowException::constant(
                    ExcClass::TypeError,
                    &format!(
                        "exceptions must derive from BaseException, not {}",
                        other.type_name()
                    ),
                ))
            }
            None => {
                // A class is instantiated with no arguments
                let is_class = self.do_operation(
                    "simple_call",
                    vec![
                        Value::Const(HostObject::Builtin(Builtin::IsInstance)),
                        w.clone(),
                        Value::Const(HostObject::Builtin(Builtin::Type)),
                    ],
                )?;
                let w_value = if self.guessbool(is_class)? {
                    self.call_function(w, Vec::new())?
                } else {
                    w
                };
                let w_type = self.perform("type", vec![w_value.clone()])?;
                Ok(FlowException { w_type, w_value, implicit: false })
            }
        }
    }
}
