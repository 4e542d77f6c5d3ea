//! Calls handled by the flow space itself
//!
//! Some callees must not become `simple_call` operations: `__import__`
//! with constant arguments is resolved at construction time, `len` and
//! friends map to primitive operations, and a few host helpers are
//! answered directly.

use rustc_hash::FxHashMap;

use super::context::FlowContext;
use super::{Flow, FlowException, Signal};
use crate::error::FlowError;
use crate::model::{Builtin, ExcClass, HostObject, Value};

/// Handler for a special-cased callee. Receives the call's arguments.
pub type SpecialCaseFn = fn(&mut FlowContext<'_>, &[Value]) -> Flow<Value>;

/// Identity of a special-cased callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKey {
    Builtin(Builtin),
    /// A host procedure, by id
    Function(u32),
}

impl SpecialKey {
    pub fn of(callee: &HostObject) -> Option<SpecialKey> {
        match callee {
            HostObject::Builtin(b) => Some(SpecialKey::Builtin(*b)),
            HostObject::Function(f) => Some(SpecialKey::Function(f.id)),
            _ => None,
        }
    }
}

/// Registry of special-case handlers
#[derive(Clone)]
pub struct SpecialCases {
    handlers: FxHashMap<SpecialKey, SpecialCaseFn>,
}

impl std::fmt::Debug for SpecialCases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl Default for SpecialCases {
    fn default() -> Self {
        let mut cases = SpecialCases::empty();
        cases
            .register(SpecialKey::Builtin(Builtin::Import), sc_import)
            .register(SpecialKey::Builtin(Builtin::RUint), sc_r_uint)
            .register(SpecialKey::Builtin(Builtin::WeAreTranslated), sc_we_are_translated)
            .register(SpecialKey::Builtin(Builtin::Locals), sc_locals)
            .register(SpecialKey::Builtin(Builtin::Len), sc_len)
            .register(SpecialKey::Builtin(Builtin::Abs), sc_abs)
            .register(SpecialKey::Builtin(Builtin::GetAttr), sc_getattr);
        cases
    }
}

impl SpecialCases {
    /// A registry without the default handlers
    pub fn empty() -> Self {
        SpecialCases { handlers: FxHashMap::default() }
    }

    /// Add or replace the handler for `key`
    pub fn register(&mut self, key: SpecialKey, handler: SpecialCaseFn) -> &mut Self {
        self.handlers.insert(key, handler);
        self
    }

    pub fn get(&self, key: &SpecialKey) -> Option<SpecialCaseFn> {
        self.handlers.get(key).copied()
    }

    pub fn contains(&self, key: &SpecialKey) -> bool {
        self.handlers.contains_key(key)
    }
}

fn arity_error(name: &str, expected: &str) -> Signal {
    Signal::Raise(FlowException::constant(
        ExcClass::TypeError,
        &format!("{}() takes {}", name, expected),
    ))
}

fn sc_import(ctx: &mut FlowContext<'_>, args: &[Value]) -> Flow<Value> {
    if args.is_empty() || args.len() > 5 {
        return Err(arity_error("__import__", "1 to 5 arguments"));
    }
    if !args.iter().all(|a| a.foldable().is_some()) {
        let message = "__import__ with non-constant arguments".to_string();
        return Err(FlowError::Unsupported(message).into());
    }
    match &args[0] {
        Value::Const(HostObject::Str(name)) => ctx.import_name(name),
        _ => Err(arity_error("__import__", "a module name string")),
    }
}

fn sc_r_uint(ctx: &mut FlowContext<'_>, args: &[Value]) -> Flow<Value> {
    let [arg] = args else {
        return Err(arity_error("r_uint", "exactly one argument"));
    };
    match arg.foldable() {
        Some(HostObject::Int(i)) => Ok(Value::Const(HostObject::UInt(*i as u64))),
        Some(HostObject::UInt(u)) => Ok(Value::Const(HostObject::UInt(*u))),
        _ => {
            let callee = Value::Const(HostObject::Builtin(Builtin::RUint));
            ctx.do_operation("simple_call", vec![callee, arg.clone()])
        }
    }
}

fn sc_we_are_translated(_ctx: &mut FlowContext<'_>, _args: &[Value]) -> Flow<Value> {
    Ok(Value::Const(HostObject::Bool(true)))
}

fn sc_locals(_ctx: &mut FlowContext<'_>, _args: &[Value]) -> Flow<Value> {
    Err(FlowError::Unsupported("locals() cannot be translated".to_string()).into())
}

fn sc_len(ctx: &mut FlowContext<'_>, args: &[Value]) -> Flow<Value> {
    match args {
        [arg] => ctx.perform("len", vec![arg.clone()]),
        _ => Err(arity_error("len", "exactly one argument")),
    }
}

fn sc_abs(ctx: &mut FlowContext<'_>, args: &[Value]) -> Flow<Value> {
    match args {
        [arg] => ctx.perform("abs", vec![arg.clone()]),
        _ => Err(arity_error("abs", "exactly one argument")),
    }
}

fn sc_getattr(ctx: &mut FlowContext<'_>, args: &[Value]) -> Flow<Value> {
    match args {
        [obj, name] => ctx.perform("getattr", vec![obj.clone(), name.clone()]),
        _ => Err(arity_error("getattr", "exactly two arguments")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let cases = SpecialCases::default();
        assert!(cases.contains(&SpecialKey::Builtin(Builtin::Import)));
        assert!(cases.contains(&SpecialKey::Builtin(Builtin::Locals)));
        assert!(!cases.contains(&SpecialKey::Builtin(Builtin::Int)));
        assert!(!SpecialCases::empty().contains(&SpecialKey::Builtin(Builtin::Len)));
    }

    #[test]
    fn test_key_of_callee() {
        let helper = HostObject::function(7, "helper");
        assert_eq!(SpecialKey::of(&helper), Some(SpecialKey::Function(7)));
        assert_eq!(SpecialKey::of(&HostObject::Int(1)), None);
    }
}
