//! Procedures and their namespaces
//!
//! A `HostFunction` bundles a code object with the globals, closure cells and
//! defaults it was defined with.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::bytecode::Code;
use crate::model::{Builtin, ExcClass, HostObject, Module};

/// Global namespace of a procedure, plus the modules it may import
#[derive(Debug, Clone, Default)]
pub struct Globals {
    names: FxHashMap<String, HostObject>,
    modules: FxHashMap<String, Rc<Module>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: HostObject) -> &mut Self {
        self.names.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&HostObject> {
        self.names.get(name)
    }

    /// Make `module` importable under its own name
    pub fn add_module(&mut self, module: Module) -> Rc<Module> {
        let module = Rc::new(module);
        self.modules.insert(module.name.to_string(), module.clone());
        module
    }

    pub fn module(&self, name: &str) -> Option<&Rc<Module>> {
        self.modules.get(name)
    }
}

/// A procedure to build a flow graph for
pub struct HostFunction {
    pub name: String,
    /// Owning class, for methods
    pub class_name: Option<String>,
    pub code: Rc<dyn Code>,
    pub globals: Rc<Globals>,
    /// Contents of the cells received through the closure
    pub closure: Vec<HostObject>,
    pub defaults: Vec<HostObject>,
}

impl HostFunction {
    pub fn new(name: &str, code: impl Code + 'static, globals: Globals) -> Self {
        HostFunction {
            name: name.to_string(),
            class_name: None,
            code: Rc::new(code),
            globals: Rc::new(globals),
            closure: Vec::new(),
            defaults: Vec::new(),
        }
    }

    pub fn with_closure(mut self, closure: Vec<HostObject>) -> Self {
        self.closure = closure;
        self
    }

    pub fn with_class(mut self, class_name: &str) -> Self {
        self.class_name = Some(class_name.to_string());
        self
    }

    pub fn with_defaults(mut self, defaults: Vec<HostObject>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Name used for the graph: `Class.name` for methods, with characters
    /// that are awkward in identifiers replaced by `_`
    pub fn graph_name(&self) -> String {
        let name = match &self.class_name {
            Some(class) => format!("{}.{}", class, self.name),
            None => self.name.clone(),
        };
        name.chars().map(|c| if "<>&!".contains(c) { '_' } else { c }).collect()
    }
}

thread_local! {
    static BUILTINS: FxHashMap<&'static str, HostObject> = {
        let mut map = FxHashMap::default();
        map.insert("None", HostObject::None);
        map.insert("True", HostObject::Bool(true));
        map.insert("False", HostObject::Bool(false));
        for cls in ExcClass::ALL {
            map.insert(cls.name(), HostObject::ExcClass(cls));
        }
        for builtin in [
            Builtin::Len,
            Builtin::Abs,
            Builtin::Int,
            Builtin::Chr,
            Builtin::IsInstance,
            Builtin::Type,
            Builtin::GetAttr,
            Builtin::Import,
            Builtin::Locals,
        ] {
            map.insert(builtin.name(), HostObject::Builtin(builtin));
        }
        map
    };
}

/// Look up `name` in the builtin namespace
pub fn lookup_builtin(name: &str) -> Option<HostObject> {
    BUILTINS.with(|builtins| builtins.get(name).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeBuilder;

    #[test]
    fn test_graph_name_sanitized() {
        let f = HostFunction::new("<lambda>", CodeBuilder::new(&[]).finish(), Globals::new());
        assert_eq!(f.graph_name(), "_lambda_");
        let m = HostFunction::new("run!", CodeBuilder::new(&[]).finish(), Globals::new())
            .with_class("Task");
        assert_eq!(m.graph_name(), "Task.run_");
    }

    #[test]
    fn test_builtins() {
        assert_eq!(lookup_builtin("len"), Some(HostObject::Builtin(Builtin::Len)));
        assert_eq!(lookup_builtin("KeyError"), Some(HostObject::ExcClass(ExcClass::KeyError)));
        assert_eq!(lookup_builtin("we_are_translated"), None);
        assert_eq!(lookup_builtin("nonexistent"), None);
    }

    #[test]
    fn test_globals_modules() {
        let mut globals = Globals::new();
        globals.set("limit", HostObject::Int(10));
        globals.add_module(Module::new("os").with_attr("sep", HostObject::str("/")));
        assert_eq!(globals.get("limit"), Some(&HostObject::Int(10)));
        assert!(globals.module("os").is_some());
        assert!(globals.module("sys").is_none());
    }
}
