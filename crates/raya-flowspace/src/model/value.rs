//! Host objects
//!
//! The payloads a `Constant` can carry. These are the values the flow space
//! knows statically: literals from the constant pool, globals, builtins and
//! the results of constant folding.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

/// Builtin exception classes, arranged in a single-inheritance hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcClass {
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    AttributeError,
    NameError,
    ImportError,
    StopIteration,
    RuntimeError,
    AssertionError,
    NotImplementedError,
}

impl ExcClass {
    /// Every builtin exception class, root first
    pub const ALL: [ExcClass; 16] = [
        ExcClass::Exception,
        ExcClass::ArithmeticError,
        ExcClass::ZeroDivisionError,
        ExcClass::OverflowError,
        ExcClass::LookupError,
        ExcClass::IndexError,
        ExcClass::KeyError,
        ExcClass::ValueError,
        ExcClass::TypeError,
        ExcClass::AttributeError,
        ExcClass::NameError,
        ExcClass::ImportError,
        ExcClass::StopIteration,
        ExcClass::RuntimeError,
        ExcClass::AssertionError,
        ExcClass::NotImplementedError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcClass::Exception => "Exception",
            ExcClass::ArithmeticError => "ArithmeticError",
            ExcClass::ZeroDivisionError => "ZeroDivisionError",
            ExcClass::OverflowError => "OverflowError",
            ExcClass::LookupError => "LookupError",
            ExcClass::IndexError => "IndexError",
            ExcClass::KeyError => "KeyError",
            ExcClass::ValueError => "ValueError",
            ExcClass::TypeError => "TypeError",
            ExcClass::AttributeError => "AttributeError",
            ExcClass::NameError => "NameError",
            ExcClass::ImportError => "ImportError",
            ExcClass::StopIteration => "StopIteration",
            ExcClass::RuntimeError => "RuntimeError",
            ExcClass::AssertionError => "AssertionError",
            ExcClass::NotImplementedError => "NotImplementedError",
        }
    }

    /// Direct base class, `None` for the root
    pub fn base(self) -> Option<ExcClass> {
        match self {
            ExcClass::Exception => None,
            ExcClass::ZeroDivisionError | ExcClass::OverflowError => {
                Some(ExcClass::ArithmeticError)
            }
            ExcClass::IndexError | ExcClass::KeyError => Some(ExcClass::LookupError),
            ExcClass::NotImplementedError => Some(ExcClass::RuntimeError),
            _ => Some(ExcClass::Exception),
        }
    }

    /// `issubclass(self, other)`
    pub fn is_subclass(self, other: ExcClass) -> bool {
        let mut cls = Some(self);
        while let Some(c) = cls {
            if c == other {
                return true;
            }
            cls = c.base();
        }
        false
    }
}

impl fmt::Display for ExcClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Well-known callables, compared by identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len,
    Abs,
    Int,
    Chr,
    IsInstance,
    Type,
    GetAttr,
    Import,
    Locals,
    RUint,
    WeAreTranslated,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Abs => "abs",
            Builtin::Int => "int",
            Builtin::Chr => "chr",
            Builtin::IsInstance => "isinstance",
            Builtin::Type => "type",
            Builtin::GetAttr => "getattr",
            Builtin::Import => "__import__",
            Builtin::Locals => "locals",
            Builtin::RUint => "r_uint",
            Builtin::WeAreTranslated => "we_are_translated",
        }
    }

    /// Exceptions a call to this builtin may raise without it being visible
    /// in the bytecode
    pub fn implicit_exceptions(self) -> &'static [ExcClass] {
        match self {
            Builtin::Int | Builtin::Chr => &[ExcClass::ValueError],
            _ => &[],
        }
    }
}

/// A user-level callable known only by identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncRef {
    pub id: u32,
    pub name: Rc<str>,
}

/// An importable namespace
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: Rc<str>,
    pub attrs: FxHashMap<String, HostObject>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module { name: name.into(), attrs: FxHashMap::default() }
    }

    pub fn with_attr(mut self, name: &str, value: HostObject) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }
}

/// A statically known host value
#[derive(Debug, Clone, PartialEq)]
pub enum HostObject {
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(Rc<str>),
    Tuple(Rc<[HostObject]>),
    ExcClass(ExcClass),
    ExcValue(ExcClass, Rc<str>),
    Builtin(Builtin),
    Function(FuncRef),
    Module(Rc<Module>),
    /// A host object whose state may change at run time
    Opaque(Rc<str>),
}

impl HostObject {
    pub fn str(s: &str) -> Self {
        HostObject::Str(s.into())
    }

    pub fn tuple(items: Vec<HostObject>) -> Self {
        HostObject::Tuple(items.into())
    }

    pub fn function(id: u32, name: &str) -> Self {
        HostObject::Function(FuncRef { id, name: name.into() })
    }

    /// Whether operations may be evaluated on this object at construction
    /// time. Mutable host objects are never folded.
    pub fn is_foldable(&self) -> bool {
        match self {
            HostObject::Opaque(_) => false,
            HostObject::Tuple(items) => items.iter().all(HostObject::is_foldable),
            _ => true,
        }
    }

    /// Truth value, if known
    pub fn truth(&self) -> Option<bool> {
        match self {
            HostObject::None => Some(false),
            HostObject::Bool(b) => Some(*b),
            HostObject::Int(i) => Some(*i != 0),
            HostObject::UInt(u) => Some(*u != 0),
            HostObject::Str(s) => Some(!s.is_empty()),
            HostObject::Tuple(items) => Some(!items.is_empty()),
            HostObject::Opaque(_) => None,
            _ => Some(true),
        }
    }

    /// Integer view, with bools counting as 0 and 1
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostObject::Int(i) => Some(*i),
            HostObject::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Identity comparison. Only objects with a unique identity answer;
    /// for everything else identity is not observable here.
    pub fn same_identity(&self, other: &HostObject) -> Option<bool> {
        use HostObject::*;
        match (self, other) {
            (None, None) => Some(true),
            (Bool(a), Bool(b)) => Some(a == b),
            (ExcClass(a), ExcClass(b)) => Some(a == b),
            (Builtin(a), Builtin(b)) => Some(a == b),
            (Function(a), Function(b)) => Some(a.id == b.id),
            (Module(a), Module(b)) => Some(Rc::ptr_eq(a, b)),
            (None | Bool(_) | ExcClass(_) | Builtin(_) | Function(_) | Module(_), _)
            | (_, None | Bool(_) | ExcClass(_) | Builtin(_) | Function(_) | Module(_)) => {
                Some(false)
            }
            _ => Option::None,
        }
    }

    /// Exception class, when this object is one
    pub fn as_exc_class(&self) -> Option<ExcClass> {
        match self {
            HostObject::ExcClass(c) => Some(*c),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostObject::None => "NoneType",
            HostObject::Bool(_) => "bool",
            HostObject::Int(_) => "int",
            HostObject::UInt(_) => "r_uint",
            HostObject::Str(_) => "str",
            HostObject::Tuple(_) => "tuple",
            HostObject::ExcClass(_) => "type",
            HostObject::ExcValue(c, _) => c.name(),
            HostObject::Builtin(_) => "builtin_function_or_method",
            HostObject::Function(_) => "function",
            HostObject::Module(_) => "module",
            HostObject::Opaque(_) => "object",
        }
    }
}

impl fmt::Display for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostObject::None => write!(f, "None"),
            HostObject::Bool(true) => write!(f, "True"),
            HostObject::Bool(false) => write!(f, "False"),
            HostObject::Int(i) => write!(f, "{}", i),
            HostObject::UInt(u) => write!(f, "r_uint({})", u),
            HostObject::Str(s) => write!(f, "{:?}", s),
            HostObject::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            HostObject::ExcClass(c) => write!(f, "{}", c),
            HostObject::ExcValue(c, msg) => write!(f, "{}({:?})", c, msg),
            HostObject::Builtin(b) => write!(f, "<builtin {}>", b.name()),
            HostObject::Function(func) => write!(f, "<function {}>", func.name),
            HostObject::Module(m) => write!(f, "<module {}>", m.name),
            HostObject::Opaque(name) => write!(f, "<{}>", name),
        }
    }
}
