//! Primitive operation table
//!
//! Every primitive the flow space can emit, with its arity, the host
//! function used for constant folding and the exceptions it may raise
//! implicitly.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::model::{ExcClass, HostObject};

/// Why a fold did not produce a constant
#[derive(Debug, Clone, PartialEq)]
pub enum Folding {
    /// The host operation raised
    Raise(ExcClass, String),
    /// The result cannot be represented as a constant (overflow, an
    /// unsupported operand mix); the operation is recorded instead
    Decline,
}

pub type FoldFn = fn(&[HostObject]) -> Result<HostObject, Folding>;

/// Description of one primitive operation
#[derive(Debug)]
pub struct OpSpec {
    pub name: &'static str,
    pub arity: usize,
    pub fold: Option<FoldFn>,
    /// Exceptions the operation may raise without an explicit `raise`
    pub implicit: &'static [ExcClass],
    /// A raising fold means the input is wrong, not the data
    pub fatal_on_fold_failure: bool,
}

const LOOKUP: &[ExcClass] = &[ExcClass::IndexError, ExcClass::KeyError, ExcClass::Exception];
const ZERO_DIV: &[ExcClass] = &[ExcClass::ZeroDivisionError];
const POW: &[ExcClass] =
    &[ExcClass::ZeroDivisionError, ExcClass::ValueError, ExcClass::OverflowError];
const SHIFT: &[ExcClass] = &[ExcClass::ValueError];

macro_rules! op {
    ($name:literal, $arity:literal, $fold:expr) => {
        op!($name, $arity, $fold, &[])
    };
    ($name:literal, $arity:literal, $fold:expr, $implicit:expr) => {
        OpSpec {
            name: $name,
            arity: $arity,
            fold: $fold,
            implicit: $implicit,
            fatal_on_fold_failure: false,
        }
    };
}

static OPERATIONS: &[OpSpec] = &[
    op!("pos", 1, Some(fold_pos)),
    op!("neg", 1, Some(fold_neg)),
    op!("invert", 1, Some(fold_invert)),
    op!("abs", 1, Some(fold_abs)),
    op!("len", 1, Some(fold_len)),
    op!("type", 1, Some(fold_type)),
    op!("add", 2, Some(fold_add)),
    op!("sub", 2, Some(fold_sub)),
    op!("mul", 2, Some(fold_mul)),
    op!("floordiv", 2, Some(fold_floordiv), ZERO_DIV),
    op!("mod", 2, Some(fold_mod), ZERO_DIV),
    op!("pow", 2, Some(fold_pow), POW),
    op!("lshift", 2, Some(fold_lshift), SHIFT),
    op!("rshift", 2, Some(fold_rshift), SHIFT),
    op!("and_", 2, Some(fold_and)),
    op!("or_", 2, Some(fold_or)),
    op!("xor", 2, Some(fold_xor)),
    op!("lt", 2, Some(fold_lt)),
    op!("le", 2, Some(fold_le)),
    op!("eq", 2, Some(fold_eq)),
    op!("ne", 2, Some(fold_ne)),
    op!("gt", 2, Some(fold_gt)),
    op!("ge", 2, Some(fold_ge)),
    op!("is_", 2, Some(fold_is)),
    op!("contains", 2, Some(fold_contains), &[ExcClass::Exception]),
    op!("issubtype", 2, Some(fold_issubtype)),
    op!("getitem", 2, Some(fold_getitem), LOOKUP),
    op!("setitem", 3, None, LOOKUP),
    op!("delitem", 2, None, LOOKUP),
    OpSpec {
        name: "getattr",
        arity: 2,
        fold: Some(fold_getattr),
        implicit: &[ExcClass::AttributeError],
        fatal_on_fold_failure: true,
    },
    op!("setattr", 3, None),
    op!("iter", 1, None),
];

static BY_NAME: Lazy<FxHashMap<&'static str, &'static OpSpec>> =
    Lazy::new(|| OPERATIONS.iter().map(|spec| (spec.name, spec)).collect());

/// Look up a primitive by name
pub fn lookup(name: &str) -> Option<&'static OpSpec> {
    BY_NAME.get(name).copied()
}

/// Implicit exceptions of a primitive, empty for unknown names
pub fn implicit_exceptions(name: &str) -> &'static [ExcClass] {
    lookup(name).map(|spec| spec.implicit).unwrap_or(&[])
}

// ============================================================================
// Folding helpers
// ============================================================================

fn int_pair(args: &[HostObject]) -> Result<(i64, i64), Folding> {
    match (args[0].as_int(), args[1].as_int()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Folding::Decline),
    }
}

fn int_op(args: &[HostObject], f: fn(i64, i64) -> Option<i64>) -> Result<HostObject, Folding> {
    let (a, b) = int_pair(args)?;
    f(a, b).map(HostObject::Int).ok_or(Folding::Decline)
}

fn uint_op(a: u64, b: u64, f: fn(u64, u64) -> u64) -> Result<HostObject, Folding> {
    Ok(HostObject::UInt(f(a, b)))
}

fn zero_division() -> Folding {
    Folding::Raise(ExcClass::ZeroDivisionError, "integer division or modulo by zero".to_string())
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>, Folding> {
    let times = times.max(0) as usize;
    if items.len().saturating_mul(times) > 1 << 16 {
        return Err(Folding::Decline);
    }
    Ok(items.iter().cloned().cycle().take(items.len() * times).collect())
}

fn index(len: usize, i: i64) -> Option<usize> {
    let i = if i < 0 { i + len as i64 } else { i };
    (0..len as i64).contains(&i).then_some(i as usize)
}

fn values_equal(a: &HostObject, b: &HostObject) -> bool {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(args: &[HostObject]) -> Result<std::cmp::Ordering, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Str(a), HostObject::Str(b)) => Ok(a.cmp(b)),
        (HostObject::UInt(a), HostObject::UInt(b)) => Ok(a.cmp(b)),
        _ => int_pair(args).map(|(a, b)| a.cmp(&b)),
    }
}

// ============================================================================
// Fold functions
// ============================================================================

fn fold_pos(args: &[HostObject]) -> Result<HostObject, Folding> {
    match &args[0] {
        HostObject::UInt(u) => Ok(HostObject::UInt(*u)),
        other => other.as_int().map(HostObject::Int).ok_or(Folding::Decline),
    }
}

fn fold_neg(args: &[HostObject]) -> Result<HostObject, Folding> {
    match &args[0] {
        HostObject::UInt(u) => Ok(HostObject::UInt(u.wrapping_neg())),
        other => {
            other.as_int().and_then(i64::checked_neg).map(HostObject::Int).ok_or(Folding::Decline)
        }
    }
}

fn fold_invert(args: &[HostObject]) -> Result<HostObject, Folding> {
    match &args[0] {
        HostObject::UInt(u) => Ok(HostObject::UInt(!u)),
        other => other.as_int().map(|i| HostObject::Int(!i)).ok_or(Folding::Decline),
    }
}

fn fold_abs(args: &[HostObject]) -> Result<HostObject, Folding> {
    match &args[0] {
        HostObject::UInt(u) => Ok(HostObject::UInt(*u)),
        other => {
            other.as_int().and_then(i64::checked_abs).map(HostObject::Int).ok_or(Folding::Decline)
        }
    }
}

fn fold_len(args: &[HostObject]) -> Result<HostObject, Folding> {
    match &args[0] {
        HostObject::Str(s) => Ok(HostObject::Int(s.chars().count() as i64)),
        HostObject::Tuple(items) => Ok(HostObject::Int(items.len() as i64)),
        HostObject::Opaque(_) => Err(Folding::Decline),
        other => Err(Folding::Raise(
            ExcClass::TypeError,
            format!("object of type '{}' has no len()", other.type_name()),
        )),
    }
}

fn fold_type(args: &[HostObject]) -> Result<HostObject, Folding> {
    match &args[0] {
        HostObject::ExcValue(cls, _) => Ok(HostObject::ExcClass(*cls)),
        _ => Err(Folding::Decline),
    }
}

fn fold_add(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Str(a), HostObject::Str(b)) => {
            Ok(HostObject::Str(format!("{}{}", a, b).into()))
        }
        (HostObject::Tuple(a), HostObject::Tuple(b)) => {
            Ok(HostObject::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (HostObject::UInt(a), HostObject::UInt(b)) => uint_op(*a, *b, u64::wrapping_add),
        _ => int_op(args, i64::checked_add),
    }
}

fn fold_sub(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::UInt(a), HostObject::UInt(b)) => uint_op(*a, *b, u64::wrapping_sub),
        _ => int_op(args, i64::checked_sub),
    }
}

fn fold_mul(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Str(s), HostObject::Int(n)) | (HostObject::Int(n), HostObject::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(HostObject::Str(repeat(&chars, *n)?.into_iter().collect::<String>().into()))
        }
        (HostObject::Tuple(items), HostObject::Int(n))
        | (HostObject::Int(n), HostObject::Tuple(items)) => {
            Ok(HostObject::tuple(repeat(items, *n)?))
        }
        (HostObject::UInt(a), HostObject::UInt(b)) => uint_op(*a, *b, u64::wrapping_mul),
        _ => int_op(args, i64::checked_mul),
    }
}

fn fold_floordiv(args: &[HostObject]) -> Result<HostObject, Folding> {
    if let (HostObject::UInt(a), HostObject::UInt(b)) = (&args[0], &args[1]) {
        return a.checked_div(*b).map(HostObject::UInt).ok_or_else(zero_division);
    }
    let (a, b) = int_pair(args)?;
    if b == 0 {
        return Err(zero_division());
    }
    floor_div(a, b).map(HostObject::Int).ok_or(Folding::Decline)
}

fn fold_mod(args: &[HostObject]) -> Result<HostObject, Folding> {
    if let (HostObject::UInt(a), HostObject::UInt(b)) = (&args[0], &args[1]) {
        return a.checked_rem(*b).map(HostObject::UInt).ok_or_else(zero_division);
    }
    let (a, b) = int_pair(args)?;
    if b == 0 {
        return Err(zero_division());
    }
    floor_mod(a, b).map(HostObject::Int).ok_or(Folding::Decline)
}

fn fold_pow(args: &[HostObject]) -> Result<HostObject, Folding> {
    let (a, b) = int_pair(args)?;
    if b < 0 {
        if a == 0 {
            return Err(Folding::Raise(
                ExcClass::ZeroDivisionError,
                "0 cannot be raised to a negative power".to_string(),
            ));
        }
        // float result
        return Err(Folding::Decline);
    }
    let exp = u32::try_from(b).map_err(|_| Folding::Decline)?;
    a.checked_pow(exp).map(HostObject::Int).ok_or(Folding::Decline)
}

fn fold_lshift(args: &[HostObject]) -> Result<HostObject, Folding> {
    let (a, b) = int_pair(args)?;
    if b < 0 {
        return Err(Folding::Raise(ExcClass::ValueError, "negative shift count".to_string()));
    }
    if b >= 64 {
        return if a == 0 { Ok(HostObject::Int(0)) } else { Err(Folding::Decline) };
    }
    let shifted = a << b;
    if shifted >> b != a {
        return Err(Folding::Decline);
    }
    Ok(HostObject::Int(shifted))
}

fn fold_rshift(args: &[HostObject]) -> Result<HostObject, Folding> {
    let (a, b) = int_pair(args)?;
    if b < 0 {
        return Err(Folding::Raise(ExcClass::ValueError, "negative shift count".to_string()));
    }
    Ok(HostObject::Int(a >> b.min(63)))
}

fn fold_and(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Bool(a), HostObject::Bool(b)) => Ok(HostObject::Bool(*a & *b)),
        (HostObject::UInt(a), HostObject::UInt(b)) => uint_op(*a, *b, |x, y| x & y),
        _ => int_op(args, |a, b| Some(a & b)),
    }
}

fn fold_or(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Bool(a), HostObject::Bool(b)) => Ok(HostObject::Bool(*a | *b)),
        (HostObject::UInt(a), HostObject::UInt(b)) => uint_op(*a, *b, |x, y| x | y),
        _ => int_op(args, |a, b| Some(a | b)),
    }
}

fn fold_xor(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Bool(a), HostObject::Bool(b)) => Ok(HostObject::Bool(*a ^ *b)),
        (HostObject::UInt(a), HostObject::UInt(b)) => uint_op(*a, *b, |x, y| x ^ y),
        _ => int_op(args, |a, b| Some(a ^ b)),
    }
}

fn fold_lt(args: &[HostObject]) -> Result<HostObject, Folding> {
    compare(args).map(|o| HostObject::Bool(o.is_lt()))
}

fn fold_le(args: &[HostObject]) -> Result<HostObject, Folding> {
    compare(args).map(|o| HostObject::Bool(o.is_le()))
}

fn fold_gt(args: &[HostObject]) -> Result<HostObject, Folding> {
    compare(args).map(|o| HostObject::Bool(o.is_gt()))
}

fn fold_ge(args: &[HostObject]) -> Result<HostObject, Folding> {
    compare(args).map(|o| HostObject::Bool(o.is_ge()))
}

fn fold_eq(args: &[HostObject]) -> Result<HostObject, Folding> {
    Ok(HostObject::Bool(values_equal(&args[0], &args[1])))
}

fn fold_ne(args: &[HostObject]) -> Result<HostObject, Folding> {
    Ok(HostObject::Bool(!values_equal(&args[0], &args[1])))
}

fn fold_is(args: &[HostObject]) -> Result<HostObject, Folding> {
    args[0].same_identity(&args[1]).map(HostObject::Bool).ok_or(Folding::Decline)
}

fn fold_contains(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], &args[1]) {
        (HostObject::Tuple(items), item) => {
            Ok(HostObject::Bool(items.iter().any(|x| values_equal(x, item))))
        }
        (HostObject::Str(s), HostObject::Str(sub)) => {
            Ok(HostObject::Bool(s.contains(sub.as_ref())))
        }
        _ => Err(Folding::Decline),
    }
}

fn fold_issubtype(args: &[HostObject]) -> Result<HostObject, Folding> {
    let cls = args[0].as_exc_class().ok_or(Folding::Decline)?;
    match &args[1] {
        HostObject::ExcClass(base) => Ok(HostObject::Bool(cls.is_subclass(*base))),
        HostObject::Tuple(bases) => {
            let mut result = false;
            for base in bases.iter() {
                let base = base.as_exc_class().ok_or(Folding::Decline)?;
                result |= cls.is_subclass(base);
            }
            Ok(HostObject::Bool(result))
        }
        _ => Err(Folding::Decline),
    }
}

fn fold_getitem(args: &[HostObject]) -> Result<HostObject, Folding> {
    match (&args[0], args[1].as_int()) {
        (HostObject::Tuple(items), Some(i)) => index(items.len(), i)
            .map(|i| items[i].clone())
            .ok_or_else(|| {
                Folding::Raise(ExcClass::IndexError, "tuple index out of range".to_string())
            }),
        (HostObject::Str(s), Some(i)) => {
            let chars: Vec<char> = s.chars().collect();
            index(chars.len(), i)
                .map(|i| HostObject::Str(chars[i].to_string().into()))
                .ok_or_else(|| {
                    Folding::Raise(ExcClass::IndexError, "string index out of range".to_string())
                })
        }
        _ => Err(Folding::Decline),
    }
}

fn fold_getattr(args: &[HostObject]) -> Result<HostObject, Folding> {
    let name = match &args[1] {
        HostObject::Str(name) => name,
        _ => return Err(Folding::Decline),
    };
    match &args[0] {
        HostObject::Module(module) => module.attrs.get(name.as_ref()).cloned().ok_or_else(|| {
            Folding::Raise(
                ExcClass::AttributeError,
                format!("'module' object '{}' has no attribute '{}'", module.name, name),
            )
        }),
        HostObject::None | HostObject::Bool(_) | HostObject::Int(_) => Err(Folding::Raise(
            ExcClass::AttributeError,
            format!("'{}' object has no attribute '{}'", args[0].type_name(), name),
        )),
        _ => Err(Folding::Decline),
    }
}
