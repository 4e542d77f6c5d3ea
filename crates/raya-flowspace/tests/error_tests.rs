//! Tests for construction errors
//!
//! Procedures that cannot be turned into a flow graph must be rejected with
//! an error naming the graph and the offending position.

use raya_flowspace::bytecode::{Bytecode, CodeBuilder, CodeFlags, CompareKind, DecodeError, Opcode};
use raya_flowspace::model::Module;
use raya_flowspace::{
    build_flow, BuildError, ExcClass, FlowError, FlowSpace, Globals, HostFunction, HostObject,
};

fn fail(code: CodeBuilder) -> BuildError {
    fail_with(code, Globals::new())
}

fn fail_with(code: CodeBuilder, globals: Globals) -> BuildError {
    let f = HostFunction::new("broken", code.finish(), globals);
    match build_flow(&f) {
        Ok(graph) => panic!("expected an error, got:\n{}", graph),
        Err(e) => e,
    }
}

// ============================================================================
// Names
// ============================================================================

#[test]
fn test_undefined_global() {
    let mut b = CodeBuilder::new(&[]);
    b.load_global("nowhere").emit(Opcode::ReturnValue);
    let err = fail(b);
    assert!(matches!(&err.error, FlowError::UndefinedGlobal(name) if name == "nowhere"));
    assert_eq!(err.graph, "broken");
    assert_eq!(err.offset, 0);
    assert!(err.to_string().contains("global name 'nowhere' is not defined"));
}

#[test]
fn test_unbound_local() {
    let mut b = CodeBuilder::new(&["x"]);
    b.load_fast("x").store_fast("y").delete_fast("y").load_fast("y").emit(Opcode::ReturnValue);
    let err = fail(b);
    assert!(matches!(&err.error, FlowError::UnboundLocal(name) if name == "y"));
    assert_eq!(err.offset, 9);
}

#[test]
fn test_global_write() {
    let mut b = CodeBuilder::new(&[]);
    b.load_int(1).store_global("counter");
    let err = fail(b);
    assert!(matches!(&err.error, FlowError::GlobalWrite(name) if name == "counter"));
}

#[test]
fn test_cell_variables_are_refused() {
    let mut b = CodeBuilder::new(&[]);
    b.load_int(1).emit(Opcode::ReturnValue);
    let mut code = b.finish();
    code.cellvars = vec!["captured".to_string()];
    let err = build_flow(&HostFunction::new("cells", code, Globals::new())).unwrap_err();
    assert!(matches!(&err.error, FlowError::CreatesClosure(names) if names == "captured"));
    assert_eq!(err.block, None);
    assert!(err.to_string().contains("cannot create closures"));
}

#[test]
fn test_cell_assignment_unsupported() {
    let mut b = CodeBuilder::new(&[]);
    let cell = b.freevar("shared");
    b.load_int(1).emit_arg(Opcode::StoreDeref, cell as u16);
    let f = HostFunction::new("cells", b.finish(), Globals::new())
        .with_closure(vec![HostObject::Int(0)]);
    let err = build_flow(&f).unwrap_err();
    assert!(matches!(err.error, FlowError::Unsupported(_)));
}

// ============================================================================
// Imports
// ============================================================================

#[test]
fn test_import_of_unknown_module() {
    let mut b = CodeBuilder::new(&[]);
    b.import_name("missing").emit(Opcode::ReturnValue);
    let err = fail(b);
    match &err.error {
        FlowError::ImportAlwaysRaises(message) => assert_eq!(message, "No module named missing"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_import_of_unknown_name() {
    let mut globals = Globals::new();
    globals.add_module(Module::new("os").with_attr("sep", HostObject::str("/")));
    let mut b = CodeBuilder::new(&[]);
    b.import_name("os").import_from("altsep").emit(Opcode::ReturnValue);
    let err = fail_with(b, globals);
    assert!(matches!(
        &err.error,
        FlowError::ImportAlwaysRaises(m) if m == "cannot import name 'altsep'"
    ));
}

#[test]
fn test_missing_module_attribute_is_fatal() {
    let mut globals = Globals::new();
    let os = globals.add_module(Module::new("os"));
    globals.set("os", HostObject::Module(os));
    let mut b = CodeBuilder::new(&[]);
    b.load_global("os").load_attr("nope").emit(Opcode::ReturnValue);
    let err = fail_with(b, globals);
    assert!(matches!(err.error, FlowError::AlwaysRaises { exc: ExcClass::AttributeError, .. }));
}

// ============================================================================
// Refused constructs
// ============================================================================

#[test]
fn test_locals_is_refused() {
    let mut b = CodeBuilder::new(&[]);
    b.load_global("locals").call(0).emit(Opcode::ReturnValue);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::Unsupported(_)));
}

#[test]
fn test_missing_newlocals_flag() {
    let mut b = CodeBuilder::new(&[]);
    b.flags(CodeFlags(0));
    b.load_int(1).emit(Opcode::ReturnValue);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::MissingNewLocals));
    assert_eq!(err.block, None);
    assert!(err.to_string().contains("frame setup"));
}

#[test]
fn test_closure_mismatch() {
    let mut b = CodeBuilder::new(&[]);
    b.freevar("a");
    b.load_int(1).emit(Opcode::ReturnValue);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::ClosureMismatch { expected: 1, got: 0 }));
}

#[test]
fn test_yield_outside_generator() {
    let mut b = CodeBuilder::new(&["x"]);
    b.load_fast("x").emit(Opcode::YieldValue).emit(Opcode::ReturnValue);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::Unsupported(_)));
}

#[test]
fn test_reraise_without_exception() {
    let mut b = CodeBuilder::new(&[]);
    b.emit_arg(Opcode::RaiseVarargs, 0);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::Unsupported(_)));
}

#[test]
fn test_break_outside_loop() {
    let mut b = CodeBuilder::new(&[]);
    b.emit(Opcode::BreakLoop);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::NoEnclosingBlock { name: "break", .. }));
}

#[test]
fn test_stack_underflow() {
    let mut b = CodeBuilder::new(&[]);
    b.emit(Opcode::PopTop);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::StackUnderflow(0)));
}

// ============================================================================
// Exception handlers
// ============================================================================

/// try: return f() except <guard>: return 0
fn guarded_call(guard: impl FnOnce(&mut CodeBuilder)) -> CodeBuilder {
    let mut b = CodeBuilder::new(&["f", "g"]);
    let handler = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_fast("f").call(0).emit(Opcode::ReturnValue);
    b.bind(handler);
    b.emit(Opcode::DupTop);
    guard(&mut b);
    b.compare(CompareKind::ExcMatch);
    let reraise = b.new_label();
    b.jump(Opcode::PopJumpIfFalse, reraise);
    b.emit(Opcode::PopTop).emit(Opcode::PopTop).load_int(0).emit(Opcode::ReturnValue);
    b.bind(reraise);
    b.emit(Opcode::EndFinally);
    b
}

#[test]
fn test_catching_assertion_error_is_invalid() {
    let err = fail(guarded_call(|b| {
        b.load_global("AssertionError");
    }));
    assert!(matches!(err.error, FlowError::InvalidCatch(ExcClass::AssertionError)));
}

#[test]
fn test_non_constant_guard() {
    let err = fail(guarded_call(|b| {
        b.load_fast("g");
    }));
    assert!(matches!(err.error, FlowError::NonConstantGuard));
}

// ============================================================================
// Malformed input
// ============================================================================

#[test]
fn test_invalid_opcode() {
    let code = Bytecode { code: vec![0xEE], flags: CodeFlags::NEWLOCALS, ..Default::default() };
    let err = build_flow(&HostFunction::new("bad", code, Globals::new())).unwrap_err();
    assert!(matches!(
        err.error,
        FlowError::Decode(DecodeError::InvalidOpcode { byte: 0xEE, offset: 0 })
    ));
}

#[test]
fn test_running_off_the_end() {
    let mut b = CodeBuilder::new(&[]);
    b.load_int(1);
    let err = fail(b);
    assert!(matches!(err.error, FlowError::Decode(DecodeError::UnexpectedEnd(3))));
}

#[test]
fn test_bad_constant_argument_position() {
    let mut b = CodeBuilder::new(&["x"]);
    b.load_fast("x").emit(Opcode::ReturnValue);
    let f = HostFunction::new("f", b.finish(), Globals::new());
    let err = FlowSpace::default()
        .build_flow_with_constargs(&f, &[(3, HostObject::Int(0))])
        .unwrap_err();
    assert!(matches!(err.error, FlowError::BadConstArg { position: 3, argcount: 1 }));
}
