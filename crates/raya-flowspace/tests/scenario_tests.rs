//! End-to-end graph construction scenarios
//!
//! Each test assembles a small procedure, builds its flow graph and checks
//! the block structure that comes out.

use raya_flowspace::bytecode::{CodeBuilder, CompareKind, Opcode};
use raya_flowspace::model::{BlockId, BlockKind, ExitCase, ExitSwitch, Graph, Value};
use raya_flowspace::{
    build_flow, ExcClass, FlowConfig, FlowError, FlowSpace, Globals, HostFunction, HostObject,
};

// ============================================================================
// Helpers
// ============================================================================

fn func(name: &str, code: CodeBuilder) -> HostFunction {
    HostFunction::new(name, code.finish(), Globals::new())
}

fn build(f: &HostFunction) -> Graph {
    build_flow(f).unwrap()
}

fn int(i: i64) -> Value {
    Value::Const(HostObject::Int(i))
}

/// Reachable blocks holding an operation called `name`
fn blocks_with(graph: &Graph, name: &str) -> Vec<BlockId> {
    graph
        .iter_blocks()
        .into_iter()
        .filter(|&id| graph.block(id).operations.iter().any(|op| op.name == name))
        .collect()
}

/// Number of reachable links into `target`
fn predecessors(graph: &Graph, target: BlockId) -> usize {
    graph
        .iter_links()
        .into_iter()
        .filter(|&(src, i)| graph.block(src).exits[i].target == target)
        .count()
}

/// Argument lists of the links into the return block
fn returned(graph: &Graph) -> Vec<Vec<Value>> {
    graph
        .iter_links()
        .into_iter()
        .map(|(src, i)| &graph.block(src).exits[i])
        .filter(|link| link.target == graph.return_block)
        .map(|link| link.args.clone())
        .collect()
}

// ============================================================================
// Straight-line code
// ============================================================================

#[test]
fn test_branch_free_constant_procedure_is_one_block() {
    // a = 2 * 3; return a + 1
    let mut b = CodeBuilder::new(&[]);
    b.load_int(2).load_int(3).emit(Opcode::BinaryMultiply).store_fast("a");
    b.load_fast("a").load_int(1).emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);
    let graph = build(&func("f", b));

    let interior = graph.interior_blocks();
    assert_eq!(interior.len(), 1);
    assert_eq!(graph.block(interior[0]).exits.len(), 1);
    assert_eq!(graph.block(interior[0]).exits[0].target, graph.return_block);
    assert_eq!(returned(&graph), vec![vec![int(7)]]);
    assert_eq!(graph.operation_count(), 0);
}

/// return -(x + 1)
fn negated_increment() -> HostFunction {
    let mut b = CodeBuilder::new(&["x"]);
    b.load_fast("x").load_int(1).emit(Opcode::BinaryAdd);
    b.emit(Opcode::UnaryNegative).emit(Opcode::ReturnValue);
    func("f", b)
}

#[test]
fn test_branch_free_procedure_is_one_block() {
    let graph = build(&negated_increment());

    let interior = graph.interior_blocks();
    assert_eq!(interior, vec![graph.start]);
    let block = graph.block(graph.start);
    let names: Vec<&str> = block.operations.iter().map(|op| op.name).collect();
    assert_eq!(names, vec!["add", "neg"]);
    assert_eq!(block.operations[0].args, vec![Value::Var(block.inputs[0]), int(1)]);
    assert_eq!(block.operations[1].args, vec![Value::Var(block.operations[0].result)]);
    assert!(block.exitswitch.is_none());
    assert_eq!(returned(&graph), vec![vec![Value::Var(block.operations[1].result)]]);
    assert!(!graph.iter_blocks().contains(&graph.except_block));
}

#[test]
fn test_branch_free_procedure_without_joining_is_a_chain() {
    let space = FlowSpace::new(FlowConfig { join_blocks: false, ..Default::default() });
    let graph = space.build_flow(&negated_increment()).unwrap();

    // An empty entry block, then one block per recording instruction
    let interior = graph.interior_blocks();
    assert_eq!(interior.len(), 3);
    assert!(graph.block(graph.start).operations.is_empty());
    for id in interior {
        let block = graph.block(id);
        assert!(block.exitswitch.is_none(), "{} should not branch", id);
        assert_eq!(block.exits.len(), 1);
    }
    assert_eq!(blocks_with(&graph, "add").len(), 1);
    assert_eq!(blocks_with(&graph, "neg").len(), 1);
    assert!(graph.iter_blocks().contains(&graph.return_block));
    assert!(!graph.iter_blocks().contains(&graph.except_block));
}

// ============================================================================
// Conditionals
// ============================================================================

/// if x: y = a else: y = b; return y + x
fn conditional(a: i64, b_value: i64) -> HostFunction {
    let mut b = CodeBuilder::new(&["x"]);
    let otherwise = b.new_label();
    let end = b.new_label();
    b.load_fast("x").jump(Opcode::PopJumpIfFalse, otherwise);
    b.load_int(a).store_fast("y").jump(Opcode::JumpForward, end);
    b.bind(otherwise);
    b.load_int(b_value).store_fast("y");
    b.bind(end);
    b.load_fast("y").load_fast("x").emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);
    func("cond", b)
}

#[test]
fn test_conditional_forks_on_truth_value() {
    let graph = build(&conditional(1, 2));
    let tests = blocks_with(&graph, "is_true");
    assert_eq!(tests.len(), 1);
    let block = graph.block(tests[0]);
    let cond = block.operations.last().unwrap().result;
    assert_eq!(block.exitswitch, Some(ExitSwitch::Value(Value::Var(cond))));
    let cases: Vec<_> = block.exits.iter().map(|l| l.exitcase).collect();
    assert_eq!(cases, vec![Some(ExitCase::Bool(false)), Some(ExitCase::Bool(true))]);
}

#[test]
fn test_reconverging_branches_generalize_differing_values() {
    let graph = build(&conditional(1, 2));
    let joins = blocks_with(&graph, "add");
    assert_eq!(joins.len(), 1, "both branches continue in one block");
    let join = graph.block(joins[0]);
    let add = &join.operations[0];
    match &add.args[0] {
        Value::Var(v) => assert!(join.inputs.contains(v), "y is an input of the join block"),
        other => panic!("y should be generalized, got {:?}", other),
    }
}

/// The switch block, its two op-less branches and the shared join block
fn conditional_shape(graph: &Graph) -> BlockId {
    assert_eq!(graph.interior_blocks().len(), 4);
    let start = graph.block(graph.start);
    let names: Vec<&str> = start.operations.iter().map(|op| op.name).collect();
    assert_eq!(names, vec!["is_true"]);
    assert_eq!(start.exits.len(), 2);

    let join = graph.block(start.exits[0].target).exits[0].target;
    for link in &start.exits {
        let branch = graph.block(link.target);
        assert!(branch.operations.is_empty());
        assert!(branch.exitswitch.is_none());
        assert_eq!(branch.exits.len(), 1);
        assert_eq!(branch.exits[0].target, join);
    }
    assert_eq!(predecessors(graph, join), 2);
    let names: Vec<&str> = graph.block(join).operations.iter().map(|op| op.name).collect();
    assert_eq!(names, vec!["add"]);
    assert_eq!(graph.block(join).exits[0].target, graph.return_block);
    join
}

#[test]
fn test_reconverging_conditional_structure() {
    let graph = build(&conditional(1, 2));
    let join = conditional_shape(&graph);

    // x and y, once as locals and once on the operand stack
    assert_eq!(graph.block(join).inputs.len(), 4);
    let start = graph.block(graph.start);
    let mut carried: Vec<Value> = start
        .exits
        .iter()
        .map(|link| graph.block(link.target).exits[0].args[1].clone())
        .collect();
    carried.sort_by_key(|v| format!("{:?}", v));
    assert_eq!(carried, vec![int(1), int(2)]);
}

#[test]
fn test_reconverging_conditional_with_equal_constants_structure() {
    let graph = build(&conditional(5, 5));
    let join = conditional_shape(&graph);

    // Only x needs to be passed
    assert_eq!(graph.block(join).inputs.len(), 2);
    let start = graph.block(graph.start);
    for link in &start.exits {
        assert_eq!(graph.block(link.target).exits[0].args.len(), 2);
    }
}

#[test]
fn test_reconverging_branches_keep_equal_constants() {
    let graph = build(&conditional(5, 5));
    let joins = blocks_with(&graph, "add");
    assert_eq!(joins.len(), 1);
    let join = graph.block(joins[0]);
    assert_eq!(join.operations[0].args[0], int(5));
    assert_eq!(predecessors(&graph, joins[0]), 2, "reached from both branches");
}

// ============================================================================
// Loops
// ============================================================================

/// i = 0; while i < n: i = i + 1; return i
fn counting_loop() -> HostFunction {
    let mut b = CodeBuilder::new(&["n"]);
    let head = b.new_label();
    let exit = b.new_label();
    let end = b.new_label();
    b.load_int(0).store_fast("i");
    b.jump(Opcode::SetupLoop, end);
    b.bind(head);
    b.load_fast("i").load_fast("n").compare(CompareKind::Lt).jump(Opcode::PopJumpIfFalse, exit);
    b.load_fast("i").load_int(1).emit(Opcode::BinaryAdd).store_fast("i");
    b.jump(Opcode::JumpAbsolute, head);
    b.bind(exit);
    b.emit(Opcode::PopBlock);
    b.bind(end);
    b.load_fast("i").emit(Opcode::ReturnValue);
    func("count", b)
}

#[test]
fn test_loop_counter_is_widened() {
    let graph = build(&counting_loop());

    // The first pass compared the constant 0; the loop header that survives
    // compares a variable and is entered both from before the loop and from
    // the back edge.
    let headers: Vec<BlockId> = blocks_with(&graph, "lt")
        .into_iter()
        .filter(|&id| matches!(graph.block(id).operations[0].args[0], Value::Var(_)))
        .collect();
    assert_eq!(headers.len(), 1);
    assert!(predecessors(&graph, headers[0]) >= 2);

    let adds = blocks_with(&graph, "add");
    assert_eq!(adds.len(), 1);
    let add = &graph.block(adds[0]).operations[0];
    assert!(matches!(add.args[0], Value::Var(_)));
    assert_eq!(add.args[1], int(1));
}

#[test]
fn test_loop_leaves_forwarding_block_behind() {
    // Joining would fold the forwarding block into its predecessor
    let space = FlowSpace::new(FlowConfig { join_blocks: false, ..Default::default() });
    let graph = space.build_flow(&counting_loop()).unwrap();
    let dead: Vec<BlockId> = graph
        .iter_blocks()
        .into_iter()
        .filter(|&id| matches!(graph.block(id).kind, BlockKind::Primary { dead: true, .. }))
        .collect();
    assert!(!dead.is_empty(), "the first loop header was generalized");
    for id in dead {
        let block = graph.block(id);
        assert!(block.operations.is_empty());
        assert!(block.exitswitch.is_none());
        assert_eq!(block.exits.len(), 1);
    }
}

// ============================================================================
// Folding that raises
// ============================================================================

fn divide_by_zero() -> CodeBuilder {
    let mut b = CodeBuilder::new(&[]);
    b.load_int(1).load_int(0).emit(Opcode::BinaryFloorDivide).emit(Opcode::ReturnValue);
    b
}

#[test]
fn test_raising_fold_is_recorded_with_exception_edges() {
    let graph = build(&func("div", divide_by_zero()));
    let divs = blocks_with(&graph, "floordiv");
    assert_eq!(divs.len(), 1);
    let block = graph.block(divs[0]);
    let op = &block.operations[0];
    assert_eq!(op.args, vec![int(1), int(0)]);
    assert_eq!(block.exitswitch, Some(ExitSwitch::LastException));
    assert_eq!(block.exits.len(), 2);
    assert_eq!(block.exits[0].exitcase, None);
    assert_eq!(block.exits[1].exitcase, Some(ExitCase::Exception(ExcClass::ZeroDivisionError)));
    let zero_division = Value::Const(HostObject::ExcClass(ExcClass::ZeroDivisionError));
    assert_eq!(block.exits[1].last_exception, Some(zero_division));
    assert!(block.exits[1].last_exc_value.is_some());

    // The normal successor only forwarded the result and was bypassed
    assert_eq!(block.exits[0].target, graph.return_block);
    assert_eq!(block.exits[0].args, vec![Value::Var(op.result)]);
}

#[test]
fn test_uncaught_implicit_exception_becomes_assertion() {
    let graph = build(&func("div", divide_by_zero()));
    let raising: Vec<_> = graph
        .iter_links()
        .into_iter()
        .map(|(src, i)| graph.block(src).exits[i].clone())
        .filter(|link| link.target == graph.except_block)
        .collect();
    assert_eq!(raising.len(), 1);
    assert_eq!(raising[0].args[0], Value::Const(HostObject::ExcClass(ExcClass::AssertionError)));
    assert_eq!(
        raising[0].args[1],
        Value::Const(HostObject::ExcValue(
            ExcClass::AssertionError,
            "implicit ZeroDivisionError shouldn't occur".into()
        ))
    );
}

#[test]
fn test_strict_folding_rejects_raising_fold() {
    let space = FlowSpace::new(FlowConfig { strict_folding: true, ..Default::default() });
    let err = space.build_flow(&func("div", divide_by_zero())).unwrap_err();
    assert!(matches!(err.error, FlowError::AlwaysRaises { exc: ExcClass::ZeroDivisionError, .. }));
    assert_eq!(err.graph, "div");
}

// ============================================================================
// Nested forks
// ============================================================================

#[test]
fn test_nested_forks_in_one_instruction() {
    // if x not in y: return 1
    // return 2
    let mut b = CodeBuilder::new(&["x", "y"]);
    let other = b.new_label();
    b.load_fast("x").load_fast("y").compare(CompareKind::NotIn).jump(Opcode::PopJumpIfFalse, other);
    b.load_int(1).emit(Opcode::ReturnValue);
    b.bind(other);
    b.load_int(2).emit(Opcode::ReturnValue);
    let graph = build(&func("nested", b));

    // `contains` may raise, and its normal successor then tests the result:
    // the grandchildren of the `contains` block are reached by replaying
    // two recorded forks.
    let contains = blocks_with(&graph, "contains");
    assert_eq!(contains.len(), 1);
    let normal = graph.block(contains[0]).exits[0].target;
    let test = graph.block(normal);
    assert!(matches!(test.kind, BlockKind::Secondary { parent, .. } if parent == contains[0]));
    assert_eq!(test.operations.len(), 1);
    assert_eq!(test.operations[0].name, "is_true");
    assert_eq!(test.exits.len(), 2);

    let mut results = returned(&graph);
    results.sort_by_key(|args| format!("{:?}", args));
    assert_eq!(results, vec![vec![int(1)], vec![int(2)]]);
}
