//! Textual rendering of flow graphs
//!
//! Blocks are listed in reachability order from the start block. Named
//! variables print as `name_N`, the others as `vN`.

use std::fmt;

use super::graph::{Block, ExitCase, ExitSwitch, Graph, Link, Value, Variable};

struct Var<'g>(&'g Graph, Variable);

impl fmt::Display for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.variable_name(self.1) {
            Some(name) => write!(f, "{}_{}", name, self.1 .0),
            None => write!(f, "{}", self.1),
        }
    }
}

struct Val<'g>(&'g Graph, &'g Value);

impl fmt::Display for Val<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Value::Var(v) => Var(self.0, *v).fmt(f),
            Value::Const(c) => write!(f, "({})", c),
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, graph: &Graph, values: &[Value]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Val(graph, value))?;
    }
    Ok(())
}

impl fmt::Display for ExitCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCase::Bool(true) => write!(f, "True"),
            ExitCase::Bool(false) => write!(f, "False"),
            ExitCase::Exception(cls) => write!(f, "{}", cls),
        }
    }
}

fn write_link(f: &mut fmt::Formatter<'_>, graph: &Graph, link: &Link) -> fmt::Result {
    write!(f, "    ")?;
    if let Some(case) = &link.exitcase {
        write!(f, "{} ", case)?;
    }
    write!(f, "--> {}(", link.target)?;
    write_values(f, graph, &link.args)?;
    write!(f, ")")?;
    if let (Some(etype), Some(evalue)) = (&link.last_exception, link.last_exc_value) {
        write!(f, " [last_exception {}, {}]", Val(graph, etype), Var(graph, evalue))?;
    }
    writeln!(f)
}

fn write_block(f: &mut fmt::Formatter<'_>, graph: &Graph, block: &Block) -> fmt::Result {
    write!(f, "{}(", block.id)?;
    for (i, &input) in block.inputs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Var(graph, input))?;
    }
    write!(f, ")")?;
    if block.id == graph.return_block {
        write!(f, " return")?;
    } else if block.id == graph.except_block {
        write!(f, " except")?;
    }
    writeln!(f, ":")?;

    for op in &block.operations {
        write!(f, "    {} = {}(", Var(graph, op.result), op.name)?;
        write_values(f, graph, &op.args)?;
        writeln!(f, ")")?;
    }
    match &block.exitswitch {
        Some(ExitSwitch::Value(cond)) => writeln!(f, "    switch {}", Val(graph, cond))?,
        Some(ExitSwitch::LastException) => writeln!(f, "    switch last_exception")?,
        None => {}
    }
    for link in &block.exits {
        write_link(f, graph, link)?;
    }
    Ok(())
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph {}(", self.name)?;
        for (i, arg) in self.signature.argnames.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")?;
        if self.is_generator {
            write!(f, " generator")?;
        }
        writeln!(f)?;
        for id in self.iter_blocks() {
            write_block(f, self, self.block(id))?;
        }
        Ok(())
    }
}
