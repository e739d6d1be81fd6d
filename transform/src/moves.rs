//! Edge relocation.
//!
//! An [`EdgeMove`] copies the value at one argument of a group node onto an
//! argument of the node that holds the target role after the rewrite: the
//! target itself when Q/DQ nodes are merged away, or the replacement node.
//! All moves of an action are resolved against the unmodified graph before
//! anything is committed.

use qfuse_ir::{Graph, ValueId};
use snafu::OptionExt;

use crate::error::*;
use crate::group::{NodeGroup, NodeRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ArgKind {
    #[display("input")]
    Input,
    #[display("output")]
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{kind} {slot}")]
pub struct ArgSlot {
    pub kind: ArgKind,
    pub slot: usize,
}

impl ArgSlot {
    pub const fn input(slot: usize) -> Self {
        Self { kind: ArgKind::Input, slot }
    }

    pub const fn output(slot: usize) -> Self {
        Self { kind: ArgKind::Output, slot }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeMove {
    pub source: NodeRole,
    pub src: ArgSlot,
    pub dst: ArgSlot,
    /// A missing source leaves the destination empty instead of failing.
    pub optional: bool,
}

impl EdgeMove {
    pub const fn new(source: NodeRole, src: ArgSlot, dst: ArgSlot) -> Self {
        Self { source, src, dst, optional: false }
    }

    pub const fn input(source: NodeRole, src: usize, dst: usize) -> Self {
        Self::new(source, ArgSlot::input(src), ArgSlot::input(dst))
    }

    pub const fn output(source: NodeRole, src: usize, dst: usize) -> Self {
        Self::new(source, ArgSlot::output(src), ArgSlot::output(dst))
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Moves wiring a Q/DQ node's `(data, scale, zero point)` inputs to `dst..dst + 3`.
pub fn qdq_triple(source: NodeRole, dst: usize) -> [EdgeMove; 3] {
    [
        EdgeMove::input(source, 0, dst),
        EdgeMove::input(source, 1, dst + 1),
        EdgeMove::input(source, 2, dst + 2).optional(),
    ]
}

/// Moves wiring only the `(scale, zero point)` of a Q node to `dst..dst + 2`.
pub fn q_params(source: NodeRole, dst: usize) -> [EdgeMove; 2] {
    [EdgeMove::input(source, 1, dst), EdgeMove::input(source, 2, dst + 1).optional()]
}

/// Argument lists produced by resolving moves. `None` marks an empty slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovedArgs {
    pub inputs: Vec<Option<ValueId>>,
    pub outputs: Vec<Option<ValueId>>,
}

impl MovedArgs {
    /// Inputs with trailing empty slots dropped.
    pub fn trimmed_inputs(&self) -> Vec<Option<ValueId>> {
        let len = self.inputs.iter().rposition(Option::is_some).map_or(0, |last| last + 1);
        self.inputs[..len].to_vec()
    }

    /// Outputs, all of which must be filled.
    pub fn complete_outputs(&self, rule: &str) -> Result<Vec<ValueId>> {
        self.outputs
            .iter()
            .copied()
            .enumerate()
            .map(|(slot, value)| {
                value.context(UnexpectedGroupShapeSnafu { rule, reason: format!("output {slot} was not moved") })
            })
            .collect()
    }

    fn place(list: &mut Vec<Option<ValueId>>, slot: usize, value: Option<ValueId>) {
        if list.len() <= slot {
            list.resize(slot + 1, None);
        }
        list[slot] = value;
    }
}

/// Look up the source of every move in the current graph.
pub fn resolve_moves(graph: &Graph, group: &NodeGroup, moves: &[EdgeMove]) -> Result<MovedArgs> {
    let mut args = MovedArgs::default();
    for mv in moves {
        let node = group.node(mv.source).and_then(|id| graph.node(id));
        let value = node.and_then(|node| match mv.src.kind {
            ArgKind::Input => node.input(mv.src.slot),
            ArgKind::Output => node.output(mv.src.slot),
        });
        if value.is_none() && !mv.optional {
            return MissingMoveSourceSnafu { role: mv.source, arg: mv.src }.fail();
        }
        let list = match mv.dst.kind {
            ArgKind::Input => &mut args.inputs,
            ArgKind::Output => &mut args.outputs,
        };
        MovedArgs::place(list, mv.dst.slot, value);
    }
    Ok(args)
}
