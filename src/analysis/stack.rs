//! Evaluation stack depth analysis over an instruction tree.
//!
//! The analysis is a worklist walk. A walk starts at a node with a known stack height, follows
//! the flat order of the tree and applies the stack effect of every instruction it meets.
//! Branch targets are queued as new walks with the height at the branch; a walk stops at
//! instructions that end the flow and at instructions already seen with an equal or larger
//! height. Entering a try block queues its handlers (and filters) with an empty stack, and
//! entering a catch handler or filter puts the exception object on the stack.
//!
//! Recorded heights only grow, so a join point reached with a larger height than before is
//! walked again from there on. A loop that grows the stack on every iteration runs into the
//! height bound and is reported as [`crate::Error::StackBound`].

use std::collections::VecDeque;

use crate::{
    analysis::SignatureResolver,
    assembly::{FlowType, OpCode},
    tree::{BlockKind, InstructionTree, NodeId, NodeKind, TreeInstruction, TreeOperand},
    Error, Result,
};

/// Result of a stack depth analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackAnalysis {
    /// The largest stack height reached anywhere, never negative
    pub max_stack: u16,
    /// Entry height of every reached instruction, indexed by node
    pub entry_heights: Vec<Option<i32>>,
}

impl StackAnalysis {
    /// Runs the analysis over all code reachable from the start of the body, plus the handlers
    /// of every reachable try block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StackBound`] if a height leaves `[-32768, 32767]`, any error of
    /// the resolver for call-family instructions, and [`crate::Error::UnsupportedOperand`] for
    /// call-family instructions without a token operand.
    pub fn compute(tree: &InstructionTree, resolver: &dyn SignatureResolver) -> Result<Self> {
        let mut walker = StackWalker::new(tree, resolver);
        if let Some(first) = tree.first_child(tree.root()) {
            walker.worklist.push_back((first, 0));
        }

        while let Some((start, height)) = walker.worklist.pop_front() {
            walker.walk(start, height)?;
        }

        let max_stack = u16::try_from(walker.max.max(0)).map_err(|_| Error::StackBound {
            height: walker.max,
            node: tree.root().index(),
        })?;

        log::debug!(
            "stack analysis: max stack {}, {} walks, {} instructions reached",
            max_stack,
            walker.walks,
            walker.heights.iter().filter(|h| h.is_some()).count()
        );

        Ok(StackAnalysis {
            max_stack,
            entry_heights: walker.heights,
        })
    }

    /// The stack height on entry to `node`, if the analysis reached it.
    #[must_use]
    pub fn height_at(&self, node: NodeId) -> Option<i32> {
        self.entry_heights.get(node.index()).copied().flatten()
    }

    /// Instructions entered with an empty stack, in tree order.
    ///
    /// These are the points where control flow can be rerouted without having to preserve
    /// values on the stack.
    #[must_use]
    pub fn zero_height_points(&self, tree: &InstructionTree) -> Vec<NodeId> {
        tree.instructions()
            .into_iter()
            .filter(|&id| self.height_at(id) == Some(0))
            .collect()
    }

    /// Stores the computed maximum on the tree's body.
    ///
    /// With `preserve_larger`, a declared value above the computed one is kept.
    pub fn apply(&self, tree: &mut InstructionTree, preserve_larger: bool) {
        let info = tree.body_info_mut();
        info.max_stack = if preserve_larger {
            info.max_stack.max(self.max_stack)
        } else {
            self.max_stack
        };
    }
}

struct StackWalker<'a> {
    tree: &'a InstructionTree,
    resolver: &'a dyn SignatureResolver,
    heights: Vec<Option<i32>>,
    /// Try blocks whose handlers have been queued
    entered: Vec<bool>,
    worklist: VecDeque<(NodeId, i64)>,
    max: i64,
    walks: usize,
}

impl<'a> StackWalker<'a> {
    fn new(tree: &'a InstructionTree, resolver: &'a dyn SignatureResolver) -> Self {
        StackWalker {
            tree,
            resolver,
            heights: vec![None; tree.len()],
            entered: vec![false; tree.len()],
            worklist: VecDeque::new(),
            max: 0,
            walks: 0,
        }
    }

    fn walk(&mut self, start: NodeId, mut height: i64) -> Result<()> {
        let tree = self.tree;
        self.walks += 1;

        // A walk may start inside a region it did not enter from the top
        let mut ancestor = tree.parent(start);
        while let Some(block) = ancestor {
            self.enter(block);
            ancestor = tree.parent(block);
        }

        let mut cursor = Some(start);
        while let Some(id) = cursor {
            match &tree.node(id)?.kind {
                NodeKind::Label { .. } => cursor = tree.successor(id),
                NodeKind::Block(kind) => {
                    self.enter(id);
                    if kind.receives_exception() {
                        height = height.max(1);
                    }
                    cursor = tree.next_in_order(id);
                }
                NodeKind::Instruction(instruction) => {
                    if self.heights[id.index()].is_some_and(|seen| i64::from(seen) >= height) {
                        break;
                    }
                    self.heights[id.index()] = Some(bounded(height, id)?);
                    self.max = self.max.max(height);

                    let opcode = instruction.opcode;
                    if opcode.is_leave() {
                        self.defer(&instruction.operand, 0);
                        break;
                    }

                    let (pops, pushes) = self.effect(instruction)?;
                    let exit = height - pops + pushes;
                    bounded(exit, id)?;
                    self.max = self.max.max(exit);

                    match opcode.flow() {
                        FlowType::UnconditionalBranch => {
                            self.defer(&instruction.operand, exit);
                            break;
                        }
                        FlowType::ConditionalBranch | FlowType::Switch => {
                            self.defer(&instruction.operand, exit);
                        }
                        FlowType::Return
                        | FlowType::Throw
                        | FlowType::EndFinally
                        | FlowType::EndFilter
                        | FlowType::Leave => break,
                        FlowType::Sequential | FlowType::Call | FlowType::Prefix => {}
                    }

                    height = exit;
                    cursor = tree.successor(id);
                }
            }
        }
        Ok(())
    }

    /// Queues the handlers and filters of a try block the first time it is entered.
    fn enter(&mut self, block: NodeId) {
        let tree = self.tree;
        let Some(BlockKind::Try { handlers }) = tree.block_kind(block) else {
            return;
        };
        if std::mem::replace(&mut self.entered[block.index()], true) {
            return;
        }

        for &handler in handlers {
            if let Some(BlockKind::Handler {
                filter: Some(filter),
                ..
            }) = tree.block_kind(handler)
            {
                self.worklist.push_back((*filter, 0));
            }
            self.worklist.push_back((handler, 0));
        }
    }

    fn defer(&mut self, operand: &TreeOperand, height: i64) {
        for &label in operand.labels() {
            self.worklist.push_back((label, height));
        }
    }

    fn effect(&self, instruction: &TreeInstruction) -> Result<(i64, i64)> {
        let opcode = instruction.opcode;
        if opcode.is_call_family() {
            let TreeOperand::Token(token) = instruction.operand else {
                return Err(Error::UnsupportedOperand(format!(
                    "{opcode} without a signature token"
                )));
            };
            let site = self.resolver.call_site(opcode, token)?;
            return Ok((i64::from(site.pops(opcode)), i64::from(site.pushes(opcode))));
        }
        if opcode == OpCode::RET {
            return Ok((i64::from(self.resolver.returns_value()), 0));
        }

        match (opcode.pops(), opcode.pushes()) {
            (Some(pops), Some(pushes)) => Ok((i64::from(pops), i64::from(pushes))),
            _ => Err(Error::UnsupportedOperand(format!(
                "{opcode} has no fixed stack effect"
            ))),
        }
    }
}

fn bounded(height: i64, node: NodeId) -> Result<i32> {
    i16::try_from(height)
        .map(i32::from)
        .map_err(|_| Error::StackBound {
            height,
            node: node.index(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{CallSite, SignatureTable},
        assembly::{Immediate, OperandType},
        method::HandlerKind,
        token::Token,
        tree::BodyInfo,
    };

    const CALLEE: Token = Token(0x0A00_0001);

    /// Builds a flat tree; branch and switch targets are instruction indices.
    fn assemble(program: &[(&str, &[usize])]) -> (InstructionTree, Vec<NodeId>) {
        let mut tree = InstructionTree::new(BodyInfo::default());
        let root = tree.root();
        let mut nodes = Vec::new();
        for (mnemonic, _) in program {
            let opcode = OpCode::from_mnemonic(mnemonic).unwrap();
            let operand = match opcode.operand_type() {
                OperandType::Token => TreeOperand::Token(CALLEE),
                OperandType::Int8 => TreeOperand::Immediate(Immediate::Int8(10)),
                OperandType::UInt8 => TreeOperand::Immediate(Immediate::UInt8(0)),
                OperandType::UInt16 => TreeOperand::Immediate(Immediate::UInt16(0)),
                OperandType::Int32 => TreeOperand::Immediate(Immediate::Int32(10)),
                OperandType::Int64 => TreeOperand::Immediate(Immediate::Int64(10)),
                OperandType::Float32 => TreeOperand::Immediate(Immediate::Float32(1.0)),
                OperandType::Float64 => TreeOperand::Immediate(Immediate::Float64(1.0)),
                _ => TreeOperand::None,
            };
            let node = tree.new_instruction(opcode, operand).unwrap();
            tree.append(root, node).unwrap();
            nodes.push(node);
        }
        (tree, nodes)
    }

    fn bind(tree: &mut InstructionTree, nodes: &[NodeId], program: &[(&str, &[usize])]) {
        for (index, (_, targets)) in program.iter().enumerate() {
            let targets: Vec<NodeId> = targets.iter().map(|&t| nodes[t]).collect();
            match targets.len() {
                0 => {}
                1 if tree.instruction(nodes[index]).unwrap().opcode.is_branch() => {
                    tree.set_branch_target(nodes[index], targets[0]).unwrap();
                }
                _ => {
                    tree.set_switch_targets(nodes[index], &targets).unwrap();
                }
            }
        }
    }

    fn analyze(program: &[(&str, &[usize])]) -> Result<(StackAnalysis, Vec<NodeId>)> {
        let (mut tree, nodes) = assemble(program);
        bind(&mut tree, &nodes, program);
        let resolver = SignatureTable::new(true).with(CALLEE, CallSite::new(2, false, true));
        StackAnalysis::compute(&tree, &resolver).map(|analysis| (analysis, nodes))
    }

    #[test]
    fn test_conditional_branch() {
        let (analysis, nodes) = analyze(&[
            ("ldc.i4.1", &[]),
            ("brtrue.s", &[3]),
            ("ldc.i4.2", &[]),
            ("ret", &[]),
        ])
        .unwrap();
        assert_eq!(analysis.max_stack, 1);
        assert_eq!(analysis.height_at(nodes[0]), Some(0));
        assert_eq!(analysis.height_at(nodes[1]), Some(1));
        assert_eq!(analysis.height_at(nodes[2]), Some(0));
        // Reached with 0 by the branch and with 1 by falling through
        assert_eq!(analysis.height_at(nodes[3]), Some(1));
    }

    #[test]
    fn test_counting_loop() {
        let (analysis, nodes) = analyze(&[
            ("ldc.i4.0", &[]),
            ("stloc.0", &[]),
            ("ldloc.0", &[]),
            ("ldc.i4.1", &[]),
            ("add", &[]),
            ("stloc.0", &[]),
            ("ldloc.0", &[]),
            ("ldc.i4.s", &[]),
            ("blt.s", &[2]),
            ("ldc.i4.0", &[]),
            ("ret", &[]),
        ])
        .unwrap();
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.height_at(nodes[2]), Some(0));
        assert_eq!(analysis.height_at(nodes[8]), Some(2));
    }

    #[test]
    fn test_growing_loop_hits_bound() {
        let result = analyze(&[("ldc.i4.0", &[]), ("br.s", &[0])]);
        assert!(matches!(result, Err(Error::StackBound { height: 32768, .. })));
    }

    #[test]
    fn test_switch_fan_out() {
        let (analysis, nodes) = analyze(&[
            ("ldarg.0", &[]),
            ("switch", &[4, 6]),
            ("ldc.i4.0", &[]),
            ("ret", &[]),
            ("ldc.i4.1", &[]),
            ("ret", &[]),
            ("ldc.i4.2", &[]),
            ("ldc.i4.3", &[]),
            ("add", &[]),
            ("ret", &[]),
        ])
        .unwrap();
        assert_eq!(analysis.max_stack, 2);
        for &node in &nodes {
            assert!(analysis.height_at(node).is_some());
        }
        assert_eq!(analysis.height_at(nodes[7]), Some(1));
    }

    #[test]
    fn test_calls_use_resolver() {
        let (analysis, nodes) = analyze(&[
            ("ldarg.0", &[]),
            ("ldarg.1", &[]),
            ("ldarg.2", &[]),
            ("call", &[]),
            ("add", &[]),
            ("ret", &[]),
        ])
        .unwrap();
        assert_eq!(analysis.max_stack, 3);
        // Two parameters popped, one result pushed
        assert_eq!(analysis.height_at(nodes[4]), Some(2));

        let (tree, _) = assemble(&[("call", &[]), ("ret", &[])]);
        let empty = SignatureTable::new(false);
        assert!(matches!(
            StackAnalysis::compute(&tree, &empty),
            Err(Error::TokenNotFound(CALLEE))
        ));
    }

    #[test]
    fn test_handlers_start_with_exception() {
        // try { ldc.i4.1; ldc.i4.2; pop; pop; leave.s END } catch { pop; leave.s END } nop; END: ret
        let program: &[(&str, &[usize])] = &[
            ("ldc.i4.1", &[]),
            ("ldc.i4.2", &[]),
            ("pop", &[]),
            ("pop", &[]),
            ("leave.s", &[8]),
            ("pop", &[]),
            ("leave.s", &[8]),
            ("nop", &[]),
            ("ret", &[]),
        ];
        let (mut tree, nodes) = assemble(program);
        let try_block = tree.group(nodes[0], nodes[4], BlockKind::new_try()).unwrap();
        let handler = tree
            .group(nodes[5], nodes[6], BlockKind::new_handler(HandlerKind::Catch))
            .unwrap();
        tree.link_handler(try_block, handler).unwrap();
        bind(&mut tree, &nodes, program);

        let analysis = StackAnalysis::compute(&tree, &SignatureTable::new(false)).unwrap();
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.height_at(nodes[5]), Some(1));
        assert_eq!(analysis.height_at(nodes[6]), Some(0));
        assert_eq!(analysis.height_at(nodes[8]), Some(0));
        // The nop is only reachable by falling out of the handler, which never happens
        assert_eq!(analysis.height_at(nodes[7]), None);
    }

    #[test]
    fn test_leave_empties_stack() {
        let program: &[(&str, &[usize])] = &[
            ("ldc.i4.1", &[]),
            ("ldc.i4.2", &[]),
            ("leave.s", &[4]),
            ("endfinally", &[]),
            ("ret", &[]),
        ];
        let (mut tree, nodes) = assemble(program);
        let try_block = tree.group(nodes[0], nodes[2], BlockKind::new_try()).unwrap();
        let handler = tree
            .group(nodes[3], nodes[3], BlockKind::new_handler(HandlerKind::Finally))
            .unwrap();
        tree.link_handler(try_block, handler).unwrap();
        bind(&mut tree, &nodes, program);

        let analysis = StackAnalysis::compute(&tree, &SignatureTable::new(false)).unwrap();
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.height_at(nodes[3]), Some(0));
        assert_eq!(analysis.height_at(nodes[4]), Some(0));
        assert_eq!(analysis.zero_height_points(&tree), [nodes[0], nodes[3], nodes[4]]);
    }

    #[test]
    fn test_apply_respects_preserve() {
        let (mut tree, _) = assemble(&[("ldc.i4.1", &[]), ("ret", &[])]);
        tree.body_info_mut().max_stack = 8;
        let analysis = StackAnalysis::compute(&tree, &SignatureTable::new(true)).unwrap();
        assert_eq!(analysis.max_stack, 1);

        analysis.apply(&mut tree, true);
        assert_eq!(tree.body_info().max_stack, 8);
        analysis.apply(&mut tree, false);
        assert_eq!(tree.body_info().max_stack, 1);
    }
}
