//! Building a tree out of a flat method body.
//!
//! Lifting happens in three passes over the body:
//!
//! 1. Every instruction becomes a child of the root block, and its byte offset is recorded.
//! 2. Every exception clause wraps its try range, and its handler range (plus the filter range
//!    for filter clauses), into region blocks with [`InstructionTree::group`].
//! 3. Every branch and switch offset is resolved to the instruction it lands on and replaced
//!    by a label in front of that instruction, or in front of the enclosing block when the
//!    target starts a region nested deeper than the branch.

use crate::{
    assembly::{Instruction, Operand},
    method::{ExceptionHandler, HandlerKind, MethodBody},
    tree::{BlockKind, BodyInfo, InstructionTree, NodeId, TreeOperand},
    Result,
};

/// Byte offsets of the instructions of a body.
struct CodeLayout {
    offsets: Vec<u32>,
    code_size: u32,
}

impl CodeLayout {
    fn index_at(&self, offset: u32) -> Result<usize> {
        self.offsets
            .binary_search(&offset)
            .map_err(|_| malformed_error!("Offset 0x{:X} is not on an instruction boundary", offset))
    }

    /// Indices of the first and last instruction covered by a byte range.
    fn span(&self, offset: u32, length: u32) -> Result<(usize, usize)> {
        if length == 0 {
            return Err(malformed_error!("Empty range at offset 0x{:X}", offset));
        }

        let first = self.index_at(offset)?;
        let end = u64::from(offset) + u64::from(length);
        let last = if end >= u64::from(self.code_size) {
            self.offsets.len() - 1
        } else {
            // Past `offset` and below the code size, so `end` fits a u32
            #[allow(clippy::cast_possible_truncation)]
            let next = self.index_at(end as u32)?;
            next.saturating_sub(1)
        };
        Ok((first, last))
    }
}

fn overlaps(a_start: u32, a_len: u32, b_start: u32, b_len: u32) -> bool {
    let (a_end, b_end) = (
        u64::from(a_start) + u64::from(a_len),
        u64::from(b_start) + u64::from(b_len),
    );
    u64::from(a_start) < b_end && u64::from(b_start) < a_end
}

impl InstructionTree {
    /// Builds a tree from a flat method body.
    ///
    /// The body's header values are copied onto the tree. The lift either succeeds completely
    /// or fails without producing a tree.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for branch targets or clause ranges that miss an
    /// instruction boundary or fall outside the code, clause ranges that overlap their own
    /// handler or cannot be nested, and handler ranges used by more than one clause.
    /// Instructions whose operand or size do not match their opcode are rejected with
    /// [`crate::Error::UnsupportedOperand`].
    pub fn lift(body: &MethodBody) -> Result<InstructionTree> {
        let mut tree = InstructionTree::new(BodyInfo {
            max_stack: body.max_stack,
            init_locals: body.init_locals,
            local_var_sig_token: body.local_var_sig_token,
            locals: body.locals.clone(),
        });
        let root = tree.root();

        let mut offsets = Vec::with_capacity(body.instructions.len());
        let mut nodes = Vec::with_capacity(body.instructions.len());
        let mut position = 0_u32;
        for instruction in &body.instructions {
            let size = Instruction::encoded_size(instruction.opcode, &instruction.operand)?;
            if size != instruction.size {
                return Err(malformed_error!(
                    "Instruction {} at 0x{:X} claims {} bytes, encodes to {}",
                    instruction.opcode,
                    position,
                    instruction.size,
                    size
                ));
            }

            offsets.push(position);
            position = position
                .checked_add(size)
                .ok_or_else(|| malformed_error!("Code size exceeds 4 GiB"))?;

            let operand = match &instruction.operand {
                Operand::None | Operand::Branch(_) | Operand::Switch(_) => TreeOperand::None,
                Operand::Immediate(imm) => TreeOperand::Immediate(*imm),
                Operand::Token(token) => TreeOperand::Token(*token),
            };
            let node = tree.new_instruction(instruction.opcode, operand)?;
            tree.append(root, node)?;
            nodes.push(node);
        }

        let layout = CodeLayout {
            offsets,
            code_size: position,
        };

        for (index, clause) in body.exception_handlers.iter().enumerate() {
            if nodes.is_empty() {
                return Err(malformed_error!("Exception clause {} in a body without code", index));
            }
            tree.lift_clause(&layout, &nodes, index, clause)?;
        }

        for (index, instruction) in body.instructions.iter().enumerate() {
            let next = i64::from(layout.offsets[index]) + i64::from(instruction.size);
            match &instruction.operand {
                Operand::Branch(relative) => {
                    let target = layout.branch_target(next, *relative)?;
                    let anchor = tree.label_anchor(
                        nodes[index],
                        nodes[target],
                        instruction.opcode.is_leave(),
                    );
                    tree.set_branch_target(nodes[index], anchor)?;
                }
                Operand::Switch(relatives) => {
                    let mut anchors = Vec::with_capacity(relatives.len());
                    for &relative in relatives {
                        let target = layout.branch_target(next, relative)?;
                        anchors.push(tree.label_anchor(nodes[index], nodes[target], false));
                    }
                    tree.set_switch_targets(nodes[index], &anchors)?;
                }
                _ => {}
            }
        }

        log::debug!(
            "lifted {} instructions ({} bytes), {} exception clauses, {} labels",
            nodes.len(),
            layout.code_size,
            body.exception_handlers.len(),
            tree.labels().len()
        );
        Ok(tree)
    }

    fn lift_clause(
        &mut self,
        layout: &CodeLayout,
        nodes: &[NodeId],
        index: usize,
        clause: &ExceptionHandler,
    ) -> Result<()> {
        let grouped = |tree: &mut InstructionTree, (first, last): (usize, usize), kind: BlockKind| {
            tree.group_run(nodes[first], nodes[last], kind)
                .map_err(|e| malformed_error!("Exception clause {}: {}", index, e))
        };

        if overlaps(
            clause.try_offset,
            clause.try_length,
            clause.handler_offset,
            clause.handler_length,
        ) {
            return Err(malformed_error!(
                "Exception clause {}: try and handler ranges overlap",
                index
            ));
        }

        let try_span = layout.span(clause.try_offset, clause.try_length)?;
        let handler_span = layout.span(clause.handler_offset, clause.handler_length)?;
        let kind = clause.kind();

        let (try_block, _) = grouped(self, try_span, BlockKind::new_try())?;

        let (handler, filter) = if kind == HandlerKind::Filter {
            let Some(filter_offset) = clause.filter_offset else {
                return Err(malformed_error!("Exception clause {}: filter without offset", index));
            };
            if filter_offset >= clause.handler_offset {
                return Err(malformed_error!(
                    "Exception clause {}: filter at 0x{:X} does not precede its handler",
                    index,
                    filter_offset
                ));
            }
            let filter_length = clause.handler_offset - filter_offset;
            if overlaps(clause.try_offset, clause.try_length, filter_offset, filter_length) {
                return Err(malformed_error!(
                    "Exception clause {}: try and filter ranges overlap",
                    index
                ));
            }

            let combined_length = filter_length
                .checked_add(clause.handler_length)
                .ok_or_else(|| malformed_error!("Exception clause {}: handler too long", index))?;
            let combined = layout.span(filter_offset, combined_length)?;
            let filter_span = layout.span(filter_offset, filter_length)?;

            // Both parts must end up as siblings, so the whole range is grouped first
            let (scope, created) = grouped(self, combined, BlockKind::Plain)?;
            let (filter, _) = grouped(self, filter_span, BlockKind::new_filter())?;
            let (handler, _) = grouped(self, handler_span, BlockKind::new_handler(kind))?;
            if created {
                self.ungroup(scope)?;
            }
            (handler, Some(filter))
        } else {
            let (handler, _) = grouped(self, handler_span, BlockKind::new_handler(kind))?;
            (handler, None)
        };

        for region in std::iter::once(handler).chain(filter) {
            let reused = match self.block_kind(region) {
                Some(BlockKind::Handler { try_block, .. } | BlockKind::Filter { try_block, .. }) => {
                    try_block.is_some()
                }
                _ => true,
            };
            if reused {
                return Err(malformed_error!(
                    "Exception clause {}: handler region {} is already in use",
                    index,
                    region
                ));
            }
        }

        self.link_handler(try_block, handler)?;
        if let Some(filter) = filter {
            self.link_filter(filter, handler)?;
        }
        if kind == HandlerKind::Catch {
            if let BlockKind::Handler { catch_type, .. } = self.block_kind_mut(handler)? {
                *catch_type = clause.catch_type;
            }
        }
        Ok(())
    }

    /// The node a label for a jump from `branch` to `target` goes in front of.
    ///
    /// Jumps to the first instruction of a region nested deeper than the branch land in front
    /// of the region block. `leave` exits its own block, so it resolves one level higher.
    fn label_anchor(&self, branch: NodeId, target: NodeId, leave: bool) -> NodeId {
        let mut level = self.depth(branch);
        if leave {
            level = level.saturating_sub(1);
        }

        let mut anchor = target;
        let mut depth = self.depth(target);
        while depth > level && self.leads_block(anchor) {
            match self.parent(anchor) {
                Some(parent) if parent != self.root => {
                    anchor = parent;
                    depth -= 1;
                }
                _ => break,
            }
        }
        anchor
    }

    /// Returns true if only labels precede `node` among its siblings.
    fn leads_block(&self, node: NodeId) -> bool {
        let mut prev = self.prev(node);
        while let Some(sibling) = prev {
            if !self.node(sibling).is_ok_and(|n| n.is_label()) {
                return false;
            }
            prev = self.prev(sibling);
        }
        true
    }
}

impl CodeLayout {
    /// Index of the instruction a relative offset, taken from `next`, lands on.
    fn branch_target(&self, next: i64, relative: i32) -> Result<usize> {
        let target = next + i64::from(relative);
        match u32::try_from(target) {
            Ok(target) if target < self.code_size => self.index_at(target),
            _ => Err(malformed_error!(
                "Branch target {} is outside the code (size 0x{:X})",
                target,
                self.code_size
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::{Immediate, Instruction, OpCode, Operand},
        method::{ExceptionHandler, ExceptionHandlerFlags, HandlerKind, MethodBody},
        token::Token,
        tree::{BlockKind, InstructionTree, NodeKind, TreeOperand},
        Error,
    };

    fn ins(mnemonic: &str, operand: Operand) -> Instruction {
        Instruction::new(OpCode::from_mnemonic(mnemonic).unwrap(), operand).unwrap()
    }

    fn body(instructions: Vec<Instruction>, handlers: Vec<ExceptionHandler>) -> MethodBody {
        MethodBody {
            max_stack: 2,
            instructions,
            exception_handlers: handlers,
            ..MethodBody::default()
        }
    }

    // try { nop; leave.s END } catch { pop; leave.s END } END: ret
    fn try_catch() -> MethodBody {
        body(
            vec![
                ins("nop", Operand::None),
                ins("leave.s", Operand::Branch(3)),
                ins("pop", Operand::None),
                ins("leave.s", Operand::Branch(0)),
                ins("ret", Operand::None),
            ],
            vec![ExceptionHandler::from_raw(
                ExceptionHandlerFlags::EXCEPTION,
                0,
                3,
                3,
                3,
                0x0100_0001,
            )],
        )
    }

    #[test]
    fn test_lift_branch() {
        let body = body(
            vec![
                ins("ldc.i4.1", Operand::None),
                ins("brtrue.s", Operand::Branch(1)),
                ins("ldc.i4.2", Operand::None),
                ins("ret", Operand::None),
            ],
            vec![],
        );
        let tree = InstructionTree::lift(&body).unwrap();
        let instructions = tree.instructions();
        assert_eq!(instructions.len(), 4);
        assert_eq!(tree.body_info().max_stack, 2);

        let labels = tree.labels();
        assert_eq!(labels.len(), 1);
        assert_eq!(tree.label_owner(labels[0]), Some(instructions[1]));
        assert_eq!(tree.label_target(labels[0]), Some(instructions[3]));
        assert_eq!(tree.next(labels[0]), Some(instructions[3]));
    }

    #[test]
    fn test_lift_try_catch() {
        let tree = InstructionTree::lift(&try_catch()).unwrap();
        let root = tree.root();
        let children: Vec<_> = tree.children(root).collect();
        assert_eq!(children.len(), 5);

        let (try_block, handler) = (children[0], children[1]);
        assert_eq!(
            tree.block_kind(try_block),
            Some(&BlockKind::Try {
                handlers: vec![handler]
            })
        );
        assert_eq!(
            tree.block_kind(handler),
            Some(&BlockKind::Handler {
                try_block: Some(try_block),
                filter: None,
                catch_type: Some(Token::new(0x0100_0001)),
                kind: HandlerKind::Catch,
            })
        );
        assert_eq!(tree.children(try_block).count(), 2);

        // Both leaves exit to the top level, in front of `ret`
        assert!(matches!(tree.node(children[2]).unwrap().kind(), NodeKind::Label { .. }));
        assert!(matches!(tree.node(children[3]).unwrap().kind(), NodeKind::Label { .. }));
        assert_eq!(tree.instruction(children[4]).unwrap().opcode, OpCode::RET);
    }

    #[test]
    fn test_lift_filter_clause() {
        let body = body(
            vec![
                ins("nop", Operand::None),
                ins("leave.s", Operand::Branch(7)),
                ins("pop", Operand::None),
                ins("ldc.i4.1", Operand::None),
                ins("endfilter", Operand::None),
                ins("pop", Operand::None),
                ins("leave.s", Operand::Branch(0)),
                ins("ret", Operand::None),
            ],
            vec![ExceptionHandler::from_raw(
                ExceptionHandlerFlags::FILTER,
                0,
                3,
                7,
                3,
                3,
            )],
        );
        let tree = InstructionTree::lift(&body).unwrap();
        let children: Vec<_> = tree.children(tree.root()).collect();
        let (try_block, filter, handler) = (children[0], children[1], children[2]);

        assert_eq!(
            tree.block_kind(filter),
            Some(&BlockKind::Filter {
                try_block: Some(try_block),
                handler: Some(handler),
            })
        );
        assert_eq!(tree.children(filter).count(), 3);
        assert!(matches!(
            tree.block_kind(handler),
            Some(BlockKind::Handler {
                filter: Some(_),
                kind: HandlerKind::Filter,
                ..
            })
        ));
        // The temporary grouping around filter and handler is gone
        assert!(!children
            .iter()
            .any(|&c| matches!(tree.block_kind(c), Some(BlockKind::Plain))));
    }

    #[test]
    fn test_branch_into_region_start_lands_before_block() {
        let body = body(
            vec![
                ins("br.s", Operand::Branch(0)),
                ins("nop", Operand::None),
                ins("leave.s", Operand::Branch(3)),
                ins("pop", Operand::None),
                ins("leave.s", Operand::Branch(0)),
                ins("ret", Operand::None),
            ],
            vec![ExceptionHandler::from_raw(
                ExceptionHandlerFlags::EXCEPTION,
                2,
                3,
                5,
                3,
                0x0100_0001,
            )],
        );
        let tree = InstructionTree::lift(&body).unwrap();
        let root = tree.root();
        let branch = tree.instructions()[0];
        let TreeOperand::Label(label) = tree.instruction(branch).unwrap().operand else {
            panic!("branch without label");
        };
        assert_eq!(tree.parent(label), Some(root));
        assert!(matches!(
            tree.block_kind(tree.next(label).unwrap()),
            Some(BlockKind::Try { .. })
        ));
    }

    #[test]
    fn test_lift_switch() {
        let body = body(
            vec![
                ins("ldarg.0", Operand::None),
                ins("switch", Operand::Switch(vec![0, 1])),
                ins("nop", Operand::None),
                ins("ret", Operand::None),
            ],
            vec![],
        );
        let tree = InstructionTree::lift(&body).unwrap();
        let instructions = tree.instructions();
        let TreeOperand::Labels(labels) = &tree.instruction(instructions[1]).unwrap().operand
        else {
            panic!("switch without labels");
        };
        assert_eq!(tree.label_target(labels[0]), Some(instructions[2]));
        assert_eq!(tree.label_target(labels[1]), Some(instructions[3]));
    }

    #[test]
    fn test_malformed_inputs() {
        // Target in the middle of ldc.i4
        let inside = body(
            vec![
                ins("br.s", Operand::Branch(1)),
                ins("ldc.i4", Operand::Immediate(Immediate::Int32(5))),
                ins("ret", Operand::None),
            ],
            vec![],
        );
        assert!(matches!(
            InstructionTree::lift(&inside),
            Err(Error::Malformed { .. })
        ));

        let outside = body(vec![ins("br.s", Operand::Branch(10))], vec![]);
        assert!(matches!(
            InstructionTree::lift(&outside),
            Err(Error::Malformed { .. })
        ));

        let mut reused = try_catch();
        let mut second = reused.exception_handlers[0].clone();
        second.flags = ExceptionHandlerFlags::FINALLY;
        second.catch_type = None;
        reused.exception_handlers.push(second);
        assert!(matches!(
            InstructionTree::lift(&reused),
            Err(Error::Malformed { .. })
        ));

        let mut overlapping = try_catch();
        overlapping.exception_handlers[0].handler_offset = 1;
        assert!(matches!(
            InstructionTree::lift(&overlapping),
            Err(Error::Malformed { .. })
        ));

        let mut empty = try_catch();
        empty.exception_handlers[0].try_length = 0;
        assert!(matches!(
            InstructionTree::lift(&empty),
            Err(Error::Malformed { .. })
        ));

        // byte 5 is the operand of the second leave.s
        let mut off_boundary = try_catch();
        off_boundary.exception_handlers[0].handler_offset = 5;
        off_boundary.exception_handlers[0].handler_length = 1;
        assert!(matches!(
            InstructionTree::lift(&off_boundary),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_crossing_clauses_rejected() {
        // The finally try starts inside the catch try and ends inside its handler
        let mut crossing = try_catch();
        crossing.exception_handlers.push(ExceptionHandler::from_raw(
            ExceptionHandlerFlags::FINALLY,
            1,
            3,
            6,
            1,
            0,
        ));

        match InstructionTree::lift(&crossing) {
            Err(Error::Malformed { message, .. }) => {
                assert!(message.starts_with("Exception clause 1:"), "{message}");
            }
            other => panic!("expected a malformed fault, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_size_rejected() {
        let mut broken = ins("nop", Operand::None);
        broken.size = 3;
        assert!(InstructionTree::lift(&body(vec![broken], vec![])).is_err());
    }
}
