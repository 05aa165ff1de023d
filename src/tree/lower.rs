//! Flattening a tree back into a method body.
//!
//! Lowering never modifies the tree. The instructions are collected in pre-order, every label
//! resolves to the instruction that follows it, and every region block to the run of
//! instructions it contains. Branches then go through a relaxation fixpoint: all of them start
//! out in the 2-byte short form, and any branch whose distance does not fit a signed byte is
//! widened to the 5-byte long form. Since widening only ever grows the code, each branch is
//! widened at most once and the loop terminates.

use crate::{
    assembly::{Instruction, OpCode, Operand},
    method::{ExceptionHandler, HandlerKind, MethodBody},
    tree::{BlockKind, InstructionTree, NodeId, NodeKind, TreeOperand},
    Error, Result,
};

const SHORT_BRANCH_SIZE: u32 = 2;
const LONG_BRANCH_SIZE: u32 = 5;

/// One instruction of the flattened stream.
struct Slot<'a> {
    opcode: OpCode,
    operand: &'a TreeOperand,
    /// Indices of the instructions the label operands resolve to
    targets: Vec<usize>,
    /// Set while a branch is still in its short form
    short: bool,
}

/// Result of the pre-order walk.
struct Flattened<'a> {
    slots: Vec<Slot<'a>>,
    /// Half-open instruction index range of every visited block
    ranges: Vec<Option<(usize, usize)>>,
    /// Post-order position of every visited block
    post_order: Vec<Option<usize>>,
    try_blocks: Vec<NodeId>,
}

/// Byte layout of the flattened stream.
struct Layout {
    sizes: Vec<u32>,
    /// Start offset of every instruction, plus the code size as last element
    offsets: Vec<u32>,
}

impl Layout {
    fn new(sizes: Vec<u32>) -> Result<Self> {
        let mut layout = Layout {
            offsets: vec![0; sizes.len() + 1],
            sizes,
        };
        layout.recompute(0)?;
        Ok(layout)
    }

    fn recompute(&mut self, from: usize) -> Result<()> {
        for index in from..self.sizes.len() {
            self.offsets[index + 1] = self.offsets[index]
                .checked_add(self.sizes[index])
                .ok_or_else(|| Error::Layout("code size exceeds 4 GiB".to_string()))?;
        }
        Ok(())
    }

    /// Offset of `target` relative to the end of instruction `index`.
    fn relative(&self, index: usize, target: usize) -> i64 {
        i64::from(self.offsets[target]) - i64::from(self.offsets[index + 1])
    }

    /// Byte offset and length of the half-open instruction range.
    fn extent(&self, (start, end): (usize, usize)) -> (u32, u32) {
        (self.offsets[start], self.offsets[end] - self.offsets[start])
    }
}

impl InstructionTree {
    /// Flattens the tree into a method body.
    ///
    /// Branches get the shortest encoding the final layout allows. Exception clauses are
    /// emitted innermost first; clauses of the same try block keep the order of its handler
    /// list. Header values are copied from [`crate::tree::BodyInfo`] unchanged, so callers that
    /// edited the tree should run the stack analysis first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Layout`] for branches without target, bound labels with no
    /// instruction after them, empty regions, handlers that are detached or linked to another
    /// try, and filters that do not end where their handler starts.
    pub fn lower(&self) -> Result<MethodBody> {
        let flat = self.flatten()?;

        let mut sizes = Vec::with_capacity(flat.slots.len());
        for slot in &flat.slots {
            sizes.push(slot_size(slot)?);
        }
        let mut layout = Layout::new(sizes)?;
        let mut slots = flat.slots;

        let mut iterations = 0;
        let mut widened = 0;
        loop {
            iterations += 1;
            let mut earliest = None;
            for (index, slot) in slots.iter_mut().enumerate() {
                if !slot.short {
                    continue;
                }
                let relative = layout.relative(index, slot.targets[0]);
                if i8::try_from(relative).is_err() {
                    log::trace!(
                        "widening {} at 0x{:X}, distance {}",
                        slot.opcode,
                        layout.offsets[index],
                        relative
                    );
                    slot.short = false;
                    layout.sizes[index] = LONG_BRANCH_SIZE;
                    earliest.get_or_insert(index);
                    widened += 1;
                }
            }

            match earliest {
                Some(from) => layout.recompute(from)?,
                None => break,
            }
        }

        let mut instructions = Vec::with_capacity(slots.len());
        for (index, slot) in slots.iter().enumerate() {
            instructions.push(emit(slot, index, &layout)?);
        }

        let exception_handlers =
            self.lower_clauses(&flat.ranges, &flat.post_order, flat.try_blocks, &layout)?;

        log::debug!(
            "lowered {} instructions ({} bytes), {} exception clauses, {} relaxation passes, {} widened branches",
            instructions.len(),
            layout.offsets[instructions.len()],
            exception_handlers.len(),
            iterations,
            widened
        );

        Ok(MethodBody {
            max_stack: self.info.max_stack,
            init_locals: self.info.init_locals,
            local_var_sig_token: self.info.local_var_sig_token,
            locals: self.info.locals.clone(),
            instructions,
            exception_handlers,
        })
    }

    fn flatten(&self) -> Result<Flattened<'_>> {
        let mut slots: Vec<Slot<'_>> = Vec::new();
        let mut ranges = vec![None; self.nodes.len()];
        let mut post_order = vec![None; self.nodes.len()];
        let mut try_blocks = Vec::new();

        // Every label maps to the index of the next instruction in pre-order
        let mut label_index = vec![None; self.nodes.len()];
        let mut pending: Vec<NodeId> = Vec::new();
        let mut block_start = vec![0; self.nodes.len()];
        let mut next_post = 0;

        let mut stack = vec![(self.root, false)];
        while let Some((id, done)) = stack.pop() {
            let node = self.node(id)?;
            if done {
                ranges[id.0] = Some((block_start[id.0], slots.len()));
                post_order[id.0] = Some(next_post);
                next_post += 1;
                continue;
            }

            match &node.kind {
                NodeKind::Block(kind) => {
                    if matches!(kind, BlockKind::Try { .. }) {
                        try_blocks.push(id);
                    }
                    block_start[id.0] = slots.len();
                    stack.push((id, true));
                    let children: Vec<NodeId> = self.children(id).collect();
                    stack.extend(children.into_iter().rev().map(|child| (child, false)));
                }
                NodeKind::Label { .. } => pending.push(id),
                NodeKind::Instruction(instruction) => {
                    for label in pending.drain(..) {
                        label_index[label.0] = Some(slots.len());
                    }
                    let short = instruction.opcode.is_branch();
                    slots.push(Slot {
                        opcode: instruction.opcode,
                        operand: &instruction.operand,
                        targets: Vec::new(),
                        short,
                    });
                }
            }
        }

        if let Some(&label) = pending.iter().find(|&&l| self.label_owner(l).is_some()) {
            return Err(Error::Layout(format!(
                "{label} is a branch target without instruction after it"
            )));
        }

        for slot in &mut slots {
            let needs_targets = slot.opcode.is_branch() || slot.opcode.is_switch();
            if !needs_targets {
                continue;
            }
            let labels = slot.operand.labels();
            if slot.opcode.is_branch() && labels.len() != 1 {
                return Err(Error::Layout(format!("{} without target", slot.opcode)));
            }
            if slot.opcode.is_switch() && !matches!(slot.operand, TreeOperand::Labels(_)) {
                return Err(Error::Layout("switch without targets".to_string()));
            }
            for label in labels {
                let target = label_index.get(label.0).copied().flatten().ok_or_else(|| {
                    Error::Layout(format!("{label} is not placed in the tree"))
                })?;
                slot.targets.push(target);
            }
        }

        Ok(Flattened {
            slots,
            ranges,
            post_order,
            try_blocks,
        })
    }

    fn lower_clauses(
        &self,
        ranges: &[Option<(usize, usize)>],
        post_order: &[Option<usize>],
        try_blocks: Vec<NodeId>,
        layout: &Layout,
    ) -> Result<Vec<ExceptionHandler>> {
        let region = |block: NodeId| -> Result<(u32, u32)> {
            match ranges.get(block.0).copied().flatten() {
                Some((start, end)) if start < end => Ok(layout.extent((start, end))),
                Some(_) => Err(Error::Layout(format!("{block} is an empty region"))),
                None => Err(Error::Layout(format!("{block} is not part of the tree"))),
            }
        };

        // A try is emitted once its innermost-last member region is complete
        let mut ordered = Vec::with_capacity(try_blocks.len());
        for try_block in try_blocks {
            let Some(BlockKind::Try { handlers }) = self.block_kind(try_block) else {
                continue;
            };
            if handlers.is_empty() {
                continue;
            }
            let mut key = post_order[try_block.0];
            for &handler in handlers {
                let filter = match self.block_kind(handler) {
                    Some(BlockKind::Handler {
                        try_block: Some(owner),
                        filter,
                        ..
                    }) if *owner == try_block => *filter,
                    _ => {
                        return Err(Error::Layout(format!(
                            "{handler} is not a handler of {try_block}"
                        )))
                    }
                };
                for member in std::iter::once(handler).chain(filter) {
                    let position = post_order.get(member.0).copied().flatten().ok_or_else(|| {
                        Error::Layout(format!("{member} is not part of the tree"))
                    })?;
                    key = key.max(Some(position));
                }
            }
            ordered.push((key, try_block, handlers));
        }
        ordered.sort_by_key(|&(key, _, _)| key);

        let mut clauses = Vec::new();
        for (_, try_block, handlers) in ordered {
            let (try_offset, try_length) = region(try_block)?;

            for &handler in handlers {
                let Some(BlockKind::Handler {
                    filter,
                    catch_type,
                    kind,
                    ..
                }) = self.block_kind(handler)
                else {
                    continue;
                };
                let (handler_offset, handler_length) = region(handler)?;

                let filter_offset = match (kind, filter) {
                    (HandlerKind::Filter, Some(filter)) => {
                        let (filter_offset, filter_length) = region(*filter)?;
                        if filter_offset + filter_length != handler_offset {
                            return Err(Error::Layout(format!(
                                "filter {filter} ends at 0x{:X}, its handler starts at 0x{handler_offset:X}",
                                filter_offset + filter_length
                            )));
                        }
                        Some(filter_offset)
                    }
                    (HandlerKind::Filter, None) => {
                        return Err(Error::Layout(format!("{handler} has no filter block")))
                    }
                    _ => None,
                };

                clauses.push(ExceptionHandler {
                    flags: kind.flags(),
                    try_offset,
                    try_length,
                    handler_offset,
                    handler_length,
                    filter_offset,
                    catch_type: if *kind == HandlerKind::Catch {
                        *catch_type
                    } else {
                        None
                    },
                });
            }
        }
        Ok(clauses)
    }
}

fn slot_size(slot: &Slot<'_>) -> Result<u32> {
    if slot.opcode.is_branch() {
        return Ok(SHORT_BRANCH_SIZE);
    }
    if let TreeOperand::Labels(labels) = slot.operand {
        return u32::try_from(labels.len())
            .ok()
            .and_then(|count| count.checked_mul(4))
            .and_then(|bytes| bytes.checked_add(slot.opcode.size() + 4))
            .ok_or_else(|| Error::Layout(format!("switch with {} targets", labels.len())));
    }

    let operand_size = slot.opcode.operand_type().size().ok_or_else(|| {
        Error::UnsupportedOperand(format!("{} has no fixed operand size", slot.opcode))
    })?;
    Ok(slot.opcode.size() + operand_size)
}

fn emit(slot: &Slot<'_>, index: usize, layout: &Layout) -> Result<Instruction> {
    let relative = |target: usize| {
        i32::try_from(layout.relative(index, target))
            .map_err(|_| Error::Layout("branch distance exceeds 2 GiB".to_string()))
    };

    let (opcode, operand) = if slot.opcode.is_branch() {
        let form = if slot.short {
            slot.opcode.short_form()
        } else {
            slot.opcode.long_form()
        };
        let opcode = form.ok_or_else(|| {
            Error::UnsupportedOperand(format!("{} has no branch forms", slot.opcode))
        })?;
        (opcode, Operand::Branch(relative(slot.targets[0])?))
    } else {
        let operand = match slot.operand {
            TreeOperand::None => Operand::None,
            TreeOperand::Immediate(imm) => Operand::Immediate(*imm),
            TreeOperand::Token(token) => Operand::Token(*token),
            TreeOperand::Labels(_) => Operand::Switch(
                slot.targets
                    .iter()
                    .map(|&target| relative(target))
                    .collect::<Result<Vec<_>>>()?,
            ),
            TreeOperand::Label(_) => {
                return Err(Error::UnsupportedOperand(format!(
                    "{} does not take a label",
                    slot.opcode
                )))
            }
        };
        (slot.opcode, operand)
    };

    let instruction = Instruction::new(opcode, operand)?;
    if instruction.size != layout.sizes[index] {
        return Err(Error::Layout(format!(
            "{} encodes to {} bytes, laid out as {}",
            opcode, instruction.size, layout.sizes[index]
        )));
    }
    Ok(instruction)
}
