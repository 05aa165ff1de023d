//! The instruction tree: an editable, structured form of a method body.
//!
//! A tree is an arena of [`Node`]s addressed by [`NodeId`]. Blocks own ordered sibling chains
//! of children; protected regions are blocks whose children are exactly the instructions they
//! protect, and branch targets are zero-width label nodes placed in front of the instruction
//! they mark. Because every region is a contiguous run of siblings, region ranges can only nest
//! or follow each other, and edits never need to fix up byte offsets.
//!
//! # Key Components
//!
//! - [`InstructionTree`] - The arena with its linkage operations
//! - [`InstructionTree::lift`] - Build a tree from a flat [`crate::method::MethodBody`]
//! - [`InstructionTree::lower`] - Flatten a tree, choosing minimal branch encodings
//! - [`InstructionTree::group`] - Wrap a run of siblings into a block
//!
//! # Examples
//!
//! ```rust
//! use ciltree::{method::MethodBody, tree::InstructionTree};
//!
//! // ldc.i4.1; brtrue.s +1; ldc.i4.2; ret
//! let body = MethodBody::parse(&[0x16, 0x17, 0x2D, 0x01, 0x18, 0x2A])?;
//! let tree = InstructionTree::lift(&body)?;
//! assert_eq!(tree.labels().len(), 1);
//!
//! let lowered = tree.lower()?;
//! assert_eq!(lowered.instructions, body.instructions);
//! # Ok::<(), ciltree::Error>(())
//! ```

mod display;
mod group;
mod labels;
mod lift;
mod linkage;
mod lower;
mod node;
mod traverse;

pub use node::{BlockKind, BodyInfo, Node, NodeId, NodeKind, TreeInstruction, TreeOperand};
pub use traverse::{Children, PreOrder};

use crate::{
    assembly::{OpCode, OperandType},
    method::HandlerKind,
    token::Token,
    Error, Result,
};

/// An arena-backed instruction tree for one method body.
///
/// The root is a [`BlockKind::Body`] block; its header values are kept in [`BodyInfo`].
/// Nodes created with `new_*` start out detached and become part of the tree once linked
/// in with [`InstructionTree::append`], [`InstructionTree::insert_before`] and friends.
#[derive(Debug, Clone)]
pub struct InstructionTree {
    nodes: Vec<Node>,
    root: NodeId,
    info: BodyInfo,
}

impl InstructionTree {
    /// Creates a tree holding only an empty root block.
    #[must_use]
    pub fn new(info: BodyInfo) -> Self {
        InstructionTree {
            nodes: vec![Node::new(NodeKind::Block(BlockKind::Body))],
            root: NodeId(0),
            info,
        }
    }

    /// The root block.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Header values of the method body.
    #[must_use]
    pub fn body_info(&self) -> &BodyInfo {
        &self.info
    }

    /// Mutable header values of the method body.
    pub fn body_info_mut(&mut self) -> &mut BodyInfo {
        &mut self.info
    }

    /// Number of arena slots, detached nodes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the arena holds nothing but the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::Structure(format!("unknown node {id}")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| Error::Structure(format!("unknown node {id}")))
    }

    /// The parent of `id`, `None` for the root, detached nodes and unknown ids.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// The previous sibling of `id`.
    #[must_use]
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.prev)
    }

    /// The next sibling of `id`.
    #[must_use]
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.next)
    }

    /// The first child of a block.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.first_child)
    }

    /// The last child of a block.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.last_child)
    }

    /// The kind of a block node, `None` for other nodes.
    #[must_use]
    pub fn block_kind(&self, id: NodeId) -> Option<&BlockKind> {
        self.nodes.get(id.0).and_then(Node::block_kind)
    }

    pub(crate) fn block_kind_mut(&mut self, id: NodeId) -> Result<&mut BlockKind> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Block(kind) => Ok(kind),
            _ => Err(Error::Structure(format!("{id} is not a block"))),
        }
    }

    /// The payload of an instruction node, `None` for other nodes.
    #[must_use]
    pub fn instruction(&self, id: NodeId) -> Option<&TreeInstruction> {
        self.nodes.get(id.0).and_then(Node::instruction)
    }

    /// Returns true if `id` is the root or hangs below it.
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.is_ancestor(self.root, id)
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    /// Creates a detached instruction node.
    ///
    /// Branch and switch instructions may be created without targets (`TreeOperand::None`) and
    /// bound later with [`InstructionTree::set_branch_target`] or
    /// [`InstructionTree::set_switch_targets`]; when created with labels, those must be unbound
    /// label nodes, which become owned by the new instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedOperand`] if the operand does not fit the opcode, and
    /// [`crate::Error::Structure`] if a label is unknown or already bound.
    pub fn new_instruction(&mut self, opcode: OpCode, operand: TreeOperand) -> Result<NodeId> {
        let op_type = opcode.operand_type();
        let fits = match (&operand, op_type) {
            (TreeOperand::None, OperandType::None)
            | (TreeOperand::None, OperandType::ShortBranch | OperandType::Branch)
            | (TreeOperand::None, OperandType::Switch)
            | (TreeOperand::Token(_), OperandType::Token)
            | (TreeOperand::Label(_), OperandType::ShortBranch | OperandType::Branch)
            | (TreeOperand::Labels(_), OperandType::Switch) => true,
            (TreeOperand::Immediate(imm), expected) => imm.operand_type() == expected,
            _ => false,
        };
        if !fits {
            return Err(Error::UnsupportedOperand(format!(
                "{opcode} expects {op_type:?}, got {operand:?}"
            )));
        }

        for &label in operand.labels() {
            self.ensure_unbound_label(label)?;
        }

        let labels = operand.labels().to_vec();
        let id = self.push_node(NodeKind::Instruction(TreeInstruction { opcode, operand }));
        for label in labels {
            self.bind_label(label, id)?;
        }
        Ok(id)
    }

    /// Creates a detached, empty block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] for [`BlockKind::Body`] and for region kinds that
    /// already carry links; regions are linked with [`InstructionTree::link_handler`] and
    /// [`InstructionTree::link_filter`].
    pub fn new_block(&mut self, kind: BlockKind) -> Result<NodeId> {
        if matches!(kind, BlockKind::Body) {
            return Err(Error::Structure("a tree has exactly one body block".to_string()));
        }
        if kind.is_linked() {
            return Err(Error::Structure(
                "new blocks must be created unlinked".to_string(),
            ));
        }
        Ok(self.push_node(NodeKind::Block(kind)))
    }

    /// Creates a detached, unbound label.
    pub fn new_label(&mut self) -> NodeId {
        self.push_node(NodeKind::Label { owner: None })
    }

    /// Replaces the opcode of an instruction with one of the same operand shape.
    ///
    /// Short and long branch forms are interchangeable, as are branches of different
    /// conditions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedOperand`] if the current operand does not fit the new
    /// opcode and [`crate::Error::Structure`] if `id` is not an instruction.
    pub fn set_opcode(&mut self, id: NodeId, opcode: OpCode) -> Result<()> {
        let instruction = self.instruction_mut(id)?;
        let compatible = match opcode.operand_type() {
            OperandType::ShortBranch | OperandType::Branch => instruction.opcode.is_branch(),
            OperandType::Switch => instruction.opcode.is_switch(),
            OperandType::None => {
                instruction.operand == TreeOperand::None
                    && !instruction.opcode.is_branch()
                    && !instruction.opcode.is_switch()
            }
            OperandType::Token => matches!(instruction.operand, TreeOperand::Token(_)),
            expected => matches!(
                &instruction.operand,
                TreeOperand::Immediate(imm) if imm.operand_type() == expected
            ),
        };
        if !compatible {
            return Err(Error::UnsupportedOperand(format!(
                "cannot turn {} into {opcode}",
                instruction.opcode
            )));
        }

        instruction.opcode = opcode;
        Ok(())
    }

    /// Replaces the operand of a non-branch instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedOperand`] for label operands or operands that do not
    /// fit the opcode, and [`crate::Error::Structure`] if `id` is not an instruction.
    pub fn set_operand(&mut self, id: NodeId, operand: TreeOperand) -> Result<()> {
        let instruction = self.instruction_mut(id)?;
        let op_type = instruction.opcode.operand_type();
        let fits = match (&operand, op_type) {
            (TreeOperand::None, OperandType::None) | (TreeOperand::Token(_), OperandType::Token) => {
                true
            }
            (TreeOperand::Immediate(imm), expected) => imm.operand_type() == expected,
            _ => false,
        };
        if !fits {
            return Err(Error::UnsupportedOperand(format!(
                "{} expects {op_type:?}, got {operand:?}",
                instruction.opcode
            )));
        }

        instruction.operand = operand;
        Ok(())
    }

    pub(crate) fn instruction_mut(&mut self, id: NodeId) -> Result<&mut TreeInstruction> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Instruction(instruction) => Ok(instruction),
            _ => Err(Error::Structure(format!("{id} is not an instruction"))),
        }
    }

    /// Sets the exception type of a catch handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `handler` is not a catch handler block.
    pub fn set_catch_type(&mut self, handler: NodeId, catch_type: Token) -> Result<()> {
        match self.block_kind_mut(handler)? {
            BlockKind::Handler {
                catch_type: slot,
                kind: HandlerKind::Catch,
                ..
            } => {
                *slot = Some(catch_type);
                Ok(())
            }
            _ => Err(Error::Structure(format!("{handler} is not a catch handler"))),
        }
    }

    /// Appends `handler` to the handler list of `try_block` and points it back at the try.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if the blocks have the wrong kinds, or the handler
    /// already belongs to a try block.
    pub fn link_handler(&mut self, try_block: NodeId, handler: NodeId) -> Result<()> {
        if !matches!(self.block_kind(try_block), Some(BlockKind::Try { .. })) {
            return Err(Error::Structure(format!("{try_block} is not a try block")));
        }

        match self.block_kind_mut(handler)? {
            BlockKind::Handler { try_block: slot, .. } => {
                if slot.is_some() {
                    return Err(Error::Structure(format!(
                        "{handler} already belongs to a try block"
                    )));
                }
                *slot = Some(try_block);
            }
            _ => return Err(Error::Structure(format!("{handler} is not a handler block"))),
        }

        if let BlockKind::Try { handlers } = self.block_kind_mut(try_block)? {
            handlers.push(handler);
        }
        Ok(())
    }

    /// Links a filter block to a filter handler that already belongs to a try block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if the handler is not a linked filter handler
    /// without a filter, or the filter is not an unlinked filter block.
    pub fn link_filter(&mut self, filter: NodeId, handler: NodeId) -> Result<()> {
        let try_block = match self.block_kind(handler) {
            Some(BlockKind::Handler {
                try_block: Some(try_block),
                filter: None,
                kind: HandlerKind::Filter,
                ..
            }) => *try_block,
            _ => {
                return Err(Error::Structure(format!(
                    "{handler} is not a linked filter handler without filter"
                )))
            }
        };

        match self.block_kind_mut(filter)? {
            BlockKind::Filter {
                try_block: try_slot,
                handler: handler_slot,
            } if try_slot.is_none() && handler_slot.is_none() => {
                *try_slot = Some(try_block);
                *handler_slot = Some(handler);
            }
            _ => {
                return Err(Error::Structure(format!(
                    "{filter} is not an unlinked filter block"
                )))
            }
        }

        if let BlockKind::Handler { filter: slot, .. } = self.block_kind_mut(handler)? {
            *slot = Some(filter);
        }
        Ok(())
    }

    /// Detaches a handler (and its filter, if any) from its try block.
    ///
    /// Afterwards all three blocks are unlinked as far as this handler is concerned and can be
    /// removed or ungrouped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `handler` is not a handler block.
    pub fn unlink_handler(&mut self, handler: NodeId) -> Result<()> {
        let (try_block, filter) = match self.block_kind_mut(handler)? {
            BlockKind::Handler {
                try_block, filter, ..
            } => (try_block.take(), filter.take()),
            _ => return Err(Error::Structure(format!("{handler} is not a handler block"))),
        };

        if let Some(try_block) = try_block {
            if let BlockKind::Try { handlers } = self.block_kind_mut(try_block)? {
                handlers.retain(|&h| h != handler);
            }
        }
        if let Some(filter) = filter {
            if let BlockKind::Filter {
                try_block,
                handler: slot,
            } = self.block_kind_mut(filter)?
            {
                *try_block = None;
                *slot = None;
            }
        }
        Ok(())
    }
}
