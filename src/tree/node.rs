use std::{fmt, mem};

use crate::{
    assembly::{Immediate, OpCode},
    method::{HandlerKind, LocalVariable},
    token::Token,
};

/// Stable handle of a node inside an [`crate::tree::InstructionTree`] arena.
///
/// Handles stay valid for the lifetime of the tree; removing a node detaches it but never
/// frees its slot, so a handle can not be reused for a different node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Create a new `NodeId` from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

/// Header values owned by the root block of a tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyInfo {
    /// Declared maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialise locals on entry
    pub init_locals: bool,
    /// Token of the local variable signature
    pub local_var_sig_token: Token,
    /// Local variable slots
    pub locals: Vec<LocalVariable>,
}

/// The role of a block node.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// The root of a tree; its header values live in [`BodyInfo`]
    Body,
    /// A grouping without runtime meaning
    Plain,
    /// A protected region
    Try {
        /// Handler blocks protecting this region, in clause order
        handlers: Vec<NodeId>,
    },
    /// A handler region
    Handler {
        /// The protected region this handler belongs to
        try_block: Option<NodeId>,
        /// The filter block deciding whether this handler runs, for filter handlers
        filter: Option<NodeId>,
        /// The caught exception type, for catch handlers
        catch_type: Option<Token>,
        /// Clause kind
        kind: HandlerKind,
    },
    /// A filter region, immediately preceding its handler
    Filter {
        /// The protected region
        try_block: Option<NodeId>,
        /// The handler this filter guards
        handler: Option<NodeId>,
    },
}

impl BlockKind {
    /// An unlinked try block.
    #[must_use]
    pub fn new_try() -> Self {
        BlockKind::Try {
            handlers: Vec::new(),
        }
    }

    /// An unlinked handler block of the given kind.
    #[must_use]
    pub fn new_handler(kind: HandlerKind) -> Self {
        BlockKind::Handler {
            try_block: None,
            filter: None,
            catch_type: None,
            kind,
        }
    }

    /// An unlinked filter block.
    #[must_use]
    pub fn new_filter() -> Self {
        BlockKind::Filter {
            try_block: None,
            handler: None,
        }
    }

    /// Returns true if both kinds are the same variant, ignoring their payload.
    #[must_use]
    pub fn same_variant(&self, other: &BlockKind) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Returns true if the block still references, or is referenced by, other regions.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        match self {
            BlockKind::Try { handlers } => !handlers.is_empty(),
            BlockKind::Handler {
                try_block, filter, ..
            } => try_block.is_some() || filter.is_some(),
            BlockKind::Filter { try_block, handler } => try_block.is_some() || handler.is_some(),
            BlockKind::Body | BlockKind::Plain => false,
        }
    }

    /// Returns true if the runtime pushes the exception object when entering the block.
    #[must_use]
    pub fn receives_exception(&self) -> bool {
        match self {
            BlockKind::Filter { .. } => true,
            BlockKind::Handler { kind, .. } => kind.receives_exception(),
            _ => false,
        }
    }
}

/// Operand of an instruction node.
///
/// Same as [`crate::assembly::Operand`], except that branch targets are label nodes instead of
/// relative offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeOperand {
    /// No operand present
    None,
    /// Immediate value
    Immediate(Immediate),
    /// Metadata token reference
    Token(Token),
    /// Branch target
    Label(NodeId),
    /// Switch targets
    Labels(Vec<NodeId>),
}

impl TreeOperand {
    /// Label nodes referenced by this operand.
    #[must_use]
    pub fn labels(&self) -> &[NodeId] {
        match self {
            TreeOperand::Label(label) => std::slice::from_ref(label),
            TreeOperand::Labels(labels) => labels,
            _ => &[],
        }
    }
}

/// An instruction node's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeInstruction {
    /// The opcode; branch opcodes may be either form, the lowerer picks the final one
    pub opcode: OpCode,
    /// The operand
    pub operand: TreeOperand,
}

/// The variant part of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A container of child nodes
    Block(BlockKind),
    /// An instruction
    Instruction(TreeInstruction),
    /// A zero-width branch target marker
    Label {
        /// The branch or switch instruction whose operand references this label
        owner: Option<NodeId>,
    },
}

/// One slot of the arena: shared links plus the variant payload.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    // Only blocks have children
    pub(crate) first_child: Option<NodeId>,
    pub(crate) last_child: Option<NodeId>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Node {
            parent: None,
            prev: None,
            next: None,
            first_child: None,
            last_child: None,
            kind,
        }
    }

    /// The owning block.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The previous sibling.
    #[must_use]
    pub fn prev(&self) -> Option<NodeId> {
        self.prev
    }

    /// The next sibling.
    #[must_use]
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// The first child, for blocks.
    #[must_use]
    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    /// The last child, for blocks.
    #[must_use]
    pub fn last_child(&self) -> Option<NodeId> {
        self.last_child
    }

    /// The variant payload.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns true for block nodes.
    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self.kind, NodeKind::Block(_))
    }

    /// Returns true for instruction nodes.
    #[must_use]
    pub fn is_instruction(&self) -> bool {
        matches!(self.kind, NodeKind::Instruction(_))
    }

    /// Returns true for label nodes.
    #[must_use]
    pub fn is_label(&self) -> bool {
        matches!(self.kind, NodeKind::Label { .. })
    }

    /// The block kind, for blocks.
    #[must_use]
    pub fn block_kind(&self) -> Option<&BlockKind> {
        match &self.kind {
            NodeKind::Block(kind) => Some(kind),
            _ => None,
        }
    }

    /// The instruction payload, for instructions.
    #[must_use]
    pub fn instruction(&self) -> Option<&TreeInstruction> {
        match &self.kind {
            NodeKind::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }
}
