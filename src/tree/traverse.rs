use crate::tree::{InstructionTree, Node, NodeId, NodeKind};

/// Iterator over the direct children of a block, in sibling order.
pub struct Children<'a> {
    tree: &'a InstructionTree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.next(current);
        Some(current)
    }
}

/// Pre-order iterator over a subtree.
///
/// The walk never leaves the subtree it was started on, even if the subtree root has siblings.
pub struct PreOrder<'a> {
    tree: &'a InstructionTree,
    bound: NodeId,
    next: Option<NodeId>,
}

impl Iterator for PreOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = match self.tree.first_child(current) {
            Some(child) => Some(child),
            None => self.tree.successor_within(current, self.bound),
        };
        Some(current)
    }
}

impl InstructionTree {
    /// The direct children of `block`; empty for non-blocks.
    #[must_use]
    pub fn children(&self, block: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(block),
        }
    }

    /// `node` followed by all of its descendants, in pre-order.
    #[must_use]
    pub fn pre_order(&self, node: NodeId) -> PreOrder<'_> {
        PreOrder {
            tree: self,
            bound: node,
            next: Some(node),
        }
    }

    /// All descendants of `node`, in pre-order, without `node` itself.
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> PreOrder<'_> {
        PreOrder {
            tree: self,
            bound: node,
            next: self.first_child(node),
        }
    }

    /// Number of blocks above `node`; zero for the root and detached subtree roots.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(node);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    /// Returns true if `ancestor` is a strict ancestor of `node`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    /// The node that follows `node` once its subtree is done: its next sibling, or the next
    /// sibling of its nearest ancestor that has one.
    #[must_use]
    pub fn successor(&self, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            if let Some(next) = self.next(current) {
                return Some(next);
            }
            current = self.parent(current)?;
        }
    }

    fn successor_within(&self, node: NodeId, bound: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            if current == bound {
                return None;
            }
            if let Some(next) = self.next(current) {
                return Some(next);
            }
            current = self.parent(current)?;
        }
    }

    /// The node after `node` in flat (pre-order) order, descending into blocks.
    #[must_use]
    pub fn next_in_order(&self, node: NodeId) -> Option<NodeId> {
        self.first_child(node).or_else(|| self.successor(node))
    }

    /// The node before `node` in flat (pre-order) order.
    #[must_use]
    pub fn prev_in_order(&self, node: NodeId) -> Option<NodeId> {
        match self.prev(node) {
            Some(prev) => Some(self.deepest_last(prev)),
            None => self.parent(node),
        }
    }

    fn deepest_last(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(last) = self.last_child(current) {
            current = last;
        }
        current
    }

    /// The first instruction after `node` in flat order, crossing block boundaries.
    #[must_use]
    pub fn next_instruction(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.next_in_order(node);
        while let Some(id) = current {
            if self.instruction(id).is_some() {
                return Some(id);
            }
            current = self.next_in_order(id);
        }
        None
    }

    /// The last instruction before `node` in flat order, crossing block boundaries.
    #[must_use]
    pub fn prev_instruction(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.prev_in_order(node);
        while let Some(id) = current {
            if self.instruction(id).is_some() {
                return Some(id);
            }
            current = self.prev_in_order(id);
        }
        None
    }

    /// The first descendant of `node`, in pre-order, matching `predicate`.
    pub fn find_first<P>(&self, node: NodeId, mut predicate: P) -> Option<NodeId>
    where
        P: FnMut(NodeId, &Node) -> bool,
    {
        self.descendants(node)
            .find(|&id| self.nodes.get(id.0).is_some_and(|n| predicate(id, n)))
    }

    /// The last descendant of `node`, in pre-order, matching `predicate`.
    pub fn find_last<P>(&self, node: NodeId, mut predicate: P) -> Option<NodeId>
    where
        P: FnMut(NodeId, &Node) -> bool,
    {
        self.last_child(node)?;
        let mut current = self.deepest_last(node);
        while current != node {
            if self.nodes.get(current.0).is_some_and(|n| predicate(current, n)) {
                return Some(current);
            }
            current = self.prev_in_order(current)?;
        }
        None
    }

    /// The first instruction inside `block`.
    #[must_use]
    pub fn first_instruction(&self, block: NodeId) -> Option<NodeId> {
        self.find_first(block, |_, n| n.is_instruction())
    }

    /// The last instruction inside `block`.
    #[must_use]
    pub fn last_instruction(&self, block: NodeId) -> Option<NodeId> {
        self.find_last(block, |_, n| n.is_instruction())
    }

    /// All attached instructions, in pre-order.
    #[must_use]
    pub fn instructions(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .filter(|&id| self.instruction(id).is_some())
            .collect()
    }

    /// All attached labels, in pre-order.
    #[must_use]
    pub fn labels(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .filter(|&id| matches!(self.nodes.get(id.0).map(Node::kind), Some(NodeKind::Label { .. })))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::OpCode,
        tree::{BlockKind, BodyInfo, InstructionTree, NodeId, TreeOperand},
    };

    // root: [a, outer: [b, inner: [c], d], e]
    fn sample() -> (InstructionTree, [NodeId; 7]) {
        let mut tree = InstructionTree::new(BodyInfo::default());
        let root = tree.root();
        let nop = |tree: &mut InstructionTree| {
            tree.new_instruction(OpCode::NOP, TreeOperand::None).unwrap()
        };
        let (a, b, c, d, e) = (
            nop(&mut tree),
            nop(&mut tree),
            nop(&mut tree),
            nop(&mut tree),
            nop(&mut tree),
        );
        let outer = tree.new_block(BlockKind::Plain).unwrap();
        let inner = tree.new_block(BlockKind::Plain).unwrap();

        tree.append(root, a).unwrap();
        tree.append(root, outer).unwrap();
        tree.append(root, e).unwrap();
        tree.append(outer, b).unwrap();
        tree.append(outer, inner).unwrap();
        tree.append(outer, d).unwrap();
        tree.append(inner, c).unwrap();
        (tree, [a, outer, b, inner, c, d, e])
    }

    #[test]
    fn test_pre_order_walks() {
        let (tree, [a, outer, b, inner, c, d, e]) = sample();
        let root = tree.root();

        assert_eq!(tree.instructions(), [a, b, c, d, e]);
        assert_eq!(
            tree.descendants(root).collect::<Vec<_>>(),
            [a, outer, b, inner, c, d, e]
        );
        // Bounded to the subtree
        assert_eq!(tree.pre_order(inner).collect::<Vec<_>>(), [inner, c]);
        assert_eq!(tree.descendants(outer).collect::<Vec<_>>(), [b, inner, c, d]);
        assert_eq!(tree.children(outer).collect::<Vec<_>>(), [b, inner, d]);
    }

    #[test]
    fn test_depth_and_ancestry() {
        let (tree, [a, outer, _, inner, c, _, _]) = sample();
        let root = tree.root();

        assert_eq!(tree.depth(root), 0);
        assert_eq!(tree.depth(a), 1);
        assert_eq!(tree.depth(c), 3);
        assert!(tree.is_ancestor(outer, c));
        assert!(tree.is_ancestor(root, inner));
        assert!(!tree.is_ancestor(c, c));
        assert!(!tree.is_ancestor(inner, a));
    }

    #[test]
    fn test_flat_order_neighbours() {
        let (tree, [a, outer, b, inner, c, d, e]) = sample();

        assert_eq!(tree.successor(c), Some(d));
        assert_eq!(tree.successor(d), Some(e));
        assert_eq!(tree.successor(e), None);
        assert_eq!(tree.next_in_order(outer), Some(b));
        assert_eq!(tree.prev_in_order(d), Some(c));
        assert_eq!(tree.prev_in_order(b), Some(outer));

        assert_eq!(tree.next_instruction(a), Some(b));
        assert_eq!(tree.next_instruction(c), Some(d));
        assert_eq!(tree.next_instruction(inner), Some(c));
        assert_eq!(tree.prev_instruction(e), Some(d));
        assert_eq!(tree.prev_instruction(b), Some(a));
        assert_eq!(tree.prev_instruction(a), None);
    }

    #[test]
    fn test_find_helpers() {
        let (tree, [a, outer, b, inner, c, d, e]) = sample();
        let root = tree.root();

        assert_eq!(tree.first_instruction(root), Some(a));
        assert_eq!(tree.last_instruction(root), Some(e));
        assert_eq!(tree.first_instruction(outer), Some(b));
        assert_eq!(tree.last_instruction(outer), Some(d));
        assert_eq!(tree.last_instruction(inner), Some(c));
        assert_eq!(tree.first_instruction(c), None);

        assert_eq!(tree.find_first(root, |_, n| n.is_block()), Some(outer));
        assert_eq!(tree.find_last(root, |_, n| n.is_block()), Some(inner));
    }
}
