use crate::{
    tree::{BlockKind, InstructionTree, NodeId, NodeKind},
    Error, Result,
};

impl InstructionTree {
    /// Wraps the sibling run from `start` to `end` (inclusive) into a new block of `kind`.
    ///
    /// The endpoints may sit at different depths. The deeper one is walked up until both are
    /// at the same level, then both are walked up together until they share a parent; on the
    /// way `start` must always be a first child and `end` a last child, since a partial block
    /// can not be split. If the resulting run is exactly the content of a block of the same
    /// variant as `kind`, that block is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] for level mismatches, endpoints without a common
    /// parent, an `end` that precedes `start`, and for [`BlockKind::Body`] or linked kinds.
    pub fn group(&mut self, start: NodeId, end: NodeId, kind: BlockKind) -> Result<NodeId> {
        self.group_run(start, end, kind).map(|(block, _)| block)
    }

    /// Same as [`InstructionTree::group`], also reporting whether a new block was created.
    pub(crate) fn group_run(
        &mut self,
        start: NodeId,
        end: NodeId,
        kind: BlockKind,
    ) -> Result<(NodeId, bool)> {
        if matches!(kind, BlockKind::Body) {
            return Err(Error::Structure("cannot group into a body block".to_string()));
        }
        if kind.is_linked() {
            return Err(Error::Structure("grouping requires an unlinked kind".to_string()));
        }
        self.node(start)?;
        self.node(end)?;

        let (mut first, mut last) = (start, end);
        let (mut first_depth, mut last_depth) = (self.depth(first), self.depth(last));
        while first_depth > last_depth {
            first = self.climb_from_first(first)?;
            first_depth -= 1;
        }
        while last_depth > first_depth {
            last = self.climb_from_last(last)?;
            last_depth -= 1;
        }
        while self.parent(first) != self.parent(last) {
            first = self.climb_from_first(first)?;
            last = self.climb_from_last(last)?;
        }

        let parent = self
            .parent(first)
            .ok_or_else(|| Error::Structure(format!("{start} and {end} share no parent")))?;

        let mut run = vec![first];
        let mut cursor = first;
        while cursor != last {
            cursor = self.next(cursor).ok_or_else(|| {
                Error::Structure(format!("{end} does not follow {start}"))
            })?;
            run.push(cursor);
        }

        let whole = self.prev(first).is_none() && self.next(last).is_none();
        if whole && self.block_kind(parent).is_some_and(|k| k.same_variant(&kind)) {
            return Ok((parent, false));
        }

        let (prev, next) = (self.prev(first), self.next(last));
        let block = self.push_node(NodeKind::Block(kind));
        for &member in &run {
            self.node_mut(member)?.parent = Some(block);
        }
        self.node_mut(first)?.prev = None;
        self.node_mut(last)?.next = None;
        let wrapper = self.node_mut(block)?;
        wrapper.first_child = Some(first);
        wrapper.last_child = Some(last);

        self.link(parent, prev, next, block)?;
        Ok((block, true))
    }

    fn climb_from_first(&self, node: NodeId) -> Result<NodeId> {
        if self.prev(node).is_some() {
            return Err(Error::Structure(format!(
                "{node} is not the first child of its block"
            )));
        }
        self.parent(node)
            .ok_or_else(|| Error::Structure(format!("{node} has no parent")))
    }

    fn climb_from_last(&self, node: NodeId) -> Result<NodeId> {
        if self.next(node).is_some() {
            return Err(Error::Structure(format!(
                "{node} is not the last child of its block"
            )));
        }
        self.parent(node)
            .ok_or_else(|| Error::Structure(format!("{node} has no parent")))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::OpCode,
        method::HandlerKind,
        tree::{BlockKind, BodyInfo, InstructionTree, NodeId, TreeOperand},
        Error,
    };

    fn flat(count: usize) -> (InstructionTree, Vec<NodeId>) {
        let mut tree = InstructionTree::new(BodyInfo::default());
        let root = tree.root();
        let mut nodes = Vec::new();
        for _ in 0..count {
            let node = tree.new_instruction(OpCode::NOP, TreeOperand::None).unwrap();
            tree.append(root, node).unwrap();
            nodes.push(node);
        }
        (tree, nodes)
    }

    #[test]
    fn test_wraps_sibling_run() {
        let (mut tree, n) = flat(5);
        let root = tree.root();

        let block = tree.group(n[1], n[3], BlockKind::new_try()).unwrap();
        assert_eq!(tree.children(root).collect::<Vec<_>>(), [n[0], block, n[4]]);
        assert_eq!(tree.children(block).collect::<Vec<_>>(), [n[1], n[2], n[3]]);
        assert_eq!(tree.parent(n[2]), Some(block));
        assert_eq!(tree.prev(n[1]), None);
        assert_eq!(tree.next(n[3]), None);
    }

    #[test]
    fn test_existing_block_is_reused() {
        let (mut tree, n) = flat(4);

        let block = tree.group(n[1], n[2], BlockKind::new_try()).unwrap();
        let again = tree.group(n[1], n[2], BlockKind::new_try()).unwrap();
        assert_eq!(block, again);

        // A different variant nests inside instead
        let (inner, created) = tree
            .group_run(n[1], n[2], BlockKind::new_handler(HandlerKind::Finally))
            .unwrap();
        assert!(created);
        assert_eq!(tree.parent(inner), Some(block));
    }

    #[test]
    fn test_endpoints_at_different_depths() {
        let (mut tree, n) = flat(5);
        let root = tree.root();
        let inner = tree.group(n[1], n[2], BlockKind::Plain).unwrap();

        // n[1] is first in `inner`, so the run climbs to it
        let outer = tree.group(n[1], n[3], BlockKind::new_try()).unwrap();
        assert_eq!(tree.children(outer).collect::<Vec<_>>(), [inner, n[3]]);
        assert_eq!(tree.children(root).collect::<Vec<_>>(), [n[0], outer, n[4]]);

        // n[2] is last in `inner` but not first, so starting there fails
        let err = tree.group(n[2], n[4], BlockKind::Plain);
        assert!(matches!(err, Err(Error::Structure(_))));
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let (mut tree, n) = flat(3);

        assert!(tree.group(n[2], n[0], BlockKind::Plain).is_err());
        assert!(tree.group(n[0], n[1], BlockKind::Body).is_err());

        let loose = tree.new_instruction(OpCode::NOP, TreeOperand::None).unwrap();
        assert!(tree.group(n[0], loose, BlockKind::Plain).is_err());
        assert!(tree.group(tree.root(), tree.root(), BlockKind::Plain).is_err());
    }
}
