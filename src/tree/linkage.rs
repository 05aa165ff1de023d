//! Sibling chain editing: every operation relinks a constant number of neighbours.

use crate::{
    tree::{BlockKind, InstructionTree, NodeId, NodeKind},
    Error, Result,
};

impl InstructionTree {
    /// Appends a detached node as the last child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `parent` is not a block, `node` is attached,
    /// or the insertion would make a block its own descendant.
    pub fn append(&mut self, parent: NodeId, node: NodeId) -> Result<()> {
        self.ensure_insertable(parent, node)?;
        let last = self.last_child(parent);
        self.link(parent, last, None, node)
    }

    /// Inserts a detached node as the first child of `parent`.
    ///
    /// # Errors
    ///
    /// Same as [`InstructionTree::append`].
    pub fn prepend(&mut self, parent: NodeId, node: NodeId) -> Result<()> {
        self.ensure_insertable(parent, node)?;
        let first = self.first_child(parent);
        self.link(parent, None, first, node)
    }

    /// Inserts a detached node as the previous sibling of `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `anchor` has no parent, `node` is attached, or the
    /// insertion would make a block its own descendant.
    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) -> Result<()> {
        let parent = self
            .parent(anchor)
            .ok_or_else(|| Error::Structure(format!("{anchor} has no parent")))?;
        self.ensure_insertable(parent, node)?;
        let prev = self.prev(anchor);
        self.link(parent, prev, Some(anchor), node)
    }

    /// Inserts a detached node as the next sibling of `anchor`.
    ///
    /// # Errors
    ///
    /// Same as [`InstructionTree::insert_before`].
    pub fn insert_after(&mut self, anchor: NodeId, node: NodeId) -> Result<()> {
        let parent = self
            .parent(anchor)
            .ok_or_else(|| Error::Structure(format!("{anchor} has no parent")))?;
        self.ensure_insertable(parent, node)?;
        let next = self.next(anchor);
        self.link(parent, Some(anchor), next, node)
    }

    /// Detaches a node, together with its subtree, from its parent.
    ///
    /// Removing a branch or switch instruction also removes the labels it owns and leaves it
    /// without targets. A block is removed with its content; labels inside it that belong to
    /// branches outside it make the removal fail, while branches inside it lose their labels
    /// outside it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] for the root, detached nodes, bound labels, region
    /// blocks that are still linked to other regions, and blocks whose content is targeted or
    /// linked from outside.
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::Structure("the root block cannot be removed".to_string()));
        }
        if self.parent(node).is_none() {
            return Err(Error::Structure(format!("{node} is not attached")));
        }

        match &self.node(node)?.kind {
            NodeKind::Label { owner: Some(owner) } => {
                return Err(Error::Structure(format!(
                    "{node} is still the target of {owner}"
                )))
            }
            NodeKind::Label { owner: None } => {}
            NodeKind::Instruction(_) => self.unbind_labels(node)?,
            NodeKind::Block(kind) => {
                if kind.is_linked() {
                    return Err(Error::Structure(format!(
                        "{node} is a linked region, unlink its handlers first"
                    )));
                }
                self.release_subtree(node)?;
            }
        }

        self.unlink(node)
    }

    /// Dissolves a block, splicing its children into its place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] for the root, non-blocks, detached blocks and region
    /// blocks that are still linked to other regions.
    pub fn ungroup(&mut self, block: NodeId) -> Result<()> {
        if block == self.root {
            return Err(Error::Structure("the root block cannot be ungrouped".to_string()));
        }
        let node = self.node(block)?;
        match node.block_kind() {
            Some(kind) if kind.is_linked() => {
                return Err(Error::Structure(format!(
                    "{block} is a linked region, unlink its handlers first"
                )))
            }
            Some(_) => {}
            None => return Err(Error::Structure(format!("{block} is not a block"))),
        }

        let Some(parent) = node.parent else {
            return Err(Error::Structure(format!("{block} is not attached")));
        };
        let (prev, next) = (node.prev, node.next);
        let (Some(first), Some(last)) = (node.first_child, node.last_child) else {
            return self.unlink(block);
        };

        let mut cursor = Some(first);
        while let Some(child) = cursor {
            let child_node = self.node_mut(child)?;
            child_node.parent = Some(parent);
            cursor = child_node.next;
        }

        self.node_mut(first)?.prev = prev;
        self.node_mut(last)?.next = next;
        match prev {
            Some(prev) => self.node_mut(prev)?.next = Some(first),
            None => self.node_mut(parent)?.first_child = Some(first),
        }
        match next {
            Some(next) => self.node_mut(next)?.prev = Some(last),
            None => self.node_mut(parent)?.last_child = Some(last),
        }

        let block_node = self.node_mut(block)?;
        block_node.parent = None;
        block_node.prev = None;
        block_node.next = None;
        block_node.first_child = None;
        block_node.last_child = None;
        Ok(())
    }

    fn ensure_insertable(&self, parent: NodeId, node: NodeId) -> Result<()> {
        if !self.node(parent)?.is_block() {
            return Err(Error::Structure(format!("{parent} is not a block")));
        }

        let inserted = self.node(node)?;
        if node == self.root || inserted.parent.is_some() {
            return Err(Error::Structure(format!("{node} is already attached")));
        }
        if node == parent || self.is_ancestor(node, parent) {
            return Err(Error::Structure(format!("{node} would contain itself")));
        }
        Ok(())
    }

    /// Links a detached node between two adjacent children of `parent`.
    pub(crate) fn link(
        &mut self,
        parent: NodeId,
        prev: Option<NodeId>,
        next: Option<NodeId>,
        node: NodeId,
    ) -> Result<()> {
        let inserted = self.node_mut(node)?;
        inserted.parent = Some(parent);
        inserted.prev = prev;
        inserted.next = next;

        match prev {
            Some(prev) => self.node_mut(prev)?.next = Some(node),
            None => self.node_mut(parent)?.first_child = Some(node),
        }
        match next {
            Some(next) => self.node_mut(next)?.prev = Some(node),
            None => self.node_mut(parent)?.last_child = Some(node),
        }
        Ok(())
    }

    /// Unlinks a node from its parent and siblings, keeping its own subtree.
    pub(crate) fn unlink(&mut self, node: NodeId) -> Result<()> {
        let removed = self.node_mut(node)?;
        let (parent, prev, next) = (removed.parent.take(), removed.prev.take(), removed.next.take());
        let Some(parent) = parent else {
            return Ok(());
        };

        match prev {
            Some(prev) => self.node_mut(prev)?.next = next,
            None => self.node_mut(parent)?.first_child = next,
        }
        match next {
            Some(next) => self.node_mut(next)?.prev = prev,
            None => self.node_mut(parent)?.last_child = prev,
        }
        Ok(())
    }

    /// Prepares the content of `block` for removal: fails on incoming references, drops
    /// outgoing ones.
    fn release_subtree(&mut self, block: NodeId) -> Result<()> {
        let members: Vec<NodeId> = self.descendants(block).collect();

        for &member in &members {
            match &self.node(member)?.kind {
                NodeKind::Label { owner: Some(owner) } if !self.is_ancestor(block, *owner) => {
                    return Err(Error::Structure(format!(
                        "{member} inside {block} is the target of {owner}"
                    )));
                }
                NodeKind::Block(kind) => {
                    let links = match kind {
                        BlockKind::Try { handlers } => handlers.clone(),
                        BlockKind::Handler {
                            try_block, filter, ..
                        } => try_block.iter().chain(filter.iter()).copied().collect(),
                        BlockKind::Filter { try_block, handler } => {
                            try_block.iter().chain(handler.iter()).copied().collect()
                        }
                        _ => Vec::new(),
                    };
                    if let Some(outside) = links.iter().find(|&&l| !self.is_ancestor(block, l)) {
                        return Err(Error::Structure(format!(
                            "{member} inside {block} is linked to {outside}"
                        )));
                    }
                }
                _ => {}
            }
        }

        for member in members {
            let outside: Vec<NodeId> = match self.instruction(member) {
                Some(instruction) => instruction
                    .operand
                    .labels()
                    .iter()
                    .copied()
                    .filter(|&label| !self.is_ancestor(block, label))
                    .collect(),
                None => continue,
            };
            if !outside.is_empty() {
                self.unbind_labels(member)?;
            }
        }
        Ok(())
    }
}
