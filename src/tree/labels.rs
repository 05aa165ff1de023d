//! Label binding: every label is referenced by at most one branch or switch instruction.

use crate::{
    tree::{InstructionTree, NodeId, NodeKind, TreeOperand},
    Error, Result,
};

impl InstructionTree {
    /// Points a branch instruction at `target`.
    ///
    /// A fresh label is inserted in front of `target` and bound to `instruction`; labels the
    /// instruction owned before are removed from the tree.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `instruction` is not a branch or `target` has no
    /// parent to hold the label.
    pub fn set_branch_target(&mut self, instruction: NodeId, target: NodeId) -> Result<NodeId> {
        let is_branch = self
            .instruction(instruction)
            .is_some_and(|i| i.opcode.is_branch());
        if !is_branch {
            return Err(Error::Structure(format!("{instruction} is not a branch")));
        }

        let label = self.place_label(target)?;
        self.unbind_labels(instruction)?;
        self.instruction_mut(instruction)?.operand = TreeOperand::Label(label);
        self.bind_label(label, instruction)?;
        Ok(label)
    }

    /// Points a switch instruction at `targets`, one fresh label per target.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structure`] if `instruction` is not a switch or a target has no
    /// parent to hold its label.
    pub fn set_switch_targets(
        &mut self,
        instruction: NodeId,
        targets: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let is_switch = self
            .instruction(instruction)
            .is_some_and(|i| i.opcode.is_switch());
        if !is_switch {
            return Err(Error::Structure(format!("{instruction} is not a switch")));
        }
        if let Some(&orphan) = targets.iter().find(|&&t| self.parent(t).is_none()) {
            return Err(Error::Structure(format!("{orphan} has no parent")));
        }

        let mut labels = Vec::with_capacity(targets.len());
        for &target in targets {
            labels.push(self.place_label(target)?);
        }

        self.unbind_labels(instruction)?;
        self.instruction_mut(instruction)?.operand = TreeOperand::Labels(labels.clone());
        for &label in &labels {
            self.bind_label(label, instruction)?;
        }
        Ok(labels)
    }

    /// The instruction a label is bound to.
    #[must_use]
    pub fn label_owner(&self, label: NodeId) -> Option<NodeId> {
        match self.nodes.get(label.0).map(|n| &n.kind) {
            Some(NodeKind::Label { owner }) => *owner,
            _ => None,
        }
    }

    /// The instruction control reaches when jumping to `label`.
    #[must_use]
    pub fn label_target(&self, label: NodeId) -> Option<NodeId> {
        self.next_instruction(label)
    }

    /// Inserts a new, still unbound label in front of `anchor`.
    fn place_label(&mut self, anchor: NodeId) -> Result<NodeId> {
        if self.parent(anchor).is_none() {
            return Err(Error::Structure(format!("{anchor} has no parent")));
        }
        let label = self.new_label();
        self.insert_before(anchor, label)?;
        Ok(label)
    }

    pub(crate) fn ensure_unbound_label(&self, label: NodeId) -> Result<()> {
        match self.node(label)?.kind {
            NodeKind::Label { owner: None } => Ok(()),
            NodeKind::Label { owner: Some(owner) } => Err(Error::Structure(format!(
                "{label} is already bound to {owner}"
            ))),
            _ => Err(Error::Structure(format!("{label} is not a label"))),
        }
    }

    pub(crate) fn bind_label(&mut self, label: NodeId, owner: NodeId) -> Result<()> {
        self.ensure_unbound_label(label)?;
        if let NodeKind::Label { owner: slot } = &mut self.node_mut(label)?.kind {
            *slot = Some(owner);
        }
        Ok(())
    }

    /// Drops every label owned by `instruction`, leaving it without targets.
    pub(crate) fn unbind_labels(&mut self, instruction: NodeId) -> Result<()> {
        let operand = &mut self.instruction_mut(instruction)?.operand;
        if operand.labels().is_empty() {
            return Ok(());
        }

        let labels = std::mem::replace(operand, TreeOperand::None).labels().to_vec();
        for label in labels {
            if let NodeKind::Label { owner } = &mut self.node_mut(label)?.kind {
                *owner = None;
            }
            self.unlink(label)?;
        }
        Ok(())
    }
}
