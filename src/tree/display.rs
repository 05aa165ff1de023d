use std::{collections::HashMap, fmt};

use crate::{
    method::HandlerKind,
    tree::{BlockKind, InstructionTree, NodeId, NodeKind, TreeOperand},
};

const INDENT: &str = "  ";

fn write_operand(
    f: &mut fmt::Formatter<'_>,
    operand: &TreeOperand,
    names: &HashMap<NodeId, usize>,
) -> fmt::Result {
    let label = |id: &NodeId| match names.get(id) {
        Some(index) => format!("L{index}"),
        None => format!("{id}"),
    };

    match operand {
        TreeOperand::None => Ok(()),
        TreeOperand::Immediate(imm) => write!(f, " {imm}"),
        TreeOperand::Token(token) => write!(f, " {token}"),
        TreeOperand::Label(id) => write!(f, " {}", label(id)),
        TreeOperand::Labels(ids) => {
            let list: Vec<String> = ids.iter().map(label).collect();
            write!(f, " ({})", list.join(", "))
        }
    }
}

fn block_header(kind: &BlockKind) -> String {
    match kind {
        BlockKind::Body | BlockKind::Plain => "{".to_string(),
        BlockKind::Try { .. } => "try {".to_string(),
        BlockKind::Filter { .. } => "filter {".to_string(),
        BlockKind::Handler {
            kind: HandlerKind::Catch,
            catch_type: Some(token),
            ..
        } => format!("catch {token} {{"),
        BlockKind::Handler {
            kind: HandlerKind::Filter,
            ..
        } => "handler {".to_string(),
        BlockKind::Handler { kind, .. } => format!("{kind} {{"),
    }
}

impl fmt::Display for InstructionTree {
    /// Writes an indented listing of the attached nodes.
    ///
    /// ```text
    /// .maxstack 1
    /// try {
    ///   nop
    ///   leave.s L0
    /// }
    /// catch 0x01000001 {
    ///   pop
    ///   leave.s L1
    /// }
    /// L0:
    /// L1:
    /// ret
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: HashMap<NodeId, usize> = self
            .labels()
            .into_iter()
            .enumerate()
            .map(|(index, id)| (id, index))
            .collect();

        writeln!(f, ".maxstack {}", self.info.max_stack)?;

        // (node, depth, closing)
        let mut stack: Vec<(NodeId, usize, bool)> = self
            .children(self.root)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|child| (child, 0, false))
            .collect();

        while let Some((id, depth, closing)) = stack.pop() {
            let indent = INDENT.repeat(depth);
            if closing {
                writeln!(f, "{indent}}}")?;
                continue;
            }

            let Some(node) = self.nodes.get(id.0) else {
                continue;
            };
            match &node.kind {
                NodeKind::Block(kind) => {
                    writeln!(f, "{indent}{}", block_header(kind))?;
                    stack.push((id, depth, true));
                    let children: Vec<NodeId> = self.children(id).collect();
                    stack.extend(children.into_iter().rev().map(|c| (c, depth + 1, false)));
                }
                NodeKind::Label { .. } => match names.get(&id) {
                    Some(index) => writeln!(f, "{indent}L{index}:")?,
                    None => writeln!(f, "{indent}{id}:")?,
                },
                NodeKind::Instruction(instruction) => {
                    write!(f, "{indent}{}", instruction.opcode)?;
                    write_operand(f, &instruction.operand, &names)?;
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::{Instruction, OpCode, Operand},
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        tree::InstructionTree,
    };

    #[test]
    fn test_listing() {
        let ins = |mnemonic: &str, operand| {
            Instruction::new(OpCode::from_mnemonic(mnemonic).unwrap(), operand).unwrap()
        };
        let body = MethodBody {
            max_stack: 1,
            instructions: vec![
                ins("nop", Operand::None),
                ins("leave.s", Operand::Branch(3)),
                ins("pop", Operand::None),
                ins("leave.s", Operand::Branch(0)),
                ins("ret", Operand::None),
            ],
            exception_handlers: vec![ExceptionHandler::from_raw(
                ExceptionHandlerFlags::EXCEPTION,
                0,
                3,
                3,
                3,
                0x0100_0001,
            )],
            ..MethodBody::default()
        };

        let tree = InstructionTree::lift(&body).unwrap();
        let expected = "\
.maxstack 1
try {
  nop
  leave.s L0
}
catch 0x01000001 {
  pop
  leave.s L1
}
L0:
L1:
ret
";
        assert_eq!(tree.to_string(), expected);
    }
}
