//! Lift, edit and lower method bodies, one at a time or in batches.
//!
//! The pipeline is the glue a rewriting tool runs per method: lift the flat body into an
//! [`InstructionTree`], hand the tree to the caller's pass, optionally recompute the stack
//! header, and lower the result back to a [`MethodBody`] with relaxed branch forms.
//!
//! Faults are local to one body. [`transform_batch`] records the error of a failing body and
//! carries on with the others.
//!
//! # Examples
//!
//! ```rust
//! use ciltree::analysis::SignatureTable;
//! use ciltree::assembly::OpCode;
//! use ciltree::config::PipelineConfig;
//! use ciltree::method::MethodBody;
//! use ciltree::pipeline::transform_body;
//! use ciltree::tree::TreeOperand;
//!
//! // ldc.i4.1; ret
//! let body = MethodBody::parse(&[0x0A, 0x17, 0x2A])?;
//! let resolver = SignatureTable::new(true);
//!
//! // Prepend a `nop` to every method
//! let lowered = transform_body(&body, &resolver, &PipelineConfig::default(), |tree| {
//!     let nop = tree.new_instruction(OpCode::NOP, TreeOperand::None)?;
//!     let root = tree.root();
//!     tree.prepend(root, nop)
//! })?;
//!
//! assert_eq!(lowered.instructions.len(), 3);
//! assert_eq!(lowered.max_stack, 1);
//! # Ok::<(), ciltree::Error>(())
//! ```

use rayon::prelude::*;

use crate::{
    analysis::{SignatureResolver, StackAnalysis},
    config::PipelineConfig,
    method::MethodBody,
    tree::InstructionTree,
    Error, Result,
};

/// Outcome of [`transform_batch`], one entry per job in job order.
#[derive(Debug)]
pub struct BatchReport {
    /// The lowered body or the fault of each job
    pub results: Vec<Result<MethodBody>>,
}

impl BatchReport {
    /// Number of jobs that produced a body.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.is_ok()).count()
    }

    /// Index and error of every failed job.
    #[must_use]
    pub fn failed(&self) -> Vec<(usize, &Error)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, result)| result.as_ref().err().map(|error| (index, error)))
            .collect()
    }

    /// Consumes the report, returning the successfully lowered bodies with their job index.
    #[must_use]
    pub fn into_bodies(self) -> Vec<(usize, MethodBody)> {
        self.results
            .into_iter()
            .enumerate()
            .filter_map(|(index, result)| result.ok().map(|body| (index, body)))
            .collect()
    }
}

/// Lifts `body`, runs `pass` on the tree and lowers the result.
///
/// With [`PipelineConfig::recompute_max_stack`] set, the stack depth analysis runs between
/// the pass and lowering and its result replaces the declared `max_stack` (or is merged with
/// it, see [`PipelineConfig::preserve_larger_max_stack`]).
///
/// # Errors
///
/// Returns the first fault of lifting, the pass, the analysis or lowering. No partial body is
/// produced.
pub fn transform_body<F>(
    body: &MethodBody,
    resolver: &dyn SignatureResolver,
    config: &PipelineConfig,
    mut pass: F,
) -> Result<MethodBody>
where
    F: FnMut(&mut InstructionTree) -> Result<()>,
{
    let mut tree = InstructionTree::lift(body)?;
    pass(&mut tree)?;

    if config.recompute_max_stack {
        let analysis = StackAnalysis::compute(&tree, resolver)?;
        analysis.apply(&mut tree, config.preserve_larger_max_stack);
    }

    tree.lower()
}

/// Runs [`transform_body`] over every `(body, resolver)` job.
///
/// Jobs run on the rayon pool when [`PipelineConfig::parallel`] is set. A failing job is
/// logged and recorded in the report; it never stops the remaining jobs.
pub fn transform_batch<F>(
    jobs: &[(MethodBody, &dyn SignatureResolver)],
    config: &PipelineConfig,
    pass: F,
) -> BatchReport
where
    F: Fn(&mut InstructionTree) -> Result<()> + Sync,
{
    let results: Vec<Result<MethodBody>> = if config.parallel {
        jobs.par_iter()
            .enumerate()
            .map(|(index, job)| run_job(index, job, config, &pass))
            .collect()
    } else {
        jobs.iter()
            .enumerate()
            .map(|(index, job)| run_job(index, job, config, &pass))
            .collect()
    };

    let report = BatchReport { results };
    log::debug!(
        "Transformed {} method bodies, {} failed",
        report.results.len(),
        report.results.len() - report.succeeded()
    );
    report
}

fn run_job<F>(
    index: usize,
    job: &(MethodBody, &dyn SignatureResolver),
    config: &PipelineConfig,
    pass: &F,
) -> Result<MethodBody>
where
    F: Fn(&mut InstructionTree) -> Result<()>,
{
    let (body, resolver) = job;
    let result = transform_body(body, *resolver, config, pass);
    if let Err(error) = &result {
        log::warn!("Method body {index} failed: {error}");
    }
    result
}

/// Parses a serialized method body, lifts and lowers it without edits, and writes it back.
///
/// A body whose branches already use their smallest forms comes back byte-identical, except
/// that the header is re-chosen (tiny when legal).
///
/// # Errors
///
/// Returns any fault of parsing, lifting, lowering or encoding.
pub fn roundtrip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let body = MethodBody::parse(data)?;
    let tree = InstructionTree::lift(&body)?;
    tree.lower()?.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{CallSite, SignatureTable},
        assembly::{Instruction, OpCode, Operand},
        token::Token,
        tree::TreeOperand,
    };

    fn ins(mnemonic: &str, operand: Operand) -> Instruction {
        Instruction::new(OpCode::from_mnemonic(mnemonic).unwrap(), operand).unwrap()
    }

    fn body(max_stack: u16, instructions: Vec<Instruction>) -> MethodBody {
        MethodBody {
            max_stack,
            instructions,
            ..MethodBody::default()
        }
    }

    #[test]
    fn test_recompute_replaces_declared_max() {
        let source = body(
            8,
            vec![
                ins("ldc.i4.1", Operand::None),
                ins("ldc.i4.2", Operand::None),
                ins("add", Operand::None),
                ins("ret", Operand::None),
            ],
        );
        let resolver = SignatureTable::new(true);

        let strict = transform_body(&source, &resolver, &PipelineConfig::strict(), |_| Ok(()))
            .unwrap();
        assert_eq!(strict.max_stack, 2);

        let kept = transform_body(&source, &resolver, &PipelineConfig::conservative(), |_| {
            Ok(())
        })
        .unwrap();
        assert_eq!(kept.max_stack, 8);

        let passthrough =
            transform_body(&source, &resolver, &PipelineConfig::passthrough(), |_| Ok(()))
                .unwrap();
        assert_eq!(passthrough.max_stack, 8);
        assert_eq!(passthrough.instructions, source.instructions);
    }

    #[test]
    fn test_pass_error_aborts() {
        let source = body(1, vec![ins("ret", Operand::None)]);
        let resolver = SignatureTable::new(false);

        let result = transform_body(&source, &resolver, &PipelineConfig::default(), |_| {
            Err(Error::Structure("rejected".to_string()))
        });
        assert!(matches!(result, Err(Error::Structure(_))));
    }

    #[test]
    fn test_batch_continues_after_fault() {
        let token = Token::new(0x0A00_0001);
        let known = SignatureTable::new(false).with(token, CallSite::new(0, false, false));
        let unknown = SignatureTable::new(false);

        let call = body(
            0,
            vec![
                ins("call", Operand::Token(token)),
                ins("ret", Operand::None),
            ],
        );
        let jobs: Vec<(MethodBody, &dyn SignatureResolver)> = vec![
            (call.clone(), &known),
            (call.clone(), &unknown),
            (call, &known),
        ];

        for parallel in [true, false] {
            let config = PipelineConfig {
                parallel,
                ..PipelineConfig::default()
            };
            let report = transform_batch(&jobs, &config, |_| Ok(()));
            assert_eq!(report.results.len(), 3);
            assert_eq!(report.succeeded(), 2);

            let failed = report.failed();
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, 1);
            assert!(matches!(failed[0].1, Error::TokenNotFound(t) if *t == token));
        }
    }

    #[test]
    fn test_batch_pass_edits_every_body() {
        let resolver = SignatureTable::new(false);
        let jobs: Vec<(MethodBody, &dyn SignatureResolver)> = (0..16)
            .map(|_| {
                (
                    body(0, vec![ins("ret", Operand::None)]),
                    &resolver as &dyn SignatureResolver,
                )
            })
            .collect();

        let report = transform_batch(&jobs, &PipelineConfig::default(), |tree| {
            let nop = tree.new_instruction(OpCode::NOP, TreeOperand::None)?;
            let root = tree.root();
            tree.prepend(root, nop)
        });

        let bodies = report.into_bodies();
        assert_eq!(bodies.len(), 16);
        for (_, lowered) in bodies {
            assert_eq!(lowered.instructions.len(), 2);
            assert_eq!(lowered.instructions[0].opcode, OpCode::NOP);
        }
    }

    #[test]
    fn test_roundtrip_tiny_body() {
        // ldc.i4.1; brtrue.s +1; ldc.i4.2; ret
        let bytes = [0x16, 0x17, 0x2D, 0x01, 0x18, 0x2A];
        assert_eq!(roundtrip_bytes(&bytes).unwrap(), bytes);
    }
}
