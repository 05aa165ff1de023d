#![allow(unused)]
extern crate ciltree;

use ciltree::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

/// Builds a body of `blocks` guarded sections, each a try/catch whose try contains a
/// conditional branch over `span` nops.
///
/// With `span` above 127 every conditional branch needs the long form, which puts the
/// relaxation loop through a second pass.
fn synthetic_body(blocks: usize, span: usize) -> MethodBody {
    let op = |mnemonic: &str| OpCode::from_mnemonic(mnemonic).unwrap();
    let mut instructions = Vec::new();
    let mut exception_handlers = Vec::new();

    let span_bytes = i32::try_from(span).unwrap();
    let mut offset = 0_u32;
    for _ in 0..blocks {
        let try_offset = offset;
        instructions.push(Instruction::new(op("ldc.i4.0"), Operand::None).unwrap());
        instructions.push(Instruction::new(op("brtrue"), Operand::Branch(span_bytes)).unwrap());
        for _ in 0..span {
            instructions.push(Instruction::new(op("nop"), Operand::None).unwrap());
        }
        // leave over the catch: pop + leave.s
        instructions.push(Instruction::new(op("leave.s"), Operand::Branch(3)).unwrap());
        let try_length = 1 + 5 + span as u32 + 2;

        instructions.push(Instruction::new(op("pop"), Operand::None).unwrap());
        instructions.push(Instruction::new(op("leave.s"), Operand::Branch(0)).unwrap());

        exception_handlers.push(ExceptionHandler::from_raw(
            ExceptionHandlerFlags::EXCEPTION,
            try_offset,
            try_length,
            try_offset + try_length,
            3,
            0x0100_0001,
        ));
        offset += try_length + 3;
    }
    instructions.push(Instruction::new(op("ret"), Operand::None).unwrap());

    MethodBody {
        max_stack: 8,
        instructions,
        exception_handlers,
        ..MethodBody::default()
    }
}

/// Benchmark the lift / analyse / lower cycle on large synthetic bodies
fn bench_tree_cycle(c: &mut Criterion) {
    let resolver = SignatureTable::new(false);

    for (name, span) in [("short_branches", 100), ("long_branches", 200)] {
        let body = synthetic_body(64, span);
        let instruction_count = body.instructions.len();

        let mut group = c.benchmark_group(name);
        group.throughput(Throughput::Elements(instruction_count as u64));

        group.bench_function("lift", |b| {
            b.iter(|| black_box(InstructionTree::lift(black_box(&body)).unwrap()));
        });

        let tree = InstructionTree::lift(&body).unwrap();
        group.bench_function("analyse", |b| {
            b.iter(|| black_box(StackAnalysis::compute(black_box(&tree), &resolver).unwrap()));
        });
        group.bench_function("lower", |b| {
            b.iter(|| black_box(black_box(&tree).lower().unwrap()));
        });

        group.bench_function("pipeline", |b| {
            b.iter(|| {
                black_box(
                    transform_body(black_box(&body), &resolver, &PipelineConfig::strict(), |_| {
                        Ok(())
                    })
                    .unwrap(),
                )
            });
        });
        group.finish();
    }
}

/// Benchmark sequential against parallel batch processing
fn bench_batch(c: &mut Criterion) {
    let resolver = SignatureTable::new(false);
    let jobs: Vec<(MethodBody, &dyn SignatureResolver)> = (0..256)
        .map(|_| {
            (
                synthetic_body(8, 150),
                &resolver as &dyn SignatureResolver,
            )
        })
        .collect();

    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(jobs.len() as u64));
    for (name, parallel) in [("sequential", false), ("parallel", true)] {
        let config = PipelineConfig {
            parallel,
            ..PipelineConfig::default()
        };
        group.bench_function(name, |b| {
            b.iter(|| black_box(transform_batch(black_box(&jobs), &config, |_| Ok(()))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tree_cycle, bench_batch);
criterion_main!(benches);
