//! Benchmarks for plan compilation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dagflow::definition::{
    InputSpec, OutputSpec, PipelineBuilder, PipelineDefinition, RuntimeType, TaskDefinition,
    TaskOutputs,
};
use dagflow::plan::compile;
use serde_json::json;

fn task(name: &str, with_input: bool) -> TaskDefinition {
    let task = TaskDefinition::from_fn(name, |_, _| Ok(TaskOutputs::result(json!(0))))
        .with_output(OutputSpec::result(RuntimeType::int()));
    if with_input {
        task.with_input(InputSpec::new("x", RuntimeType::int()))
    } else {
        task
    }
}

/// A chain of `width`-wide layers; every task reads from one task of the layer above.
fn layered_pipeline(layers: usize, width: usize) -> PipelineDefinition {
    let mut builder = PipelineBuilder::new("layered");
    for layer in 0..layers {
        for i in 0..width {
            builder = builder.task(task(&format!("t_{layer}_{i}"), layer > 0));
            if layer > 0 {
                builder = builder.depends_on(
                    format!("t_{layer}_{i}"),
                    "x",
                    format!("t_{}_{}", layer - 1, (i + 1) % width),
                    "result",
                );
            }
        }
    }
    builder.build().unwrap_or_else(|e| panic!("invalid bench pipeline: {e}"))
}

fn compile_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for (layers, width) in [(10, 10), (50, 20)] {
        let pipeline = layered_pipeline(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(layers * width),
            &pipeline,
            |b, pipeline| b.iter(|| compile(black_box(pipeline), None)),
        );
    }
    group.finish();

    let pipeline = layered_pipeline(50, 20);
    let selection: Vec<String> = (0..10)
        .flat_map(|layer| (0..20).map(move |i| format!("t_{layer}_{i}")))
        .collect();
    let names: Vec<&str> = selection.iter().map(String::as_str).collect();
    c.bench_function("compile_subset", |b| {
        b.iter(|| compile(black_box(&pipeline), Some(black_box(names.as_slice()))))
    });
}

criterion_group!(benches, compile_benchmark);
criterion_main!(benches);
