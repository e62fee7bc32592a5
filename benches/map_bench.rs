use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mapjit::nodes::{
    AccumulatorNode, BinaryOp, BinaryOperationNode, ConstantNode, IdentityNode, InputNode,
    SinkNode, SourceNode,
};
use mapjit::{
    ElementType, Map, MapCompiler, MapCompilerOptions, Model, NodeKey, PortBuffer, PortElements,
    PortType,
};

const WIDTH: usize = 64;

fn f32x(size: usize) -> PortType {
    PortType::new(ElementType::Float, size)
}

fn arithmetic_map(depth: usize) -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::new(f32x(WIDTH)), vec![]).unwrap();
    let constant = model
        .add_node(ConstantNode::new(vec![0.5f32; WIDTH]), vec![])
        .unwrap();
    let c = model.output(constant, 0).unwrap();

    // Alternating multiply/add layers, each feeding the next
    let mut current = model.output(input, 0).unwrap();
    for layer in 0..depth {
        let op = if layer % 2 == 0 {
            BinaryOp::Multiply
        } else {
            BinaryOp::Add
        };
        let node = model
            .add_node(
                BinaryOperationNode::new(op, f32x(WIDTH)),
                vec![current, c.clone()],
            )
            .unwrap();
        current = model.output(node, 0).unwrap();
    }

    let total = model
        .add_node(AccumulatorNode::new(f32x(WIDTH)), vec![current])
        .unwrap();
    let y = model.output(total, 0).unwrap();
    Map::new("arithmetic", model, [("x", input)], [("y", y)]).unwrap()
}

fn stream_map() -> Map {
    let mut model = Model::new();
    let source = model.add_node(SourceNode::new(f32x(WIDTH)), vec![]).unwrap();
    let identity = model
        .add_node(
            IdentityNode::new(f32x(WIDTH)),
            vec![model.output(source, 0).unwrap()],
        )
        .unwrap();
    model
        .add_node(
            SinkNode::new(f32x(WIDTH)),
            vec![model.output(identity, 0).unwrap()],
        )
        .unwrap();
    Map::new(
        "stream",
        model,
        Vec::<(&str, NodeKey)>::new(),
        Vec::<(&str, PortElements)>::new(),
    )
    .unwrap()
}

fn options(inline: bool) -> MapCompilerOptions {
    MapCompilerOptions::default()
        .with_inline_nodes(inline)
        .with_inline_loops(inline)
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for depth in [1, 8, 32].iter() {
        let map = arithmetic_map(*depth);
        group.bench_with_input(BenchmarkId::new("out_of_line", depth), &map, |b, map| {
            b.iter(|| {
                let mut compiler = MapCompiler::new(options(false));
                black_box(compiler.compile(map).unwrap());
            });
        });
        group.bench_with_input(BenchmarkId::new("inline", depth), &map, |b, map| {
            b.iter(|| {
                let mut compiler = MapCompiler::new(options(true));
                black_box(compiler.compile(map).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let map = arithmetic_map(8);
    let inputs = [PortBuffer::from(vec![1.0f32; WIDTH])];

    for inline in [false, true] {
        let name = if inline { "inline" } else { "out_of_line" };
        group.bench_function(name, |b| {
            let mut compiled = MapCompiler::new(options(inline)).compile(&map).unwrap();
            b.iter(|| {
                black_box(compiled.execute(black_box(&inputs), 0.0).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_stream_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_batch");
    let map = stream_map();

    for size in [1, 100, 1024].iter() {
        group.bench_with_input(BenchmarkId::new("source_to_sink", size), size, |b, &size| {
            let mut compiled = MapCompiler::new(options(false)).compile(&map).unwrap();
            compiled
                .register_callbacks(
                    |data: &mut [f32]| {
                        data.fill(1.0);
                        true
                    },
                    |data: &[f32]| {
                        black_box(data);
                    },
                )
                .unwrap();

            b.iter(|| {
                for step in 0..size {
                    compiled.step(step as f64).unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_execute, bench_stream_batch);
criterion_main!(benches);
