use std::cell::RefCell;
use std::rc::Rc;

use float_cmp::assert_approx_eq;
use mapjit::nodes::{AccumulatorNode, ClockNode, IdentityNode, InputNode, SinkNode, SourceNode};
use mapjit::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32x(size: usize) -> PortType {
    PortType::new(ElementType::Float, size)
}

fn no_inputs() -> Vec<(&'static str, NodeKey)> {
    Vec::new()
}

fn no_outputs() -> Vec<(&'static str, PortElements)> {
    Vec::new()
}

/// Source -> Identity -> Sink over four floats.
fn stream_map() -> Map {
    let mut model = Model::new();
    let source = model.add_node(SourceNode::new(f32x(4)), vec![]).unwrap();
    let identity = model
        .add_node(
            IdentityNode::new(f32x(4)),
            vec![model.output(source, 0).unwrap()],
        )
        .unwrap();
    model
        .add_node(
            SinkNode::new(f32x(4)),
            vec![model.output(identity, 0).unwrap()],
        )
        .unwrap();
    Map::new("stream", model, no_inputs(), no_outputs()).unwrap()
}

fn compile(map: &Map, options: MapCompilerOptions) -> CompiledMap {
    MapCompiler::new(options).compile(map).unwrap()
}

type Received<T> = Rc<RefCell<Vec<Vec<T>>>>;

fn recording_sink<T: Element>() -> (Received<T>, impl FnMut(&[T]) + 'static) {
    let received: Received<T> = Rc::default();
    let sink = {
        let received = received.clone();
        move |data: &[T]| received.borrow_mut().push(data.to_vec())
    };
    (received, sink)
}

#[test]
fn test_source_to_sink() {
    init_logging();
    let map = stream_map();

    for inline_nodes in [false, true] {
        let options = MapCompilerOptions::default().with_inline_nodes(inline_nodes);
        let mut compiled = compile(&map, options);
        let (received, sink) = recording_sink::<f32>();
        compiled
            .register_callbacks(
                |data: &mut [f32]| {
                    data.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
                    true
                },
                sink,
            )
            .unwrap();

        for step in 0..3 {
            let outputs = compiled.step(step as f64).unwrap();
            assert!(outputs.is_empty());
        }
        assert_eq!(
            *received.borrow(),
            vec![vec![1.0f32, 2.0, 3.0, 4.0]; 3],
            "inline_nodes={inline_nodes}"
        );
    }
}

#[test]
fn test_source_without_data_yields_zeros() {
    init_logging();
    let mut compiled = compile(&stream_map(), MapCompilerOptions::default());
    let (received, sink) = recording_sink::<f32>();
    compiled
        .register_callbacks(|_: &mut [f32]| false, sink)
        .unwrap();

    compiled.step(0.0).unwrap();
    assert_eq!(*received.borrow(), vec![vec![0.0f32; 4]]);
}

#[test]
fn test_source_keeps_previous_data() {
    init_logging();
    let mut compiled = compile(&stream_map(), MapCompilerOptions::default());
    let (received, sink) = recording_sink::<f32>();
    let mut calls = 0;
    compiled
        .register_callbacks(
            move |data: &mut [f32]| {
                calls += 1;
                if calls > 1 {
                    return false;
                }
                data.fill(7.0);
                true
            },
            sink,
        )
        .unwrap();

    compiled.step(0.0).unwrap();
    compiled.step(1.0).unwrap();
    assert_eq!(*received.borrow(), vec![vec![7.0f32; 4]; 2]);
}

#[test]
fn test_three_steps_repeat_last_source_data() {
    init_logging();
    let map = stream_map();

    for inline_nodes in [false, true] {
        let options = MapCompilerOptions::default().with_inline_nodes(inline_nodes);
        let mut compiled = compile(&map, options);
        let (received, sink) = recording_sink::<f32>();
        let mut supplied = false;
        compiled
            .register_callbacks(
                move |data: &mut [f32]| {
                    if supplied {
                        return false;
                    }
                    supplied = true;
                    data.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
                    true
                },
                sink,
            )
            .unwrap();

        for timestamp in [0.0, 0.1, 0.2] {
            compiled.step(timestamp).unwrap();
        }
        assert_eq!(
            *received.borrow(),
            vec![vec![1.0f32, 2.0, 3.0, 4.0]; 3],
            "inline_nodes={inline_nodes}"
        );
    }
}

#[test]
fn test_steps_without_callbacks() {
    init_logging();
    let mut compiled = compile(&stream_map(), MapCompilerOptions::default());
    assert!(compiled.step(0.0).unwrap().is_empty());
}

#[test]
fn test_callback_registration() {
    init_logging();
    let mut compiled = compile(&stream_map(), MapCompilerOptions::default());

    compiled
        .register_callbacks(|_: &mut [f32]| false, |_: &[f32]| {})
        .unwrap();
    assert_eq!(
        compiled.register_callbacks(|_: &mut [f32]| false, |_: &[f32]| {}),
        Err(CallbackError::AlreadyInitialized {
            element: ElementType::Float,
        })
    );

    compiled.unregister_callbacks::<f32>();
    let (received, sink) = recording_sink::<f32>();
    compiled
        .register_callbacks(|_: &mut [f32]| false, sink)
        .unwrap();
    compiled.step(0.0).unwrap();
    assert_eq!(received.borrow().len(), 1);

    assert_eq!(
        compiled.register_callbacks(|_: &mut [i32]| false, |_: &[i32]| {}),
        Err(CallbackError::NoStreamingNode {
            element: ElementType::Int32,
        })
    );
}

#[test]
fn test_triggered_sink() {
    init_logging();
    let mut model = Model::new();
    let data = model.add_node(SourceNode::new(f32x(2)), vec![]).unwrap();
    let trigger = model
        .add_node(
            SourceNode::new(PortType::scalar(ElementType::Boolean)),
            vec![],
        )
        .unwrap();
    let sink = model
        .add_node(
            SinkNode::with_trigger(f32x(2)),
            vec![
                model.output(data, 0).unwrap(),
                model.output(trigger, 0).unwrap(),
            ],
        )
        .unwrap();
    let y = model.output(sink, 0).unwrap();
    let map = Map::new("triggered", model, no_inputs(), [("y", y)]).unwrap();

    for inline_nodes in [false, true] {
        let options = MapCompilerOptions::default().with_inline_nodes(inline_nodes);
        let mut compiled = compile(&map, options);

        let (received, sink) = recording_sink::<f32>();
        let mut value = 0.0f32;
        compiled
            .register_callbacks(
                move |data: &mut [f32]| {
                    value += 1.0;
                    data.fill(value);
                    true
                },
                sink,
            )
            .unwrap();
        let mut fire = false;
        compiled
            .register_callbacks(
                move |data: &mut [bool]| {
                    fire = !fire;
                    data[0] = fire;
                    true
                },
                |_: &[bool]| {},
            )
            .unwrap();

        let mut outputs = Vec::new();
        for step in 0..4 {
            outputs.push(compiled.step(step as f64).unwrap());
        }

        // Fires on the first and third steps, but passes data through on every step.
        assert_eq!(
            *received.borrow(),
            vec![vec![1.0f32, 1.0], vec![3.0, 3.0]],
            "inline_nodes={inline_nodes}"
        );
        assert_eq!(outputs[3], vec![PortBuffer::from(vec![4.0f32, 4.0])]);
    }
}

#[test]
fn test_clock_reports_lag() {
    init_logging();
    let mut model = Model::new();
    let clock = model.add_node(ClockNode::new(0.1, 0.05), vec![]).unwrap();
    let double2 = PortType::new(ElementType::Double, 2);
    model
        .add_node(SinkNode::new(double2), vec![model.output(clock, 0).unwrap()])
        .unwrap();
    let map = Map::new("clock", model, no_inputs(), no_outputs()).unwrap();

    for inline_nodes in [false, true] {
        let options = MapCompilerOptions::default().with_inline_nodes(inline_nodes);
        let mut compiled = compile(&map, options);

        let (received, sink) = recording_sink::<f64>();
        let lags = Rc::new(RefCell::new(Vec::new()));
        let lag_log = lags.clone();
        compiled
            .register_callbacks_with_lag(
                |_: &mut [f64]| false,
                sink,
                move |lag: f64| lag_log.borrow_mut().push(lag),
            )
            .unwrap();

        for timestamp in [0.0, 0.1, 0.3] {
            compiled.step(timestamp).unwrap();
        }

        let received = received.borrow();
        assert_eq!(received.len(), 3);
        let expected = [[0.0, 0.0], [0.0, 0.1], [0.1, 0.3]];
        for (ticks, expected) in received.iter().zip(expected) {
            assert_approx_eq!(f64, ticks[0], expected[0], epsilon = 1e-9);
            assert_approx_eq!(f64, ticks[1], expected[1], epsilon = 1e-9);
        }

        let lags = lags.borrow();
        assert_eq!(lags.len(), 1, "inline_nodes={inline_nodes}");
        assert_approx_eq!(f64, lags[0], 0.1, epsilon = 1e-9);
    }
}

#[test]
fn test_accumulator_state_and_reset() {
    init_logging();
    let i32x3 = PortType::new(ElementType::Int32, 3);
    let mut model = Model::new();
    let input = model.add_node(InputNode::new(i32x3), vec![]).unwrap();
    let total = model
        .add_node(
            AccumulatorNode::new(i32x3),
            vec![model.output(input, 0).unwrap()],
        )
        .unwrap();
    let y = model.output(total, 0).unwrap();
    let map = Map::new("accumulate", model, [("x", input)], [("y", y)]).unwrap();

    for inline_loops in [false, true] {
        let options = MapCompilerOptions::default().with_inline_loops(inline_loops);
        let mut compiled = compile(&map, options);

        let first: Vec<i32> = compiled.compute(&[1i32, 2, 3]).unwrap();
        let second: Vec<i32> = compiled.compute(&[1i32, 2, 3]).unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![2, 4, 6]);

        compiled.reset();
        let after_reset: Vec<i32> = compiled.compute(&[1i32, 2, 3]).unwrap();
        assert_eq!(after_reset, vec![1, 2, 3]);
    }
}

#[test]
fn test_accumulated_floats_with_timestamp() {
    init_logging();
    let mut model = Model::new();
    let input = model.add_node(InputNode::new(f32x(2)), vec![]).unwrap();
    let total = model
        .add_node(
            AccumulatorNode::new(f32x(2)),
            vec![model.output(input, 0).unwrap()],
        )
        .unwrap();
    let y = model.output(total, 0).unwrap();
    let map = Map::new("accumulate", model, [("x", input)], [("y", y)]).unwrap();
    let mut compiled = compile(&map, MapCompilerOptions::default());

    let input = [PortBuffer::from(vec![0.25f32, -1.5])];
    compiled.step_with(0.0, &input).unwrap();
    let outputs = compiled.step_with(1.0, &input).unwrap();
    let total = outputs[0].get::<f32>().unwrap();
    assert_approx_eq!(f32, total[0], 0.5, epsilon = 1e-6);
    assert_approx_eq!(f32, total[1], -3.0, epsilon = 1e-6);
}
