//! End-to-end graph scenarios: chains, diamonds, multi-input aggregation,
//! optional inputs, type mismatches, and callback lifetimes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use pipeline::{
    AssignmentError, Callback, CallbackInvocation, Input, InputType, MultiInput, NodeCore, Output,
    Process, ProcessNode, Signal, SignalKind, SimpleNode, Value, set_num_threads,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serializes the tests that reconfigure the process-wide thread budget.
static THREADING: Mutex<()> = Mutex::new(());

// ── test nodes ──────────────────────────────────────────────────────────

/// Produces a fixed value.
struct Constant {
    node: SimpleNode,
    output: Output<f64>,
    value: f64,
    runs: AtomicUsize,
}

impl Constant {
    fn new(value: f64) -> Self {
        let node = SimpleNode::new("constant");
        let output = Output::new();
        node.register_output(&output, "value");
        Self {
            node,
            output,
            value,
            runs: AtomicUsize::new(0),
        }
    }
}

impl ProcessNode for Constant {
    fn node(&self) -> &NodeCore {
        self.node.core()
    }

    fn update_outputs(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.output.set(self.value);
    }
}

/// Applies a unary function to its input, remembering the thread it ran on.
struct Map {
    node: SimpleNode,
    input: Input<f64>,
    output: Output<f64>,
    function: fn(f64) -> f64,
    runs: AtomicUsize,
    last_thread: Mutex<Option<ThreadId>>,
}

impl Map {
    fn new(name: &str, function: fn(f64) -> f64) -> Self {
        let node = SimpleNode::new(name);
        let input = Input::new();
        let output = Output::new();
        node.register_input(&input, "x", InputType::Required);
        node.register_output(&output, "y");
        Self {
            node,
            input,
            output,
            function,
            runs: AtomicUsize::new(0),
            last_thread: Mutex::new(None),
        }
    }
}

impl ProcessNode for Map {
    fn node(&self) -> &NodeCore {
        self.node.core()
    }

    fn update_outputs(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.last_thread.lock().unwrap() = Some(std::thread::current().id());
        let x = *self.input.get().expect("required input present");
        self.output.set((self.function)(x));
    }
}

/// Adds its two inputs.
struct Adder {
    node: SimpleNode,
    left: Input<f64>,
    right: Input<f64>,
    output: Output<f64>,
    runs: AtomicUsize,
}

impl Adder {
    fn new() -> Self {
        let node = SimpleNode::new("adder");
        let left = Input::new();
        let right = Input::new();
        let output = Output::new();
        node.register_input(&left, "left", InputType::Required);
        node.register_input(&right, "right", InputType::Required);
        node.register_output(&output, "sum");
        Self {
            node,
            left,
            right,
            output,
            runs: AtomicUsize::new(0),
        }
    }
}

impl ProcessNode for Adder {
    fn node(&self) -> &NodeCore {
        self.node.core()
    }

    fn update_outputs(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let left = *self.left.get().expect("required input present");
        let right = *self.right.get().expect("required input present");
        self.output.set(left + right);
    }
}

/// Sums a growable sequence of integers.
struct Sum {
    node: SimpleNode,
    terms: MultiInput<i32>,
    output: Output<i32>,
    runs: AtomicUsize,
}

impl Sum {
    fn new() -> Self {
        let node = SimpleNode::new("sum");
        let terms = MultiInput::new();
        let output = Output::new();
        node.register_inputs(&terms, "terms");
        node.register_output(&output, "total");
        Self {
            node,
            terms,
            output,
            runs: AtomicUsize::new(0),
        }
    }
}

impl ProcessNode for Sum {
    fn node(&self) -> &NodeCore {
        self.node.core()
    }

    fn update_outputs(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let total: i32 = self.terms.values().iter().map(|term| **term).sum();
        self.output.set(total);
    }
}

/// Required x plus optional y.
struct Offset {
    node: SimpleNode,
    x: Input<f64>,
    y: Input<f64>,
    output: Output<f64>,
    runs: AtomicUsize,
}

impl Offset {
    fn new() -> Self {
        let node = SimpleNode::new("offset");
        let x = Input::new();
        let y = Input::new();
        let output = Output::new();
        node.register_input(&x, "x", InputType::Required);
        node.register_input(&y, "y", InputType::Optional);
        node.register_output(&output, "result");
        Self {
            node,
            x,
            y,
            output,
            runs: AtomicUsize::new(0),
        }
    }
}

impl ProcessNode for Offset {
    fn node(&self) -> &NodeCore {
        self.node.core()
    }

    fn update_outputs(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let x = *self.x.get().expect("required input present");
        let y = self.y.get().map(|y| *y).unwrap_or(0.0);
        self.output.set(x + y);
    }
}

// ── scenarios ───────────────────────────────────────────────────────────

#[test]
fn single_chain_pulls_once_per_node() {
    init_tracing();

    let a = Process::new(Constant::new(1.0));
    let b = Process::new(Map::new("double", |x| x * 2.0));
    let c = Process::new(Map::new("square", |x| x * x));
    b.input.accept(&a.output);
    c.input.accept(&b.output);

    let result = Value::new(&c.output);
    assert_eq!(*result.get().unwrap(), 4.0);
    assert_eq!(a.runs.load(Ordering::SeqCst), 1);
    assert_eq!(b.runs.load(Ordering::SeqCst), 1);
    assert_eq!(c.runs.load(Ordering::SeqCst), 1);

    // Invalidate the source: every node recomputes exactly once more.
    a.node.set_dirty(&a.output).unwrap();
    assert_eq!(*result.get().unwrap(), 4.0);
    assert_eq!(a.runs.load(Ordering::SeqCst), 2);
    assert_eq!(b.runs.load(Ordering::SeqCst), 2);
    assert_eq!(c.runs.load(Ordering::SeqCst), 2);

    // No invalidation, no recomputation.
    assert_eq!(*result.get().unwrap(), 4.0);
    assert_eq!(c.runs.load(Ordering::SeqCst), 2);
}

#[test]
fn diamond_runs_one_branch_on_a_worker() {
    init_tracing();
    let _serial = THREADING.lock().unwrap();

    let a = Process::new(Constant::new(3.0));
    let b = Process::new(Map::new("left", |x| x * 2.0));
    let d = Process::new(Map::new("right", |x| x + 1.0));
    let e = Process::new(Adder::new());
    b.input.accept(&a.output);
    d.input.accept(&a.output);
    e.left.accept(&b.output);
    e.right.accept(&d.output);

    set_num_threads(1);
    e.node.update_inputs();
    set_num_threads(0);

    // Both branches updated before the join node ran.
    assert_eq!(*e.output.get().unwrap(), 10.0);
    assert_eq!(b.runs.load(Ordering::SeqCst), 1);
    assert_eq!(d.runs.load(Ordering::SeqCst), 1);
    assert_eq!(e.runs.load(Ordering::SeqCst), 1);
    assert_eq!(a.runs.load(Ordering::SeqCst), 1);

    // With a budget of one, exactly one branch ran on a worker thread.
    let caller = std::thread::current().id();
    let b_thread = b.last_thread.lock().unwrap().expect("left branch ran");
    let d_thread = d.last_thread.lock().unwrap().expect("right branch ran");
    assert_eq!(
        [b_thread, d_thread].iter().filter(|id| **id != caller).count(),
        1,
        "exactly one branch off the calling thread"
    );
}

#[test]
fn zero_budget_fan_out_is_sequential() {
    init_tracing();
    let _serial = THREADING.lock().unwrap();
    set_num_threads(0);

    let a = Process::new(Constant::new(2.0));
    let b = Process::new(Map::new("left", |x| x * 2.0));
    let d = Process::new(Map::new("right", |x| x + 1.0));
    let e = Process::new(Adder::new());
    b.input.accept(&a.output);
    d.input.accept(&a.output);
    e.left.accept(&b.output);
    e.right.accept(&d.output);

    e.node.update_inputs();
    assert_eq!(*e.output.get().unwrap(), 7.0);

    let caller = std::thread::current().id();
    assert_eq!(b.last_thread.lock().unwrap().unwrap(), caller);
    assert_eq!(d.last_thread.lock().unwrap().unwrap(), caller);
}

#[test]
fn multi_input_aggregation_follows_clear_and_regrow() {
    init_tracing();
    let _serial = THREADING.lock().unwrap();

    let sum = Process::new(Sum::new());
    sum.terms.accept_value(2);
    sum.terms.accept_value(3);
    sum.terms.accept_value(5);

    sum.node.update_inputs();
    assert_eq!(*sum.output.get().unwrap(), 10);
    assert_eq!(sum.runs.load(Ordering::SeqCst), 1);

    sum.terms.clear();
    sum.terms.accept_value(7);
    sum.terms.accept_value(8);
    assert_eq!(sum.terms.len(), 2);

    sum.node.update_inputs();
    assert_eq!(*sum.output.get().unwrap(), 15);
    assert_eq!(sum.runs.load(Ordering::SeqCst), 2);
}

#[test]
fn multi_input_pulls_connected_producers() {
    init_tracing();
    let _serial = THREADING.lock().unwrap();

    let first = Process::new(Constant::new(4.0));
    let second = Process::new(Constant::new(6.0));

    struct FloatSum {
        node: SimpleNode,
        terms: MultiInput<f64>,
        output: Output<f64>,
    }
    impl ProcessNode for FloatSum {
        fn node(&self) -> &NodeCore {
            self.node.core()
        }
        fn update_outputs(&self) {
            let total: f64 = self.terms.values().iter().map(|term| **term).sum();
            self.output.set(total);
        }
    }
    let node = SimpleNode::new("float-sum");
    let terms = MultiInput::new();
    let output = Output::new();
    node.register_inputs(&terms, "terms");
    node.register_output(&output, "total");
    let sum = Process::new(FloatSum { node, terms, output });

    sum.terms.accept(&first.output);
    sum.terms.accept(&second.output);

    let result = Value::new(&sum.output);
    assert_eq!(*result.get().unwrap(), 10.0);
    assert_eq!(first.runs.load(Ordering::SeqCst), 1);
    assert_eq!(second.runs.load(Ordering::SeqCst), 1);
}

#[test]
fn optional_input_joins_when_connected() {
    init_tracing();

    let x = Process::new(Constant::new(4.0));
    let node = Process::new(Offset::new());
    node.x.accept(&x.output);

    node.node.update_inputs();
    assert_eq!(node.runs.load(Ordering::SeqCst), 1);
    assert_eq!(*node.output.get().unwrap(), 4.0);

    let y = Process::new(Constant::new(2.0));
    node.y.accept(&y.output);
    node.node.update_inputs();
    assert_eq!(node.runs.load(Ordering::SeqCst), 2);
    assert_eq!(*node.output.get().unwrap(), 6.0);
}

#[test]
fn required_input_missing_never_updates() {
    init_tracing();

    let node = Process::new(Offset::new());
    node.node.update_inputs();
    node.node.update_inputs();
    assert_eq!(node.runs.load(Ordering::SeqCst), 0);
    assert!(node.output.get().is_none());
}

#[test]
fn mismatched_payloads_do_not_connect() {
    init_tracing();

    struct Image;
    struct Mesh;

    let image_out = Output::<Image>::new();
    let mesh_in = Input::<Mesh>::new();

    let error: AssignmentError = mesh_in.core().accept_output(image_out.core()).unwrap_err();
    assert!(error.to_string().contains("Mesh"));
    assert!(error.to_string().contains("Image"));
    assert!(!mesh_in.has_assigned_output());
    assert!(!mesh_in.is_valued());
}

#[test]
fn weak_callback_expires_with_its_node() {
    init_tracing();

    let producer = Process::new(Constant::new(1.0));
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let consumer = Process::new(Constant::new(2.0));
        let consumer_handle = consumer.shared();
        let fired = Arc::clone(&fired);
        producer.output.core().register_callback(Callback::weak(
            SignalKind::Update,
            CallbackInvocation::Transparent,
            &consumer_handle,
            move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            },
        ));
        // consumer dropped here
    }

    let callbacks_before = producer.output.core().forward_receiver().num_callbacks();
    producer
        .output
        .core()
        .forward_receiver()
        .deliver(&Signal::Update);

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(
        producer.output.core().forward_receiver().num_callbacks(),
        callbacks_before - 1,
        "expired callback silently removed"
    );
}

#[test]
fn unset_then_reconnect_restores_flow() {
    init_tracing();

    let a = Process::new(Constant::new(5.0));
    let b = Process::new(Map::new("double", |x| x * 2.0));
    b.input.accept(&a.output);

    let result = Value::new(&b.output);
    assert_eq!(*result.get().unwrap(), 10.0);

    b.input.unset();
    b.input.accept(&a.output);
    assert_eq!(*result.get().unwrap(), 10.0);

    // The rewired connection still carries invalidation.
    a.node.set_dirty(&a.output).unwrap();
    assert_eq!(*result.get().unwrap(), 10.0);
    assert_eq!(b.runs.load(Ordering::SeqCst), 3);
}

#[test]
fn named_ports_resolve_through_the_node_base() {
    init_tracing();

    let a = Process::new(Constant::new(2.0));
    let b = Process::new(Map::new("double", |x| x * 2.0));

    let output = a.node().output_named("value").unwrap();
    b.node().set_input_named("x", &output).unwrap();

    let result = Value::new(&b.output);
    assert_eq!(*result.get().unwrap(), 4.0);

    assert!(b.node().output_named("nope").is_err());
    assert!(b.node().input(3).is_err());
}
