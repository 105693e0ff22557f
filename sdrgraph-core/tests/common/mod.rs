//! Mock blocks shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sdrgraph_core::node::{RX_EVENT_KEY, STREAM_CMD_KEY};
use sdrgraph_core::{ActionPayload, Block, GraphError, Node, Result, SourceInfo};
use tracing_subscriber::EnvFilter;

/// Install a subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// A radio with one port in each direction. The user sample rate drives the
/// rate on its output edge; stream commands arriving from downstream are
/// logged.
pub struct MockRadio {
    pub id: String,
    pub resolver_calls: Counter,
    pub commands: Log,
}

impl MockRadio {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            resolver_calls: Counter::default(),
            commands: log(),
        }
    }
}

impl Block for MockRadio {
    fn unique_id(&self) -> String {
        self.id.clone()
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn register(&mut self, node: &mut Node) -> Result<()> {
        let rate = node.register_property("samp_rate", SourceInfo::user(0), 200e6)?;
        let out_rate = node.register_property("samp_rate", SourceInfo::output_edge(0), 200e6)?;
        node.register_property("samp_rate", SourceInfo::input_edge(0), 200e6)?;
        node.register_property("freq", SourceInfo::user(0), 1e9)?;

        let calls = self.resolver_calls.clone();
        node.add_resolver([rate.handle()], [out_rate.handle()], move |p| {
            calls.bump();
            let rate = p.get(rate)?;
            p.set(out_rate, rate)
        })?;

        let commands = Arc::clone(&self.commands);
        node.register_action_handler(STREAM_CMD_KEY, move |_node, source, action| {
            if let ActionPayload::StreamCommand(command) = action.payload() {
                commands.lock().push(format!("{:?}@{source}", command.mode));
            }
            Ok(())
        });
        Ok(())
    }
}

/// A digital down-converter: picks the decimation that gets closest to the
/// requested output rate and reports the resulting rate downstream.
pub struct MockDdc {
    pub id: String,
    pub resolver_calls: Counter,
}

impl MockDdc {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            resolver_calls: Counter::default(),
        }
    }
}

impl Block for MockDdc {
    fn unique_id(&self) -> String {
        self.id.clone()
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn register(&mut self, node: &mut Node) -> Result<()> {
        let in_rate = node.register_property("samp_rate", SourceInfo::input_edge(0), 200e6)?;
        let out_rate = node.register_property("samp_rate", SourceInfo::output_edge(0), 200e6)?;
        let output_rate = node.register_property("output_rate", SourceInfo::user(0), 200e6)?;
        let decim = node.register_property("decim", SourceInfo::user(0), 1_usize)?;

        let calls = self.resolver_calls.clone();
        node.add_resolver(
            [in_rate.handle(), output_rate.handle()],
            [decim.handle(), out_rate.handle()],
            move |p| {
                calls.bump();
                let input = p.get(in_rate)?;
                let target = p.get(output_rate)?;
                if input <= 0.0 || target <= 0.0 {
                    return Err(GraphError::Resolve(format!(
                        "cannot decimate {input} Hz down to {target} Hz"
                    )));
                }
                let factor = ((input / target).round() as usize).max(1);
                p.set(decim, factor)?;
                p.set(out_rate, input / factor as f64)
            },
        )
    }
}

/// A host-side receive streamer. Its sample rate is unknown until the
/// upstream block reports one.
pub struct MockStreamer {
    pub id: String,
    pub events: Log,
}

impl MockStreamer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            events: log(),
        }
    }
}

impl Block for MockStreamer {
    fn unique_id(&self) -> String {
        self.id.clone()
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn num_output_ports(&self) -> usize {
        0
    }

    fn register(&mut self, node: &mut Node) -> Result<()> {
        node.register_optional_property::<f64>("samp_rate", SourceInfo::input_edge(0))?;
        let events = Arc::clone(&self.events);
        node.register_action_handler(RX_EVENT_KEY, move |_node, source, action| {
            if let ActionPayload::RxEvent { code } = action.payload() {
                events.lock().push(format!("{code:?}@{source}"));
            }
            Ok(())
        });
        Ok(())
    }
}

/// A block without properties of its own. Everything passes through it by
/// the default forwarding policy.
pub fn fifo(id: &str) -> Node {
    Node::new(id, 1, 1)
}

/// A pass-through node with arbitrary port counts, for routing tests.
pub fn router(id: &str, inputs: usize, outputs: usize) -> Node {
    Node::new(id, inputs, outputs)
}

/// A node that owns `samp_rate` on its first output edge.
pub fn source(id: &str, rate: f64) -> Node {
    let mut node = Node::new(id, 0, 1);
    node.register_property("samp_rate", SourceInfo::output_edge(0), rate)
        .unwrap();
    node.init_props().unwrap();
    node
}

/// A node with one input and nothing else.
pub fn sink(id: &str) -> Node {
    Node::new(id, 1, 0)
}
