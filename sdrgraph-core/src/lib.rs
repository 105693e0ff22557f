//! SDR Graph Core
//!
//! This crate keeps the configuration of a software-defined-radio block
//! pipeline consistent. Blocks (radios, converters, FIFOs) expose typed
//! properties such as sample rates and frequencies; when one changes, the
//! graph re-runs the resolvers of every affected block and carries edge
//! properties across the connections between them until everything agrees.
//! It also routes one-shot actions, such as stream commands, along the edges.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `property`: Typed property cells, sources and the per-node registry
//! - `node`: Nodes, resolvers, forwarding policies and actions
//! - `graph`: Topology, global resolution and action delivery
//! - `error`: The error type shared by all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use sdrgraph_core::{Edge, Graph, Node, SourceInfo};
//!
//! let mut radio = Node::new("0/Radio#0", 0, 1);
//! let rate = radio.register_property("samp_rate", SourceInfo::output_edge(0), 200e6)?;
//!
//! let mut ddc = Node::new("0/DDC#0", 1, 1);
//! let in_rate = ddc.register_property("samp_rate", SourceInfo::input_edge(0), 200e6)?;
//! let decim = ddc.register_property("decim", SourceInfo::user(0), 1_usize)?;
//! ddc.add_resolver([in_rate.handle()], [decim.handle()], move |p| {
//!     let rate = p.get(in_rate)?;
//!     p.set(decim, (rate / 1e6).round() as usize)
//! })?;
//!
//! let graph = Graph::new();
//! let radio = graph.add_node(radio)?;
//! let ddc = graph.add_node(ddc)?;
//! graph.connect(radio, ddc, Edge::new(0, 0))?;
//! graph.commit()?;
//!
//! graph.with_node_mut(radio, |node| node.set_property_at("samp_rate", 100e6, SourceInfo::output_edge(0)))?;
//! assert_eq!(graph.get_property::<usize>(ddc, "decim", 0)?, 100);
//! ```

pub mod error;
pub mod graph;
pub mod node;
pub mod property;

pub use error::{DirtyProperty, ErrorKind, GraphError, Result};
pub use graph::{Edge, EdgeKind, Graph, GraphConfig, NodeId, ResolveContext};
pub use node::{
    Action, ActionPayload, Block, ForwardingMap, ForwardingPolicy, Node, PropertyAccess,
    StreamCommand, StreamMode,
};
pub use property::{
    AccessMode, Prop, PropHandle, PropertyDirectory, PropertyInfo, PropertyType, PropertyValue,
    SourceInfo, SourceKind, ValueKind,
};
