//! Property Tests for Resolution and Topology
//!
//! Forwarding chains of increasing depth must settle within the configured
//! number of sweep circuits, whatever order their edges were connected in,
//! and connects the graph rejects must leave its edges untouched.

mod common;

use common::{fifo, init_tracing, router, sink, source};
use proptest::prelude::*;
use sdrgraph_core::{Edge, ForwardingMap, ForwardingPolicy, Graph, GraphError, Node, NodeId, SourceInfo};

/// A splitter that only forwards its input to its second output.
fn splitter(id: &str) -> Node {
    let mut node = router(id, 1, 2);
    node.set_prop_forwarding_policy(ForwardingPolicy::UseMap, "");
    let mut map = ForwardingMap::new();
    map.insert(SourceInfo::input_edge(0), vec![SourceInfo::output_edge(1)]);
    node.set_prop_forwarding_map(map);
    node
}

struct Chain {
    graph: Graph,
    head: NodeId,
    tail: NodeId,
}

/// source -> stage... -> sink, with the edges connected in `order`. Stages
/// marked `true` are splitters continuing the chain on their second output.
fn chain(stages: &[bool], order: &[usize]) -> Chain {
    let graph = Graph::new();
    let head = graph.add_node(source("src", 100e6)).unwrap();
    let mut nodes = vec![(head, 0)];
    for (index, &split) in stages.iter().enumerate() {
        let id = format!("stage{index}");
        let (node, out_port) = if split {
            (splitter(&id), 1)
        } else {
            (fifo(&id), 0)
        };
        nodes.push((graph.add_node(node).unwrap(), out_port));
    }
    let tail = graph.add_node(sink("dst")).unwrap();
    nodes.push((tail, 0));

    for &link in order {
        let (src, port) = nodes[link];
        let (dst, _) = nodes[link + 1];
        graph.connect(src, dst, Edge::new(port, 0)).unwrap();
    }
    Chain { graph, head, tail }
}

fn tail_rate(chain: &Chain) -> Result<f64, GraphError> {
    chain
        .graph
        .with_node(chain.tail, |node| {
            node.get_property_at::<f64>("samp_rate", SourceInfo::input_edge(0))
        })?
}

fn chain_strategy() -> impl Strategy<Value = (Vec<bool>, Vec<usize>)> {
    prop::collection::vec(any::<bool>(), 1..12).prop_flat_map(|stages| {
        let links: Vec<usize> = (0..=stages.len()).collect();
        (Just(stages), Just(links).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chains_converge_within_sweep_bound(
        (stages, order) in chain_strategy(),
        rate in 1e3f64..1e9,
    ) {
        init_tracing();
        let chain = chain(&stages, &order);
        prop_assert!(chain.graph.commit().is_ok());
        prop_assert_eq!(tail_rate(&chain).unwrap(), 100e6);

        chain
            .graph
            .with_node_mut(chain.head, |node| {
                node.set_property_at("samp_rate", rate, SourceInfo::output_edge(0))
            })
            .unwrap();
        prop_assert_eq!(tail_rate(&chain).unwrap(), rate);
    }

    #[test]
    fn rejected_connects_leave_edges_unchanged(
        attempts in prop::collection::vec(
            (0usize..6, 0usize..6, 0usize..4, 0usize..4, any::<bool>()),
            1..40,
        ),
    ) {
        init_tracing();
        let graph = Graph::new();
        let ids: Vec<NodeId> = (0..6)
            .map(|index| graph.add_node(router(&format!("r{index}"), 4, 4)).unwrap())
            .collect();

        for (src, dst, src_port, dst_port, back) in attempts {
            let before = format!("{:?}", graph.enumerate_edges().unwrap());
            let edge = if back {
                Edge::new(src_port, dst_port).back_edge()
            } else {
                Edge::new(src_port, dst_port)
            };
            if graph.connect(ids[src], ids[dst], edge).is_err() {
                prop_assert_eq!(format!("{:?}", graph.enumerate_edges().unwrap()), before);
            }
        }

        // Whatever was accepted still sorts.
        prop_assert!(graph.commit().is_ok());
    }
}
