//! Property tests: scheduling, terminal selection, interpolation
//!
//! Random DAGs are generated acyclic by construction (edges only point
//! from a lower node index to a higher one); shuffled ids then exercise
//! the deterministic tie-break.

use flowgraph_core::{Edge, Engine, EngineConfig, Node, NodeType, Payload, WorkflowGraph};
use proptest::prelude::*;
use serde_json::json;

fn make_payload(node_count: usize, edge_picks: &[(usize, usize)]) -> Payload {
    let nodes: Vec<Node> = (0..node_count)
        .map(|i| Node {
            id: format!("n{:03}", i),
            node_type: None,
            data: serde_json::from_value(json!({"value": i})).unwrap(),
        })
        .collect();
    let edges: Vec<Edge> = edge_picks
        .iter()
        .enumerate()
        .filter_map(|(i, (a, b))| {
            let a = a % node_count;
            let b = b % node_count;
            if a == b {
                return None;
            }
            // Edges always point from the lower index to the higher one,
            // which keeps the generated graph acyclic by construction.
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            Some(Edge {
                id: format!("e{}", i),
                source: format!("n{:03}", lo),
                target: format!("n{:03}", hi),
            })
        })
        .collect();
    Payload { nodes, edges }
}

proptest! {
    /// For every edge (u, v), u is scheduled before v.
    #[test]
    fn topological_order_respects_edges(
        node_count in 2usize..20,
        edge_picks in prop::collection::vec((0usize..20, 0usize..20), 0..40),
    ) {
        let payload = make_payload(node_count, &edge_picks);
        let graph = WorkflowGraph::from_payload(&payload).unwrap();
        let order = graph.topological_order().unwrap();
        let position: std::collections::HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        prop_assert_eq!(order.len(), payload.nodes.len());
        for edge in &payload.edges {
            prop_assert!(
                position[edge.source.as_str()] < position[edge.target.as_str()],
                "edge {} -> {} violated",
                edge.source,
                edge.target
            );
        }
    }

    /// Reversing an edge into a back-edge always trips cycle detection.
    #[test]
    fn back_edge_causes_cycle(
        node_count in 2usize..15,
        edge_picks in prop::collection::vec((0usize..15, 0usize..15), 1..20),
    ) {
        let mut payload = make_payload(node_count, &edge_picks);
        prop_assume!(!payload.edges.is_empty());

        let back = {
            let first = &payload.edges[0];
            Edge {
                id: "back".to_string(),
                source: first.target.clone(),
                target: first.source.clone(),
            }
        };
        payload.edges.push(back);

        let graph = WorkflowGraph::from_payload(&payload).unwrap();
        prop_assert!(graph.topological_order().is_err());
    }

    /// The schedule is identical across repeated sorts.
    #[test]
    fn topological_order_is_deterministic(
        node_count in 2usize..20,
        edge_picks in prop::collection::vec((0usize..20, 0usize..20), 0..40),
    ) {
        let payload = make_payload(node_count, &edge_picks);
        let graph = WorkflowGraph::from_payload(&payload).unwrap();
        let first = graph.topological_order().unwrap();
        let second = graph.topological_order().unwrap();
        prop_assert_eq!(first, second);
    }

    /// Escaped holes render literally for any identifier-shaped content.
    #[test]
    fn interpolation_escape_is_literal(name in "[a-z_][a-z0-9_]{0,12}") {
        use flowgraph_core::interpolate_string;
        use flowgraph_core::expr::NoBindings;

        let input = format!("$${{{}}}", name);
        let rendered = interpolate_string(&input, &NoBindings).unwrap();
        prop_assert_eq!(rendered, format!("${{{}}}", name));
    }

    /// The final output is the first-by-id non-context terminal's result.
    #[test]
    fn terminal_selection_follows_id_order(
        node_count in 1usize..8,
        edge_picks in prop::collection::vec((0usize..8, 0usize..8), 0..10),
    ) {
        let payload = make_payload(node_count, &edge_picks);
        let graph = WorkflowGraph::from_payload(&payload).unwrap();

        // All nodes are `number` nodes, so the expected terminal is
        // simply the smallest-id node with no outgoing edges.
        let expected_terminal = graph.terminals().first().map(|s| s.to_string());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            Engine::new(payload.clone(), EngineConfig::default())
                .unwrap()
                .execute()
                .await
        });

        prop_assert!(result.errors.is_empty());
        match expected_terminal {
            Some(id) => {
                prop_assert_eq!(&result.final_output, &result.node_results[&id]);
            }
            None => prop_assert!(result.final_output.is_null()),
        }
    }
}

#[test]
fn context_terminals_yield_to_non_context_terminals() {
    // Two terminals: a context node with the smaller id and a number
    // node. The number node wins despite sorting second.
    let payload: Payload = serde_json::from_value(json!({
        "nodes": [
            {"id": "a_ctx", "data": {"context_name": "k", "context_value": 1}},
            {"id": "b_num", "data": {"value": 9}}
        ],
        "edges": []
    }))
    .unwrap();

    let graph = WorkflowGraph::from_payload(&payload).unwrap();
    assert_eq!(graph.terminals(), vec!["a_ctx", "b_num"]);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(async {
        Engine::new(payload, EngineConfig::default())
            .unwrap()
            .execute()
            .await
    });
    assert_eq!(result.final_output, json!(9));
}

#[test]
fn every_node_type_round_trips_through_serde() {
    for name in [
        "number",
        "text_input",
        "visualization",
        "operation",
        "text_operation",
        "http",
        "condition",
        "for_each",
        "while_loop",
        "variable",
        "extract",
        "transform",
        "accumulator",
        "counter",
        "switch",
        "parallel",
        "join",
        "split",
        "delay",
        "cache",
        "retry",
        "try_catch",
        "timeout",
        "context_variable",
        "context_constant",
    ] {
        let ty: NodeType = serde_json::from_value(json!(name)).unwrap();
        assert_eq!(serde_json::to_value(ty).unwrap(), json!(name));
    }
}
