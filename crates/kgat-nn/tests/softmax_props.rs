//! Property-based tests for edge softmax and segment reductions.
//!
//! Invariants:
//! - weights over the incoming edges of every node with in-degree > 0 sum to 1
//! - all weights lie in [0, 1]
//! - both reduction policies agree up to float tolerance

use candle_core::{Device, Tensor};
use kgat_core::{Edge, GraphTopology};
use kgat_nn::{edge_softmax, segment_sum, ReductionPolicy};
use proptest::prelude::*;

const NODES: usize = 10;

fn arb_graph() -> impl Strategy<Value = (GraphTopology, Vec<f32>)> {
    prop::collection::vec((0..NODES, 0..3usize, 0..NODES, -20.0f32..20.0), 1..60).prop_map(|v| {
        let edges: Vec<Edge> = v.iter().map(|&(h, r, t, _)| Edge::new(h, r, t)).collect();
        let scores = v.iter().map(|&(.., s)| s).collect();
        (GraphTopology::build(NODES, 3, edges).unwrap(), scores)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn weights_sum_to_one_per_destination((graph, scores) in arb_graph()) {
        let s = Tensor::new(scores.as_slice(), &Device::Cpu).unwrap();
        let w = edge_softmax(&graph, &s, ReductionPolicy::Deterministic)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for v in 0..graph.num_nodes() {
            let range = graph.incoming(v);
            if range.is_empty() {
                continue;
            }
            let total: f32 = w[range].iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-5, "node {} sums to {}", v, total);
        }
        prop_assert!(w.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn policies_agree((graph, scores) in arb_graph()) {
        let s = Tensor::new(scores.as_slice(), &Device::Cpu).unwrap();
        let a = edge_softmax(&graph, &s, ReductionPolicy::Deterministic)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let b = edge_softmax(&graph, &s, ReductionPolicy::Throughput)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for (x, y) in a.iter().zip(&b) {
            prop_assert!((x - y).abs() < 1e-6);
        }

        let values = s.unsqueeze(1).unwrap();
        let sa = segment_sum(&graph, &values, ReductionPolicy::Deterministic).unwrap();
        let sb = segment_sum(&graph, &values, ReductionPolicy::Throughput).unwrap();
        let diff = (sa - sb).unwrap().abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        prop_assert!(diff < 1e-4);
    }
}
