//! End-to-end behaviour of attention, propagation and pretrain merging on
//! hand-built graphs.

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use kgat_core::{Edge, GraphDims, GraphTopology};
use kgat_nn::attention::score_edges;
use kgat_nn::softmax::index_tensor;
use kgat_nn::{score_relation, Error, Kgat, KgatConfig, PretrainedEmbeddings, ReductionPolicy};

fn gcn_config(entity_dim: usize, layers: Vec<usize>) -> KgatConfig {
    let dropout = vec![0.0; layers.len()];
    KgatConfig::default()
        .with_entity_dim(entity_dim)
        .with_relation_dim(3)
        .with_aggregator("gcn")
        .with_layers(layers, dropout)
}

#[test]
fn single_edge_gets_full_weight() {
    // items i0 = 0, i1 = 1; user u0 = node 2; one edge u0 <- i0
    let dims = GraphDims::new(1, 2, 2, 1).unwrap();
    let model = Kgat::new(gcn_config(5, vec![4]), dims, None, &Device::Cpu).unwrap();
    let graph = Arc::new(GraphTopology::build(3, 1, vec![Edge::new(2, 0, 0)]).unwrap());

    for policy in [ReductionPolicy::Deterministic, ReductionPolicy::Throughput] {
        let att = model.compute_attention(graph.clone(), policy).unwrap();
        assert_eq!(att.incoming_edges(2).unwrap(), vec![(0, 0, 1.0)]);
        assert!(att.incoming_edges(0).unwrap().is_empty());
        assert!(att.incoming_edges(1).unwrap().is_empty());

        let layer = &model.propagation().layers()[0];
        let out = layer
            .forward(model.tables().entity_user(), &att, policy, false)
            .unwrap();
        assert_eq!(out.dims(), &[3, 4]);
    }
}

#[test]
fn isolated_nodes_receive_zero_message() {
    let dims = GraphDims::new(1, 2, 2, 1).unwrap();
    let model = Kgat::new(gcn_config(4, vec![4]), dims, None, &Device::Cpu).unwrap();
    let graph = Arc::new(GraphTopology::build(3, 1, vec![Edge::new(2, 0, 0)]).unwrap());
    let att = model
        .compute_attention(graph, ReductionPolicy::Deterministic)
        .unwrap();

    let x = model.tables().entity_user();
    let n = att
        .aggregate(x, ReductionPolicy::Deterministic)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();
    assert_eq!(n[0], vec![0.0; 4]);
    assert_eq!(n[1], vec![0.0; 4]);
    // weight 1.0 on the single edge: u0 receives i0 exactly
    assert_eq!(n[2], x.get(0).unwrap().to_vec1::<f32>().unwrap());
}

#[test]
fn empty_relation_is_skipped_without_affecting_others() {
    // relation 1 has no edges
    let dims = GraphDims::new(1, 2, 3, 3).unwrap();
    let model = Kgat::new(gcn_config(4, vec![2]), dims, None, &Device::Cpu).unwrap();
    let edges = vec![
        Edge::new(3, 0, 0),
        Edge::new(3, 0, 1),
        Edge::new(0, 2, 2),
        Edge::new(1, 2, 2),
    ];
    let graph = Arc::new(GraphTopology::build(4, 3, edges).unwrap());
    assert!(graph.relation_edges(1).is_none());

    let embed = model.tables().entity_user();
    let scores = score_edges(&graph, embed, model.projection(), model.tables().relation())
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();

    for relation in [0usize, 2] {
        let ids = graph.relation_edges(relation).unwrap();
        let heads: Vec<u32> = ids.iter().map(|&e| graph.heads()[e as usize]).collect();
        let tails: Vec<u32> = ids.iter().map(|&e| graph.tails()[e as usize]).collect();
        let direct = score_relation(
            embed,
            &index_tensor(&heads, &Device::Cpu).unwrap(),
            &index_tensor(&tails, &Device::Cpu).unwrap(),
            &model.projection().matrix(relation).unwrap(),
            &model.tables().relation().get(relation).unwrap(),
        )
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
        for (k, &e) in ids.iter().enumerate() {
            assert_eq!(scores[e as usize], direct[k]);
        }
    }

    let att = model
        .compute_attention(graph, ReductionPolicy::Deterministic)
        .unwrap();
    let w = att.incoming_edges(3).unwrap();
    assert!((w[0].2 + w[1].2 - 1.0).abs() < 1e-6);
}

#[test]
fn propagated_width_is_base_plus_layers() {
    let dims = GraphDims::new(2, 2, 3, 2).unwrap();
    for kind in ["gcn", "graphsage", "bi-interaction"] {
        let config = gcn_config(6, vec![5, 3]).with_aggregator(kind);
        let model = Kgat::new(config, dims, None, &Device::Cpu).unwrap();
        let graph = Arc::new(
            GraphTopology::build(5, 2, vec![Edge::new(3, 0, 0), Edge::new(0, 1, 3)]).unwrap(),
        );
        let att = model
            .compute_attention(graph, ReductionPolicy::Deterministic)
            .unwrap();
        let all = model
            .cf_embedding(&att, ReductionPolicy::Deterministic, false)
            .unwrap();
        assert_eq!(all.dims(), &[5, 6 + 5 + 3], "{kind}");
    }
}

#[test]
fn pretrain_merge_orders_items_entities_users() {
    let device = Device::Cpu;
    let dims = GraphDims::new(2, 2, 3, 1).unwrap();
    let users = Tensor::new(&[[1f32, 1.], [2., 2.]], &device).unwrap();
    let items = Tensor::new(&[[3f32, 3.], [4., 4.]], &device).unwrap();
    let pre = PretrainedEmbeddings::new(users, items);

    let model = Kgat::new(gcn_config(2, vec![2]), dims, Some(&pre), &device).unwrap();
    let table = model.tables().entity_user().to_vec2::<f32>().unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(table[0], vec![3.0, 3.0]);
    assert_eq!(table[1], vec![4.0, 4.0]);
    assert_eq!(table[3], vec![1.0, 1.0]);
    assert_eq!(table[4], vec![2.0, 2.0]);
    // the non-item entity keeps its random initialization
    assert!(table[2].iter().all(|v| v.abs() <= 2.0));
}

#[test]
fn pretrain_shape_mismatch_fails_construction() {
    let device = Device::Cpu;
    let dims = GraphDims::new(2, 2, 3, 1).unwrap();

    let wrong_count = PretrainedEmbeddings::new(
        Tensor::zeros((3, 2), DType::F32, &device).unwrap(),
        Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
    );
    let wrong_dim = PretrainedEmbeddings::new(
        Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
        Tensor::zeros((2, 5), DType::F32, &device).unwrap(),
    );
    for pre in [wrong_count, wrong_dim] {
        let err = Kgat::new(gcn_config(2, vec![2]), dims, Some(&pre), &device).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    }
}

#[test]
fn pretrained_file_loads() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pretrain.safetensors");
    let tensors = std::collections::HashMap::from([
        ("user_embed".to_string(), Tensor::ones((2, 2), DType::F32, &device).unwrap()),
        ("item_embed".to_string(), Tensor::zeros((2, 2), DType::F32, &device).unwrap()),
    ]);
    candle_core::safetensors::save(&tensors, &path).unwrap();

    let pre = PretrainedEmbeddings::load(&path, &device).unwrap();
    let dims = GraphDims::new(2, 2, 2, 1).unwrap();
    let model = Kgat::new(gcn_config(2, vec![2]), dims, Some(&pre), &device).unwrap();
    let table = model.tables().entity_user().to_vec2::<f32>().unwrap();
    assert_eq!(table[0], vec![0.0, 0.0]);
    assert_eq!(table[3], vec![1.0, 1.0]);

    let only_users = dir.path().join("users.safetensors");
    let tensors = std::collections::HashMap::from([(
        "user_embed".to_string(),
        Tensor::ones((2, 2), DType::F32, &device).unwrap(),
    )]);
    candle_core::safetensors::save(&tensors, &only_users).unwrap();
    assert!(matches!(
        PretrainedEmbeddings::load(&only_users, &device),
        Err(Error::Checkpoint(_))
    ));
}
