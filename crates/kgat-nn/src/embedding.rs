//! Embedding tables and per-relation projection matrices.
//!
//! All parameters live in one [`VarMap`]:
//!
//! | name | shape |
//! |------|-------|
//! | `entity_user_embed` | `(n_entities + n_users, entity_dim)` |
//! | `relation_embed` | `(n_relations, relation_dim)` |
//! | `W_R` | `(n_relations, entity_dim, relation_dim)` |
//!
//! Every table is initialized Xavier-uniform with the ReLU gain.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use kgat_core::GraphDims;

use crate::error::{Error, Result};

pub const ENTITY_USER_EMBED: &str = "entity_user_embed";
pub const RELATION_EMBED: &str = "relation_embed";
pub const RELATION_PROJECTION: &str = "W_R";

/// Xavier uniform with gain `sqrt(2)`.
///
/// Fans follow the usual convention for an N-d weight: `fan_in = shape[1] *
/// receptive`, `fan_out = shape[0] * receptive`, where `receptive` is the
/// product of the trailing dimensions.
pub fn xavier_uniform_relu(shape: &[usize]) -> Init {
    let (fan_in, fan_out) = match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [out, inp, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (inp * receptive, out * receptive)
        }
    };
    let gain = 2f64.sqrt();
    let bound = gain * (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Pretrained user and item vectors merged into the entity/user table.
#[derive(Debug, Clone)]
pub struct PretrainedEmbeddings {
    /// `(n_users, entity_dim)`
    pub user_embed: Tensor,
    /// `(n_items, entity_dim)`
    pub item_embed: Tensor,
}

impl PretrainedEmbeddings {
    pub fn new(user_embed: Tensor, item_embed: Tensor) -> Self {
        Self {
            user_embed,
            item_embed,
        }
    }

    /// Load `user_embed` and `item_embed` from a safetensors file.
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let mut tensors = candle_core::safetensors::load_buffer(&bytes, device)?;
        let mut take = |name: &str| {
            tensors
                .remove(name)
                .ok_or_else(|| Error::Checkpoint(format!("pretrain file has no {name:?} tensor")))
                .and_then(|t| Ok(t.to_dtype(DType::F32)?))
        };
        let user_embed = take("user_embed")?;
        let item_embed = take("item_embed")?;
        Ok(Self::new(user_embed, item_embed))
    }

    /// Check counts and width against the configured sizes.
    pub fn validate(&self, dims: &GraphDims, entity_dim: usize) -> Result<()> {
        for (name, t, rows) in [
            ("user_embed", &self.user_embed, dims.n_users),
            ("item_embed", &self.item_embed, dims.n_items),
        ] {
            let expected = vec![rows, entity_dim];
            if t.dims() != expected.as_slice() {
                return Err(Error::ShapeMismatch {
                    name: name.to_string(),
                    expected,
                    got: t.dims().to_vec(),
                });
            }
        }
        Ok(())
    }
}

/// User/entity and relation embedding tables.
#[derive(Debug, Clone)]
pub struct EmbeddingTables {
    entity_user: Tensor,
    relation: Tensor,
}

impl EmbeddingTables {
    pub fn new(
        dims: &GraphDims,
        entity_dim: usize,
        relation_dim: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let (n_nodes, n_relations) = (dims.n_nodes(), dims.n_relations);
        let entity_user = vb.get_with_hints(
            (n_nodes, entity_dim),
            ENTITY_USER_EMBED,
            xavier_uniform_relu(&[n_nodes, entity_dim]),
        )?;
        let relation = vb.get_with_hints(
            (n_relations, relation_dim),
            RELATION_EMBED,
            xavier_uniform_relu(&[n_relations, relation_dim]),
        )?;
        Ok(Self {
            entity_user,
            relation,
        })
    }

    /// The full `(n_nodes, entity_dim)` table.
    pub fn entity_user(&self) -> &Tensor {
        &self.entity_user
    }

    /// The full `(n_relations, relation_dim)` table.
    pub fn relation(&self) -> &Tensor {
        &self.relation
    }

    /// Rows of the entity/user table for node ids (`u32` tensor).
    pub fn lookup(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.entity_user.index_select(ids, 0)?)
    }

    /// Rows of the relation table for relation ids (`u32` tensor).
    pub fn relation_lookup(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.relation.index_select(ids, 0)?)
    }
}

/// Overwrite the item and user rows of the entity/user table in place.
///
/// The merged table is `[item_pretrained; current entity rows; user_pretrained]`.
pub fn merge_pretrained(
    varmap: &mut VarMap,
    table: &Tensor,
    dims: &GraphDims,
    entity_dim: usize,
    pretrained: &PretrainedEmbeddings,
) -> Result<()> {
    pretrained.validate(dims, entity_dim)?;
    let device = table.device();
    let mut parts = vec![pretrained.item_embed.to_device(device)?];
    if dims.n_entities > dims.n_items {
        parts.push(table.narrow(0, dims.n_items, dims.n_entities - dims.n_items)?.detach());
    }
    parts.push(pretrained.user_embed.to_device(device)?);
    let merged = Tensor::cat(&parts, 0)?;
    varmap.set_one(ENTITY_USER_EMBED, &merged)?;
    Ok(())
}

/// Per-relation projection matrices `W_r`, stacked `(n_relations, entity_dim, relation_dim)`.
#[derive(Debug, Clone)]
pub struct RelationProjection {
    weight: Tensor,
}

impl RelationProjection {
    pub fn new(n_relations: usize, entity_dim: usize, relation_dim: usize, vb: &VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (n_relations, entity_dim, relation_dim),
            RELATION_PROJECTION,
            xavier_uniform_relu(&[n_relations, entity_dim, relation_dim]),
        )?;
        Ok(Self { weight })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// `W_r` for one relation, `(entity_dim, relation_dim)`.
    pub fn matrix(&self, relation: usize) -> Result<Tensor> {
        Ok(self.weight.get(relation)?)
    }

    /// `W_r` per batch row, `(B, entity_dim, relation_dim)`.
    pub fn batched(&self, relations: &Tensor) -> Result<Tensor> {
        Ok(self.weight.index_select(relations, 0)?)
    }

    /// Project `(B, entity_dim)` vectors into the space of `relation`.
    pub fn project(&self, vectors: &Tensor, relation: usize) -> Result<Tensor> {
        Ok(vectors.matmul(&self.matrix(relation)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(init: Init) -> f64 {
        match init {
            Init::Uniform { up, .. } => up,
            _ => panic!("expected uniform init"),
        }
    }

    #[test]
    fn test_xavier_fans() {
        // 2-d: fan_in = cols, fan_out = rows
        let b = bound(xavier_uniform_relu(&[10, 6]));
        assert!((b - 2f64.sqrt() * (6.0 / 16.0f64).sqrt()).abs() < 1e-12);
        // 3-d: fan_in = d1 * d2, fan_out = d0 * d2
        let b = bound(xavier_uniform_relu(&[3, 4, 5]));
        assert!((b - 2f64.sqrt() * (6.0 / 35.0f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_tables_within_bound() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let dims = GraphDims::new(2, 3, 5, 4).unwrap();
        let tables = EmbeddingTables::new(&dims, 8, 6, &vb).unwrap();
        assert_eq!(tables.entity_user().dims(), &[7, 8]);
        assert_eq!(tables.relation().dims(), &[4, 6]);

        let b = bound(xavier_uniform_relu(&[7, 8])) as f32;
        let max = tables.entity_user().abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(max <= b);
    }

    #[test]
    fn test_projection_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let proj = RelationProjection::new(3, 4, 2, &vb).unwrap();
        let x = Tensor::randn(0f32, 1f32, (5, 4), &device).unwrap();
        assert_eq!(proj.project(&x, 1).unwrap().dims(), &[5, 2]);
        let ids = Tensor::new(&[0u32, 2, 2], &device).unwrap();
        assert_eq!(proj.batched(&ids).unwrap().dims(), &[3, 4, 2]);
    }
}
