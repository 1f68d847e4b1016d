//! Training objectives.
//!
//! Both losses are pairwise log-sigmoid losses plus a mean-L2 penalty on every
//! embedding they touch:
//!
//! ```text
//! KG:  -log σ(d(h, r, t⁻) - d(h, r, t⁺)),   d = ‖W_r e_h + e_r - W_r e_t‖²
//! CF:  -log σ(s(u, i⁺) - s(u, i⁻)),          s = e_u · e_i
//! ```

use candle_core::Tensor;

use crate::error::Result;

/// `log σ(x)` as `min(x, 0) - ln(1 + e^{-|x|})`; finite for any finite `x`.
pub fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    let zeros = x.zeros_like()?;
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((x.minimum(&zeros)? - tail)?)
}

/// `mean_rows(Σ x² / 2)`.
pub fn l2_loss_mean(x: &Tensor) -> Result<Tensor> {
    Ok((x.sqr()?.sum(1)? / 2.0)?.mean_all()?)
}

/// `mean(-log σ(pos - neg))`.
pub fn bpr_loss(pos: &Tensor, neg: &Tensor) -> Result<Tensor> {
    Ok(log_sigmoid(&(pos - neg)?)?.neg()?.mean_all()?)
}

/// Translational loss for one batch.
///
/// `head`, `pos_tail`, `neg_tail` are `(B, entity_dim)`; `relation` is
/// `(B, relation_dim)`; `w_r` is `(B, entity_dim, relation_dim)`.
pub fn kg_loss(
    head: &Tensor,
    relation: &Tensor,
    pos_tail: &Tensor,
    neg_tail: &Tensor,
    w_r: &Tensor,
    l2_lambda: f64,
) -> Result<Tensor> {
    let project = |x: &Tensor| -> Result<Tensor> { Ok(x.unsqueeze(1)?.matmul(w_r)?.squeeze(1)?) };
    let h = project(head)?;
    let pos = project(pos_tail)?;
    let neg = project(neg_tail)?;

    let translated = (&h + relation)?;
    let pos_score = (&translated - &pos)?.sqr()?.sum(1)?;
    let neg_score = (&translated - &neg)?.sqr()?.sum(1)?;
    let loss = bpr_loss(&neg_score, &pos_score)?;

    let l2 = (((l2_loss_mean(&h)? + l2_loss_mean(relation)?)? + l2_loss_mean(&pos)?)?
        + l2_loss_mean(&neg)?)?;
    Ok((loss + (l2 * l2_lambda)?)?)
}

/// Ranking loss for one batch of propagated `(B, D)` embeddings.
pub fn cf_loss(user: &Tensor, pos_item: &Tensor, neg_item: &Tensor, l2_lambda: f64) -> Result<Tensor> {
    let pos_score = (user * pos_item)?.sum(1)?;
    let neg_score = (user * neg_item)?.sum(1)?;
    let loss = bpr_loss(&pos_score, &neg_score)?;
    let l2 = ((l2_loss_mean(user)? + l2_loss_mean(pos_item)?)? + l2_loss_mean(neg_item)?)?;
    Ok((loss + (l2 * l2_lambda)?)?)
}

/// `users · itemsᵀ`, `(U, D) x (I, D) -> (U, I)`.
pub fn score(users: &Tensor, items: &Tensor) -> Result<Tensor> {
    Ok(users.matmul(&items.t()?)?)
}
