use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Sentence embeddings from token states: masked mean, then unit length.
///
/// `hidden` is `[batch, tokens, dim]` and `attention_mask` is
/// `[batch, tokens]`; the result is `[batch, dim]`. A row whose mask is all
/// zero pools to the zero vector instead of NaN.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let pooled = masked_mean(hidden, attention_mask)?;
    l2_normalize(&pooled)
}

fn masked_mean(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, _) = match hidden.dims() {
        [b, t, h] => (*b, *t, *h),
        other => anyhow::bail!("token states must be [batch, tokens, dim], got {other:?}"),
    };
    ensure!(
        attention_mask.dims() == [batch, tokens],
        "attention mask {:?} does not cover token states {:?}",
        attention_mask.dims(),
        hidden.dims()
    );

    let weights = attention_mask
        .to_device(hidden.device())?
        .to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&weights.unsqueeze(2)?)?.sum(1)?;
    let counts = weights.sum_keepdim(1)?.maximum(1.0)?;
    Ok(summed.broadcast_div(&counts)?)
}

fn l2_normalize(rows: &Tensor) -> Result<Tensor> {
    let floor = if rows.dtype() == DType::F16 { 1e-6 } else { 1e-12 };
    let norms = rows.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(floor)?;
    Ok(rows.broadcast_div(&norms)?)
}
