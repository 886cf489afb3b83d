use anyhow::{ensure, Result};
use candle_core::{DType, IndexOp, Tensor};

/// How token states collapse into one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// First token (`<s>`/`[CLS]`) state.
    Cls,
    /// Mean over unmasked tokens.
    Mean,
}

impl Pooling {
    /// BGE models are trained with CLS pooling; everything else gets the mean.
    pub fn for_model(model_id: &str) -> Self {
        if model_id.to_ascii_lowercase().contains("bge") {
            Pooling::Cls
        } else {
            Pooling::Mean
        }
    }

    pub fn apply(self, hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        match self {
            Pooling::Cls => cls_l2(hidden),
            Pooling::Mean => masked_mean_l2(hidden, attention_mask),
        }
    }
}

pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let dims = hidden.dims();
    ensure!(dims.len() == 3, "hidden shape must be [B,T,H], got {dims:?}");
    let hidden_dim = dims[2];

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?;
    let mask_broadcast = match mask_3d.broadcast_as(hidden.shape()) {
        Ok(m) => m,
        Err(_) => mask_3d.repeat((1, 1, hidden_dim))?,
    };
    let masked = (hidden * &mask_broadcast)?;
    let sum = masked.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
    let mean = sum.broadcast_div(&lengths)?;
    l2_normalize(&mean)
}

pub fn cls_l2(hidden: &Tensor) -> Result<Tensor> {
    let dims = hidden.dims();
    ensure!(dims.len() == 3, "hidden shape must be [B,T,H], got {dims:?}");
    let cls = hidden.i((.., 0))?.contiguous()?;
    l2_normalize(&cls)
}

/// Row-wise L2 normalization of a [B,H] tensor.
fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let eps_val = match x.dtype() {
        DType::F16 | DType::BF16 => 1e-6f32,
        _ => 1e-12f32,
    };
    let eps = Tensor::new(&[eps_val], x.device())?.to_dtype(x.dtype())?.unsqueeze(0)?;
    let norm = x.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    Ok(x.broadcast_div(&norm)?)
}
