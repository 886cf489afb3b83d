use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{EncodeInput, Tokenizer};

/// XLM-R `<pad>` id, used when the tokenizer does not declare one.
const DEFAULT_PAD_ID: u32 = 1;

/// Padded model inputs for one batch; all tensors are `[B, T]` u32.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

/// Tokenize `inputs` (single texts or `(query, passage)` pairs), truncate each
/// to `max_len` tokens keeping the closing special token, and right-pad to the
/// longest sequence in the batch.
pub fn encode_batch<'s, E>(
    tokenizer: &Tokenizer,
    inputs: Vec<E>,
    max_len: usize,
    device: &Device,
) -> Result<EncodedBatch>
where
    E: Into<EncodeInput<'s>> + Send,
{
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(|e| anyhow!("Tokenization failed: {e}"))?;
    let pad_id = tokenizer.token_to_id("<pad>").unwrap_or(DEFAULT_PAD_ID);

    let mut rows: Vec<(Vec<u32>, Vec<u32>)> = Vec::with_capacity(encodings.len());
    for enc in &encodings {
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        if ids.len() > max_len && max_len > 1 {
            let last = ids[ids.len() - 1];
            ids.truncate(max_len - 1);
            ids.push(last);
            mask.truncate(max_len);
        }
        rows.push((ids, mask));
    }

    let batch = rows.len();
    let width = rows.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0).max(1);
    let mut flat_ids = Vec::with_capacity(batch * width);
    let mut flat_mask = Vec::with_capacity(batch * width);
    for (ids, mask) in rows {
        let pad = width - ids.len();
        flat_ids.extend(ids);
        flat_ids.extend(std::iter::repeat(pad_id).take(pad));
        flat_mask.extend(mask);
        flat_mask.extend(std::iter::repeat(0u32).take(pad));
    }

    let input_ids = Tensor::from_vec(flat_ids, (batch, width), device)?;
    let attention_mask = Tensor::from_vec(flat_mask, (batch, width), device)?;
    let token_type_ids = input_ids.zeros_like()?;
    Ok(EncodedBatch { input_ids, attention_mask, token_type_ids })
}
