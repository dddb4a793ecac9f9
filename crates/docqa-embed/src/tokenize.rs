use candle_core::{Device, Tensor};
use docqa_core::{Error, Result};
use tokenizers::Tokenizer;

/// Token ids, token type ids and attention mask, each shaped `[1, T]` with `T <= max_len`.
pub fn tokenize_on_device(tokenizer: &Tokenizer, text: &str, max_len: usize, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
    let enc = tokenizer
        .encode(text, true)
        .map_err(|e| Error::EmbeddingFailure(format!("tokenization failed: {e}")))?;
    let mut ids = enc.get_ids().to_vec();
    let mut mask = enc.get_attention_mask().to_vec();
    ids.truncate(max_len);
    mask.truncate(max_len);
    let len = ids.len();
    let build = || -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let input_ids = Tensor::from_vec(ids, (1, len), device)?;
        let attention_mask = Tensor::from_vec(mask, (1, len), device)?;
        let token_type_ids = input_ids.zeros_like()?;
        Ok((input_ids, token_type_ids, attention_mask))
    };
    build().map_err(|e| Error::EmbeddingFailure(e.to_string()))
}
