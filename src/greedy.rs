use anyhow::Result;
use candle_core::{Device, Tensor};

use crate::error::TranslatorError;
use crate::model::Seq2SeqModel;
use crate::utils::causal_mask;

/// Autoregressive arg-max decoding of a single source sequence.
///
/// `src` is `(1, S)` and `src_mask` `(1, 1, 1, S)`. The encoder runs once;
/// every step feeds the whole prefix back through the decoder and appends the
/// highest scoring id of the last position. Decoding stops right after
/// `eos_id` is appended or when the output holds `max_len` ids. The returned
/// `(1, L)` tensor always starts with `sos_id` and `2 <= L <= max_len`.
pub fn greedy_decode<M: Seq2SeqModel + ?Sized>(
    model: &M,
    src: &Tensor,
    src_mask: &Tensor,
    sos_id: u32,
    eos_id: u32,
    max_len: usize,
    device: &Device,
) -> Result<Tensor> {
    if max_len < 2 {
        return Err(TranslatorError::DecodeLengthTooSmall(max_len).into());
    }

    let encoder_output = model.encode(src, src_mask, false)?;
    let mut decoder_input = Tensor::new(&[[sos_id]], device)?;

    loop {
        let len = decoder_input.dim(1)?;
        let decoder_mask = causal_mask(len, device)?;
        let decoder_output =
            model.decode(&encoder_output, src_mask, &decoder_input, &decoder_mask, false)?;
        let logits = model.project(&decoder_output.narrow(1, len - 1, 1)?)?;
        let next_id = logits.flatten_all()?.argmax(0)?.to_scalar::<u32>()?;

        decoder_input = Tensor::cat(&[&decoder_input, &Tensor::new(&[[next_id]], device)?], 1)?;
        if next_id == eos_id || decoder_input.dim(1)? >= max_len {
            break;
        }
    }

    Ok(decoder_input)
}
