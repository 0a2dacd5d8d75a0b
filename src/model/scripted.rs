//! Deterministic stand-in for a trained network, used by decoder and
//! validation tests.

use std::cell::Cell;

use candle_core::{DType, Result, Tensor};

use super::Seq2SeqModel;

/// `project` picks `script[p]` for the row at decoder position `p`, repeating
/// the last entry once the script runs out.
pub struct ScriptedModel {
    script: Vec<u32>,
    vocab_size: usize,
    encode_calls: Cell<usize>,
}

impl ScriptedModel {
    pub fn new(script: Vec<u32>, vocab_size: usize) -> Self {
        assert!(!script.is_empty());
        assert!(script.iter().all(|&id| (id as usize) < vocab_size));
        Self {
            script,
            vocab_size,
            encode_calls: Cell::new(0),
        }
    }

    pub fn encode_calls(&self) -> usize {
        self.encode_calls.get()
    }
}

impl Seq2SeqModel for ScriptedModel {
    fn encode(&self, src: &Tensor, _src_mask: &Tensor, _train: bool) -> Result<Tensor> {
        self.encode_calls.set(self.encode_calls.get() + 1);
        src.to_dtype(DType::F32)?.unsqueeze(2)
    }

    fn decode(
        &self,
        _encoder_output: &Tensor,
        _src_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
        _train: bool,
    ) -> Result<Tensor> {
        let (batch_size, len) = tgt.dims2()?;
        if tgt_mask.dims3()? != (1, len, len) {
            candle_core::bail!("decoder mask {:?} does not match {len} positions", tgt_mask.shape());
        }
        let mask = tgt_mask.squeeze(0)?.to_vec2::<u8>()?;
        for (i, row) in mask.iter().enumerate() {
            for (j, &visible) in row.iter().enumerate() {
                if (visible == 1) != (j <= i) {
                    candle_core::bail!("decoder mask is not causal at ({i}, {j})");
                }
            }
        }
        Tensor::arange(0u32, len as u32, tgt.device())?
            .to_dtype(DType::F32)?
            .reshape((1, len, 1))?
            .repeat((batch_size, 1, 1))
    }

    fn project(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch_size, len, _) = xs.dims3()?;
        let positions = xs.flatten_all()?.to_vec1::<f32>()?;
        let mut logits = vec![0f32; positions.len() * self.vocab_size];
        for (row, position) in positions.iter().enumerate() {
            let step = (*position as usize).min(self.script.len() - 1);
            logits[row * self.vocab_size + self.script[step] as usize] = 1.0;
        }
        Tensor::from_vec(logits, (batch_size, len, self.vocab_size), xs.device())
    }
}
