use candle_core::{DType, IndexOp, Result, Tensor};
use candle_nn::{embedding, Dropout, Embedding, Module, ModuleT, VarBuilder};

/// Token embedding scaled by √d_model.
pub struct InputEmbedding {
    embedding: Embedding,
    scale: f64,
}

impl InputEmbedding {
    pub fn new(vocab_size: usize, d_model: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            embedding: embedding(vocab_size, d_model, vb.pp("embedding"))?,
            scale: (d_model as f64).sqrt(),
        })
    }
}

impl Module for InputEmbedding {
    fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        // (batch, seq_len) -> (batch, seq_len, d_model)
        self.embedding.forward(ids)? * self.scale
    }
}

/// Fixed sinusoidal position table, sin on even and cos on odd features.
pub struct PositionalEncoding {
    table: Tensor,
    dropout: Dropout,
}

impl PositionalEncoding {
    pub fn new(max_len: usize, d_model: usize, drop_p: f32, vb: VarBuilder) -> Result<Self> {
        if d_model % 2 != 0 {
            candle_core::bail!("positional encoding needs an even d_model, got {d_model}");
        }
        let device = vb.device();
        let half = d_model / 2;

        // 10_000^(-2i / d_model) = exp(-2i · ln(10_000) / d_model)
        let inv_freq = (Tensor::arange(0u32, half as u32, device)?.to_dtype(DType::F32)?
            * (-2.0 * 10_000f64.ln() / d_model as f64))?
            .exp()?
            .reshape((1, half))?;
        let positions = Tensor::arange(0u32, max_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((max_len, 1))?;
        let angles = positions.matmul(&inv_freq)?;

        // (max_len, half, 2) -> (max_len, d_model) interleaves sin and cos
        let table = Tensor::stack(&[&angles.sin()?, &angles.cos()?], 2)?
            .reshape((max_len, d_model))?
            .unsqueeze(0)?
            .to_dtype(vb.dtype())?;

        Ok(Self {
            table,
            dropout: Dropout::new(drop_p),
        })
    }
}

impl ModuleT for PositionalEncoding {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len, _) = xs.dims3()?;
        let xs = xs.broadcast_add(&self.table.i((.., ..seq_len, ..))?)?;
        self.dropout.forward(&xs, train)
    }
}
