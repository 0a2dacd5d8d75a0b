use candle_core::{Result, Tensor, D};
use candle_nn::{linear, Activation, Dropout, Init, Linear, Module, ModuleT, VarBuilder};

/// Layer normalization with a learnable gain (`alpha`) and `bias`.
pub struct LayerNormalization {
    eps: f64,
    alpha: Tensor,
    bias: Tensor,
}

impl LayerNormalization {
    pub fn new(features: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let alpha = vb.get_with_hints(features, "alpha", Init::Const(1.))?;
        let bias = vb.get_with_hints(features, "bias", Init::Const(0.))?;
        Ok(Self { eps, alpha, bias })
    }
}

impl Module for LayerNormalization {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let centered = xs.broadcast_sub(&xs.mean_keepdim(D::Minus1)?)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        centered
            .broadcast_div(&(variance + self.eps)?.sqrt()?)?
            .broadcast_mul(&self.alpha)?
            .broadcast_add(&self.bias)
    }
}

pub struct FeedForward {
    linear1: Linear,
    dropout: Dropout,
    linear2: Linear,
}

impl FeedForward {
    pub fn new(d_model: usize, d_ff: usize, drop_p: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear1: linear(d_model, d_ff, vb.pp("linear1"))?,
            dropout: Dropout::new(drop_p),
            linear2: linear(d_ff, d_model, vb.pp("linear2"))?,
        })
    }
}

impl ModuleT for FeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply(&self.linear1)?
            .apply(&Activation::Relu)?
            .apply_t(&self.dropout, train)?
            .apply(&self.linear2)
    }
}

/// Pre-norm residual: `x + dropout(sub_layer(norm(x)))`.
pub struct ResidualConnection {
    dropout: Dropout,
    norm: LayerNormalization,
}

impl ResidualConnection {
    pub fn new(features: usize, drop_p: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dropout: Dropout::new(drop_p),
            norm: LayerNormalization::new(features, 1e-6, vb.pp("norm"))?,
        })
    }

    pub fn forward(
        &self,
        xs: &Tensor,
        sub_layer: impl Fn(&Tensor) -> Result<Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let residual = sub_layer(&self.norm.forward(xs)?)?;
        xs + self.dropout.forward(&residual, train)?
    }
}

/// Maps decoder features to target-vocabulary logits.
pub struct ProjectionLayer {
    proj: Linear,
}

impl ProjectionLayer {
    pub fn new(d_model: usize, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            proj: linear(d_model, vocab_size, vb)?,
        })
    }
}

impl Module for ProjectionLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // (batch, seq_len, d_model) -> (batch, seq_len, vocab_size)
        self.proj.forward(xs)
    }
}
