use candle_core::{Result, Tensor};
use candle_nn::{Module, ModuleT, VarBuilder};

use super::attention::MultiHeadAttention;
use super::layers::{FeedForward, LayerNormalization, ResidualConnection};

/// Hyperparameters shared by every encoder and decoder block.
#[derive(Debug, Clone, Copy)]
pub struct BlockConfig {
    pub d_model: usize,
    pub num_heads: usize,
    pub d_ff: usize,
    pub drop_p: f32,
}

fn residuals(count: usize, cfg: &BlockConfig, vb: &VarBuilder) -> Result<Vec<ResidualConnection>> {
    (0..count)
        .map(|i| ResidualConnection::new(cfg.d_model, cfg.drop_p, vb.pp(format!("residual_{i}"))))
        .collect()
}

pub struct EncoderBlock {
    self_attention: MultiHeadAttention,
    feed_forward: FeedForward,
    residuals: Vec<ResidualConnection>,
}

impl EncoderBlock {
    pub fn new(cfg: &BlockConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attention: MultiHeadAttention::new(
                cfg.d_model,
                cfg.num_heads,
                cfg.drop_p,
                vb.pp("self_attention"),
            )?,
            feed_forward: FeedForward::new(cfg.d_model, cfg.d_ff, cfg.drop_p, vb.pp("feed_forward"))?,
            residuals: residuals(2, cfg, &vb)?,
        })
    }

    pub fn forward(&self, xs: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.residuals[0].forward(
            xs,
            |x| self.self_attention.forward(x, x, x, Some(src_mask), train),
            train,
        )?;
        self.residuals[1].forward(&xs, |x| self.feed_forward.forward_t(x, train), train)
    }
}

pub struct Encoder {
    blocks: Vec<EncoderBlock>,
    norm: LayerNormalization,
}

impl Encoder {
    pub fn new(n: usize, cfg: &BlockConfig, vb: VarBuilder) -> Result<Self> {
        let blocks = (0..n)
            .map(|i| EncoderBlock::new(cfg, vb.pp(format!("block_{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let norm = LayerNormalization::new(cfg.d_model, 1e-6, vb.pp("norm"))?;
        Ok(Self { blocks, norm })
    }

    pub fn forward(&self, xs: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward(&xs, src_mask, train)?;
        }
        self.norm.forward(&xs)
    }
}

pub struct DecoderBlock {
    self_attention: MultiHeadAttention,
    cross_attention: MultiHeadAttention,
    feed_forward: FeedForward,
    residuals: Vec<ResidualConnection>,
}

impl DecoderBlock {
    pub fn new(cfg: &BlockConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attention: MultiHeadAttention::new(
                cfg.d_model,
                cfg.num_heads,
                cfg.drop_p,
                vb.pp("self_attention"),
            )?,
            cross_attention: MultiHeadAttention::new(
                cfg.d_model,
                cfg.num_heads,
                cfg.drop_p,
                vb.pp("cross_attention"),
            )?,
            feed_forward: FeedForward::new(cfg.d_model, cfg.d_ff, cfg.drop_p, vb.pp("feed_forward"))?,
            residuals: residuals(3, cfg, &vb)?,
        })
    }

    pub fn forward(
        &self,
        xs: &Tensor,
        encoder_output: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let xs = self.residuals[0].forward(
            xs,
            |x| self.self_attention.forward(x, x, x, Some(tgt_mask), train),
            train,
        )?;
        let xs = self.residuals[1].forward(
            &xs,
            |x| {
                self.cross_attention
                    .forward(x, encoder_output, encoder_output, Some(src_mask), train)
            },
            train,
        )?;
        self.residuals[2].forward(&xs, |x| self.feed_forward.forward_t(x, train), train)
    }
}

pub struct Decoder {
    blocks: Vec<DecoderBlock>,
    norm: LayerNormalization,
}

impl Decoder {
    pub fn new(n: usize, cfg: &BlockConfig, vb: VarBuilder) -> Result<Self> {
        let blocks = (0..n)
            .map(|i| DecoderBlock::new(cfg, vb.pp(format!("block_{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let norm = LayerNormalization::new(cfg.d_model, 1e-6, vb.pp("norm"))?;
        Ok(Self { blocks, norm })
    }

    pub fn forward(
        &self,
        xs: &Tensor,
        encoder_output: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward(&xs, encoder_output, src_mask, tgt_mask, train)?;
        }
        self.norm.forward(&xs)
    }
}
