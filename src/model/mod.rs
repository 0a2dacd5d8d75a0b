//! Encoder-decoder transformer and the `Seq2SeqModel` seam the training loop
//! and greedy decoder are written against.

mod attention;
mod blocks;
mod embedding;
mod layers;
#[cfg(test)]
pub mod scripted;

use candle_core::{Result, Tensor};
use candle_nn::{Module, ModuleT, VarBuilder};

use crate::config::Config;
use blocks::{BlockConfig, Decoder, Encoder};
use embedding::{InputEmbedding, PositionalEncoding};
use layers::ProjectionLayer;

/// Capability set of a sequence-to-sequence network.
///
/// Shapes follow the batch-first convention:
/// * `encode`: ids `(B, S)`, mask `(B, 1, 1, S)` -> `(B, S, d_model)`
/// * `decode`: memory `(B, S, d_model)`, ids `(B, T)`, mask `(B, 1, T, T)` or
///   `(1, T, T)` -> `(B, T, d_model)`
/// * `project`: `(B, T, d_model)` -> `(B, T, vocab)`
pub trait Seq2SeqModel {
    fn encode(&self, src: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor>;

    fn decode(
        &self,
        encoder_output: &Tensor,
        src_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor>;

    fn project(&self, xs: &Tensor) -> Result<Tensor>;
}

#[derive(Debug, Clone, Copy)]
pub struct TransformerConfig {
    pub src_vocab_size: usize,
    pub tgt_vocab_size: usize,
    pub src_seq_len: usize,
    pub tgt_seq_len: usize,
    pub d_model: usize,
    pub n: usize,
    pub num_heads: usize,
    pub drop_p: f32,
    pub d_ff: usize,
}

impl TransformerConfig {
    pub fn new(config: &Config, src_vocab_size: usize, tgt_vocab_size: usize) -> Self {
        Self {
            src_vocab_size,
            tgt_vocab_size,
            src_seq_len: config.seq_len,
            tgt_seq_len: config.seq_len,
            d_model: config.d_model,
            n: config.n,
            num_heads: config.num_heads,
            drop_p: config.drop_p,
            d_ff: config.d_ff,
        }
    }
}

pub struct Transformer {
    encoder: Encoder,
    decoder: Decoder,
    src_embed: InputEmbedding,
    tgt_embed: InputEmbedding,
    src_pos: PositionalEncoding,
    tgt_pos: PositionalEncoding,
    projection: ProjectionLayer,
}

impl Transformer {
    pub fn new(cfg: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        let block_cfg = BlockConfig {
            d_model: cfg.d_model,
            num_heads: cfg.num_heads,
            d_ff: cfg.d_ff,
            drop_p: cfg.drop_p,
        };
        Ok(Self {
            encoder: Encoder::new(cfg.n, &block_cfg, vb.pp("encoder"))?,
            decoder: Decoder::new(cfg.n, &block_cfg, vb.pp("decoder"))?,
            src_embed: InputEmbedding::new(cfg.src_vocab_size, cfg.d_model, vb.pp("src_embed"))?,
            tgt_embed: InputEmbedding::new(cfg.tgt_vocab_size, cfg.d_model, vb.pp("tgt_embed"))?,
            src_pos: PositionalEncoding::new(cfg.src_seq_len, cfg.d_model, cfg.drop_p, vb.pp("src_pos"))?,
            tgt_pos: PositionalEncoding::new(cfg.tgt_seq_len, cfg.d_model, cfg.drop_p, vb.pp("tgt_pos"))?,
            projection: ProjectionLayer::new(cfg.d_model, cfg.tgt_vocab_size, vb.pp("projection"))?,
        })
    }
}

impl Seq2SeqModel for Transformer {
    fn encode(&self, src: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.src_pos.forward_t(&self.src_embed.forward(src)?, train)?;
        self.encoder.forward(&xs, src_mask, train)
    }

    fn decode(
        &self,
        encoder_output: &Tensor,
        src_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let xs = self.tgt_pos.forward_t(&self.tgt_embed.forward(tgt)?, train)?;
        self.decoder
            .forward(&xs, encoder_output, src_mask, tgt_mask, train)
    }

    fn project(&self, xs: &Tensor) -> Result<Tensor> {
        self.projection.forward(xs)
    }
}
