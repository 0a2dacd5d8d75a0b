use candle_core::{Result, Tensor};
use candle_nn::{linear_no_bias, Dropout, Linear, Module, VarBuilder};

#[cfg(feature = "metal")]
use candle_core::D;
#[cfg(feature = "metal")]
use candle_nn::ops::softmax;

#[cfg(not(feature = "metal"))]
use candle_nn::ops::softmax_last_dim;

use crate::utils::masked_fill;

/// softmax(q·kᵀ / √d_k)·v over `(batch, heads, len, head_size)` inputs.
fn scaled_dot_product(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    dropout: Option<&Dropout>,
    train: bool,
) -> Result<Tensor> {
    let head_size = q.dim(candle_core::D::Minus1)?;

    // (batch, heads, q_len, k_len)
    let scores = (q.matmul(&k.t()?)? / (head_size as f64).sqrt())?;
    let scores = match mask {
        Some(mask) => masked_fill(&scores, mask)?,
        None => scores,
    };

    #[cfg(not(feature = "metal"))]
    let weights = softmax_last_dim(&scores)?;
    #[cfg(feature = "metal")]
    let weights = softmax(&scores, D::Minus1)?;

    let weights = match dropout {
        Some(dropout) => dropout.forward(&weights, train)?,
        None => weights,
    };

    weights.matmul(v)
}

pub struct MultiHeadAttention {
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
    dropout: Dropout,
    num_heads: usize,
    head_size: usize,
}

impl MultiHeadAttention {
    pub fn new(d_model: usize, num_heads: usize, drop_p: f32, vb: VarBuilder) -> Result<Self> {
        if d_model % num_heads != 0 {
            candle_core::bail!("d_model ({d_model}) is not divisible by num_heads ({num_heads})");
        }
        Ok(Self {
            w_q: linear_no_bias(d_model, d_model, vb.pp("w_q"))?,
            w_k: linear_no_bias(d_model, d_model, vb.pp("w_k"))?,
            w_v: linear_no_bias(d_model, d_model, vb.pp("w_v"))?,
            w_o: linear_no_bias(d_model, d_model, vb.pp("w_o"))?,
            dropout: Dropout::new(drop_p),
            num_heads,
            head_size: d_model / num_heads,
        })
    }

    // (batch, len, d_model) -> (batch, heads, len, head_size)
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        xs.reshape((batch_size, seq_len, self.num_heads, self.head_size))?
            .transpose(1, 2)?
            .contiguous()
    }

    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, d_model) = query.dims3()?;
        let q = self.split_heads(&self.w_q.forward(query)?)?;
        let k = self.split_heads(&self.w_k.forward(key)?)?;
        let v = self.split_heads(&self.w_v.forward(value)?)?;

        scaled_dot_product(&q, &k, &v, mask, Some(&self.dropout), train)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch_size, seq_len, d_model))?
            .apply(&self.w_o)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    use super::*;
    use crate::utils::causal_mask;

    #[test]
    fn test_scaled_dot_product_respects_causal_mask() {
        let device = Device::Cpu;
        let q = Tensor::ones((1, 1, 3, 2), DType::F32, &device).unwrap();
        let v = Tensor::new(&[[[[1f32, 1.], [2., 2.], [3., 3.]]]], &device).unwrap();
        let mask = causal_mask(3, &device).unwrap();

        let out = scaled_dot_product(&q, &q, &v, Some(&mask), None, false).unwrap();
        let out = out.flatten_to(2).unwrap();
        let out = out.to_vec2::<f32>().unwrap();

        // identical scores, so each row is the mean of the visible values
        assert_eq!(out[0], vec![1.0, 1.0]);
        assert!((out[1][0] - 1.5).abs() < 1e-6);
        assert!((out[2][0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_multi_head_attention_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiHeadAttention::new(8, 2, 0.0, vb).unwrap();

        let query = Tensor::ones((2, 3, 8), DType::F32, &device).unwrap();
        let memory = Tensor::ones((2, 5, 8), DType::F32, &device).unwrap();
        let out = mha.forward(&query, &memory, &memory, None, false).unwrap();
        assert_eq!(out.dims3().unwrap(), (2, 3, 8));
    }

    #[test]
    fn test_multi_head_attention_rejects_uneven_heads() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(MultiHeadAttention::new(10, 3, 0.0, vb).is_err());
    }
}
