use candle_core::{DType, Result, Tensor, D};
use candle_nn::ops::log_softmax;

/// Token-level cross entropy with label smoothing, skipping `ignore_id`.
///
/// `logits` is `(N, C)` and `labels` is `(N,)` of `u32`. Each kept token
/// contributes `(1 - smoothing) * -log p(label) + smoothing * mean_c(-log p(c))`
/// and the result is the mean over kept tokens. When every label equals
/// `ignore_id` the loss is zero rather than NaN.
pub fn cross_entropy_with_smoothing(
    logits: &Tensor,
    labels: &Tensor,
    ignore_id: u32,
    smoothing: f64,
) -> Result<Tensor> {
    let (n, _num_classes) = logits.dims2()?;
    if labels.dims1()? != n {
        candle_core::bail!(
            "cross_entropy: {} labels for {} rows of logits",
            labels.dims1()?,
            n
        );
    }

    let log_probs = log_softmax(logits, D::Minus1)?;
    let nll = log_probs
        .gather(&labels.unsqueeze(1)?.contiguous()?, 1)?
        .squeeze(1)?
        .neg()?;
    let uniform = log_probs.mean(D::Minus1)?.neg()?;
    let per_token = ((nll * (1.0 - smoothing))? + (uniform * smoothing)?)?;

    let keep = labels.ne(ignore_id)?.to_dtype(per_token.dtype())?;
    let kept = keep.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
    (per_token * keep)?.sum_all()? / kept.max(1.0)
}

#[cfg(test)]
mod tests {
    use candle_core::{Device, Tensor};

    use super::*;

    const PAD: u32 = 1;

    #[test]
    fn test_matches_plain_cross_entropy_without_smoothing() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 0.5, -1.0], [0.1, 0.2, 3.0]], &device).unwrap();
        let labels = Tensor::new(&[0u32, 2], &device).unwrap();

        let ours = cross_entropy_with_smoothing(&logits, &labels, 99, 0.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let reference = candle_nn::loss::cross_entropy(&logits, &labels)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((ours - reference).abs() < 1e-6);
    }

    #[test]
    fn test_padding_positions_are_ignored() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 0.5, -1.0], [9.0, -9.0, 0.0]], &device).unwrap();
        let with_pad = Tensor::new(&[0u32, PAD], &device).unwrap();
        let only_first = cross_entropy_with_smoothing(
            &logits.narrow(0, 0, 1).unwrap(),
            &Tensor::new(&[0u32], &device).unwrap(),
            PAD,
            0.1,
        )
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();

        let loss = cross_entropy_with_smoothing(&logits, &with_pad, PAD, 0.1)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((loss - only_first).abs() < 1e-6);
    }

    #[test]
    fn test_all_padding_is_zero_not_nan() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 0.5, -1.0], [0.1, 0.2, 3.0]], &device).unwrap();
        let labels = Tensor::new(&[PAD, PAD], &device).unwrap();

        let loss = cross_entropy_with_smoothing(&logits, &labels, PAD, 0.1)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_smoothing_value() {
        let device = Device::Cpu;
        // uniform logits: -log p(c) = ln(4) for every class
        let logits = Tensor::zeros((1, 4), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::new(&[3u32], &device).unwrap();

        let loss = cross_entropy_with_smoothing(&logits, &labels, PAD, 0.1)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((loss - 4f32.ln()).abs() < 1e-6);
    }
}
