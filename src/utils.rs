use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Result, Tensor};

/// Picks the accelerator once at start-up, falling back to the CPU.
pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            tracing::info!("running on CPU, to run on GPU (metal) build with `--features metal`");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            tracing::info!("running on CPU, to run on GPU build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}

/// Lower-triangular `(1, size, size)` mask: position i sees positions <= i.
pub fn causal_mask(size: usize, device: &Device) -> Result<Tensor> {
    Tensor::tril2(size, DType::U8, device)?.unsqueeze(0)
}

/// Replaces every score whose mask entry is zero with -inf.
pub fn masked_fill(attn_weights: &Tensor, attn_mask: &Tensor) -> Result<Tensor> {
    let attn_shape = attn_weights.shape();
    let attn_mask = attn_mask.broadcast_as(attn_shape)?;
    let mask_value = Tensor::new(f32::NEG_INFINITY, attn_weights.device())?
        .broadcast_as(attn_shape)?
        .to_dtype(attn_weights.dtype())?;
    attn_mask.where_cond(attn_weights, &mask_value)
}

pub const DEFAULT_CONSOLE_WIDTH: usize = 80;

/// Width of the attached terminal, or 80 when it cannot be determined.
pub fn console_width() -> usize {
    console::Term::stdout()
        .size_checked()
        .map(|(_rows, cols)| cols as usize)
        .filter(|cols| *cols > 0)
        .unwrap_or(DEFAULT_CONSOLE_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_fill() {
        let device = Device::Cpu;

        let attn_weights = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 4), &device).unwrap();
        let attn_mask = Tensor::from_vec(vec![0u8, 1, 0, 1], (1, 4), &device).unwrap();

        let result = masked_fill(&attn_weights, &attn_mask).unwrap();

        assert_eq!(
            result.to_vec2::<f32>().unwrap(),
            vec![vec![f32::NEG_INFINITY, 2.0, f32::NEG_INFINITY, 4.0]]
        );
    }

    #[test]
    fn test_causal_mask() {
        let device = Device::Cpu;

        let result = causal_mask(3, &device).unwrap();
        assert_eq!(result.dims3().unwrap(), (1, 3, 3));
        assert_eq!(
            result.squeeze(0).unwrap().to_vec2::<u8>().unwrap(),
            vec![vec![1, 0, 0], vec![1, 1, 0], vec![1, 1, 1]]
        );
    }

    #[test]
    fn test_console_width_is_positive() {
        assert!(console_width() > 0);
    }
}
