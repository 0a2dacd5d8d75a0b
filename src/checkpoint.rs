//! One safetensors file per epoch holding everything needed to resume:
//! `model.<var>` parameters, `optimizer.<key>` state, and the scalar `epoch`
//! and `global_step` entries.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;

use crate::error::TranslatorError;
use crate::optimizer::AdamW;

const MODEL_PREFIX: &str = "model.";
const OPTIMIZER_PREFIX: &str = "optimizer.";
const EPOCH_KEY: &str = "epoch";
const GLOBAL_STEP_KEY: &str = "global_step";

/// Counters stored next to the tensors of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointState {
    pub epoch: usize,
    pub global_step: usize,
}

pub fn save_checkpoint(
    path: &Path,
    state: CheckpointState,
    varmap: &VarMap,
    optimizer: &AdamW,
) -> Result<()> {
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    {
        let vars = varmap
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("varmap lock poisoned: {e}"))?;
        for (name, var) in vars.iter() {
            tensors.insert(format!("{MODEL_PREFIX}{name}"), var.as_tensor().copy()?);
        }
    }
    for (key, tensor) in optimizer.state()? {
        tensors.insert(format!("{OPTIMIZER_PREFIX}{key}"), tensor);
    }
    tensors.insert(
        EPOCH_KEY.to_string(),
        Tensor::new(state.epoch as i64, &Device::Cpu)?,
    );
    tensors.insert(
        GLOBAL_STEP_KEY.to_string(),
        Tensor::new(state.global_step as i64, &Device::Cpu)?,
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    candle_core::safetensors::save(&tensors, path)
        .with_context(|| format!("failed to write checkpoint {}", path.display()))?;
    tracing::info!(path = %path.display(), epoch = state.epoch, global_step = state.global_step, "saved checkpoint");
    Ok(())
}

/// Overwrites every model variable and the optimizer state from `path`.
pub fn load_checkpoint(
    path: &Path,
    varmap: &VarMap,
    optimizer: &mut AdamW,
    device: &Device,
) -> Result<CheckpointState> {
    if !path.is_file() {
        return Err(TranslatorError::CheckpointNotFound(path.to_path_buf()).into());
    }
    let tensors = candle_core::safetensors::load(path, device)
        .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
    let entry = |name: &str| {
        tensors
            .get(name)
            .ok_or_else(|| TranslatorError::MissingCheckpointEntry {
                path: path.to_path_buf(),
                name: name.to_string(),
            })
    };

    {
        let vars = varmap
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("varmap lock poisoned: {e}"))?;
        for (name, var) in vars.iter() {
            let saved = entry(&format!("{MODEL_PREFIX}{name}"))?;
            var.set(&saved.to_dtype(var.dtype())?)
                .with_context(|| format!("failed to restore `{name}`"))?;
        }
    }

    let optimizer_state = tensors
        .iter()
        .filter_map(|(key, tensor)| {
            key.strip_prefix(OPTIMIZER_PREFIX)
                .map(|key| (key.to_string(), tensor.clone()))
        })
        .collect::<HashMap<_, _>>();
    optimizer.load_state(&optimizer_state)?;

    let scalar = |name: &str| -> Result<usize> {
        Ok(entry(name)?.to_dtype(DType::I64)?.to_scalar::<i64>()? as usize)
    };
    let state = CheckpointState {
        epoch: scalar(EPOCH_KEY)?,
        global_step: scalar(GLOBAL_STEP_KEY)?,
    };
    tracing::info!(path = %path.display(), epoch = state.epoch, global_step = state.global_step, "restored checkpoint");
    Ok(state)
}
