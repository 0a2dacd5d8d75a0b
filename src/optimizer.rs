//! `candle_nn::AdamW` with moments keyed by variable name.

use std::collections::HashMap;

use candle_core::{backprop::GradStore, DType, Result, Tensor, Var};
use candle_nn::{ParamsAdamW, VarMap};

const STEP_KEY: &str = "step";

struct NamedMoments {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

pub struct AdamW {
    vars: Vec<NamedMoments>,
    step_t: usize,
    params: ParamsAdamW,
}

impl AdamW {
    pub fn new(varmap: &VarMap, params: ParamsAdamW) -> Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("varmap lock poisoned: {e}")))?;
        let mut named = data
            .iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect::<Vec<_>>();
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let vars = named
            .into_iter()
            .map(|(name, var)| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(NamedMoments {
                    name,
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    pub fn step_count(&self) -> usize {
        self.step_t
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let ParamsAdamW {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step_t as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step_t as i32));

        for slot in &self.vars {
            let theta = &slot.var;
            let Some(grad) = grads.get(theta) else {
                continue;
            };
            let m = ((slot.first_moment.as_tensor() * beta1)? + (grad * (1.0 - beta1))?)?;
            let v = ((slot.second_moment.as_tensor() * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&m * scale_m)?;
            let v_hat = (&v * scale_v)?;
            let decayed = (theta.as_tensor() * (1.0 - lr * weight_decay))?;
            let update = (m_hat / (v_hat.sqrt()? + eps)?)?;
            theta.set(&(decayed - (update * lr)?)?)?;
            slot.first_moment.set(&m)?;
            slot.second_moment.set(&v)?;
        }
        Ok(())
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Moment tensors keyed `m.<var>` / `v.<var>`, plus the step counter.
    pub fn state(&self) -> Result<HashMap<String, Tensor>> {
        let mut state = HashMap::with_capacity(self.vars.len() * 2 + 1);
        for slot in &self.vars {
            state.insert(format!("m.{}", slot.name), slot.first_moment.as_tensor().copy()?);
            state.insert(format!("v.{}", slot.name), slot.second_moment.as_tensor().copy()?);
        }
        state.insert(
            STEP_KEY.to_string(),
            Tensor::new(self.step_t as i64, &candle_core::Device::Cpu)?,
        );
        Ok(state)
    }

    /// Replaces every moment and the step counter from `state`.
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        let lookup = |key: &str| {
            state
                .get(key)
                .ok_or_else(|| candle_core::Error::Msg(format!("optimizer state has no `{key}`")))
        };
        for slot in &self.vars {
            for (prefix, moment) in [("m", &slot.first_moment), ("v", &slot.second_moment)] {
                let saved = lookup(&format!("{prefix}.{}", slot.name))?;
                moment.set(&saved.to_device(moment.device())?.to_dtype(moment.dtype())?)?;
            }
        }
        self.step_t = lookup(STEP_KEY)?.to_dtype(DType::I64)?.to_scalar::<i64>()? as usize;
        Ok(())
    }
}
