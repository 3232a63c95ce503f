//! Adam optimiser over the trainable registry

use std::collections::BTreeMap;

use ndarray::{Array2, Zip};

use crate::{error::*, grad::Gradients, network::Network};

/// Adam with bias correction folded into the step size
#[derive(Debug, Clone)]
pub struct Adam {
    /// Base learning rate
    pub lr: f32,
    /// First moment decay
    pub beta1: f32,
    /// Second moment decay
    pub beta2: f32,
    /// Numerical stability term
    pub eps: f32,
    steps: u64,
    /// (first moment, second moment) per trainable variable
    moments: BTreeMap<String, (Array2<f32>, Array2<f32>)>,
}

impl Adam {
    /// Register every trainable variable of `network`
    pub fn new(network: &Network, lr: f32) -> Result<Self> {
        ensure_positive("lr", lr)?;
        let moments = network
            .trainable_vars()
            .into_iter()
            .map(|(name, w)| {
                let zeros = Array2::zeros(w.raw_dim());
                (name, (zeros.clone(), zeros))
            })
            .collect();
        Ok(Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            steps: 0,
            moments,
        })
    }

    /// Override the moment decays
    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Result<Self> {
        for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(RuntimeError::invalid_parameter(name, beta.to_string(), "within [0, 1)"));
            }
        }
        self.beta1 = beta1;
        self.beta2 = beta2;
        Ok(self)
    }

    /// Override epsilon
    pub fn with_eps(mut self, eps: f32) -> Result<Self> {
        ensure_positive("eps", eps)?;
        self.eps = eps;
        Ok(self)
    }

    /// Updates applied so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Bias-corrected step size of the next update
    pub fn step_size(&self) -> f32 {
        let t = (self.steps + 1) as i32;
        self.lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t))
    }

    /// First and second moments of a variable
    pub fn moments(&self, name: &str) -> Option<(&Array2<f32>, &Array2<f32>)> {
        self.moments.get(name).map(|(m, v)| (m, v))
    }

    fn check(&self, network: &Network, grads: &Gradients) -> Result<()> {
        let vars = network.trainable_vars();
        for (name, w) in &vars {
            let (m, _) = self
                .moments
                .get(name)
                .ok_or_else(|| RuntimeError::unregistered(name.as_str(), "not registered with the optimiser"))?;
            if m.dim() != w.dim() {
                return Err(RuntimeError::shape_mismatch(name.as_str(), m.dim(), w.dim()));
            }
            let g = grads
                .get(name)
                .ok_or_else(|| RuntimeError::unregistered(name.as_str(), "no gradient provided"))?;
            if g.dim() != w.dim() {
                return Err(RuntimeError::shape_mismatch(
                    format!("gradient of {}", name),
                    w.dim(),
                    g.dim(),
                ));
            }
        }
        for (name, _) in grads.iter() {
            if !vars.iter().any(|(n, _)| n == name) {
                return Err(RuntimeError::unregistered(name, "gradient for an unknown variable"));
            }
        }
        Ok(())
    }

    /// Apply one update in place
    ///
    /// Nothing is modified unless every trainable variable has a gradient
    /// of matching shape and no gradient names an unknown variable.
    pub fn step(&mut self, network: &mut Network, grads: &Gradients) -> Result<()> {
        self.check(network, grads)?;

        let lr_t = self.step_size();
        self.steps += 1;
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);

        for (name, (m, v)) in self.moments.iter_mut() {
            let (Some(w), Some(g)) = (network.trainable_var_mut(name), grads.get(name)) else {
                continue;
            };
            Zip::from(w).and(m).and(v).and(g).for_each(|w, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                *w -= lr_t * *m / (v.sqrt() + eps);
            });
        }
        Ok(())
    }
}
