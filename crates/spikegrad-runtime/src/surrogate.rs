//! Surrogate spike functions
//!
//! The forward pass of every surrogate is the exact Heaviside step of
//! `x = V - V_th`. Only the derivative differs: it replaces the Dirac pulse
//! of the true step with a bounded bump centred on the threshold so that
//! spike events can carry gradient.

use crate::error::{ensure_positive, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Exact step function; `x >= 0` fires
#[inline]
pub fn heaviside(x: f32) -> f32 {
    if x >= 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Surrogate derivative shapes
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Surrogate {
    /// `1 / (alpha * |x| + 1)^2`, peak 1
    InverseSquare {
        /// Sharpness
        alpha: f32,
    },
    /// Derivative of `sigmoid(alpha * x)`, peak `alpha / 4`
    Sigmoid {
        /// Sharpness
        alpha: f32,
    },
    /// `max(0, 1 - |x| / width) / width`, peak `1 / width`
    Triangle {
        /// Half width of the support
        width: f32,
    },
}

impl Default for Surrogate {
    fn default() -> Self {
        Surrogate::InverseSquare { alpha: 100.0 }
    }
}

impl Surrogate {
    /// Validate the shape parameter
    pub fn validate(&self) -> Result<()> {
        match *self {
            Surrogate::InverseSquare { alpha } => ensure_positive("surrogate.alpha", alpha),
            Surrogate::Sigmoid { alpha } => ensure_positive("surrogate.alpha", alpha),
            Surrogate::Triangle { width } => ensure_positive("surrogate.width", width),
        }
    }

    /// Forward value
    #[inline]
    pub fn spike(&self, x: f32) -> f32 {
        heaviside(x)
    }

    /// Surrogate derivative at `x`
    #[inline]
    pub fn grad(&self, x: f32) -> f32 {
        match *self {
            Surrogate::InverseSquare { alpha } => {
                let d = alpha * x.abs() + 1.0;
                1.0 / (d * d)
            }
            Surrogate::Sigmoid { alpha } => {
                let s = 1.0 / (1.0 + (-alpha * x).exp());
                alpha * s * (1.0 - s)
            }
            Surrogate::Triangle { width } => (1.0 - x.abs() / width).max(0.0) / width,
        }
    }

    /// Derivative value at the threshold
    pub fn peak(&self) -> f32 {
        self.grad(0.0)
    }
}
