//! Synthetic spike-train datasets

use ndarray::Array3;
use rand::Rng;

use crate::error::*;

/// Bernoulli spike trains of shape (batch, steps, size)
///
/// Each entry fires independently with probability `freq_hz * dt_ms / 1000`.
pub fn poisson_spike_train<R: Rng + ?Sized>(
    rng: &mut R,
    batch: usize,
    steps: usize,
    size: usize,
    freq_hz: f32,
    dt_ms: f32,
) -> Result<Array3<f32>> {
    ensure_finite("freq_hz", freq_hz)?;
    ensure_positive("dt_ms", dt_ms)?;
    let prob = freq_hz * dt_ms / 1000.0;
    if !(0.0..=1.0).contains(&prob) {
        return Err(RuntimeError::invalid_parameter(
            "spike probability",
            format!("{} ({} Hz at dt={} ms)", prob, freq_hz, dt_ms),
            "within [0, 1]",
        ));
    }

    Ok(Array3::from_shape_simple_fn((batch, steps, size), || {
        if rng.gen::<f32>() < prob {
            1.0
        } else {
            0.0
        }
    }))
}

/// Uniform integer labels in `0..classes`
pub fn random_labels<R: Rng + ?Sized>(rng: &mut R, batch: usize, classes: usize) -> Result<Vec<usize>> {
    if classes == 0 {
        return Err(RuntimeError::invalid_parameter("classes", "0", "> 0"));
    }
    Ok((0..batch).map(|_| rng.gen_range(0..classes)).collect())
}
