//! Classification loss over readout traces

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::*;

/// Per-sample maximum over the time axis, (batch, classes)
pub fn max_over_time(output: ArrayView3<f32>) -> Array2<f32> {
    output.fold_axis(Axis(1), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
}

fn check_labels(batch: usize, classes: usize, labels: &[usize]) -> Result<()> {
    if labels.len() != batch {
        return Err(RuntimeError::shape_mismatch("labels", batch, labels.len()));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
        return Err(RuntimeError::invalid_parameter(
            "label",
            bad.to_string(),
            format!("< {} classes", classes),
        ));
    }
    Ok(())
}

/// Mean softmax cross-entropy and its gradient with respect to `logits`
pub fn cross_entropy(logits: ArrayView2<f32>, labels: &[usize]) -> Result<(f32, Array2<f32>)> {
    let (batch, classes) = logits.dim();
    check_labels(batch, classes, labels)?;

    let mut total = 0.0f32;
    let mut grad = Array2::zeros((batch, classes));
    for ((row, mut g), &label) in logits.outer_iter().zip(grad.outer_iter_mut()).zip(labels) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let exp = row.mapv(|v| (v - max).exp());
        let sum = exp.sum();
        total += sum.ln() + max - row[label];

        g.assign(&(exp / sum));
        g[label] -= 1.0;
    }

    grad /= batch as f32;
    Ok((total / batch as f32, grad))
}

/// Cross-entropy of the max-over-time readout
///
/// Returns the loss together with its gradient with respect to the full
/// `(batch, time, classes)` trace. The gradient of the max reaches every
/// time step attaining it, split evenly between ties.
pub fn max_over_time_cross_entropy(
    output: ArrayView3<f32>,
    labels: &[usize],
) -> Result<(f32, Array3<f32>)> {
    let logits = max_over_time(output);
    let (loss, d_logits) = cross_entropy(logits.view(), labels)?;

    let (batch, steps, classes) = output.dim();
    let mut d_output = Array3::zeros((batch, steps, classes));
    for b in 0..batch {
        for c in 0..classes {
            let peak = logits[[b, c]];
            let ties = (0..steps).filter(|&t| output[[b, t, c]] == peak).count();
            if ties == 0 {
                continue;
            }
            let share = d_logits[[b, c]] / ties as f32;
            for t in 0..steps {
                if output[[b, t, c]] == peak {
                    d_output[[b, t, c]] = share;
                }
            }
        }
    }

    Ok((loss, d_output))
}

/// Fraction of samples whose max-over-time argmax equals the label
pub fn classification_accuracy(output: ArrayView3<f32>, labels: &[usize]) -> Result<f32> {
    let logits = max_over_time(output);
    let (batch, classes) = logits.dim();
    check_labels(batch, classes, labels)?;
    if batch == 0 {
        return Ok(0.0);
    }

    let correct = logits
        .outer_iter()
        .zip(labels)
        .filter(|(row, label)| argmax(row.view()) == **label)
        .count();
    Ok(correct as f32 / batch as f32)
}

fn argmax(row: ndarray::ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
