use ndarray::{Array1, Array2, Axis};

/// Softmax cross-entropy over vocabulary logits, one column per position.
///
/// Losses are returned unreduced so callers can weight windows of different
/// lengths correctly.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// `-log softmax(logits)[target]` for every column.
    pub fn per_position(&self, logits: &Array2<f64>, targets: &[usize]) -> Array1<f64> {
        assert_eq!(logits.ncols(), targets.len(), "one target per logit column");
        logits
            .axis_iter(Axis(1))
            .zip(targets)
            .map(|(col, &target)| {
                let max_val = col.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
                let log_sum = col.mapv(|x| (x - max_val).exp()).sum().ln() + max_val;
                log_sum - col[target]
            })
            .collect()
    }

    /// Gradient of `scale * sum(per_position)` with respect to the logits.
    pub fn gradient(&self, logits: &Array2<f64>, targets: &[usize], scale: f64) -> Array2<f64> {
        let mut grad = softmax(logits);
        for (mut col, &target) in grad.axis_iter_mut(Axis(1)).zip(targets) {
            col[target] -= 1.0;
            col *= scale;
        }
        grad
    }
}

/// Numerically stable column-wise softmax
pub fn softmax(x: &Array2<f64>) -> Array2<f64> {
    let mut result = x.clone();
    for mut col in result.axis_iter_mut(Axis(1)) {
        let max_val = col.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        col.mapv_inplace(|v| (v - max_val).exp());
        let sum = col.sum();
        col /= sum;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_softmax() {
        let input = arr2(&[[1.0, 2.0, 3.0], [1.0, 2.0, 1000.0]]);
        let output = softmax(&input);

        for col in output.axis_iter(Axis(1)) {
            assert!((col.sum() - 1.0).abs() < 1e-9);
        }
        assert!((output[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_uniform_logits_give_log_vocab() {
        let logits = Array2::zeros((4, 3));
        let losses = CrossEntropyLoss.per_position(&logits, &[0, 1, 3]);
        assert_eq!(losses.len(), 3);
        for loss in losses.iter() {
            assert!((loss - 4f64.ln()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let loss_fn = CrossEntropyLoss;
        let logits = arr2(&[[0.2, -1.0], [1.5, 0.3], [-0.4, 2.0]]);
        let targets = [1, 2];
        let grad = loss_fn.gradient(&logits, &targets, 0.5);

        let eps = 1e-6;
        for i in 0..3 {
            for j in 0..2 {
                let mut plus = logits.clone();
                plus[[i, j]] += eps;
                let mut minus = logits.clone();
                minus[[i, j]] -= eps;
                let numeric = 0.5
                    * (loss_fn.per_position(&plus, &targets).sum()
                        - loss_fn.per_position(&minus, &targets).sum())
                    / (2.0 * eps);
                assert!((numeric - grad[[i, j]]).abs() < 1e-6);
            }
        }
    }
}
