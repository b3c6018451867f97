use ndarray::Array2;
use std::collections::HashMap;

/// Optimizer trait for parameter updates during training
pub trait Optimizer {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>);
    fn reset(&mut self);
    fn learning_rate(&self) -> f64;
}

/// Per-parameter Adam moments.
struct Moments {
    m: Array2<f64>,
    v: Array2<f64>,
    t: i32,
}

/// Adam optimizer with adaptive learning rates
///
/// Implements: m_t = β₁m_{t-1} + (1-β₁)g_t
///             v_t = β₂v_{t-1} + (1-β₂)g_t²
///             θ_t = θ_{t-1} - η * m̂_t / (√v̂_t + ε)
/// where m̂_t and v̂_t are bias-corrected estimates. The step count used for
/// bias correction is tracked per parameter.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    moments: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Adam::with_params(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            moments: HashMap::new(),
        }
    }

    /// Updates applied so far to `param_id`.
    pub fn steps(&self, param_id: &str) -> i32 {
        self.moments.get(param_id).map_or(0, |m| m.t)
    }
}

impl Optimizer for Adam {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>) {
        let state = self.moments.entry(param_id.to_string()).or_insert_with(|| Moments {
            m: Array2::zeros(param.raw_dim()),
            v: Array2::zeros(param.raw_dim()),
            t: 0,
        });
        state.t += 1;

        state.m = self.beta1 * &state.m + (1.0 - self.beta1) * gradient;
        state.v = self.beta2 * &state.v + (1.0 - self.beta2) * &(gradient * gradient);

        let m_correction = 1.0 - self.beta1.powi(state.t);
        let v_correction = 1.0 - self.beta2.powi(state.t);
        let (lr, eps) = (self.learning_rate, self.epsilon);

        ndarray::Zip::from(param)
            .and(&state.m)
            .and(&state.v)
            .for_each(|p, &m, &v| {
                *p -= lr * (m / m_correction) / ((v / v_correction).sqrt() + eps);
            });
    }

    fn reset(&mut self) {
        self.moments.clear();
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}
