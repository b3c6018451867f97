use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::optimizers::Optimizer;
use crate::utils::sigmoid;

/// Holds gradients for all GRU cell parameters during backpropagation
#[derive(Clone, Debug)]
pub struct GRUCellGradients {
    pub w_ir: Array2<f64>,
    pub w_hr: Array2<f64>,
    pub b_ir: Array2<f64>,
    pub b_hr: Array2<f64>,
    pub w_iz: Array2<f64>,
    pub w_hz: Array2<f64>,
    pub b_iz: Array2<f64>,
    pub b_hz: Array2<f64>,
    pub w_ih: Array2<f64>,
    pub w_hh: Array2<f64>,
    pub b_ih: Array2<f64>,
    pub b_hh: Array2<f64>,
}

impl GRUCellGradients {
    pub fn accumulate(&mut self, other: &GRUCellGradients) {
        for (dst, src) in self.arrays_mut().into_iter().zip(other.arrays()) {
            *dst += src;
        }
    }

    pub fn arrays(&self) -> [&Array2<f64>; 12] {
        [
            &self.w_ir,
            &self.w_hr,
            &self.b_ir,
            &self.b_hr,
            &self.w_iz,
            &self.w_hz,
            &self.b_iz,
            &self.b_hz,
            &self.w_ih,
            &self.w_hh,
            &self.b_ih,
            &self.b_hh,
        ]
    }

    pub fn arrays_mut(&mut self) -> [&mut Array2<f64>; 12] {
        [
            &mut self.w_ir,
            &mut self.w_hr,
            &mut self.b_ir,
            &mut self.b_hr,
            &mut self.w_iz,
            &mut self.w_hz,
            &mut self.b_iz,
            &mut self.b_hz,
            &mut self.w_ih,
            &mut self.w_hh,
            &mut self.b_ih,
            &mut self.b_hh,
        ]
    }
}

/// Caches intermediate values during forward pass for efficient backward computation
#[derive(Clone, Debug)]
pub struct GRUCellCache {
    pub input: Array2<f64>,
    pub hx: Array2<f64>,
    pub reset_gate: Array2<f64>,
    pub update_gate: Array2<f64>,
    pub new_gate: Array2<f64>,
    pub reset_hidden: Array2<f64>,
}

/// GRU cell operating on a batch of streams, one column per stream
#[derive(Clone, Debug)]
pub struct GRUCell {
    // Reset gate parameters
    pub w_ir: Array2<f64>,
    pub w_hr: Array2<f64>,
    pub b_ir: Array2<f64>,
    pub b_hr: Array2<f64>,

    // Update gate parameters
    pub w_iz: Array2<f64>,
    pub w_hz: Array2<f64>,
    pub b_iz: Array2<f64>,
    pub b_hz: Array2<f64>,

    // New gate parameters
    pub w_ih: Array2<f64>,
    pub w_hh: Array2<f64>,
    pub b_ih: Array2<f64>,
    pub b_hh: Array2<f64>,

    pub hidden_size: usize,
}

impl GRUCell {
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let dist = Uniform::new(-0.1, 0.1);
        let mut input_weight =
            || Array2::random_using((hidden_size, input_size), dist, &mut *rng);
        let (w_ir, w_iz, w_ih) = (input_weight(), input_weight(), input_weight());
        let mut hidden_weight =
            || Array2::random_using((hidden_size, hidden_size), dist, &mut *rng);
        let (w_hr, w_hz, w_hh) = (hidden_weight(), hidden_weight(), hidden_weight());
        let bias = || Array2::zeros((hidden_size, 1));

        GRUCell {
            w_ir,
            w_hr,
            b_ir: bias(),
            b_hr: bias(),
            w_iz,
            w_hz,
            b_iz: bias(),
            b_hz: bias(),
            w_ih,
            w_hh,
            b_ih: bias(),
            b_hh: bias(),
            hidden_size,
        }
    }

    pub fn forward(&self, input: &Array2<f64>, hx: &Array2<f64>) -> Array2<f64> {
        let (hy, _) = self.forward_with_cache(input, hx);
        hy
    }

    pub fn forward_with_cache(
        &self,
        input: &Array2<f64>,
        hx: &Array2<f64>,
    ) -> (Array2<f64>, GRUCellCache) {
        // Reset gate: r_t = σ(W_ir * x_t + b_ir + W_hr * h_{t-1} + b_hr)
        let reset_gate = (&self.w_ir.dot(input) + &self.b_ir + &self.w_hr.dot(hx) + &self.b_hr)
            .mapv(sigmoid);

        // Update gate: z_t = σ(W_iz * x_t + b_iz + W_hz * h_{t-1} + b_hz)
        let update_gate = (&self.w_iz.dot(input) + &self.b_iz + &self.w_hz.dot(hx) + &self.b_hz)
            .mapv(sigmoid);

        let reset_hidden = &reset_gate * hx;

        // New gate: n_t = tanh(W_ih * x_t + b_ih + W_hh * (r_t ⊙ h_{t-1}) + b_hh)
        let new_gate =
            (&self.w_ih.dot(input) + &self.b_ih + &self.w_hh.dot(&reset_hidden) + &self.b_hh)
                .mapv(f64::tanh);

        // h_t = (1 - z_t) ⊙ h_{t-1} + z_t ⊙ n_t
        let hy = &update_gate.mapv(|z| 1.0 - z) * hx + &update_gate * &new_gate;

        let cache = GRUCellCache {
            input: input.clone(),
            hx: hx.clone(),
            reset_gate,
            update_gate,
            new_gate,
            reset_hidden,
        };

        (hy, cache)
    }

    /// Returns (parameter_gradients, input_gradient, hidden_gradient)
    pub fn backward(
        &self,
        dhy: &Array2<f64>,
        cache: &GRUCellCache,
    ) -> (GRUCellGradients, Array2<f64>, Array2<f64>) {
        let d_update_gate = dhy * &(&cache.new_gate - &cache.hx);
        let d_new_gate = dhy * &cache.update_gate;
        let dhx_direct = dhy * &cache.update_gate.mapv(|z| 1.0 - z);

        let d_new_raw = &d_new_gate * &cache.new_gate.mapv(|n| 1.0 - n * n);

        let d_reset_hidden = self.w_hh.t().dot(&d_new_raw);
        let d_reset_gate = &d_reset_hidden * &cache.hx;
        let dhx_from_reset = &d_reset_hidden * &cache.reset_gate;

        let d_reset_raw = &d_reset_gate * &cache.reset_gate.mapv(|r| r * (1.0 - r));
        let d_update_raw = &d_update_gate * &cache.update_gate.mapv(|z| z * (1.0 - z));

        let sum_cols = |a: &Array2<f64>| a.sum_axis(Axis(1)).insert_axis(Axis(1));
        let db_r = sum_cols(&d_reset_raw);
        let db_z = sum_cols(&d_update_raw);
        let db_n = sum_cols(&d_new_raw);

        let gradients = GRUCellGradients {
            w_ir: d_reset_raw.dot(&cache.input.t()),
            w_hr: d_reset_raw.dot(&cache.hx.t()),
            b_ir: db_r.clone(),
            b_hr: db_r,
            w_iz: d_update_raw.dot(&cache.input.t()),
            w_hz: d_update_raw.dot(&cache.hx.t()),
            b_iz: db_z.clone(),
            b_hz: db_z,
            w_ih: d_new_raw.dot(&cache.input.t()),
            w_hh: d_new_raw.dot(&cache.reset_hidden.t()),
            b_ih: db_n.clone(),
            b_hh: db_n,
        };

        let dx = self.w_ir.t().dot(&d_reset_raw)
            + self.w_iz.t().dot(&d_update_raw)
            + self.w_ih.t().dot(&d_new_raw);

        let dhx = dhx_direct
            + dhx_from_reset
            + self.w_hr.t().dot(&d_reset_raw)
            + self.w_hz.t().dot(&d_update_raw);

        (gradients, dx, dhx)
    }

    /// Initialize zero gradients for accumulation
    pub fn zero_gradients(&self) -> GRUCellGradients {
        let like = |a: &Array2<f64>| Array2::zeros(a.raw_dim());
        GRUCellGradients {
            w_ir: like(&self.w_ir),
            w_hr: like(&self.w_hr),
            b_ir: like(&self.b_ir),
            b_hr: like(&self.b_hr),
            w_iz: like(&self.w_iz),
            w_hz: like(&self.w_hz),
            b_iz: like(&self.b_iz),
            b_hz: like(&self.b_hz),
            w_ih: like(&self.w_ih),
            w_hh: like(&self.w_hh),
            b_ih: like(&self.b_ih),
            b_hh: like(&self.b_hh),
        }
    }

    pub fn update_parameters<O: Optimizer>(
        &mut self,
        gradients: &GRUCellGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        optimizer.update(&format!("{}_w_ir", prefix), &mut self.w_ir, &gradients.w_ir);
        optimizer.update(&format!("{}_w_hr", prefix), &mut self.w_hr, &gradients.w_hr);
        optimizer.update(&format!("{}_b_ir", prefix), &mut self.b_ir, &gradients.b_ir);
        optimizer.update(&format!("{}_b_hr", prefix), &mut self.b_hr, &gradients.b_hr);
        optimizer.update(&format!("{}_w_iz", prefix), &mut self.w_iz, &gradients.w_iz);
        optimizer.update(&format!("{}_w_hz", prefix), &mut self.w_hz, &gradients.w_hz);
        optimizer.update(&format!("{}_b_iz", prefix), &mut self.b_iz, &gradients.b_iz);
        optimizer.update(&format!("{}_b_hz", prefix), &mut self.b_hz, &gradients.b_hz);
        optimizer.update(&format!("{}_w_ih", prefix), &mut self.w_ih, &gradients.w_ih);
        optimizer.update(&format!("{}_w_hh", prefix), &mut self.w_hh, &gradients.w_hh);
        optimizer.update(&format!("{}_b_ih", prefix), &mut self.b_ih, &gradients.b_ih);
        optimizer.update(&format!("{}_b_hh", prefix), &mut self.b_hh, &gradients.b_hh);
    }

    pub fn num_parameters(&self) -> usize {
        3 * (self.w_ir.len() + self.w_hr.len() + self.b_ir.len() + self.b_hr.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gru_cell_forward() {
        let mut rng = StdRng::seed_from_u64(2);
        let cell = GRUCell::new(3, 2, &mut rng);

        let input = arr2(&[[0.5, 1.0], [0.1, 0.0], [-0.3, 0.3]]);
        let hx = arr2(&[[0.1, 0.0], [0.2, 0.0]]);

        let hy = cell.forward(&input, &hx);
        assert_eq!(hy.shape(), &[2, 2]);
    }

    #[test]
    fn test_gru_backward_pass() {
        let mut rng = StdRng::seed_from_u64(2);
        let cell = GRUCell::new(2, 3, &mut rng);

        let input = arr2(&[[1.0, 0.0], [0.5, -0.5]]);
        let hx = arr2(&[[0.1, 0.0], [0.2, 0.1], [0.3, 0.2]]);

        let (_hy, cache) = cell.forward_with_cache(&input, &hx);
        let (gradients, dx, dhx) = cell.backward(&Array2::ones((3, 2)), &cache);

        assert_eq!(gradients.w_ir.shape(), &[3, 2]);
        assert_eq!(gradients.w_hr.shape(), &[3, 3]);
        assert_eq!(gradients.b_iz.shape(), &[3, 1]);
        assert_eq!(dx.shape(), &[2, 2]);
        assert_eq!(dhx.shape(), &[3, 2]);
    }

    #[test]
    fn test_gru_gradients_accumulate() {
        let mut rng = StdRng::seed_from_u64(2);
        let cell = GRUCell::new(2, 2, &mut rng);
        let (_hy, cache) = cell.forward_with_cache(&arr2(&[[1.0], [2.0]]), &Array2::zeros((2, 1)));
        let (step, _, _) = cell.backward(&Array2::ones((2, 1)), &cache);

        let mut total = cell.zero_gradients();
        total.accumulate(&step);
        total.accumulate(&step);
        assert_eq!(total.w_ih, &step.w_ih * 2.0);
    }
}
