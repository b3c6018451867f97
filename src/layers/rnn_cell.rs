use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::optimizers::Optimizer;

/// Holds gradients for the Elman cell parameters
#[derive(Clone, Debug)]
pub struct RNNCellGradients {
    pub w_ih: Array2<f64>,
    pub w_hh: Array2<f64>,
    pub b_ih: Array2<f64>,
    pub b_hh: Array2<f64>,
}

impl RNNCellGradients {
    pub fn accumulate(&mut self, other: &RNNCellGradients) {
        self.w_ih += &other.w_ih;
        self.w_hh += &other.w_hh;
        self.b_ih += &other.b_ih;
        self.b_hh += &other.b_hh;
    }

    pub fn arrays(&self) -> [&Array2<f64>; 4] {
        [&self.w_ih, &self.w_hh, &self.b_ih, &self.b_hh]
    }

    pub fn arrays_mut(&mut self) -> [&mut Array2<f64>; 4] {
        [&mut self.w_ih, &mut self.w_hh, &mut self.b_ih, &mut self.b_hh]
    }
}

#[derive(Clone, Debug)]
pub struct RNNCellCache {
    pub input: Array2<f64>,
    pub hx: Array2<f64>,
    pub hy: Array2<f64>,
}

/// Elman recurrent cell: h_t = tanh(W_ih * x_t + b_ih + W_hh * h_{t-1} + b_hh)
///
/// Inputs and states are column-per-stream: `(features, streams)`.
#[derive(Clone, Debug)]
pub struct RNNCell {
    pub w_ih: Array2<f64>,  // (hidden_size, input_size)
    pub w_hh: Array2<f64>,  // (hidden_size, hidden_size)
    pub b_ih: Array2<f64>,  // (hidden_size, 1)
    pub b_hh: Array2<f64>,  // (hidden_size, 1)
    pub hidden_size: usize,
}

impl RNNCell {
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let dist = Uniform::new(-0.1, 0.1);

        RNNCell {
            w_ih: Array2::random_using((hidden_size, input_size), dist, rng),
            w_hh: Array2::random_using((hidden_size, hidden_size), dist, rng),
            b_ih: Array2::zeros((hidden_size, 1)),
            b_hh: Array2::zeros((hidden_size, 1)),
            hidden_size,
        }
    }

    pub fn forward(&self, input: &Array2<f64>, hx: &Array2<f64>) -> Array2<f64> {
        (&self.w_ih.dot(input) + &self.b_ih + &self.w_hh.dot(hx) + &self.b_hh).mapv(f64::tanh)
    }

    pub fn forward_with_cache(
        &self,
        input: &Array2<f64>,
        hx: &Array2<f64>,
    ) -> (Array2<f64>, RNNCellCache) {
        let hy = self.forward(input, hx);
        let cache = RNNCellCache {
            input: input.clone(),
            hx: hx.clone(),
            hy: hy.clone(),
        };
        (hy, cache)
    }

    /// Returns (parameter_gradients, input_gradient, hidden_gradient)
    pub fn backward(
        &self,
        dhy: &Array2<f64>,
        cache: &RNNCellCache,
    ) -> (RNNCellGradients, Array2<f64>, Array2<f64>) {
        let draw = dhy * &cache.hy.mapv(|h| 1.0 - h * h);
        let db = draw.sum_axis(Axis(1)).insert_axis(Axis(1));

        let gradients = RNNCellGradients {
            w_ih: draw.dot(&cache.input.t()),
            w_hh: draw.dot(&cache.hx.t()),
            b_ih: db.clone(),
            b_hh: db,
        };

        let dx = self.w_ih.t().dot(&draw);
        let dhx = self.w_hh.t().dot(&draw);

        (gradients, dx, dhx)
    }

    pub fn zero_gradients(&self) -> RNNCellGradients {
        RNNCellGradients {
            w_ih: Array2::zeros(self.w_ih.raw_dim()),
            w_hh: Array2::zeros(self.w_hh.raw_dim()),
            b_ih: Array2::zeros(self.b_ih.raw_dim()),
            b_hh: Array2::zeros(self.b_hh.raw_dim()),
        }
    }

    pub fn update_parameters<O: Optimizer>(
        &mut self,
        gradients: &RNNCellGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        optimizer.update(&format!("{}_w_ih", prefix), &mut self.w_ih, &gradients.w_ih);
        optimizer.update(&format!("{}_w_hh", prefix), &mut self.w_hh, &gradients.w_hh);
        optimizer.update(&format!("{}_b_ih", prefix), &mut self.b_ih, &gradients.b_ih);
        optimizer.update(&format!("{}_b_hh", prefix), &mut self.b_hh, &gradients.b_hh);
    }

    pub fn num_parameters(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.b_ih.len() + self.b_hh.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rnn_cell_forward_batch() {
        let mut rng = StdRng::seed_from_u64(1);
        let cell = RNNCell::new(3, 2, &mut rng);

        let input = arr2(&[[0.5, 0.0], [0.1, 1.0], [-0.3, 0.2]]);
        let hx = Array2::zeros((2, 2));

        let hy = cell.forward(&input, &hx);
        assert_eq!(hy.shape(), &[2, 2]);
        assert!(hy.iter().all(|h| h.abs() < 1.0));
    }

    #[test]
    fn test_rnn_cell_backward_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let cell = RNNCell::new(2, 3, &mut rng);

        let input = arr2(&[[1.0, -1.0], [0.5, 0.25]]);
        let hx = arr2(&[[0.1, 0.0], [0.2, 0.0], [0.3, 0.0]]);
        let (_hy, cache) = cell.forward_with_cache(&input, &hx);

        let (gradients, dx, dhx) = cell.backward(&Array2::ones((3, 2)), &cache);
        assert_eq!(gradients.w_ih.shape(), &[3, 2]);
        assert_eq!(gradients.b_ih.shape(), &[3, 1]);
        assert_eq!(dx.shape(), &[2, 2]);
        assert_eq!(dhx.shape(), &[3, 2]);
    }
}
