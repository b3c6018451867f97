use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Bernoulli;

use crate::error::{Error, Result};

/// Inverted dropout: kept activations are scaled by `1 / (1 - p)` during
/// training so evaluation is the identity.
#[derive(Clone, Debug)]
pub struct Dropout {
    pub dropout_rate: f64,
    pub is_training: bool,
    keep: Bernoulli,
    rng: StdRng,
}

impl Dropout {
    pub fn new(dropout_rate: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&dropout_rate) {
            return Err(Error::Config(format!(
                "dropout rate must be in [0, 1), got {dropout_rate}"
            )));
        }
        let keep = Bernoulli::new(1.0 - dropout_rate)
            .map_err(|e| Error::Config(format!("invalid dropout rate {dropout_rate}: {e}")))?;
        Ok(Dropout {
            dropout_rate,
            is_training: true,
            keep,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn train(&mut self) {
        self.is_training = true;
    }

    pub fn eval(&mut self) {
        self.is_training = false;
    }

    /// Returns the output and, in training mode, the scaled mask applied.
    pub fn forward(&mut self, input: &Array2<f64>) -> (Array2<f64>, Option<Array2<f64>>) {
        if !self.is_training || self.dropout_rate == 0.0 {
            return (input.clone(), None);
        }

        let mask = self.generate_mask(input.raw_dim());
        (input * &mask, Some(mask))
    }

    pub fn backward(grad_output: &Array2<f64>, mask: Option<&Array2<f64>>) -> Array2<f64> {
        match mask {
            Some(mask) => grad_output * mask,
            None => grad_output.clone(),
        }
    }

    fn generate_mask(&mut self, shape: ndarray::Dim<[usize; 2]>) -> Array2<f64> {
        let scale = 1.0 / (1.0 - self.dropout_rate);
        Array2::random_using(shape, self.keep, &mut self.rng)
            .mapv(|keep| if keep { scale } else { 0.0 })
    }
}
