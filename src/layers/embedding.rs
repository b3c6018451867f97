use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::optimizers::Optimizer;

/// Gradients for the embedding table.
#[derive(Clone, Debug)]
pub struct EmbeddingGradients {
    pub weight: Array2<f64>,
}

impl EmbeddingGradients {
    pub fn squared_norm(&self) -> f64 {
        self.weight.iter().map(|x| x * x).sum()
    }

    pub fn scale(&mut self, factor: f64) {
        self.weight *= factor;
    }
}

/// Trainable token embedding table.
///
/// The row at `padding_idx` starts at zero and never receives gradient.
#[derive(Clone, Debug)]
pub struct Embedding {
    pub weight: Array2<f64>, // (vocab_size, embed_dim)
    pub padding_idx: Option<usize>,
    vocab_size: usize,
    embed_dim: usize,
}

impl Embedding {
    pub fn new<R: Rng>(
        vocab_size: usize,
        embed_dim: usize,
        padding_idx: Option<usize>,
        rng: &mut R,
    ) -> Self {
        let scale = (1.0 / embed_dim as f64).sqrt();
        let dist = Uniform::new(-scale, scale);
        let mut weight = Array2::random_using((vocab_size, embed_dim), dist, rng);
        if let Some(pad) = padding_idx.filter(|&p| p < vocab_size) {
            weight.row_mut(pad).fill(0.0);
        }

        Self {
            weight,
            padding_idx,
            vocab_size,
            embed_dim,
        }
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Look up a column per index: returns `(embed_dim, indices.len())`.
    pub fn forward(&self, indices: &[usize]) -> Array2<f64> {
        let mut output = Array2::zeros((self.embed_dim, indices.len()));
        for (col, &idx) in indices.iter().enumerate() {
            assert!(
                idx < self.vocab_size,
                "Index {} out of vocabulary size {}",
                idx,
                self.vocab_size
            );
            output.column_mut(col).assign(&self.weight.row(idx));
        }
        output
    }

    /// Scatter-add `grad_output` columns back onto the rows they came from.
    pub fn backward(&self, indices: &[usize], grad_output: &Array2<f64>) -> EmbeddingGradients {
        let mut weight = Array2::zeros(self.weight.raw_dim());
        for (col, &idx) in indices.iter().enumerate() {
            if Some(idx) == self.padding_idx {
                continue;
            }
            let mut row = weight.row_mut(idx);
            row += &grad_output.index_axis(Axis(1), col);
        }
        EmbeddingGradients { weight }
    }

    pub fn update_parameters<O: Optimizer>(
        &mut self,
        gradients: &EmbeddingGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        optimizer.update(&format!("{}_weight", prefix), &mut self.weight, &gradients.weight);
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_embedding_forward_columns() {
        let mut rng = StdRng::seed_from_u64(0);
        let emb = Embedding::new(10, 8, Some(0), &mut rng);
        let output = emb.forward(&[0, 3, 5]);
        assert_eq!(output.shape(), &[8, 3]);
        assert!(output.column(0).iter().all(|&x| x == 0.0));
        assert_eq!(output.column(1), emb.weight.row(3));
    }

    #[test]
    fn test_embedding_backward_accumulates_and_skips_padding() {
        let mut rng = StdRng::seed_from_u64(0);
        let emb = Embedding::new(4, 2, Some(0), &mut rng);
        let grad = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let grads = emb.backward(&[2, 0, 2], &grad);
        assert_eq!(grads.weight.row(2).to_vec(), vec![4.0, 10.0]);
        assert!(grads.weight.row(0).iter().all(|&x| x == 0.0));
    }
}
