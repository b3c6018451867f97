use std::fmt;

use ndarray::{s, Array1, Array2};
use rand::Rng;

use crate::batching::Batch;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::layers::dropout::Dropout;
use crate::layers::embedding::{Embedding, EmbeddingGradients};
use crate::layers::linear::{LinearGradients, LinearLayer};
use crate::layers::recurrent::{CellGradients, CellKind, RecurrentCell, StepCache};
use crate::loss::CrossEntropyLoss;
use crate::optimizers::Optimizer;
use crate::state::HiddenState;
use crate::utils::readable_size;
use crate::vocab::PAD_INDEX;

/// Gradients for every parameter of an [`RnnLm`].
#[derive(Clone, Debug)]
pub struct RnnLmGradients {
    pub embedding: EmbeddingGradients,
    pub cells: Vec<CellGradients>,
    pub output: LinearGradients,
}

impl RnnLmGradients {
    /// L2 norm over all parameters together.
    pub fn global_norm(&self) -> f64 {
        let cells: f64 = self
            .cells
            .iter()
            .flat_map(|g| g.arrays())
            .map(|a| a.iter().map(|x| x * x).sum::<f64>())
            .sum();
        (self.embedding.squared_norm() + cells + self.output.squared_norm()).sqrt()
    }

    /// Rescale so the global norm is at most `max_norm`; returns the norm
    /// before clipping.
    pub fn clip_global_norm(&mut self, max_norm: f64) -> f64 {
        let norm = self.global_norm();
        if norm > max_norm {
            let scale = max_norm / (norm + 1e-6);
            self.embedding.scale(scale);
            for grad in self.cells.iter_mut() {
                for array in grad.arrays_mut() {
                    *array *= scale;
                }
            }
            self.output.scale(scale);
        }
        norm
    }
}

/// Everything backward needs from one window's forward pass.
struct WindowCache {
    tokens: Vec<usize>,
    targets: Vec<usize>,
    streams: usize,
    emb_mask: Option<Array2<f64>>,
    steps: Vec<Vec<StepCache>>, // [timestep][layer]
    out_mask: Option<Array2<f64>>,
    top_dropped: Array2<f64>,
    logits: Array2<f64>,
}

/// Result of a training-mode forward pass over one window.
pub struct WindowPass {
    /// Unreduced loss, one entry per target position.
    pub losses: Array1<f64>,
    /// State after the last timestep, to feed the next window.
    pub state: HiddenState,
    cache: WindowCache,
}

/// Recurrent language model: embedding, dropout, stacked recurrent cells,
/// dropout, projection onto the vocabulary.
///
/// The model holds no recurrent state. Callers pass the previous window's
/// state into `forward` and receive the next one back.
pub struct RnnLm {
    pub embedding: Embedding,
    pub cells: Vec<RecurrentCell>,
    pub output: LinearLayer,
    emb_dropout: Dropout,
    out_dropout: Dropout,
    kind: CellKind,
    hid_dim: usize,
    loss: CrossEntropyLoss,
}

impl RnnLm {
    pub fn new<R: Rng>(config: &ModelConfig, vocab_size: usize, rng: &mut R) -> Result<Self> {
        config.validate()?;
        if vocab_size == 0 {
            return Err(Error::Config("vocabulary is empty".into()));
        }

        let embedding = Embedding::new(vocab_size, config.emb_dim, Some(PAD_INDEX), rng);
        let cells = (0..config.n_layers)
            .map(|i| {
                let input_size = if i == 0 { config.emb_dim } else { config.hid_dim };
                RecurrentCell::new(config.cell, input_size, config.hid_dim, rng)
            })
            .collect();
        let output = LinearLayer::new(config.hid_dim, vocab_size, rng);

        Ok(RnnLm {
            embedding,
            cells,
            output,
            emb_dropout: Dropout::new(config.dropout, rng.gen())?,
            out_dropout: Dropout::new(config.dropout, rng.gen())?,
            kind: config.cell,
            hid_dim: config.hid_dim,
            loss: CrossEntropyLoss,
        })
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.vocab_size()
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hid_dim
    }

    pub fn num_parameters(&self) -> usize {
        self.embedding.num_parameters()
            + self.cells.iter().map(RecurrentCell::num_parameters).sum::<usize>()
            + self.output.num_parameters()
    }

    pub fn train(&mut self) {
        self.emb_dropout.train();
        self.out_dropout.train();
    }

    pub fn eval(&mut self) {
        self.emb_dropout.eval();
        self.out_dropout.eval();
    }

    /// Whether `state` can feed a window with `streams` columns.
    pub fn check_state(&self, state: &HiddenState, streams: usize) -> Result<()> {
        state.check(self.kind, self.num_layers(), streams, self.hid_dim)
    }

    /// Zero state for `streams` parallel streams.
    pub fn init_state(&self, streams: usize) -> HiddenState {
        HiddenState::zeros(self.kind, self.num_layers(), streams, self.hid_dim)
    }

    /// Loss per target position and the next state, without keeping
    /// anything for backward. `None` starts from zeros.
    pub fn forward(
        &mut self,
        batch: &Batch,
        state: Option<HiddenState>,
    ) -> Result<(Array1<f64>, HiddenState)> {
        let pass = self.run_window(batch, state, false)?;
        Ok((pass.losses, pass.state))
    }

    /// Same as `forward`, keeping the caches `backward` needs.
    pub fn forward_train(
        &mut self,
        batch: &Batch,
        state: Option<HiddenState>,
    ) -> Result<WindowPass> {
        self.run_window(batch, state, true)
    }

    fn run_window(
        &mut self,
        batch: &Batch,
        state: Option<HiddenState>,
        keep_cache: bool,
    ) -> Result<WindowPass> {
        let (w, streams) = batch.input.dim();
        if batch.target.len() != w * streams {
            return Err(Error::StateMismatch(format!(
                "target has {} positions, input window has {}",
                batch.target.len(),
                w * streams
            )));
        }

        let state = match state {
            Some(state) => {
                self.check_state(&state, streams)?;
                state
            }
            None => self.init_state(streams),
        };
        let (mut hidden, mut cell) = state.into_parts();

        // Column t * streams + b is stream b at timestep t, matching the target order.
        let tokens: Vec<usize> = batch.input.iter().copied().collect();
        let vocab_size = self.vocab_size();
        if let Some(&bad) = tokens.iter().chain(&batch.target).find(|&&i| i >= vocab_size) {
            return Err(Error::IndexOutOfRange {
                index: bad,
                size: vocab_size,
            });
        }
        let targets: Vec<usize> = batch.target.to_vec();

        let embedded = self.embedding.forward(&tokens);
        let (emb_dropped, emb_mask) = self.emb_dropout.forward(&embedded);

        let mut top = Array2::zeros((self.hid_dim, w * streams));
        let mut steps = Vec::with_capacity(if keep_cache { w } else { 0 });

        for t in 0..w {
            let cols = s![.., t * streams..(t + 1) * streams];
            let mut x = emb_dropped.slice(cols).to_owned();
            let mut step_caches = Vec::with_capacity(self.cells.len());

            for (l, layer) in self.cells.iter().enumerate() {
                let cx = cell.as_ref().map(|c| &c[l]);
                let (hy, cy) = if keep_cache {
                    let (hy, cy, cache) = layer.forward_with_cache(&x, &hidden[l], cx)?;
                    step_caches.push(cache);
                    (hy, cy)
                } else {
                    layer.forward(&x, &hidden[l], cx)?
                };
                if let (Some(c), Some(cy)) = (cell.as_mut(), cy) {
                    c[l] = cy;
                }
                hidden[l] = hy.clone();
                x = hy;
            }

            top.slice_mut(cols).assign(&x);
            if keep_cache {
                steps.push(step_caches);
            }
        }

        let (top_dropped, out_mask) = self.out_dropout.forward(&top);
        let logits = self.output.forward(&top_dropped);
        let losses = self.loss.per_position(&logits, &targets);

        Ok(WindowPass {
            losses,
            state: HiddenState::from_parts(hidden, cell),
            cache: WindowCache {
                tokens,
                targets,
                streams,
                emb_mask,
                steps,
                out_mask,
                top_dropped,
                logits,
            },
        })
    }

    /// Gradients of the window's mean loss. Backpropagation stops at the
    /// window's first timestep: the incoming state is treated as a constant.
    pub fn backward(&self, pass: &WindowPass) -> Result<RnnLmGradients> {
        let cache = &pass.cache;
        if cache.steps.is_empty() && !cache.tokens.is_empty() {
            return Err(Error::StateMismatch("backward needs a pass from forward_train".into()));
        }

        let positions = cache.targets.len().max(1) as f64;
        let streams = cache.streams;

        let dlogits = self.loss.gradient(&cache.logits, &cache.targets, 1.0 / positions);
        let (output, d_top_dropped) = self.output.backward(&cache.top_dropped, &dlogits);
        let d_top = Dropout::backward(&d_top_dropped, cache.out_mask.as_ref());

        let zeros = || vec![Array2::<f64>::zeros((self.hid_dim, streams)); self.cells.len()];
        let mut dh_next = zeros();
        let mut dc_next = self.kind.has_cell_state().then(zeros);
        let mut cells: Vec<CellGradients> =
            self.cells.iter().map(RecurrentCell::zero_gradients).collect();
        let mut d_embedded = Array2::zeros((self.embedding.embed_dim(), cache.tokens.len()));

        for (t, step) in cache.steps.iter().enumerate().rev() {
            let cols = s![.., t * streams..(t + 1) * streams];
            let mut d_above = d_top.slice(cols).to_owned();

            for (l, layer) in self.cells.iter().enumerate().rev() {
                let dh = &d_above + &dh_next[l];
                let dc = dc_next.as_ref().map(|d| &d[l]);
                let (grads, dx, dh_prev, dc_prev) = layer.backward(&dh, dc, &step[l])?;
                cells[l].accumulate(&grads)?;
                dh_next[l] = dh_prev;
                if let (Some(d), Some(dc_prev)) = (dc_next.as_mut(), dc_prev) {
                    d[l] = dc_prev;
                }
                d_above = dx;
            }

            d_embedded.slice_mut(cols).assign(&d_above);
        }

        let d_embedded = Dropout::backward(&d_embedded, cache.emb_mask.as_ref());
        let embedding = self.embedding.backward(&cache.tokens, &d_embedded);

        Ok(RnnLmGradients { embedding, cells, output })
    }

    pub fn update_parameters<O: Optimizer>(
        &mut self,
        gradients: &RnnLmGradients,
        optimizer: &mut O,
    ) -> Result<()> {
        self.embedding.update_parameters(&gradients.embedding, optimizer, "embedding");
        for (i, (cell, grad)) in self.cells.iter_mut().zip(&gradients.cells).enumerate() {
            cell.update_parameters(grad, optimizer, &format!("layer_{}", i))?;
        }
        self.output.update_parameters(&gradients.output, optimizer, "output");
        Ok(())
    }
}

impl fmt::Display for RnnLm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (vocab, emb, hid) = (self.vocab_size(), self.embedding.embed_dim(), self.hid_dim);
        writeln!(f, "RnnLm(")?;
        writeln!(f, "  (emb): Embedding({}, {}, padding_idx={})", vocab, emb, PAD_INDEX)?;
        writeln!(f, "  (drop): Dropout(p={})", self.emb_dropout.dropout_rate)?;
        writeln!(f, "  (rnn): {}({}, {}, num_layers={})", self.kind, emb, hid, self.num_layers())?;
        writeln!(f, "  (out): Linear(in_features={}, out_features={})", hid, vocab)?;
        writeln!(f, ")")?;
        write!(f, "# of parameters: {}", readable_size(self.num_parameters()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::BatchSegmenter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(cell: CellKind, n_layers: usize, dropout: f64) -> ModelConfig {
        ModelConfig {
            emb_dim: 4,
            hid_dim: 5,
            cell,
            n_layers,
            dropout,
        }
    }

    fn model(cell: CellKind, n_layers: usize) -> RnnLm {
        let mut rng = StdRng::seed_from_u64(11);
        RnnLm::new(&config(cell, n_layers, 0.0), 9, &mut rng).unwrap()
    }

    fn sample_batches(streams: usize, window: usize) -> Vec<Batch> {
        let data: Vec<usize> = (0..40).map(|i| 1 + (i * 7 + i / 3) % 8).collect();
        BatchSegmenter::new(&data, streams, window).unwrap().batches()
    }

    fn mean_loss(model: &mut RnnLm, batch: &Batch, state: Option<HiddenState>) -> f64 {
        model.forward(batch, state).unwrap().0.mean().unwrap()
    }

    /// Compare one analytic gradient entry against a central difference.
    fn check_entry(
        model: &mut RnnLm,
        batch: &Batch,
        state: &HiddenState,
        analytic: f64,
        param: impl Fn(&mut RnnLm) -> &mut f64,
    ) {
        let eps = 1e-5;
        let original = *param(model);
        *param(model) = original + eps;
        let plus = mean_loss(model, batch, Some(state.clone()));
        *param(model) = original - eps;
        let minus = mean_loss(model, batch, Some(state.clone()));
        *param(model) = original;

        let numeric = (plus - minus) / (2.0 * eps);
        let tolerance = 1e-6 + 1e-4 * numeric.abs().max(analytic.abs());
        assert!(
            (numeric - analytic).abs() < tolerance,
            "numeric {numeric} vs analytic {analytic}"
        );
    }

    fn output_weight(model: &mut RnnLm) -> &mut f64 {
        &mut model.output.weight[[3, 1]]
    }

    fn output_bias(model: &mut RnnLm) -> &mut f64 {
        &mut model.output.bias[[2, 0]]
    }

    fn recurrent_weight(model: &mut RnnLm) -> &mut f64 {
        match &mut model.cells[0] {
            RecurrentCell::Rnn(c) => &mut c.w_hh[[1, 2]],
            RecurrentCell::Gru(c) => &mut c.w_hh[[1, 2]],
            RecurrentCell::Lstm(c) => &mut c.w_hh[[6, 2]],
        }
    }

    fn recurrent_gradient(grads: &RnnLmGradients) -> f64 {
        match &grads.cells[0] {
            CellGradients::Rnn(g) => g.w_hh[[1, 2]],
            CellGradients::Gru(g) => g.w_hh[[1, 2]],
            CellGradients::Lstm(g) => g.w_hh[[6, 2]],
        }
    }

    #[test]
    fn test_loss_vector_matches_window() {
        let mut lm = model(CellKind::Gru, 1);
        for batch in sample_batches(4, 3) {
            let (losses, state) = lm.forward(&batch, None).unwrap();
            assert_eq!(losses.len(), batch.num_positions());
            assert!(losses.iter().all(|&l| l.is_finite() && l > 0.0));
            assert_eq!(state.shape(), (1, 4, 5));
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        for kind in [CellKind::Rnn, CellKind::Gru, CellKind::Lstm] {
            let mut lm = model(kind, 2);
            lm.eval();
            let batches = sample_batches(2, 3);
            // Start from a carried, non-zero state so the recurrence is exercised.
            let (_, state) = lm.forward(&batches[0], None).unwrap();
            let batch = &batches[1];

            let pass = lm.forward_train(batch, Some(state.clone())).unwrap();
            let grads = lm.backward(&pass).unwrap();

            let token = batch.input[[0, 0]];
            let emb_grad = grads.embedding.weight[[token, 1]];
            check_entry(&mut lm, batch, &state, grads.output.weight[[3, 1]], output_weight);
            check_entry(&mut lm, batch, &state, grads.output.bias[[2, 0]], output_bias);
            check_entry(&mut lm, batch, &state, recurrent_gradient(&grads), recurrent_weight);
            check_entry(&mut lm, batch, &state, emb_grad, move |m| {
                &mut m.embedding.weight[[token, 1]]
            });
        }
    }

    #[test]
    fn test_padding_row_gets_no_gradient() {
        let mut lm = model(CellKind::Rnn, 1);
        let batch = Batch {
            input: ndarray::arr2(&[[0, 4], [5, 0]]),
            target: ndarray::arr1(&[5, 0, 6, 7]),
        };
        let pass = lm.forward_train(&batch, None).unwrap();
        let grads = lm.backward(&pass).unwrap();
        assert!(grads.embedding.weight.row(PAD_INDEX).iter().all(|&g| g == 0.0));
        assert!(lm.embedding.weight.row(PAD_INDEX).iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_stream_count_change_requires_clear() {
        let mut lm = model(CellKind::Lstm, 1);
        let (_, state) = lm.forward(&sample_batches(4, 2)[0], None).unwrap();
        let err = lm.forward(&sample_batches(2, 2)[0], Some(state)).unwrap_err();
        assert!(matches!(err, Error::StateMismatch(_)));
    }

    #[test]
    fn test_backward_requires_training_pass() {
        let mut lm = model(CellKind::Gru, 1);
        let batch = &sample_batches(2, 2)[0];
        let pass = lm.run_window(batch, None, false).unwrap();
        assert!(lm.backward(&pass).is_err());
    }

    #[test]
    fn test_clip_global_norm() {
        let mut lm = model(CellKind::Gru, 1);
        let batch = &sample_batches(2, 3)[0];
        let pass = lm.forward_train(batch, None).unwrap();
        let mut grads = lm.backward(&pass).unwrap();

        let before = grads.global_norm();
        assert!(before > 0.0);
        let reported = grads.clip_global_norm(before / 10.0);
        assert!((reported - before).abs() < 1e-12);
        assert!((grads.global_norm() - before / 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_dropout_configuration_and_summary() {
        let mut rng = StdRng::seed_from_u64(0);
        let lm = RnnLm::new(&config(CellKind::Lstm, 2, 0.4), 9, &mut rng).unwrap();
        let summary = lm.to_string();
        assert!(summary.contains("LSTM(4, 5, num_layers=2)"));
        assert!(summary.contains("Embedding(9, 4, padding_idx=0)"));
        assert_eq!(lm.vocab_size(), 9);
        assert!(summary.contains("# of parameters:"));

        let mut rng = StdRng::seed_from_u64(0);
        assert!(RnnLm::new(&config(CellKind::Gru, 0, 0.0), 9, &mut rng).is_err());
    }
}
