//! Stream segmentation for truncated BPTT.
//!
//! A flat index sequence is cut into `streams` contiguous runs of equal
//! length `n`, which become the columns of an `(n, streams)` grid:
//!
//! ```text
//! a b c d e f g h i j k l m n o p q r s t u v w x   streams = 4
//!
//! ┌ a g m s ┐
//! │ b h n t │
//! │ c i o u │
//! │ d j p v │
//! │ e k q w │
//! └ f l r x ┘
//! ```
//!
//! Windows of `window` rows slide down the grid without overlap; the target
//! of each window is the same rows shifted down by one. Columns are
//! independent, so the dependency of `g` on `f` is never learned. The model
//! carries its hidden state from one window to the next, which keeps every
//! column's recurrence continuous.

use ndarray::{s, Array1, Array2};

use crate::error::{Error, Result};

/// One BPTT window.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// Token indices, shape `(window_len, streams)`.
    pub input: Array2<usize>,
    /// Next-step token indices flattened row-major, length `window_len * streams`.
    pub target: Array1<usize>,
}

impl Batch {
    pub fn window_len(&self) -> usize {
        self.input.nrows()
    }

    pub fn streams(&self) -> usize {
        self.input.ncols()
    }

    /// Number of loss positions in this window.
    pub fn num_positions(&self) -> usize {
        self.target.len()
    }
}

/// Reshapes a flat sequence into parallel streams and yields BPTT windows.
#[derive(Clone, Debug)]
pub struct BatchSegmenter {
    grid: Array2<usize>,
    window: usize,
}

impl BatchSegmenter {
    /// Trailing `data.len() % streams` indices are dropped.
    pub fn new(data: &[usize], streams: usize, window: usize) -> Result<Self> {
        if streams == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }
        if window == 0 {
            return Err(Error::Config("BPTT window must be positive".into()));
        }

        let n = data.len() / streams;
        // Row-major (streams, n) puts stream i at data[i*n..(i+1)*n]; the
        // transpose makes each row one timestep.
        let by_stream = Array2::from_shape_vec((streams, n), data[..n * streams].to_vec())
            .map_err(|e| Error::Config(format!("cannot shape stream grid: {e}")))?;
        let grid = by_stream.reversed_axes().as_standard_layout().to_owned();

        Ok(Self { grid, window })
    }

    /// The `(stream_len, streams)` grid.
    pub fn grid(&self) -> &Array2<usize> {
        &self.grid
    }

    pub fn stream_len(&self) -> usize {
        self.grid.nrows()
    }

    pub fn streams(&self) -> usize {
        self.grid.ncols()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of windows `iter` will produce.
    pub fn num_windows(&self) -> usize {
        let steps = self.stream_len().saturating_sub(1);
        (steps + self.window - 1) / self.window
    }

    /// Target positions across all windows.
    pub fn num_tokens(&self) -> usize {
        self.stream_len().saturating_sub(1) * self.streams()
    }

    pub fn stream(&self, i: usize) -> Vec<usize> {
        self.grid.column(i).to_vec()
    }

    pub fn iter(&self) -> Windows<'_> {
        Windows { segmenter: self, t: 0 }
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.iter().collect()
    }

    fn window_at(&self, t: usize) -> Batch {
        let w = self.window.min(self.stream_len() - 1 - t);
        let input = self.grid.slice(s![t..t + w, ..]).to_owned();
        let target = self
            .grid
            .slice(s![t + 1..t + 1 + w, ..])
            .iter()
            .copied()
            .collect::<Array1<usize>>();
        Batch { input, target }
    }
}

/// Windows in increasing time order.
pub struct Windows<'a> {
    segmenter: &'a BatchSegmenter,
    t: usize,
}

impl Iterator for Windows<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.t + 1 >= self.segmenter.stream_len() {
            return None;
        }
        let batch = self.segmenter.window_at(self.t);
        self.t += self.segmenter.window();
        Some(batch)
    }
}

impl<'a> IntoIterator for &'a BatchSegmenter {
    type Item = Batch;
    type IntoIter = Windows<'a>;

    fn into_iter(self) -> Windows<'a> {
        self.iter()
    }
}
