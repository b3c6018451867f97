//! Hidden state carried between BPTT windows.

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::layers::recurrent::CellKind;

/// Recurrent state for every layer, one `(hidden_dim, streams)` matrix each.
///
/// These are plain values: nothing ties them to the window that produced
/// them, so a stored state never lets gradient flow into earlier windows.
#[derive(Clone, Debug, PartialEq)]
pub enum HiddenState {
    /// RNN and GRU.
    Single(Vec<Array2<f64>>),
    /// LSTM hidden and cell vectors.
    Pair {
        hidden: Vec<Array2<f64>>,
        cell: Vec<Array2<f64>>,
    },
}

impl HiddenState {
    pub fn zeros(kind: CellKind, layers: usize, streams: usize, hidden_dim: usize) -> Self {
        let zeros = || vec![Array2::zeros((hidden_dim, streams)); layers];
        if kind.has_cell_state() {
            HiddenState::Pair { hidden: zeros(), cell: zeros() }
        } else {
            HiddenState::Single(zeros())
        }
    }

    pub(crate) fn from_parts(hidden: Vec<Array2<f64>>, cell: Option<Vec<Array2<f64>>>) -> Self {
        match cell {
            Some(cell) => HiddenState::Pair { hidden, cell },
            None => HiddenState::Single(hidden),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<Array2<f64>>, Option<Vec<Array2<f64>>>) {
        match self {
            HiddenState::Single(hidden) => (hidden, None),
            HiddenState::Pair { hidden, cell } => (hidden, Some(cell)),
        }
    }

    pub fn hidden(&self) -> &[Array2<f64>] {
        match self {
            HiddenState::Single(hidden) => hidden,
            HiddenState::Pair { hidden, .. } => hidden,
        }
    }

    pub fn cell(&self) -> Option<&[Array2<f64>]> {
        match self {
            HiddenState::Single(_) => None,
            HiddenState::Pair { cell, .. } => Some(cell),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.hidden().len()
    }

    pub fn streams(&self) -> usize {
        self.hidden().first().map_or(0, |h| h.ncols())
    }

    /// Logical shape `(layers, streams, hidden_dim)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        let hidden_dim = self.hidden().first().map_or(0, |h| h.nrows());
        (self.num_layers(), self.streams(), hidden_dim)
    }

    /// Check this state can feed a model of the given shape.
    pub fn check(
        &self,
        kind: CellKind,
        layers: usize,
        streams: usize,
        hidden_dim: usize,
    ) -> Result<()> {
        if kind.has_cell_state() != self.cell().is_some() {
            return Err(Error::StateMismatch(format!("state variant does not fit a {kind} cell")));
        }
        let expected = (layers, streams, hidden_dim);
        let mut tensors = self.hidden().iter().chain(self.cell().unwrap_or(&[]));
        if self.shape() != expected || tensors.any(|t| t.dim() != (hidden_dim, streams)) {
            return Err(Error::StateMismatch(format!(
                "expected state of shape {:?}, got {:?}; \
                 clear the state before changing the stream count",
                expected,
                self.shape()
            )));
        }
        Ok(())
    }
}

/// Training-loop owned carrier for the state between windows.
///
/// `UNSET` until the first forward stores a state, `CARRYING` afterwards.
/// Each store replaces the previous state; `clear` returns to `UNSET`.
#[derive(Clone, Debug, Default)]
pub struct CarriedState {
    state: Option<HiddenState>,
}

impl CarriedState {
    pub fn unset() -> Self {
        Self { state: None }
    }

    pub fn clear(&mut self) {
        self.state = None;
    }

    pub fn is_carrying(&self) -> bool {
        self.state.is_some()
    }

    pub fn get(&self) -> Option<&HiddenState> {
        self.state.as_ref()
    }

    /// Hand the state to a forward call, leaving the carrier unset.
    pub fn take(&mut self) -> Option<HiddenState> {
        self.state.take()
    }

    pub fn store(&mut self, state: HiddenState) {
        self.state = Some(state);
    }
}
