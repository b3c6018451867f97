//! One recurrent layer of any supported kind behind a single step API.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layers::gru_cell::{GRUCell, GRUCellCache, GRUCellGradients};
use crate::layers::lstm_cell::{LSTMCell, LSTMCellCache, LSTMCellGradients};
use crate::layers::rnn_cell::{RNNCell, RNNCellCache, RNNCellGradients};
use crate::optimizers::Optimizer;

/// Recurrent cell type, parsed case-insensitively from `RNN`, `GRU` or `LSTM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CellKind {
    Rnn,
    Gru,
    Lstm,
}

impl CellKind {
    /// Whether the carried state includes a cell vector next to the hidden one.
    pub fn has_cell_state(self) -> bool {
        matches!(self, CellKind::Lstm)
    }
}

impl FromStr for CellKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RNN" => Ok(CellKind::Rnn),
            "GRU" => Ok(CellKind::Gru),
            "LSTM" => Ok(CellKind::Lstm),
            other => Err(Error::Config(format!("unknown recurrent cell type {other:?}"))),
        }
    }
}

impl TryFrom<String> for CellKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CellKind> for String {
    fn from(kind: CellKind) -> String {
        kind.to_string()
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CellKind::Rnn => "RNN",
            CellKind::Gru => "GRU",
            CellKind::Lstm => "LSTM",
        })
    }
}

#[derive(Clone, Debug)]
pub enum RecurrentCell {
    Rnn(RNNCell),
    Gru(GRUCell),
    Lstm(LSTMCell),
}

#[derive(Clone, Debug)]
pub enum StepCache {
    Rnn(RNNCellCache),
    Gru(GRUCellCache),
    Lstm(LSTMCellCache),
}

#[derive(Clone, Debug)]
pub enum CellGradients {
    Rnn(RNNCellGradients),
    Gru(GRUCellGradients),
    Lstm(LSTMCellGradients),
}

impl CellGradients {
    pub fn accumulate(&mut self, other: &CellGradients) -> Result<()> {
        match (self, other) {
            (CellGradients::Rnn(a), CellGradients::Rnn(b)) => a.accumulate(b),
            (CellGradients::Gru(a), CellGradients::Gru(b)) => a.accumulate(b),
            (CellGradients::Lstm(a), CellGradients::Lstm(b)) => a.accumulate(b),
            _ => return Err(Error::StateMismatch("gradients of different cell kinds".into())),
        }
        Ok(())
    }

    pub fn arrays(&self) -> Vec<&Array2<f64>> {
        match self {
            CellGradients::Rnn(g) => g.arrays().into_iter().collect(),
            CellGradients::Gru(g) => g.arrays().into_iter().collect(),
            CellGradients::Lstm(g) => g.arrays().into_iter().collect(),
        }
    }

    pub fn arrays_mut(&mut self) -> Vec<&mut Array2<f64>> {
        match self {
            CellGradients::Rnn(g) => g.arrays_mut().into_iter().collect(),
            CellGradients::Gru(g) => g.arrays_mut().into_iter().collect(),
            CellGradients::Lstm(g) => g.arrays_mut().into_iter().collect(),
        }
    }
}

/// Output of one backward step: (gradients, dx, dh_prev, dc_prev).
pub type StepGradients = (CellGradients, Array2<f64>, Array2<f64>, Option<Array2<f64>>);

impl RecurrentCell {
    pub fn new<R: Rng>(kind: CellKind, input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        match kind {
            CellKind::Rnn => RecurrentCell::Rnn(RNNCell::new(input_size, hidden_size, rng)),
            CellKind::Gru => RecurrentCell::Gru(GRUCell::new(input_size, hidden_size, rng)),
            CellKind::Lstm => RecurrentCell::Lstm(LSTMCell::new(input_size, hidden_size, rng)),
        }
    }

    pub fn kind(&self) -> CellKind {
        match self {
            RecurrentCell::Rnn(_) => CellKind::Rnn,
            RecurrentCell::Gru(_) => CellKind::Gru,
            RecurrentCell::Lstm(_) => CellKind::Lstm,
        }
    }

    /// Advance one timestep. `cx` is required for LSTM and ignored otherwise.
    pub fn forward(
        &self,
        input: &Array2<f64>,
        hx: &Array2<f64>,
        cx: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Option<Array2<f64>>)> {
        Ok(match self {
            RecurrentCell::Rnn(cell) => (cell.forward(input, hx), None),
            RecurrentCell::Gru(cell) => (cell.forward(input, hx), None),
            RecurrentCell::Lstm(cell) => {
                let (hy, cy) = cell.forward(input, hx, require_cell(cx)?);
                (hy, Some(cy))
            }
        })
    }

    pub fn forward_with_cache(
        &self,
        input: &Array2<f64>,
        hx: &Array2<f64>,
        cx: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Option<Array2<f64>>, StepCache)> {
        Ok(match self {
            RecurrentCell::Rnn(cell) => {
                let (hy, cache) = cell.forward_with_cache(input, hx);
                (hy, None, StepCache::Rnn(cache))
            }
            RecurrentCell::Gru(cell) => {
                let (hy, cache) = cell.forward_with_cache(input, hx);
                (hy, None, StepCache::Gru(cache))
            }
            RecurrentCell::Lstm(cell) => {
                let (hy, cy, cache) = cell.forward_with_cache(input, hx, require_cell(cx)?);
                (hy, Some(cy), StepCache::Lstm(cache))
            }
        })
    }

    pub fn backward(
        &self,
        dhy: &Array2<f64>,
        dcy: Option<&Array2<f64>>,
        cache: &StepCache,
    ) -> Result<StepGradients> {
        match (self, cache) {
            (RecurrentCell::Rnn(cell), StepCache::Rnn(cache)) => {
                let (g, dx, dhx) = cell.backward(dhy, cache);
                Ok((CellGradients::Rnn(g), dx, dhx, None))
            }
            (RecurrentCell::Gru(cell), StepCache::Gru(cache)) => {
                let (g, dx, dhx) = cell.backward(dhy, cache);
                Ok((CellGradients::Gru(g), dx, dhx, None))
            }
            (RecurrentCell::Lstm(cell), StepCache::Lstm(cache)) => {
                let (g, dx, dhx, dcx) = cell.backward(dhy, require_cell(dcy)?, cache);
                Ok((CellGradients::Lstm(g), dx, dhx, Some(dcx)))
            }
            _ => Err(Error::StateMismatch(format!(
                "{} cell given a cache from another cell kind",
                self.kind()
            ))),
        }
    }

    pub fn zero_gradients(&self) -> CellGradients {
        match self {
            RecurrentCell::Rnn(cell) => CellGradients::Rnn(cell.zero_gradients()),
            RecurrentCell::Gru(cell) => CellGradients::Gru(cell.zero_gradients()),
            RecurrentCell::Lstm(cell) => CellGradients::Lstm(cell.zero_gradients()),
        }
    }

    pub fn update_parameters<O: Optimizer>(
        &mut self,
        gradients: &CellGradients,
        optimizer: &mut O,
        prefix: &str,
    ) -> Result<()> {
        match (self, gradients) {
            (RecurrentCell::Rnn(cell), CellGradients::Rnn(g)) => {
                cell.update_parameters(g, optimizer, prefix)
            }
            (RecurrentCell::Gru(cell), CellGradients::Gru(g)) => {
                cell.update_parameters(g, optimizer, prefix)
            }
            (RecurrentCell::Lstm(cell), CellGradients::Lstm(g)) => {
                cell.update_parameters(g, optimizer, prefix)
            }
            _ => return Err(Error::StateMismatch(format!("gradients do not match layer {prefix}"))),
        }
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            RecurrentCell::Rnn(cell) => cell.num_parameters(),
            RecurrentCell::Gru(cell) => cell.num_parameters(),
            RecurrentCell::Lstm(cell) => cell.num_parameters(),
        }
    }
}

fn require_cell(cx: Option<&Array2<f64>>) -> Result<&Array2<f64>> {
    cx.ok_or_else(|| Error::StateMismatch("LSTM step requires a cell state".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_cell_kind_parsing() {
        assert_eq!("gru".parse::<CellKind>().unwrap(), CellKind::Gru);
        assert_eq!("LSTM".parse::<CellKind>().unwrap(), CellKind::Lstm);
        assert_eq!(" Rnn ".parse::<CellKind>().unwrap(), CellKind::Rnn);
        assert!(matches!("transformer".parse::<CellKind>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cell_kind_serde() {
        let kind: CellKind = serde_json::from_str("\"lstm\"").unwrap();
        assert_eq!(kind, CellKind::Lstm);
        assert_eq!(serde_json::to_string(&CellKind::Gru).unwrap(), "\"GRU\"");
        assert!(serde_json::from_str::<CellKind>("\"elman\"").is_err());
    }

    #[test]
    fn test_lstm_requires_cell_state() {
        let mut rng = StdRng::seed_from_u64(0);
        let cell = RecurrentCell::new(CellKind::Lstm, 2, 3, &mut rng);
        let x = Array2::zeros((2, 1));
        let h = Array2::zeros((3, 1));
        assert!(cell.forward(&x, &h, None).is_err());

        let c = Array2::zeros((3, 1));
        let (hy, cy) = cell.forward(&x, &h, Some(&c)).unwrap();
        assert_eq!(hy.shape(), &[3, 1]);
        assert!(cy.is_some());
    }

    #[test]
    fn test_mismatched_cache_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let gru = RecurrentCell::new(CellKind::Gru, 2, 2, &mut rng);
        let rnn = RecurrentCell::new(CellKind::Rnn, 2, 2, &mut rng);
        let x = Array2::ones((2, 1));
        let h = Array2::zeros((2, 1));
        let (_, _, cache) = rnn.forward_with_cache(&x, &h, None).unwrap();
        assert!(gru.backward(&Array2::ones((2, 1)), None, &cache).is_err());
    }
}
