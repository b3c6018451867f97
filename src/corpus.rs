//! Corpus encoding and companion score files.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::vocab::{Vocabulary, BOS_INDEX, EOS_INDEX};

/// Encode a corpus file into one flat index sequence.
///
/// Each non-blank line becomes `<s> tokens.. </s>`; blank lines emit
/// nothing. The file is streamed line by line.
pub fn encode_file(vocab: &Vocabulary, path: impl AsRef<Path>) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let idxs = encode_reader(vocab, BufReader::new(file)).map_err(|e| Error::io(path, e))?;
    tracing::debug!(path = %path.display(), tokens = idxs.len(), "encoded corpus");
    Ok(idxs)
}

pub fn encode_reader<R: BufRead>(vocab: &Vocabulary, reader: R) -> std::io::Result<Vec<usize>> {
    let mut idxs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        idxs.push(BOS_INDEX);
        idxs.extend(line.split_whitespace().map(|token| vocab.index_of(token)));
        idxs.push(EOS_INDEX);
    }
    Ok(idxs)
}

/// Read one integer per non-blank line.
pub fn read_scores(path: impl AsRef<Path>) -> Result<Vec<i64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    read_scores_from(BufReader::new(file)).map_err(|e| match e {
        ScoreReadError::Io(source) => Error::io(path, source),
        ScoreReadError::Parse { line, value } => Error::ScoreParse { line, value },
    })
}

/// Failure while reading scores from an anonymous reader.
#[derive(Debug, thiserror::Error)]
pub enum ScoreReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid score on line {line}: {value:?}")]
    Parse { line: usize, value: String },
}

pub fn read_scores_from<R: BufRead>(reader: R) -> std::result::Result<Vec<i64>, ScoreReadError> {
    let mut scores = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let value = line.trim();
        if value.is_empty() {
            continue;
        }
        let score = value.parse::<i64>().map_err(|_| ScoreReadError::Parse {
            line: i + 1,
            value: value.to_string(),
        })?;
        scores.push(score);
    }
    Ok(scores)
}

/// Which column of a parallel corpus a file holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Source,
    MachineTranslation,
}

impl Side {
    fn extension(self) -> &'static str {
        match self {
            Side::Source => "src",
            Side::MachineTranslation => "mt",
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "src" => Ok(Side::Source),
            "mt" => Ok(Side::MachineTranslation),
            other => Err(Error::Config(format!(
                "unknown corpus side {other:?}, expected src or mt"
            ))),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// File locations for one language pair, laid out as
/// `{root}/en-{lang}/{split}.en{lang}.{ext}`.
#[derive(Clone, Debug)]
pub struct DataSplits {
    root: PathBuf,
    language: String,
}

impl DataSplits {
    pub fn for_language(root: impl Into<PathBuf>, language: &str) -> Self {
        Self {
            root: root.into(),
            language: language.to_string(),
        }
    }

    fn file(&self, split: &str, ext: &str) -> PathBuf {
        let lang = &self.language;
        self.root
            .join(format!("en-{lang}"))
            .join(format!("{split}.en{lang}.{ext}"))
    }

    pub fn train(&self, side: Side) -> PathBuf {
        self.file("train", side.extension())
    }

    pub fn valid(&self, side: Side) -> PathBuf {
        self.file("dev", side.extension())
    }

    pub fn test(&self, side: Side) -> PathBuf {
        self.file("test", side.extension())
    }

    /// Score files for the train, dev and test splits.
    pub fn scores(&self) -> [PathBuf; 3] {
        [
            self.file("train", "scores"),
            self.file("dev", "scores"),
            self.file("test", "scores"),
        ]
    }
}
