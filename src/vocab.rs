//! Word-level vocabulary with reserved sentence markers.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

pub const PAD: &str = "<pad>";
pub const BOS: &str = "<s>";
pub const EOS: &str = "</s>";
pub const UNK: &str = "<unk>";

pub const PAD_INDEX: usize = 0;
pub const BOS_INDEX: usize = 1;
pub const EOS_INDEX: usize = 2;
pub const UNK_INDEX: usize = 3;

/// Maps tokens to indices and back.
///
/// The four reserved tokens always occupy indices 0..4 in the order
/// `<pad>`, `<s>`, `</s>`, `<unk>`. Lookups of unknown tokens resolve to
/// `<unk>` and never grow the mapping.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    token_to_idx: HashMap<String, usize>,
    idx_to_token: Vec<String>,
}

impl Vocabulary {
    /// Vocabulary holding only the reserved tokens.
    pub fn new() -> Self {
        let mut vocab = Self {
            token_to_idx: HashMap::new(),
            idx_to_token: Vec::new(),
        };
        for token in [PAD, BOS, EOS, UNK] {
            vocab.add_token(token);
        }
        vocab
    }

    /// Build a vocabulary from a corpus file, adding tokens in first-seen order.
    pub fn build_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let vocab = Self::build_from_reader(BufReader::new(file))
            .map_err(|e| Error::io(path, e))?;
        tracing::debug!(path = %path.display(), size = vocab.size(), "built vocabulary");
        Ok(vocab)
    }

    /// Build a vocabulary from any buffered reader, one sentence per line.
    pub fn build_from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut vocab = Self::new();
        for line in reader.lines() {
            let line = line?;
            for token in line.split_whitespace() {
                vocab.add_token(token);
            }
        }
        Ok(vocab)
    }

    /// Insert `token` if absent and return its index.
    pub fn add_token(&mut self, token: &str) -> usize {
        if let Some(&idx) = self.token_to_idx.get(token) {
            return idx;
        }
        let idx = self.idx_to_token.len();
        self.idx_to_token.push(token.to_string());
        self.token_to_idx.insert(token.to_string(), idx);
        idx
    }

    /// Index of `token`, or the `<unk>` index if it was never seen.
    pub fn index_of(&self, token: &str) -> usize {
        self.token_to_idx.get(token).copied().unwrap_or(UNK_INDEX)
    }

    pub fn indices_of<'a, I>(&self, tokens: I) -> Vec<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tokens.into_iter().map(|t| self.index_of(t)).collect()
    }

    pub fn token_at(&self, index: usize) -> Option<&str> {
        self.idx_to_token.get(index).map(String::as_str)
    }

    /// Decode indices into a whitespace-joined string.
    pub fn tokens_of(&self, indices: &[usize]) -> Result<String> {
        let tokens = indices
            .iter()
            .map(|&index| {
                self.token_at(index).ok_or(Error::IndexOutOfRange {
                    index,
                    size: self.size(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(tokens.join(" "))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token_to_idx.contains_key(token)
    }

    pub fn unk_index(&self) -> usize {
        UNK_INDEX
    }

    /// Number of distinct tokens, reserved entries included.
    pub fn size(&self) -> usize {
        self.idx_to_token.len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    /// Never true: the reserved tokens are always present.
    pub fn is_empty(&self) -> bool {
        self.idx_to_token.is_empty()
    }

    /// Tokens in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.idx_to_token.iter().map(String::as_str)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vocabulary with {} items", self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn vocab_from(text: &str) -> Vocabulary {
        Vocabulary::build_from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn test_reserved_tokens_come_first() {
        let vocab = Vocabulary::new();
        assert_eq!(vocab.size(), 4);
        let tokens: Vec<&str> = vocab.iter().collect();
        assert_eq!(tokens, vec![PAD, BOS, EOS, UNK]);
        assert_eq!(vocab.index_of(PAD), PAD_INDEX);
        assert_eq!(vocab.index_of(BOS), BOS_INDEX);
        assert_eq!(vocab.index_of(EOS), EOS_INDEX);
        assert_eq!(vocab.index_of(UNK), UNK_INDEX);
    }

    #[test]
    fn test_first_seen_order_and_duplicates() {
        let vocab = vocab_from("the cat sat\n  on the   mat\n");
        assert_eq!(vocab.size(), 4 + 5);
        assert_eq!(vocab.index_of("the"), 4);
        assert_eq!(vocab.index_of("cat"), 5);
        assert_eq!(vocab.index_of("sat"), 6);
        assert_eq!(vocab.index_of("on"), 7);
        assert_eq!(vocab.index_of("mat"), 8);
    }

    #[test]
    fn test_unknown_maps_to_unk_without_growing() {
        let vocab = vocab_from("a b c");
        let size = vocab.size();
        assert_eq!(vocab.index_of("zebra"), vocab.unk_index());
        assert_eq!(vocab.size(), size);
        assert!(!vocab.contains("zebra"));
    }

    #[test]
    fn test_tokens_of_round_trip() {
        let vocab = vocab_from("hello world\nhello there");
        for token in ["hello", "world", "there"] {
            assert_eq!(vocab.tokens_of(&[vocab.index_of(token)]).unwrap(), token);
        }
        let idxs = vocab.indices_of("world hello there".split_whitespace());
        assert_eq!(vocab.tokens_of(&idxs).unwrap(), "world hello there");
    }

    #[test]
    fn test_tokens_of_out_of_range() {
        let vocab = vocab_from("one two");
        let err = vocab.tokens_of(&[4, 6]).unwrap_err();
        match err {
            Error::IndexOutOfRange { index, size } => {
                assert_eq!(index, 6);
                assert_eq!(size, 6);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_input() {
        let vocab = vocab_from("");
        assert_eq!(vocab.size(), 4);
        assert_eq!(vocab.to_string(), "Vocabulary with 4 items");
    }
}
