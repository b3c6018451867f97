use std::fs;

use rnnlm::corpus::{self, DataSplits, Side};
use rnnlm::vocab::{BOS_INDEX, EOS_INDEX, UNK_INDEX};
use rnnlm::{BatchSegmenter, Error, Vocabulary};
use tempfile::tempdir;

fn write_splits(root: &std::path::Path, lang: &str) -> DataSplits {
    let dir = root.join(format!("en-{lang}"));
    fs::create_dir_all(&dir).unwrap();
    for split in ["train", "dev", "test"] {
        let src = "the cat sat\n\nthe dog ran\n";
        fs::write(dir.join(format!("{split}.en{lang}.src")), src).unwrap();
        fs::write(dir.join(format!("{split}.en{lang}.mt")), "le chat\nle chien\n").unwrap();
        fs::write(dir.join(format!("{split}.en{lang}.scores")), "1\n0\n").unwrap();
    }
    DataSplits::for_language(root, lang)
}

#[test]
fn test_vocabulary_from_file() {
    let dir = tempdir().unwrap();
    let splits = write_splits(dir.path(), "de");

    let vocab = Vocabulary::build_from_file(splits.train(Side::Source)).unwrap();
    assert_eq!(vocab.size(), 4 + 5);
    assert_eq!(vocab.iter().take(4).collect::<Vec<_>>(), vec!["<pad>", "<s>", "</s>", "<unk>"]);
    assert_eq!(vocab.index_of("the"), 4);
    assert_eq!(vocab.index_of("bird"), UNK_INDEX);
    assert!(!vocab.contains("bird"));
}

#[test]
fn test_empty_file_gives_reserved_vocabulary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.txt");
    fs::write(&path, "").unwrap();

    let vocab = Vocabulary::build_from_file(&path).unwrap();
    assert_eq!(vocab.size(), 4);
    assert!(corpus::encode_file(&vocab, &path).unwrap().is_empty());
}

#[test]
fn test_encoding_round_trip_modulo_markers() {
    let dir = tempdir().unwrap();
    let splits = write_splits(dir.path(), "de");
    let vocab = Vocabulary::build_from_file(splits.train(Side::Source)).unwrap();

    let ids = corpus::encode_file(&vocab, splits.test(Side::Source)).unwrap();
    assert_eq!(ids.len(), 10);
    assert_eq!(ids[0], BOS_INDEX);
    assert_eq!(ids[4], EOS_INDEX);

    let text = vocab
        .tokens_of(&ids)
        .unwrap()
        .replace(" </s> <s> ", "\n")
        .replace("<s> ", "")
        .replace(" </s>", "");
    assert_eq!(text, "the cat sat\nthe dog ran");
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.src");

    match Vocabulary::build_from_file(&missing) {
        Err(Error::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected an I/O error, got {other:?}"),
    }
    let vocab = Vocabulary::new();
    assert!(matches!(corpus::encode_file(&vocab, &missing), Err(Error::Io { .. })));
}

#[test]
fn test_scores_from_files() {
    let dir = tempdir().unwrap();
    let splits = write_splits(dir.path(), "de");
    for path in splits.scores() {
        assert_eq!(corpus::read_scores(&path).unwrap(), vec![1, 0]);
    }

    let bad = dir.path().join("bad.scores");
    fs::write(&bad, "4\n\nnan\n").unwrap();
    match corpus::read_scores(&bad) {
        Err(Error::ScoreParse { line, value }) => {
            assert_eq!(line, 3);
            assert_eq!(value, "nan");
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn test_segmented_streams_rebuild_corpus() {
    let dir = tempdir().unwrap();
    let splits = write_splits(dir.path(), "de");
    let vocab = Vocabulary::build_from_file(splits.train(Side::Source)).unwrap();
    let ids = corpus::encode_file(&vocab, splits.train(Side::Source)).unwrap();

    let segmenter = BatchSegmenter::new(&ids, 3, 2).unwrap();
    let rebuilt: Vec<usize> = (0..segmenter.streams()).flat_map(|i| segmenter.stream(i)).collect();
    assert_eq!(rebuilt, &ids[..9]);

    let targets: usize = segmenter.iter().map(|b| b.num_positions()).sum();
    assert_eq!(targets, segmenter.num_tokens());
    assert_eq!(targets, (3 - 1) * 3);
}
