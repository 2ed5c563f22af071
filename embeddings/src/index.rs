//! Sorted string index for fast word lookups.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::codec;
use crate::error::{EmbeddingError, Result};
use crate::ids::WordId;

/// An immutable, sorted, deduplicated table of words.
///
/// The index is built in two phases. Words are first collected with
/// [`add`](Self::add) in any order, then [`finalize`](Self::finalize) sorts
/// them byte-lexicographically and assigns dense 1-based ids in that order.
/// Only finalized words are visible to lookups.
///
/// Finalized words live in one buffer, each terminated by a NUL byte, with a
/// table of start offsets. Slot 0 of the offset table is a sentinel.
#[derive(Debug, Clone)]
pub struct StringIndex {
    /// Words added since the last finalize.
    pending: BTreeSet<Vec<u8>>,

    /// NUL-terminated words in id order.
    buffer: Vec<u8>,

    /// Start of each word in `buffer`, indexed by id.
    offsets: Vec<u32>,
}

/// An inclusive, non-empty range of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub first: WordId,
    pub last: WordId,
}

impl IdRange {
    /// Number of ids in the range.
    pub fn len(&self) -> usize {
        self.last.index() - self.first.index() + 1
    }

    pub fn contains(&self, id: WordId) -> bool {
        self.first <= id && id <= self.last
    }

    /// Iterate over the ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = WordId> + use<> {
        (self.first.index()..=self.last.index()).filter_map(WordId::from_index)
    }
}

impl Default for StringIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl StringIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            pending: BTreeSet::new(),
            buffer: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Build a finalized index from a collection of words.
    pub fn from_words<I, W>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u8]>,
    {
        let mut index = Self::new();
        for word in words {
            index.add(word);
        }
        index.finalize()?;
        Ok(index)
    }

    /// Collect a word. It gets an id on the next [`finalize`](Self::finalize).
    pub fn add(&mut self, word: impl AsRef<[u8]>) {
        let word = word.as_ref();
        if !self.pending.contains(word) {
            self.pending.insert(word.to_vec());
        }
    }

    /// Sort every collected word together with the already finalized ones
    /// and reassign ids.
    pub fn finalize(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut words = std::mem::take(&mut self.pending);
        words.extend(self.iter().map(|(_, word)| word.to_vec()));

        let total: usize = words.iter().map(|w| w.len() + 1).sum();
        if u32::try_from(total).is_err() {
            return Err(EmbeddingError::AllocationFailed {
                rows: words.len(),
                columns: total,
            });
        }

        let mut buffer = Vec::with_capacity(total);
        let mut offsets = Vec::with_capacity(words.len() + 1);
        offsets.push(0);
        for word in &words {
            offsets.push(buffer.len() as u32);
            buffer.extend_from_slice(word);
            buffer.push(0);
        }

        self.buffer = buffer;
        self.offsets = offsets;
        debug!("Finalized string index with {} words", self.len());
        Ok(())
    }

    /// Drop every word, finalized or pending.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.buffer.clear();
        self.offsets.clear();
        self.offsets.push(0);
    }

    /// Number of finalized words.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn word_at(&self, offset: u32) -> &[u8] {
        let tail = self.buffer.get(offset as usize..).unwrap_or_default();
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        &tail[..end]
    }

    /// Exact-match lookup.
    pub fn get_id(&self, word: impl AsRef<[u8]>) -> Option<WordId> {
        let word = word.as_ref();
        self.offsets[1..]
            .binary_search_by(|&offset| self.word_at(offset).cmp(word))
            .ok()
            .and_then(|pos| WordId::from_index(pos + 1))
    }

    pub fn contains(&self, word: impl AsRef<[u8]>) -> bool {
        self.get_id(word).is_some()
    }

    /// The word with the given id, or `None` if the id is past the end.
    pub fn word(&self, id: WordId) -> Option<&[u8]> {
        self.offsets.get(id.index()).map(|&offset| self.word_at(offset))
    }

    /// All ids whose word starts with `prefix`.
    ///
    /// A binary search finds one matching word, then the range is widened
    /// by scanning outward from it.
    pub fn get_range(&self, prefix: impl AsRef<[u8]>) -> Option<IdRange> {
        let prefix = prefix.as_ref();
        let ids = &self.offsets[1..];
        let anchor = ids
            .binary_search_by(|&offset| {
                let word = self.word_at(offset);
                if word.starts_with(prefix) {
                    Ordering::Equal
                } else {
                    word.cmp(prefix)
                }
            })
            .ok()?;

        let matches = |pos: usize| self.word_at(ids[pos]).starts_with(prefix);
        let mut first = anchor;
        while first > 0 && matches(first - 1) {
            first -= 1;
        }
        let mut last = anchor;
        while last + 1 < ids.len() && matches(last + 1) {
            last += 1;
        }

        Some(IdRange {
            first: WordId::from_index(first + 1)?,
            last: WordId::from_index(last + 1)?,
        })
    }

    /// Iterate over finalized `(id, word)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (WordId, &[u8])> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(id, &offset)| Some((WordId::from_index(id)?, self.word_at(offset))))
    }

    /// Write the binary snapshot: the word buffer, then the offset table,
    /// each preceded by its `u64` length.
    pub fn write_binary<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_len(writer, self.buffer.len())?;
        writer.write_all(&self.buffer)?;
        codec::write_len(writer, self.offsets.len())?;
        codec::write_u32s(writer, &self.offsets)
    }

    /// Read a binary snapshot written by [`write_binary`](Self::write_binary).
    pub fn read_binary<R: Read>(reader: &mut R) -> Result<Self> {
        let len = codec::read_len(reader, "word buffer")?;
        let buffer = codec::read_bytes(reader, len, "word buffer")?;
        let count = codec::read_len(reader, "offset table")?;
        let offsets = codec::read_u32s(reader, count, "offset table")?;

        let index = Self {
            pending: BTreeSet::new(),
            buffer,
            offsets,
        };
        index.validate()?;
        Ok(index)
    }

    fn validate(&self) -> Result<()> {
        if self.offsets.is_empty() {
            return Err(EmbeddingError::MalformedFile(
                "offset table lacks the sentinel slot".to_string(),
            ));
        }

        let mut previous: Option<&[u8]> = None;
        for id in 1..self.offsets.len() {
            let start = self.offsets[id] as usize;
            let end = self
                .offsets
                .get(id + 1)
                .map_or(self.buffer.len(), |&next| next as usize);
            if start >= end || end > self.buffer.len() {
                return Err(EmbeddingError::MalformedFile(format!(
                    "word {id} has invalid bounds {start}..{end}"
                )));
            }
            let word = &self.buffer[start..end - 1];
            if self.buffer[end - 1] != 0 || word.contains(&0) {
                return Err(EmbeddingError::MalformedFile(format!(
                    "word {id} is not NUL-terminated"
                )));
            }
            if previous.is_some_and(|prev| prev >= word) {
                return Err(EmbeddingError::MalformedFile(format!(
                    "word {id} is out of order"
                )));
            }
            previous = Some(word);
        }
        Ok(())
    }

    /// Save the binary snapshot to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_binary(&mut writer)?;
        writer.flush()?;
        info!("Saved {} words to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a binary snapshot from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EmbeddingError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::read_binary(&mut BufReader::new(file))?;
        info!("Loaded {} words from {}", index.len(), path.display());
        Ok(index)
    }

    /// Write one word per line, in id order.
    pub fn write_text<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (_, word) in self.iter() {
            writer.write_all(word)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Read one word per line and finalize.
    pub fn read_text<R: BufRead>(reader: R) -> Result<Self> {
        let mut index = Self::new();
        for line in reader.split(b'\n') {
            let line = line?;
            let word = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if !word.is_empty() {
                index.add(word);
            }
        }
        index.finalize()?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn index(words: &[&str]) -> StringIndex {
        StringIndex::from_words(words).unwrap()
    }

    fn id(raw: u32) -> WordId {
        WordId::new(raw).unwrap()
    }

    #[test]
    fn test_ids_follow_sorted_order() {
        let index = index(&["queen", "king", "man", "king", "woman"]);

        assert_eq!(index.len(), 4);
        let words: Vec<&[u8]> = index.iter().map(|(_, w)| w).collect();
        assert_eq!(
            words,
            vec![&b"king"[..], &b"man"[..], &b"queen"[..], &b"woman"[..]]
        );
        for (id, word) in index.iter() {
            assert_eq!(index.get_id(word), Some(id));
        }
    }

    #[test]
    fn test_absent_word() {
        let index = index(&["alpha", "beta", "gamma"]);
        assert_eq!(index.get_id("delta"), None);
        assert_eq!(index.get_id(""), None);
        assert_eq!(index.get_id("alph"), None);
        assert_eq!(index.get_id("alphabet"), None);
        assert!(!index.contains("zeta"));
        assert!(index.contains("gamma"));
    }

    #[test]
    fn test_empty_and_unfinalized_lookups() {
        let mut index = StringIndex::new();
        assert_eq!(index.get_id("anything"), None);
        assert_eq!(index.get_range("a"), None);

        index.add("word");
        assert_eq!(index.get_id("word"), None);
        index.finalize().unwrap();
        assert_eq!(index.get_id("word"), Some(id(1)));
    }

    #[test]
    fn test_word_out_of_range() {
        let index = index(&["one", "two"]);
        assert_eq!(index.word(id(2)), Some(&b"two"[..]));
        assert_eq!(index.word(id(3)), None);
    }

    #[test]
    fn test_refinalize_merges_words() {
        let mut index = index(&["b", "d"]);
        index.add("c");
        index.add("a");
        index.finalize().unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.get_id("a"), Some(id(1)));
        assert_eq!(index.get_id("d"), Some(id(4)));
    }

    #[test]
    fn test_prefix_range() {
        let index = index(&["queen", "question", "king"]);

        let range = index.get_range("qu").unwrap();
        let words: Vec<&[u8]> = range.ids().filter_map(|id| index.word(id)).collect();
        assert_eq!(words, vec![&b"queen"[..], &b"question"[..]]);
        assert_eq!(range.len(), 2);
        assert!(!range.contains(index.get_id("king").unwrap()));
    }

    #[test]
    fn test_prefix_range_edges() {
        let index = index(&["aa", "ab", "abc", "abd", "b", "ba", "c"]);

        assert_eq!(index.get_range("ab"), Some(IdRange { first: id(2), last: id(4) }));
        assert_eq!(index.get_range("a"), Some(IdRange { first: id(1), last: id(4) }));
        assert_eq!(index.get_range("c"), Some(IdRange { first: id(7), last: id(7) }));
        assert_eq!(index.get_range("abc"), Some(IdRange { first: id(3), last: id(3) }));
        assert_eq!(index.get_range("abcd"), None);
        assert_eq!(index.get_range("bb"), None);
        assert_eq!(index.get_range("0"), None);
        assert_eq!(index.get_range("z"), None);
        assert_eq!(index.get_range(""), Some(IdRange { first: id(1), last: id(7) }));
    }

    #[test]
    fn test_binary_layout() {
        let index = index(&["b", "a"]);
        let mut buf = Vec::new();
        index.write_binary(&mut buf).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&4u64.to_ne_bytes());
        expected.extend_from_slice(b"a\0b\0");
        expected.extend_from_slice(&3u64.to_ne_bytes());
        for offset in [0u32, 0, 2] {
            expected.extend_from_slice(&offset.to_ne_bytes());
        }
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_binary_round_trip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vocab.bin");
        let original = index(&["woman", "king", "queen", "man"]);
        original.save(&path).unwrap();

        let loaded = StringIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), original.len());
        for (id, word) in original.iter() {
            assert_eq!(loaded.word(id), Some(word));
            assert_eq!(loaded.get_id(word), Some(id));
        }
        assert_eq!(loaded.get_range("m"), original.get_range("m"));
    }

    #[test]
    fn test_empty_index_round_trip() {
        let mut buf = Vec::new();
        StringIndex::new().write_binary(&mut buf).unwrap();
        let loaded = StringIndex::read_binary(&mut &buf[..]).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_rejects_unsorted_snapshot() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u64.to_ne_bytes());
        buf.extend_from_slice(b"b\0a\0");
        buf.extend_from_slice(&3u64.to_ne_bytes());
        for offset in [0u32, 0, 2] {
            buf.extend_from_slice(&offset.to_ne_bytes());
        }
        let err = StringIndex::read_binary(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, EmbeddingError::MalformedFile(_)));
    }

    #[test]
    fn test_rejects_truncated_snapshot() {
        let mut buf = Vec::new();
        index(&["a", "b"]).write_binary(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        let err = StringIndex::read_binary(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, EmbeddingError::MalformedFile(_)));
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = StringIndex::load(temp_dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, EmbeddingError::FileNotFound { .. }));
    }

    #[test]
    fn test_text_round_trip() {
        let original = index(&["zeta", "alpha", "mu"]);
        let mut text = Vec::new();
        original.write_text(&mut text).unwrap();
        assert_eq!(text, b"alpha\nmu\nzeta\n".to_vec());

        let loaded = StringIndex::read_text(&text[..]).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get_id("mu"), original.get_id("mu"));
    }
}
