//! Persistent cache of each word's nearest neighbors.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{EmbeddingError, Result};
use crate::ids::{CacheWordId, WordId};
use crate::index::StringIndex;
use crate::matrix::NeighborMatrix;
use crate::model::VectorModel;
use crate::similarity::Neighbor;

/// Neighbors kept per word unless configured otherwise.
pub const DEFAULT_NEIGHBORS: usize = 40;

/// The raw model, opened on first use.
#[derive(Debug, Default)]
struct LazyModel {
    path: Option<PathBuf>,
    model: Option<VectorModel>,
}

impl LazyModel {
    fn get(&mut self) -> Result<&VectorModel> {
        if self.model.is_none() {
            let path = self.path.as_ref().ok_or(EmbeddingError::ModelNotConfigured)?;
            self.model = Some(VectorModel::load(path)?);
        }
        self.model.as_ref().ok_or(EmbeddingError::ModelNotConfigured)
    }
}

/// Nearest-neighbor lists for every word, filled on demand.
///
/// Each word of the cache's own [`StringIndex`] owns one row of the neighbor
/// matrix. A lookup on a filled row is answered from the matrix alone; an
/// unfilled row is computed with the raw [`VectorModel`] and stored, so the
/// next lookup (in this run or after a save and load) is a hit.
///
/// The cache numbers its words independently of the model's rows; the two
/// only meet through word lookups when a row is computed.
#[derive(Debug)]
pub struct NeighborCache {
    index: StringIndex,
    matrix: NeighborMatrix,
    model: LazyModel,

    /// Whether rows were filled since the last load or save.
    dirty: bool,
}

impl NeighborCache {
    /// Open the cache at `cache_path`, rebuilding it from the raw model at
    /// `model_path` when there is no usable snapshot.
    pub fn open(model_path: impl AsRef<Path>, cache_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_width(model_path, cache_path, DEFAULT_NEIGHBORS)
    }

    /// Like [`open`](Self::open), with `width` neighbors per word for a
    /// rebuilt cache. A loaded snapshot keeps its own width.
    pub fn open_with_width(
        model_path: impl AsRef<Path>,
        cache_path: impl AsRef<Path>,
        width: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let cache_path = cache_path.as_ref();
        match Self::load(cache_path) {
            Ok(mut cache) => {
                cache.model.path = Some(model_path.to_path_buf());
                Ok(cache)
            }
            Err(e) => {
                warn!(
                    "No usable cache at {} ({e}), rebuilding from {}",
                    cache_path.display(),
                    model_path.display()
                );
                let model = VectorModel::load(model_path)?;
                let mut cache = Self::from_model_with_width(model, width)?;
                cache.model.path = Some(model_path.to_path_buf());
                Ok(cache)
            }
        }
    }

    /// An empty cache over every word of `model`.
    pub fn from_model(model: VectorModel) -> Result<Self> {
        Self::from_model_with_width(model, DEFAULT_NEIGHBORS)
    }

    pub fn from_model_with_width(model: VectorModel, width: usize) -> Result<Self> {
        let index = StringIndex::from_words(model.words())?;
        let matrix = NeighborMatrix::new(index.len(), width)?;
        info!(
            "Created empty neighbor cache for {} words, {width} neighbors each",
            index.len()
        );
        Ok(Self {
            index,
            matrix,
            model: LazyModel {
                path: None,
                model: Some(model),
            },
            dirty: false,
        })
    }

    /// Load a binary snapshot. The raw model is not needed to serve rows
    /// that are already filled.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading neighbor cache: {}", path.display());
        let file = File::open(path).map_err(|source| EmbeddingError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let cache = Self::read_binary(&mut BufReader::new(file))?;
        info!(
            "Loaded neighbor cache with {} words ({} filled)",
            cache.len(),
            cache.filled_rows()
        );
        Ok(cache)
    }

    /// Save a binary snapshot and clear the dirty flag.
    ///
    /// The snapshot is written beside `path` and renamed over it, so a
    /// failed save leaves the previous snapshot in place.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Saving neighbor cache: {}", path.display());
        let temp_path = temp_path(path);
        let result = self
            .write_snapshot(&temp_path)
            .and_then(|()| fs::rename(&temp_path, path).map_err(EmbeddingError::from));
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        self.dirty = false;
        Ok(())
    }

    fn write_snapshot(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_binary(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read the snapshot layout: the index, the width and word count, then
    /// the id and score tables.
    pub fn read_binary<R: Read>(reader: &mut R) -> Result<Self> {
        let index = StringIndex::read_binary(reader)?;
        let width = codec::read_len(reader, "neighbor count")?;
        if width == 0 {
            return Err(EmbeddingError::MalformedFile(
                "cache rows have no neighbor slots".to_string(),
            ));
        }
        let words = codec::read_len(reader, "word count")?;
        if words != index.len() {
            return Err(EmbeddingError::MalformedFile(format!(
                "cache lists {words} words but its index holds {}",
                index.len()
            )));
        }
        let matrix = NeighborMatrix::read_binary(reader, words, width)?;
        Ok(Self {
            index,
            matrix,
            model: LazyModel::default(),
            dirty: false,
        })
    }

    pub fn write_binary<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.index.write_binary(writer)?;
        codec::write_len(writer, self.matrix.width())?;
        codec::write_len(writer, self.matrix.words())?;
        self.matrix.write_binary(writer)
    }

    /// Point a loaded cache at the raw model used to fill its rows.
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model.path = Some(path.into());
        self
    }

    /// Neighbors of `word`, computing and caching them on a miss.
    pub fn find_neighbors(&mut self, word: &str) -> Result<Vec<Neighbor>> {
        let id = self.cache_id(word)?;
        if let Some(neighbors) = self.decode_row(id)? {
            return Ok(neighbors);
        }

        debug!("Neighbor cache miss: {word}");
        let width = self.matrix.width();
        let model = self.model.get()?;
        let rows = model.query_rows(&[word], width)?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut neighbors = Vec::with_capacity(rows.len());
        for (row, score) in rows {
            let name = model
                .word(row)
                .ok_or_else(|| EmbeddingError::MalformedFile(format!("model row {} missing", row.get())))?;
            let neighbor = self
                .index
                .get_id(name)
                .map(CacheWordId::new)
                .ok_or_else(|| EmbeddingError::VocabularyMismatch(lossy(name)))?;
            entries.push((neighbor, f64::from(score)));
            neighbors.push(Neighbor::new(lossy(name), f64::from(score)));
        }

        self.matrix.fill(id, &entries)?;
        if !entries.is_empty() {
            self.dirty = true;
        }
        Ok(neighbors)
    }

    /// Neighbors of `word` if its row is already filled, without touching
    /// the raw model.
    pub fn cached(&self, word: &str) -> Result<Option<Vec<Neighbor>>> {
        let id = self.cache_id(word)?;
        self.decode_row(id)
    }

    /// Cosine similarity of two words according to the raw model.
    pub fn distance(&mut self, word1: &str, word2: &str) -> Result<f32> {
        Ok(self.model.get()?.distance(word1, word2))
    }

    fn cache_id(&self, word: &str) -> Result<CacheWordId> {
        self.index
            .get_id(word)
            .map(CacheWordId::new)
            .ok_or_else(|| EmbeddingError::UnknownWord(word.to_string()))
    }

    fn decode_row(&self, id: CacheWordId) -> Result<Option<Vec<Neighbor>>> {
        let row = self
            .matrix
            .row(id)
            .ok_or_else(|| EmbeddingError::MalformedFile(format!("no cache row for id {id}")))?;
        if !row.is_filled() {
            return Ok(None);
        }
        row.entries()
            .map(|(neighbor, score)| {
                let word = self.index.word(neighbor.word_id()).ok_or_else(|| {
                    EmbeddingError::MalformedFile(format!("unknown neighbor id {neighbor}"))
                })?;
                Ok(Neighbor::new(lossy(word), score))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Whether rows were filled since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record that the current rows were persisted elsewhere.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Number of words the cache has rows for.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Neighbors kept per word.
    pub fn width(&self) -> usize {
        self.matrix.width()
    }

    pub fn filled_rows(&self) -> usize {
        self.matrix.filled_rows()
    }

    pub fn index(&self) -> &StringIndex {
        &self.index
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.model.is_some()
    }

    /// Write the human-readable dump: the width, the word count, one word
    /// per line, then one line per word id with tab-separated
    /// `neighbor id, score` pairs (`0` marks an empty slot).
    pub fn write_text<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "{}", self.matrix.width())?;
        writeln!(writer, "{}", self.len())?;
        self.index.write_text(writer)?;
        for (id, _) in self.index.iter() {
            let id = CacheWordId::new(id);
            write!(writer, "{id}\t")?;
            if let Some(row) = self.matrix.row(id) {
                for (neighbor, score) in row.ids.iter().zip(row.scores) {
                    write!(writer, "{}\t{score}\t", CacheWordId::encode(*neighbor))?;
                }
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Read a dump written by [`write_text`](Self::write_text).
    pub fn read_text<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        let mut tokens = content
            .split(u8::is_ascii_whitespace)
            .filter(|token| !token.is_empty());

        let width: usize = parse_token(&mut tokens, "neighbor count")?;
        let words: usize = parse_token(&mut tokens, "word count")?;
        let mut listed = Vec::with_capacity(words);
        for _ in 0..words {
            let word = tokens
                .next()
                .ok_or_else(|| EmbeddingError::MalformedFile("truncated word list".to_string()))?;
            listed.push(word);
        }

        let index = StringIndex::from_words(&listed)?;
        let mut matrix = NeighborMatrix::new(index.len(), width)?;
        let resolve = |position: usize| -> Result<Option<CacheWordId>> {
            if position == 0 {
                return Ok(None);
            }
            let word = listed.get(position - 1).ok_or_else(|| {
                EmbeddingError::MalformedFile(format!("word id {position} out of range"))
            })?;
            Ok(index.get_id(word).map(CacheWordId::new))
        };

        for _ in 0..words {
            let position: usize = parse_token(&mut tokens, "word id")?;
            let row = resolve(position)?
                .ok_or_else(|| EmbeddingError::MalformedFile(format!("bad row id {position}")))?;
            let mut entries = Vec::with_capacity(width);
            let mut open = true;
            for _ in 0..width {
                let neighbor = resolve(parse_token(&mut tokens, "neighbor id")?)?;
                let score: f64 = parse_token(&mut tokens, "score")?;
                match neighbor {
                    Some(neighbor) if open => entries.push((neighbor, score)),
                    _ => open = false,
                }
            }
            matrix.fill(row, &entries)?;
        }

        Ok(Self {
            index,
            matrix,
            model: LazyModel::default(),
            dirty: false,
        })
    }

    /// Write the text dump to a file.
    pub fn save_text(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Writing neighbor cache dump: {}", path.display());
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_text(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a text dump from a file.
    pub fn load_text(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EmbeddingError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_text(BufReader::new(file))
    }

    /// Id of `word` in the cache's own numbering.
    pub fn word_id(&self, word: &str) -> Option<WordId> {
        self.index.get_id(word)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    PathBuf::from(temp)
}

fn lossy(word: &[u8]) -> String {
    String::from_utf8_lossy(word).into_owned()
}

fn parse_token<'a, T, I>(tokens: &mut I, what: &str) -> Result<T>
where
    T: FromStr,
    I: Iterator<Item = &'a [u8]>,
{
    tokens
        .next()
        .and_then(|token| std::str::from_utf8(token).ok())
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| EmbeddingError::MalformedFile(format!("expected {what}")))
}
