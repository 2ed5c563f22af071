//! Raw word-vector model with exact brute-force neighbor search.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use crate::codec;
use crate::error::{EmbeddingError, Result};
use crate::ids::ModelRowId;
use crate::index::StringIndex;
use crate::similarity::{Neighbor, TopN, dot, normalize};

/// A dense matrix of unit-length word vectors.
///
/// Rows are numbered from 0 in file order and never change after loading.
/// Lookups by word go through a [`StringIndex`] whose ids are linked back
/// to rows.
#[derive(Debug, Clone)]
pub struct VectorModel {
    /// Number of components per vector.
    dimension: usize,

    /// Row-major vectors, `dimension` floats per row.
    vectors: Vec<f32>,

    /// Word of each row.
    names: Vec<Box<[u8]>>,

    /// Sorted index over `names`.
    index: StringIndex,

    /// Row of each index id, at position `id - 1`.
    rows: Vec<ModelRowId>,
}

impl VectorModel {
    /// Load a raw model file.
    ///
    /// The file starts with a text header holding the word count and the
    /// dimension. Each word follows as its name, a space, and `dimension`
    /// native-endian `f32` values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading vector model: {}", path.display());
        let file = File::open(path).map_err(|source| EmbeddingError::ModelNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_reader(BufReader::new(file))?;
        info!(
            "Loaded {} words of dimension {} from {}",
            model.len(),
            model.dimension,
            path.display()
        );
        Ok(model)
    }

    /// Parse a raw model from any buffered reader.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self> {
        let words = read_header_number(&mut reader, "word count")?;
        let dimension = read_header_number(&mut reader, "dimension")?;

        let size = words
            .checked_mul(dimension)
            .ok_or(EmbeddingError::AllocationFailed {
                rows: words,
                columns: dimension,
            })?;
        let mut vectors = codec::try_filled(size, 0f32, dimension)?;
        let mut names = Vec::new();
        names
            .try_reserve_exact(words)
            .map_err(|_| EmbeddingError::AllocationFailed {
                rows: words,
                columns: dimension,
            })?;

        for row in vectors.chunks_exact_mut(dimension.max(1)).take(words) {
            names.push(read_name(&mut reader)?);
            codec::read_f32s_into(&mut reader, row, "vector")?;
            normalize(row);
        }
        // A zero dimension leaves no rows to iterate; the names still follow.
        while names.len() < words {
            names.push(read_name(&mut reader)?);
        }

        Self::build(dimension, vectors, names)
    }

    /// Build a model from in-memory rows, normalizing each one.
    pub fn from_rows<I, W>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (W, Vec<f32>)>,
        W: AsRef<[u8]>,
    {
        let mut dimension = None;
        let mut vectors = Vec::new();
        let mut names = Vec::new();
        for (word, mut vector) in rows {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            normalize(&mut vector);
            vectors.extend_from_slice(&vector);
            names.push(Box::from(word.as_ref()));
        }
        Self::build(dimension.unwrap_or_default(), vectors, names)
    }

    fn build(dimension: usize, vectors: Vec<f32>, names: Vec<Box<[u8]>>) -> Result<Self> {
        let index = StringIndex::from_words(&names)?;

        // With duplicate names the first row wins.
        let mut links: Vec<Option<ModelRowId>> = vec![None; index.len()];
        for (row, name) in names.iter().enumerate() {
            if let Some(id) = index.get_id(name) {
                let slot = &mut links[id.index() - 1];
                if slot.is_none() {
                    *slot = ModelRowId::new(row);
                }
            }
        }
        if index.len() < names.len() {
            debug!(
                "Vector model has {} duplicate words",
                names.len() - index.len()
            );
        }
        let rows = links
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EmbeddingError::MalformedFile("unlinked vocabulary word".to_string()))?;

        Ok(Self {
            dimension,
            vectors,
            names,
            index,
            rows,
        })
    }

    /// Write the model back out in the raw format.
    pub fn write_raw<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "{} {}", self.len(), self.dimension)?;
        for (row, name) in self.names.iter().enumerate() {
            writer.write_all(name)?;
            writer.write_u8(b' ')?;
            let start = row * self.dimension;
            for &x in &self.vectors[start..start + self.dimension] {
                writer.write_f32::<NativeEndian>(x)?;
            }
            writer.write_u8(b'\n')?;
        }
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Words in row order.
    pub fn words(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.names.iter().map(|name| &name[..])
    }

    pub fn index(&self) -> &StringIndex {
        &self.index
    }

    /// Row of a word.
    pub fn row_id(&self, word: impl AsRef<[u8]>) -> Option<ModelRowId> {
        self.index
            .get_id(word)
            .and_then(|id| self.rows.get(id.index() - 1).copied())
    }

    pub fn word(&self, row: ModelRowId) -> Option<&[u8]> {
        self.names.get(row.index()).map(|name| &name[..])
    }

    /// The unit vector of a row.
    pub fn vector(&self, row: ModelRowId) -> Option<&[f32]> {
        let start = row.index().checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Cosine similarity of two words, or `0.0` if either is unknown.
    pub fn distance(&self, word1: impl AsRef<[u8]>, word2: impl AsRef<[u8]>) -> f32 {
        let pair = self
            .row_id(word1)
            .and_then(|a| self.vector(a))
            .zip(self.row_id(word2).and_then(|b| self.vector(b)));
        match pair {
            Some((a, b)) => dot(a, b),
            None => 0.0,
        }
    }

    /// The `top_n` rows closest to the sum of the query tokens' vectors.
    ///
    /// Every token must be in the vocabulary. The query tokens themselves
    /// are never returned.
    pub fn query_rows<T: AsRef<[u8]>>(
        &self,
        tokens: &[T],
        top_n: usize,
    ) -> Result<Vec<(ModelRowId, f32)>> {
        if tokens.is_empty() {
            return Err(EmbeddingError::EmptyQuery);
        }

        let resolved: Vec<Option<ModelRowId>> = tokens.iter().map(|t| self.row_id(t)).collect();
        if tokens.len() > 1 && resolved.iter().all(Option::is_none) {
            return Err(EmbeddingError::AllTokensUnknown(join_tokens(tokens)));
        }
        if let Some(pos) = resolved.iter().position(Option::is_none) {
            return Err(EmbeddingError::UnknownWord(
                String::from_utf8_lossy(tokens[pos].as_ref()).into_owned(),
            ));
        }
        let query_rows: Vec<ModelRowId> = resolved.into_iter().flatten().collect();

        let mut query = vec![0f32; self.dimension];
        for &row in &query_rows {
            if let Some(vector) = self.vector(row) {
                for (q, x) in query.iter_mut().zip(vector) {
                    *q += x;
                }
            }
        }
        normalize(&mut query);

        let mut top = TopN::new(top_n);
        for (row, vector) in self.vectors.chunks_exact(self.dimension.max(1)).enumerate() {
            let Some(row) = ModelRowId::new(row) else {
                break;
            };
            if query_rows.contains(&row) {
                continue;
            }
            top.push(row, dot(&query, vector));
        }
        Ok(top.into_sorted_vec())
    }

    /// Like [`query_rows`](Self::query_rows), with the rows resolved to words.
    pub fn query<T: AsRef<[u8]>>(&self, tokens: &[T], top_n: usize) -> Result<Vec<Neighbor>> {
        let rows = self.query_rows(tokens, top_n)?;
        Ok(rows
            .into_iter()
            .filter_map(|(row, score)| {
                let word = self.word(row)?;
                Some(Neighbor::new(
                    String::from_utf8_lossy(word).into_owned(),
                    f64::from(score),
                ))
            })
            .collect())
    }

    /// Query with a whitespace-separated phrase such as `"king queen"`.
    pub fn query_phrase(&self, phrase: &str, top_n: usize) -> Result<Vec<Neighbor>> {
        let tokens: Vec<&str> = phrase.split_ascii_whitespace().collect();
        self.query(&tokens, top_n)
    }
}

fn join_tokens<T: AsRef<[u8]>>(tokens: &[T]) -> String {
    tokens
        .iter()
        .map(|t| String::from_utf8_lossy(t.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn read_header_number<R: BufRead>(reader: &mut R, what: &str) -> Result<usize> {
    let mut digits = String::new();
    loop {
        let byte = reader
            .read_u8()
            .map_err(|e| EmbeddingError::from_read(e, "header"))?;
        if byte.is_ascii_digit() {
            digits.push(char::from(byte));
        } else if byte.is_ascii_whitespace() && digits.is_empty() {
            continue;
        } else if byte.is_ascii_whitespace() {
            break;
        } else {
            return Err(EmbeddingError::MalformedFile(format!(
                "unexpected byte {byte:#04x} in header {what}"
            )));
        }
    }
    digits
        .parse()
        .map_err(|_| EmbeddingError::MalformedFile(format!("header {what} out of range")))
}

/// Read a word name up to the terminating space. Newlines are skipped, and
/// end of file also ends the name.
fn read_name<R: BufRead>(reader: &mut R) -> Result<Box<[u8]>> {
    let mut name = Vec::new();
    loop {
        match reader.read_u8() {
            Ok(b' ') => break,
            Ok(b'\n') => continue,
            Ok(byte) => name.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(name.into_boxed_slice())
}
