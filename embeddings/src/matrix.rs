//! Fixed-width neighbor matrix backing the cache.

use std::io::{Read, Write};

use crate::codec;
use crate::error::{EmbeddingError, Result};
use crate::ids::CacheWordId;

/// One row of the neighbor matrix: `width` neighbor ids with their scores.
#[derive(Debug, Clone, Copy)]
pub struct NeighborRow<'a> {
    pub ids: &'a [Option<CacheWordId>],
    pub scores: &'a [f64],
}

impl<'a> NeighborRow<'a> {
    /// A row is filled once its first slot holds a neighbor.
    pub fn is_filled(&self) -> bool {
        self.ids.first().is_some_and(Option::is_some)
    }

    /// The filled slots, best first.
    pub fn entries(&self) -> impl Iterator<Item = (CacheWordId, f64)> + use<'a> {
        let ids = self.ids;
        let scores = self.scores;
        ids.iter()
            .zip(scores)
            .map_while(|(id, &score)| id.map(|id| (id, score)))
    }
}

/// Neighbor ids and scores for every cache word, one row per id.
///
/// Row 0 belongs to no word and stays empty. Both tables are row-major with
/// `width` slots per row, which is also their on-disk layout.
#[derive(Debug, Clone)]
pub struct NeighborMatrix {
    width: usize,
    rows: usize,
    ids: Vec<Option<CacheWordId>>,
    scores: Vec<f64>,
}

impl NeighborMatrix {
    /// Allocate an empty matrix for `words` words (plus the sentinel row).
    pub fn new(words: usize, width: usize) -> Result<Self> {
        let rows = words + 1;
        let len = rows
            .checked_mul(width)
            .ok_or(EmbeddingError::AllocationFailed {
                rows,
                columns: width,
            })?;
        Ok(Self {
            width,
            rows,
            ids: codec::try_filled(len, None, width)?,
            scores: codec::try_filled(len, 0.0, width)?,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of words the matrix has rows for.
    pub fn words(&self) -> usize {
        self.rows - 1
    }

    pub fn row(&self, id: CacheWordId) -> Option<NeighborRow<'_>> {
        let start = self.row_start(id)?;
        Some(NeighborRow {
            ids: &self.ids[start..start + self.width],
            scores: &self.scores[start..start + self.width],
        })
    }

    /// Overwrite a row. Slots past the end of `neighbors` become empty.
    pub fn fill(&mut self, id: CacheWordId, neighbors: &[(CacheWordId, f64)]) -> Result<()> {
        let start = self
            .row_start(id)
            .ok_or_else(|| EmbeddingError::UnknownWord(format!("cache id {id}")))?;
        let ids = &mut self.ids[start..start + self.width];
        let scores = &mut self.scores[start..start + self.width];
        for slot in 0..self.width {
            match neighbors.get(slot) {
                Some(&(neighbor, score)) => {
                    ids[slot] = Some(neighbor);
                    scores[slot] = score;
                }
                None => {
                    ids[slot] = None;
                    scores[slot] = 0.0;
                }
            }
        }
        Ok(())
    }

    /// Number of rows that hold neighbors.
    pub fn filled_rows(&self) -> usize {
        self.ids
            .chunks_exact(self.width.max(1))
            .skip(1)
            .filter(|row| row.first().is_some_and(Option::is_some))
            .count()
    }

    fn row_start(&self, id: CacheWordId) -> Option<usize> {
        let row = id.index();
        (row < self.rows && self.width > 0).then_some(row * self.width)
    }

    /// Write the id table, then the score table.
    pub fn write_binary<W: Write>(&self, writer: &mut W) -> Result<()> {
        let raw: Vec<u32> = self.ids.iter().map(|&id| CacheWordId::encode(id)).collect();
        codec::write_u32s(writer, &raw)?;
        codec::write_f64s(writer, &self.scores)
    }

    /// Read both tables for `words` words of `width` slots. Ids past
    /// `words` are rejected.
    pub fn read_binary<R: Read>(reader: &mut R, words: usize, width: usize) -> Result<Self> {
        let rows = words + 1;
        let len = rows
            .checked_mul(width)
            .ok_or(EmbeddingError::AllocationFailed {
                rows,
                columns: width,
            })?;
        let raw = codec::read_u32s(reader, len, "neighbor ids")?;
        let scores = codec::read_f64s(reader, len, "neighbor scores")?;

        if let Some(&bad) = raw.iter().find(|&&id| id as usize > words) {
            return Err(EmbeddingError::MalformedFile(format!(
                "neighbor id {bad} exceeds word count {words}"
            )));
        }
        let ids = raw.into_iter().map(CacheWordId::decode).collect();

        Ok(Self {
            width,
            rows,
            ids,
            scores,
        })
    }
}
