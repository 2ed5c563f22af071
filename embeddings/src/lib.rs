//! # Embeddings
//!
//! This crate finds the words closest to a query word in a dense
//! word-vector space, and remembers the answers across runs.
//!
//! ## Features
//!
//! - **String Index**: Sorted word table with exact and prefix lookup
//! - **Vector Model**: Exact brute-force cosine search over unit vectors
//! - **Neighbor Cache**: Per-word top-N lists, filled on demand and
//!   persisted as a binary snapshot
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NeighborCache ──(miss)──► VectorModel ──► TopN                 │
//! │       │                        │                                │
//! │       ▼                        ▼                                │
//! │  StringIndex +           StringIndex +                          │
//! │  NeighborMatrix          row vectors                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
mod codec;
pub mod error;
pub mod ids;
pub mod index;
pub mod matrix;
pub mod model;
pub mod similarity;

pub use cache::{DEFAULT_NEIGHBORS, NeighborCache};
pub use error::{EmbeddingError, Result};
pub use ids::{CacheWordId, ModelRowId, WordId};
pub use index::{IdRange, StringIndex};
pub use matrix::{NeighborMatrix, NeighborRow};
pub use model::VectorModel;
pub use similarity::{Neighbor, TopN, cosine_similarity};
