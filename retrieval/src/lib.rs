//! # Neighbor Engine
//!
//! This crate wraps the persistent neighbor cache for use by services:
//!
//! - **Configuration**: Model and cache paths, neighbor count, save policy
//! - **Shared Access**: Concurrent lookups behind a read/write lock
//! - **Persistence**: Atomic snapshot saves, optional save on close
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Neighbor Engine                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  NeighborConfig ──► NeighborEngine ──► RwLock<NeighborCache>    │
//! │                          │                    │                 │
//! │                          ▼                    ▼                 │
//! │                    snapshot file        raw vector model        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use neighbors_retrieval::NeighborEngine;
//!
//! let engine = NeighborEngine::builder()
//!     .with_model_path("vectors.bin")
//!     .build()
//!     .await?;
//!
//! let neighbors = engine.find_neighbors("king").await?;
//! engine.save_if_dirty().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub use config::{NeighborConfig, SavePolicy};
pub use engine::{EngineStats, NeighborEngine, NeighborEngineBuilder};
pub use error::{Result, RetrievalError};

// Re-export from dependencies for convenience
pub use neighbors_embeddings::{EmbeddingError, Neighbor, NeighborCache, VectorModel};
