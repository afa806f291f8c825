//! # Agency Retrieval
//!
//! Hybrid knowledge retrieval for a multi-tenant travel-agency backend.
//!
//! Two knowledge sources sit behind one query path:
//!
//! - a shared **vector index** downloaded from blob storage and searched by
//!   L2 distance, optionally diversified with MMR;
//! - a per-tenant **lexical store** of word-window chunks searched by
//!   Jaccard overlap with an exact-phrase boost.
//!
//! The unified merge queries a tenant's lexical store and a remote hybrid
//! retrieval service together and ranks both into one list.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐      ┌──────────────┐
//! │ BlobStore│─▶│ FlatIndex│─────▶│ VectorIndex  │──┐
//! │ S3 / dir │  │ + Lookup │      │ Store (+MMR) │  │
//! └──────────┘  └──────────┘      └──────────────┘  │   ┌──────────┐
//!                                                   ├──▶│  HTTP /  │
//! ┌──────────┐  ┌──────────┐      ┌──────────────┐  │   │   CLI    │
//! │ Uploads  │─▶│ Extract  │─────▶│ LexicalStore │──┤   └──────────┘
//! │ per      │  │ + Chunk  │      │ (per tenant) │  │
//! │ tenant   │  └──────────┘      └──────────────┘  │
//! └──────────┘                    ┌──────────────┐  │
//!                                 │ Unified merge│◀─┘
//!                                 │ (+ remote)   │
//!                                 └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed ingestion, extraction, and blob errors |
//! | [`models`] | Core data types |
//! | [`chunk`] | Word-window chunking |
//! | [`extract`] | Text extraction from uploads |
//! | [`lexical`] | Per-tenant lexical chunk store |
//! | [`blob`] | Blob store clients (S3, directory) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`flat_index`] | Binary vector index format and exact k-NN |
//! | [`lookup`] | Slot → content lookup table |
//! | [`vector_store`] | Lazily initialized shared vector index |
//! | [`mmr`] | Maximal marginal relevance re-ranking |
//! | [`remote`] | Remote hybrid-retrieval client |
//! | [`unified`] | Local + global merge |
//! | [`server`] | HTTP server |

pub mod blob;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod flat_index;
pub mod lexical;
pub mod lookup;
pub mod mmr;
pub mod models;
pub mod remote;
pub mod server;
pub mod unified;
pub mod vector_store;
