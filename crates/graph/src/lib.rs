//! GraphVault concept graph
//!
//! Turns raw extraction fragments into a deduplicated, connected concept
//! graph and persists it:
//! - `fragment`: in-memory node/fragment/graph types and id hygiene
//! - `resolver`: embedding-based entity resolution (agglomerative clustering)
//! - `builder`: fragment merge with symmetric backlink rebuild
//! - `connector`: orphan component bridging by semantic similarity
//! - `metrics`: PageRank over the directed concept graph
//! - `persistence`: atomic purge-then-insert into the relational store

pub mod builder;
pub mod connector;
pub mod fragment;
pub mod metrics;
pub mod persistence;
pub mod resolver;

pub use builder::GraphBuilder;
pub use connector::GraphConnector;
pub use fragment::{ConceptGraph, ConceptNode, GraphFragment};
pub use metrics::pagerank;
pub use persistence::GraphPersistence;
pub use resolver::EntityResolver;
