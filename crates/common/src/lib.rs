//! Common types shared across Engram crates.
//!
//! This crate provides the entity model for the four memory stores and the
//! error taxonomy every component reports failures through.

pub mod error;
pub mod model;

pub use error::{MemoryError, Result};
pub use model::{
    Decision, DocumentMeta, Episode, InstanceConfig, KnowledgeDocument, NewDecision, NewDocument,
    NewEpisode, Profile, ProfilePatch,
};
