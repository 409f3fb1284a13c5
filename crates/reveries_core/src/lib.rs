//! Core types and configuration for the Reveries daemon.
//!
//! Everything here is plain data: the episodic memory records, the singleton
//! self-model, configuration loading, and time arithmetic. Behavior lives in
//! the `reveries_memory` and `reveries_mind` crates.

pub mod config;
pub mod episode;
pub mod experience;
pub mod records;
pub mod self_model;
pub mod time;

pub use config::{ReveriesConfig, ReveriesPaths};
pub use episode::{Episode, EpisodeLink, Exemplar, GapRecord, LinkKind};
pub use experience::{ExperienceKind, ExperienceMetadata, RawExperience};
pub use records::{BreakerAction, BreakerEvent, BreakerSeverity, Gap, MonologueCheckpoint};
pub use self_model::{ObservedPattern, Relationship, SelfModel};
