//! citefix resolves raw bibliographic reference strings into verified,
//! corrected IEEE citations by reconciling metadata from several scholarly
//! sources, with optional LLM assistance for extraction and formatting.

pub mod config;
pub mod consensus;
pub mod correct;
pub mod export;
pub mod extract;
pub mod format;
pub mod llm;
pub mod lookup;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod runtime;
pub mod source;
pub mod text;
pub mod verify;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, Resolution};
pub use record::{Candidate, Consensus, Draft, Field, RefType, SourceId};
