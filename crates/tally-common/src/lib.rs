//! Shared types for the tally agent: the canonical [`types::Sample`] and the
//! concurrent [`sample_list::SampleList`] sink inputs push into.

pub mod sample_list;
pub mod types;

pub use sample_list::SampleList;
pub use types::{Labels, Sample};
