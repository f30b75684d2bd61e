//! Priority-ordered filter rules.
//!
//! A [`FilterRuleEngine`] holds an immutable snapshot of the configured rule
//! groups. Rules are evaluated in stored order and the first rule whose
//! predicates all pass decides the outcome.

mod engine;
pub(crate) mod pattern;
mod types;

pub use engine::FilterRuleEngine;
pub use types::*;
