//! Engine modules: the resolution passes that turn an expanded manifest into a
//! validated installer description.
//!
//! Each pass is pure and consumes the output of the one before it:
//! directories, then components and features (with integrations expanded
//! into payload items), then the action sequence.

pub mod condition;
pub mod directories;
pub mod graph;
pub mod integration;
pub mod sequencer;
