//! Logic modules: pure translation of injected values into concrete ones.
//!
//! # Modules
//!
//! - `resolver`: platform selection, version validation and `${name}`
//!   template expansion

pub mod resolver;
