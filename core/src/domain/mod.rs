//! Domain Layer
//!
//! Plain data and the capability/seam traits the rest of the core builds on.
//! No I/O happens here.

pub mod context;
pub mod dependency;
pub mod pipeline;
pub mod service;
pub mod stack;
pub mod tools;
pub mod vault;
