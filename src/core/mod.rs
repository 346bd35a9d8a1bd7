// FlightDeck - core/mod.rs
//
// Core layer: data model, status codec, persisted-format codecs.
// Pure logic with no I/O; depends only on util.

pub mod escape;
pub mod model;
pub mod profile;
pub mod status;
