// FlightDeck - platform/mod.rs
//
// Platform abstraction layer.
// Dependencies: core model types, directories crate, toml.
// Must NOT depend on: app, engine.

pub mod config;
pub mod store;
