// FlightDeck - app/mod.rs
//
// Application layer: profile persistence, log draining, session lifecycle.
// Dependencies: core, engine, platform::store.

pub mod log_stream;
pub mod profile_store;
pub mod session;
