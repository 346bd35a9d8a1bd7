// FlightDeck - util/mod.rs
//
// Utility modules: error types, named constants, logging setup.
// No dependencies on core, engine, app, or platform layers other than the
// shared data model referenced by error variants.

pub mod constants;
pub mod error;
pub mod logging;
