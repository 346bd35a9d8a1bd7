// FlightDeck - lib.rs
//
// Library entry point, exposing every module for the command line front
// end and for integration testing.
//
// Layers, lowest first:
//   util      constants, errors, logging
//   core      pure model and codecs, no I/O
//   engine    the engine control surface and its implementations
//   platform  directories, the sectioned store file, settings
//   app       profile store, log stream, session controller
//   relay     HTTP-triggered TCP/DNS relay agent

pub mod app;
pub mod core;
pub mod engine;
pub mod platform;
pub mod relay;
pub mod util;
