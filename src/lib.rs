//! # Skyfeed Core Library
//!
//! Lifecycle control and frame hand-off for a flight-controller camera
//! push stream. The binary in `main.rs` is a thin shell; everything it
//! does is reachable through this library so tests and embedders drive
//! the same code paths.
//!
//! ## Crate Structure
//!
//! - **`stream`**: The heart of the crate. `StreamController` owns the
//!   start/stop lifecycle of one logical video stream, the controller
//!   registry recovers identity from the opaque per-chunk context, and the
//!   delivery trampoline bridges the vendor's C-style callback to a safe
//!   frame handler.
//! - **`vehicle`**: The `Vehicle` trait (activation, firmware identity,
//!   camera access) plus in-process mocks with fault-injection knobs.
//! - **`config`**: `UserConfig.txt` loading in the vendor's `key : value`
//!   format, layered with `SKYFEED_`-prefixed environment overrides.
//! - **`logging`**: Tracing subscriber setup shared by the binary and
//!   tests.

pub mod config;
pub mod logging;
pub mod stream;
pub mod vehicle;
