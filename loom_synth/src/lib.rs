//! # LOOM Control-Network Synthesis
//!
//! Builds the realtime control topology of an FDM/motion controller from
//! declarative per-machine configuration: joint position control chains,
//! an estop fault-aggregation and latching network, watchdog supervision,
//! PID temperature regulation with feed-forward compensation, N-way
//! parameter multiplexing for extruder banks, and dual-motor gantry
//! synchronization.
//!
//! ## Layers
//!
//! 1. [`catalog`] — the fixed block vocabulary with typed pin signatures
//! 2. [`topology`] — signal registry, instantiator, and wiring engine
//! 3. [`compose`] — reusable wiring patterns built on the engine
//! 4. [`machine`] — the driver walking a [`loom_common::machine::MachineConfig`]
//! 5. [`sim`] — a deterministic reference evaluator for validation
//!
//! Synthesis is a finite, single-threaded build pass: it populates the
//! registry, freezes it, and hands the immutable graph to the external
//! realtime engine. Any configuration or wiring error aborts the whole
//! pass before the machine can see a partially-wired safety network.

pub mod catalog;
pub mod compose;
pub mod error;
pub mod machine;
pub mod sim;
pub mod topology;
