#![warn(
    clippy::pedantic,
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    rust_2021_compatibility
)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Welcome to `Percolator`, a library for whole-program, context-sensitive
//! dataflow analysis.
//!
//! Given a program representation (entry points, per-method control flow
//! graphs, and a call resolver) and a monotone dataflow problem over a meet
//! semi-lattice, the [`solver::Solver`] computes a fixpoint in which each
//! method is analysed once per distinct boundary value reaching it. Two
//! calls to the same method under different incoming values get separate
//! [`context::Context`]s, and recursion terminates whenever the lattice has
//! finite height.

pub mod context;
pub mod graph;
pub mod lattice;
pub mod problem;
pub mod program;
pub mod solver;
pub mod transition;
