//! Integrity side of the assessment engine.
//!
//! Everything in this crate is a pure function of its inputs: no execution,
//! no network, no shared mutable state. The worker feeds it finished
//! evaluations; the API and CLI call the fingerprint functions directly.

pub mod detectors;
pub mod fingerprint;
pub mod plagiarism;
pub mod report;
pub mod scorer;
