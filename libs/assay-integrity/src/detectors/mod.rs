//! Stateless anomaly detectors.
//!
//! Each detector is a pure function over data that was already collected:
//! no code execution, no external calls. Same input, same flags.

pub mod copy_paste;
pub mod guessing;
pub mod timing;
