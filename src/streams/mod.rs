//! Stream-level data handling

pub mod subtitle;
