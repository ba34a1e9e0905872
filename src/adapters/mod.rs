//! Concrete port implementations bundled with the crate

pub mod loopback;
pub mod session;
