//! Shared helpers

pub mod serde;

pub use self::serde::duration_millis;
