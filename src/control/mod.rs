//! Drive and weapon command policy.

pub mod drive;
