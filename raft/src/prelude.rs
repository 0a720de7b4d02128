//! Re-exports of `alloc` types used throughout the crate without explicit imports, the same way
//! `std::prelude` makes `Vec` and friends ambient in non-`no_std` crates.

pub use alloc::vec::Vec;
