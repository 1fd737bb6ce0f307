//! Core data types shared by every pipeline role.
//!
//! Tick structs use a fixed-size symbol array (`[u8; 10]`) so the same
//! representation works on the wire and in the shared price book.

pub mod order;
pub mod symbol;
pub mod ticks;

pub use order::*;
pub use symbol::*;
pub use ticks::*;
