//! Ordering metadata: the position index and the key generator.

pub mod index;
pub mod keygen;

pub use index::{IndexEntry, OrderIndex};
pub use keygen::KeyGenerator;
