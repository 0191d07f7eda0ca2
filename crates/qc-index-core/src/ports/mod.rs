//! The single port the domain layer depends on: a growable, byte-addressable backing store.

pub mod outbound;
