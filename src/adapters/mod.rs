//! Pairing collaborators (Roon)

pub mod roon;
pub mod traits;

pub use traits::Startable;
