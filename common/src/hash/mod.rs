mod fast_hash;
mod signature;

pub use fast_hash::*;
pub use signature::*;
