pub use search::*;

mod memory_provider;
mod search;

pub use memory_provider::MemoryStorage;
