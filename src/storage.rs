pub mod file_store;
pub use file_store::FileLocalStore;
pub mod memory_store;
pub use memory_store::MemoryLocalStore;
