pub mod error;
pub mod fs_store;
pub mod hash;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use fs_store::FsStore;
pub use hash::compute_desired_hash;
pub use memory::InMemoryStore;
pub use store::StateStore;
