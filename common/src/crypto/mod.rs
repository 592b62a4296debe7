pub mod hash;
pub mod random;

pub use hash::{hash, Hash, HASH_SIZE};
pub use random::secure_random_bytes;
