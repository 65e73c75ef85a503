//! Identity resolution: natural keys, the in-memory index and its store.

pub mod identity;
pub mod resolver;
pub mod store;

pub use identity::{natural_key, normalize_name, IdentityKey};
pub use resolver::{EntityResolver, RawIdentity, Resolution};
pub use store::QuarantineRecord;
