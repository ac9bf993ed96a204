pub mod config;
pub mod engine;
pub mod error;
pub mod filesystem;
pub mod hooks;
pub mod index;
pub mod persist;
pub mod policy;
pub mod registry;
pub mod sync;

pub use config::EngineConfig;
pub use engine::{Engine, EngineHosts, EngineStores, LoadReport};
pub use error::{HostError, StateCode};
pub use index::{Handle, IndexAllocator};
pub use policy::{AccessMechanism, AccessPolicy};
