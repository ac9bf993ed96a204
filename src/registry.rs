//! Virtual registry: key paths, value model, host accessors and the two handle
//! stores. Virtualized keys live in `VirtualRegistryStore`; keys that pass
//! straight through to the host are tracked in `TransparentResourceBuffer`.
//! Both draw handles from one shared `IndexAllocator`, so a handle names at
//! most one live key across the pair.

pub mod host;
pub mod path;
pub mod transparent;
pub mod types;
pub mod virtual_store;

pub use host::{HostRegistry, MemoryHostRegistry};
pub use path::{canonical_key_path, join_key_path, Hive, PREDEFINED_HANDLES};
pub use transparent::TransparentResourceBuffer;
pub use types::{ValueType, VirtualKeyNode, VirtualValue};
pub use virtual_store::VirtualRegistryStore;
