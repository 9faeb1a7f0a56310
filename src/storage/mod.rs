mod spec;
pub use spec::{DataAvailabilityReader, StorageService};

mod memory;
pub use memory::InMemoryStorageService;

mod fallback;
pub use fallback::{FallbackConfig, FallbackStorageService};

mod policy;
pub use policy::LogOnWriteError;

mod rest;
pub use rest::RestfulDasClient;
