//! Provider development kit: the resumable cursor codec and the contract every
//! connector implements to expose its objects as pages of unified records.

pub mod cursor;
pub mod provider;
pub mod registry;

pub use cursor::CursorPosition;
pub use provider::{ConnectionRef, Page, PageRequest, Provider, ProviderError, UnifiedItem};
pub use registry::{ProviderRegistry, StreamHandler};
