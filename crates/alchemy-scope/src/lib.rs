pub mod context;
pub mod error;
pub mod handle;
pub mod registry;
pub mod scope;

pub use context::{Destroyed, LifecycleContext};
pub use error::ScopeError;
pub use handle::ResourceHandle;
pub use registry::{lookup, register, ProviderFn, ProviderFuture, RegisteredProvider};
pub use scope::Scope;

#[cfg(any(test, feature = "test-util"))]
pub use registry::reset_for_test;
