//! Cluster dispatch
//!
//! Splits a test run into batches, records them in the registry and submits
//! them as one HTCondor array job. The remote side of the protocol, where an
//! array task reads back its own batch, lives in `loader`.

pub mod codec;
pub mod condor;
pub mod coordinator;
pub mod loader;
pub mod partition;
pub mod secret;
pub mod template;

pub use codec::ArgumentCodec;
pub use condor::{CondorBackend, CondorSettings, CondorSubmit};
pub use coordinator::{register_test_cases, DispatchCoordinator, DispatchError, DispatchOutcome};
pub use loader::{BatchLoader, BatchWait, CoordinationError};
pub use partition::partition_or_single;
pub use secret::EnvSecret;
