//! Remote worker host abstraction.
//!
//! A `RemoteMachine` is the live handle for a node row: an SSH connection
//! plus a platform adapter that knows how to quote commands, count CPUs,
//! list processes and provision software on that platform. The repository
//! tracks all live machines by address.

pub mod adapters;
pub mod machine;
pub mod path;
pub mod repository;

pub use adapters::{PlatformAdapter, PlatformFacts, ADAPTERS};
pub use machine::{MachineMeta, ProcessInfo, RemoteMachine, RemoteMachineError};
pub use path::{PathFlavor, RemotePath};
pub use repository::{MachineFilter, RemoteMachineRepository};
