//! Resource-management and scheduling core of a small teaching operating
//! system, running on a simulated machine.
//!
//! This crate owns frame allocation, per-process page tables, the process
//! table, the scheduler's blocking queues, pipes/locks/cvars/semaphores,
//! the terminal subsystem, trap dispatch, and bootstrap. Real hardware
//! access and user-code execution are modeled as the [`platform::Platform`]
//! and [`loader::Loader`] traits, implemented for tests by
//! [`platform::sim::SimPlatform`] and [`loader::StubLoader`].

pub mod boot;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod idalloc;
pub mod kernel;
pub mod loader;
pub mod pagetable;
pub mod pcb;
pub mod platform;
pub mod resources;
pub mod scheduler;
pub mod syscall;
pub mod terminal;
pub mod trap;

pub use config::KernelConfig;
pub use context::UserContext;
pub use error::{KResult, KernelError};
pub use kernel::Kernel;
pub use pcb::Pid;
pub use trap::TrapKind;
