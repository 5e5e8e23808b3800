pub mod symbol_locks;
pub use symbol_locks::*;

pub mod signal_orchestrator;
pub use signal_orchestrator::*;

pub mod dispatcher;
pub use dispatcher::*;

pub mod scheduler;
pub use scheduler::*;

#[cfg(test)]
mod signal_orchestrator_tests;

#[cfg(test)]
mod dispatcher_tests;
