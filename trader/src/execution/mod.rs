pub mod pnl;
pub mod retry;
pub mod sizing;

pub mod entry_engine;
pub use entry_engine::*;

pub mod risk_modifier;
pub use risk_modifier::*;

pub mod position_closer;
pub use position_closer::*;

pub mod reconciler;
pub use reconciler::*;
