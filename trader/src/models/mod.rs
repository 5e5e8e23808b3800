pub mod enums;
pub use enums::*;

pub mod position;
pub use position::*;

pub mod signal;
pub use signal::*;

pub mod exchange;
pub use exchange::*;
