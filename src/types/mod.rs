pub mod candle;
pub mod clock;
pub mod context;
pub mod signal;
pub mod tick;

pub use candle::*;
pub use clock::*;
pub use context::*;
pub use signal::*;
pub use tick::*;
