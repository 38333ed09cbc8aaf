pub mod backtest;
pub mod frames;
pub mod live;
pub mod walker;

pub use backtest::*;
pub use frames::*;
pub use live::*;
pub use walker::*;
