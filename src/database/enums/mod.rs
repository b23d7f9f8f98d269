pub mod timeframe;

pub use timeframe::Timeframe;
