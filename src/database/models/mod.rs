pub mod candle;
pub mod instrument;

pub use candle::{Candle, NewCandle};
pub use instrument::{Instrument, NewInstrument};
