pub mod distributions;
pub mod fit;
pub mod stats;
