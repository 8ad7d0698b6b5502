pub mod clock;
pub mod signing;
pub mod telemetry;

pub use clock::*;
pub use signing::*;
pub use telemetry::*;
