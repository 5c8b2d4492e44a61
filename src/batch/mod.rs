pub mod executor;
pub mod fan_out;
pub mod relay;
pub mod types;

pub use executor::*;
pub use fan_out::*;
pub use relay::*;
pub use types::*;
