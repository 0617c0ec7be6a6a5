pub mod spot;
pub mod status;

pub use spot::SpotOracle;
pub use status::MarketStatusTracker;
