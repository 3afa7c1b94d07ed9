pub mod battery;
pub mod ev_charger;
pub mod profile;
pub mod sample;
pub mod thermal;

pub use battery::*;
pub use ev_charger::*;
pub use profile::*;
pub use sample::*;
pub use thermal::*;
