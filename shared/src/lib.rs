pub mod colors;
pub mod plan;
pub mod protocol;
pub mod unit;

pub use colors::{zone_color, zone_color_hex};
pub use plan::*;
pub use protocol::*;
pub use unit::*;
