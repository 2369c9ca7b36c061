pub mod analysis;
pub mod food;

pub use analysis::*;
pub use food::*;
