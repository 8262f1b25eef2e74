pub mod adjust;
pub mod curve;
