pub mod section;
pub mod tdt;
