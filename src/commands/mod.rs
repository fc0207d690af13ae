pub mod analyze;
pub mod compare;
pub mod rank;
pub mod status;

mod common;
