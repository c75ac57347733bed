pub mod admin;
pub mod games;
pub mod orders;
pub mod stats;
