pub mod models;
pub mod quarter;
pub mod review;
