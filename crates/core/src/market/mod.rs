pub mod csv;
pub mod types;
