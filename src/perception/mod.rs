pub mod preprocess;
pub mod screenshot;
pub mod types;
