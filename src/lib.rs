pub mod cli;
pub mod config;
pub mod filter;
pub mod generator;
pub mod parser;
pub mod policy;
pub mod transform;

pub fn get_version() -> String {
    "0.2.0".to_string()
}
