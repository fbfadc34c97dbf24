pub mod error_limit;
pub mod handler;
pub mod paths;
pub mod relay;
pub mod upstream;
