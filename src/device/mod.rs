pub mod codec;
pub mod constants;
pub mod registry;
pub mod scan;
pub mod session;
pub mod types;
