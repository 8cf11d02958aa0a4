pub mod aggregate;
pub mod backend;
pub mod collector;
pub mod info;
pub mod process;
