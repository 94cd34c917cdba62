pub mod base;
pub mod periodic;
pub mod policy;
pub mod tasks;
