pub mod cross_module;
pub mod system;
