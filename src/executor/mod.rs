pub mod bounds;
pub mod command;
