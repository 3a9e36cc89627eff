//! CLI subcommands

pub mod lora;
pub mod nodes;
pub mod stack;
