pub mod config;
pub mod dispatch;
pub mod menu;
pub mod prompts;
pub mod table;
pub mod tunnel;
