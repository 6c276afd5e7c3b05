pub mod config;
pub mod content;
pub mod error;
pub mod game_logic;
pub mod identity;
pub mod session;
pub mod storage;
