pub mod config;
pub mod publish;
pub mod status;
pub mod watch;
