pub mod commands;
pub mod handlers;

pub use commands::{CheckArgs, CliArgs, Commands, PollArgs};
pub use handlers::{handle_check, handle_poll, EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};
