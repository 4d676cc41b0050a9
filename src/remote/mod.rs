pub mod commands;
pub mod command_file;
pub mod control;
pub mod pid_file;
pub mod signals;


pub use commands::RemoteCommand;
pub use control::RemoteControl;
pub use pid_file::PidFile;
