pub mod accept;
pub mod ansi;
pub mod config;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod pty_session;
pub mod relay;
pub mod terminal;
pub mod trigger;
pub mod window;

pub use config::{CliArgs, SupervisorConfig};
pub use lifecycle::run_session;
pub use logging::{init_logging, log_debug, log_file_path};
