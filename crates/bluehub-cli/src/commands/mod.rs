//! Command implementations for the CLI.

mod connect;
mod io;
mod run;
mod scan;
mod send_file;
mod set;
mod status;

pub use connect::{cmd_connect, cmd_disconnect};
pub use io::{cmd_read, cmd_write};
pub use run::cmd_run;
pub use scan::{ScanArgs, cmd_scan};
pub use send_file::cmd_send_file;
pub use set::cmd_set;
pub use status::cmd_status;
