use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;

/// Installs the global subscriber, writing to `log_file` (truncated) when given
pub fn init_tracing(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt().with_max_level(level);
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .map_err(Error::from)
                .with_msg(format!("Creating log file {path:?} failed"))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
