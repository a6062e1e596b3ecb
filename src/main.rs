use clap::Parser;
use cyc_backup::backup::backup_config::BackupConfig;
use cyc_backup::backup::logging::init_tracing;
use cyc_backup::backup::result_error::result::Result;
use cyc_backup::backup::run::run_backup;
use cyc_backup::backup::target_size::TargetSize;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::error;

/// Cyclic backup: writes new files, then the oldest backed up ones, into a
/// size limited TAR archive
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = "cycbackup.yml")]
    config: PathBuf,
    /// Override the configured target size, e.g. 700M
    #[arg(short, long)]
    target_size: Option<TargetSize>,
    /// Override the configured archive path
    #[arg(short = 'o', long)]
    archive: Option<PathBuf>,
    /// Print the effective configuration and exit
    #[arg(short, long)]
    inspect: bool,
    /// Write the log to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Log every decision
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<()> {
    let mut config = BackupConfig::from_file(&args.config)?;
    if let Some(size) = args.target_size {
        config.set_size(size);
    }
    if let Some(archive) = args.archive {
        config.set_target(archive)?;
    }

    if args.inspect {
        serde_yml::to_writer(std::io::stderr(), &config)?;
        return Ok(());
    }

    let counts = run_backup(&config)?;
    tracing::debug!("{counts}");
    println!("{counts}");
    Ok(())
}

/// Parses the command line, printing help or the usage error instead of exiting
fn parse_args<I, T>(argv: I) -> Option<Args>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Args::try_parse_from(argv) {
        Ok(args) => Some(args),
        Err(e) => {
            if let Err(io) = e.print() {
                eprintln!("{io}");
            }
            None
        }
    }
}

fn main() {
    let argv0 = std::env::args_os()
        .next()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cyc_backup".into());
    println!("{argv0} running");

    if let Some(args) = parse_args(std::env::args_os()) {
        if let Err(e) = init_tracing(args.log_file.as_deref(), args.verbose) {
            eprintln!("{e}");
        }

        // errors are reported, not turned into an exit code
        if let Err(e) = run(args) {
            error!("main exception {e}");
        }
    }

    println!("all done");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_arguments_do_not_exit() {
        assert!(parse_args(["cyc_backup", "--bogus"]).is_none());
        assert!(parse_args(["cyc_backup", "-t", "12q"]).is_none());
        assert!(parse_args(["cyc_backup", "--version"]).is_none());

        let args = parse_args(["cyc_backup", "-t", "700k", "-o", "/tmp/a.tar", "-i"]).unwrap();
        assert_eq!(args.target_size.map(|s| s.bytes()), Some(700_000));
        assert_eq!(args.archive, Some(PathBuf::from("/tmp/a.tar")));
        assert!(args.inspect);
        assert_eq!(args.config, PathBuf::from("cycbackup.yml"));
    }
}
