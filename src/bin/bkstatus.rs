use clap::Parser;
use cyc_backup::backup::backup_config::BackupConfig;
use cyc_backup::backup::logging::init_tracing;
use cyc_backup::backup::result_error::result::Result;
use cyc_backup::backup::status::{excluded_entries, format_status, tree_status};
use cyc_backup::backup::store::Store;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::error;

/// Reports what cyc_backup excludes and what it has already backed up
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = "cycbackup.yml")]
    config: PathBuf,
    /// List entries under this directory dropped by exclusion patterns
    #[arg(short, long)]
    excluded: Option<PathBuf>,
    /// Show the backup status of every file under this directory
    #[arg(short, long, num_args = 0..=1, default_missing_value = ".")]
    status: Option<PathBuf>,
    /// Log every decision
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<()> {
    let config = BackupConfig::load(&args.config)?;

    if let Some(dir) = &args.excluded {
        let policy = config.policy();
        for (path, pattern) in excluded_entries(&policy, dir) {
            println!("{} excluded by {}", path.display(), pattern);
        }
    }

    if let Some(dir) = &args.status {
        let dir = std::path::absolute(dir)?;
        let store = Store::open_read_only(config.db())?;
        for entry in tree_status(&store, &dir) {
            match entry {
                Ok((path, status)) => println!("{}", format_status(&path, status.as_ref())),
                Err(e) => error!("{e}"),
            }
        }
    }
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
        .unwrap_or_else(|| "bkstatus".into());
    println!("{argv0} running");

    if let Some(args) = parse_args(std::env::args_os()) {
        if let Err(e) = init_tracing(None, args.verbose) {
            eprintln!("{e}");
        }

        if let Err(e) = run(args) {
            error!("exception {e}");
        }
    }

    println!("all done");
}
