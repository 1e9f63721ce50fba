use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, info};

use scriptio::file::{FileHandle, StdKind};
use scriptio::logging::{LogConfig, init_logging};
use scriptio::poller::{FsWatcher, PollEvent, PollEvents, PollObject, Poller};
use scriptio::script::ScriptReturn;
use scriptio::{IoConfig, LockMode, log_timing};

/// Inspect files, follow filesystem changes and take advisory locks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log file path (overrides SCRIPTIO_LOG_FILE env var)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Structured JSON logs (same as SCRIPTIO_LOG_JSON=true)
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report the detected encoding of each file
    Detect {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print one JSON object per file
        #[arg(long)]
        json: bool,
    },
    /// Print a file as UTF-8, one line at a time
    Cat {
        file: PathBuf,

        /// Open mode, e.g. "r", "rb" or "rutf16le"
        #[arg(long, default_value = "r")]
        mode: String,

        /// Join lines ending with this marker
        #[arg(long, default_value = "")]
        continuation: String,
    },
    /// Print filesystem changes below the given paths
    Watch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Also watch every directory below each path
        #[arg(long, short)]
        recursive: bool,

        /// Stop after this many milliseconds without a change
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Take an advisory lock and hold it
    Lock {
        file: PathBuf,

        /// "exclusive" or "shared"
        #[arg(long, default_value = "exclusive")]
        mode: LockMode,

        /// Fail instead of waiting when the lock is busy
        #[arg(long = "try")]
        try_only: bool,

        /// How long to hold the lock, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 0)]
        hold: u64,
    },
}

#[derive(Serialize)]
struct DetectReport {
    path: PathBuf,
    encoding: Option<&'static str>,
    error: Option<String>,
}

fn detect(
    files: Vec<PathBuf>,
    json: bool,
    config: &IoConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    for path in files {
        let result =
            FileHandle::open_with_config(&path, "r", config).map(|file| file.encoding().name());
        let name = path.to_string_lossy().into_owned();
        let (encoding, error) = ScriptReturn::from_result(result, &name).into_pair();

        if json {
            let report = DetectReport {
                path,
                encoding,
                error,
            };
            println!("{}", serde_json::to_string(&report)?);
        } else {
            match (encoding, error) {
                (Some(encoding), _) => println!("{}: {}", path.display(), encoding),
                (None, Some(error)) => eprintln!("{error}"),
                (None, None) => {}
            }
        }
    }
    Ok(())
}

fn cat(
    path: PathBuf,
    mode: &str,
    continuation: &str,
    config: &IoConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut input = FileHandle::open_with_config(&path, mode, config)?;
    let mut output = FileHandle::stdfile_with_config(StdKind::Stdout, config);
    info!("Printing {} ({})", input.name(), input.encoding());

    while let Some(line) = input.read_line(true, continuation)? {
        output.write(&line)?;
    }
    output.flush()?;
    input.close(false)?;
    log_timing!(Level::DEBUG, "cat", start.elapsed());
    Ok(())
}

fn watch(
    paths: Vec<PathBuf>,
    recursive: bool,
    timeout: Option<u64>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let watcher = Arc::new(FsWatcher::new()?);
    for path in &paths {
        watcher.add(path, recursive)?;
    }

    let poller = Poller::instance();
    let object = PollObject::FsWatcher(Arc::clone(&watcher));
    poller.insert(&object, PollEvents::RECV)?;
    info!("Watching {} paths", paths.len());

    let timeout = timeout.map(Duration::from_millis);
    let mut print_error = None;
    loop {
        let delivered = poller.wait_with(timeout, |event| {
            if let PollEvent::FsWatcher { path, kind, .. } = &event {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => print_error = Some(e),
                    }
                } else {
                    println!("{}: {}", kind.name(), path.display());
                }
            }
        })?;
        if let Some(e) = print_error.take() {
            return Err(e.into());
        }
        if delivered == 0 && timeout.is_some() {
            break;
        }
    }

    poller.remove(&object)?;
    poller.shutdown();
    Ok(())
}

fn lock(
    path: PathBuf,
    mode: LockMode,
    try_only: bool,
    hold: u64,
    config: &IoConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lock = scriptio::FileLock::open_with_config(&path, config)?;
    if try_only {
        if !lock.try_lock(mode)? {
            return Err(format!("{} is locked by another process", lock.name()).into());
        }
    } else {
        lock.lock(mode)?;
    }
    println!("locked {} ({})", lock.name(), mode);

    thread::sleep(Duration::from_millis(hold));
    lock.close(false)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level, args.log_file, args.log_json);
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = IoConfig::from_env()?;

    match args.command {
        Command::Detect { files, json } => detect(files, json, &config),
        Command::Cat {
            file,
            mode,
            continuation,
        } => cat(file, &mode, &continuation, &config),
        Command::Watch {
            paths,
            recursive,
            timeout,
            json,
        } => watch(paths, recursive, timeout, json),
        Command::Lock {
            file,
            mode,
            try_only,
            hold,
        } => lock(file, mode, try_only, hold, &config),
    }
}
