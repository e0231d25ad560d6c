//! snapvault CLI - content-addressed snapshot store command line interface

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::error;

use snapvault::ops::{extract, fsck, loosen, pack, status, store};
use snapvault::{snapshot, ExtractOptions, Store};

#[derive(Parser)]
#[command(name = "snapvault")]
#[command(about = "content-addressed snapshot store")]
#[command(version)]
struct Cli {
    /// data directory holding objects, snapshots and packs
    #[arg(short, long, env = "SNAPVAULT_DIR", default_value = ".snapvault")]
    data_dir: PathBuf,

    /// worktree the snapshots describe
    #[arg(short, long, default_value = ".")]
    worktree: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new store
    Init,

    /// record worktree files as a snapshot
    Store {
        /// snapshot name
        name: String,

        /// files to record (default: the whole worktree)
        files: Vec<PathBuf>,

        /// worker threads (0 = one per cpu)
        #[arg(short = 'j', long, default_value_t = 0)]
        workers: usize,
    },

    /// make the worktree match a snapshot
    Extract {
        /// snapshot name
        name: String,

        /// re-hash written files before reporting success
        #[arg(long)]
        verify: bool,

        /// overwrite local modifications
        #[arg(short, long)]
        force: bool,

        /// also delete files the snapshot does not contain
        #[arg(long)]
        reset: bool,

        /// worker threads (0 = one per cpu)
        #[arg(short = 'j', long, default_value_t = 0)]
        workers: usize,
    },

    /// move loose objects into a new pack
    Pack {
        /// pack name
        name: String,

        /// zstd compression level
        #[arg(short, long, default_value_t = 12, allow_negative_numbers = true)]
        level: i32,

        /// worker threads (0 = one per cpu)
        #[arg(short = 'j', long, default_value_t = 0)]
        workers: usize,
    },

    /// turn a pack back into loose objects
    Loosen {
        /// pack name
        name: String,
    },

    /// show how the worktree differs from a snapshot
    Status {
        /// snapshot name (default: HEAD)
        name: Option<String>,
    },

    /// list snapshots, or packs with --packs
    List {
        #[arg(long)]
        packs: bool,
    },

    /// verify store integrity
    Fsck,
}

fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    init_logger();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}: {}", e.kind(), e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> snapvault::Result<()> {
    let data = &cli.data_dir;
    let worktree = &cli.worktree;

    match cli.command {
        Commands::Init => {
            Store::init(data, worktree)?;
            println!("initialized store at {}", data.display());
        }

        Commands::Store {
            name,
            files,
            workers,
        } => {
            let st = Store::open(data, worktree)?;
            let snap = store(&st, &files, &name, workers)?;
            println!("{} file(s) stored as {}", snap.manifest.len(), name);
        }

        Commands::Extract {
            name,
            verify,
            force,
            reset,
            workers,
        } => {
            let st = Store::open(data, worktree)?;
            let opts = ExtractOptions {
                verify,
                force,
                reset,
                num_workers: workers,
            };
            let result = extract(&st, &name, &opts)?;
            println!(
                "A {} / M {} / R {}",
                result.added, result.modified, result.removed
            );
        }

        Commands::Pack {
            name,
            level,
            workers,
        } => {
            let mut st = Store::open(data, worktree)?;
            let stats = pack(&mut st, &name, level, workers)?;
            if stats.objects_packed == 0 {
                println!("nothing to pack");
            } else {
                println!(
                    "packed {} object(s) into {} ({} bytes), pruned {} loose",
                    stats.objects_packed, name, stats.pack_size, stats.loose_pruned
                );
            }
        }

        Commands::Loosen { name } => {
            let mut st = Store::open(data, worktree)?;
            let count = loosen(&mut st, &name)?;
            println!("loosened {} object(s) from {}", count, name);
        }

        Commands::Status { name } => {
            let st = Store::open(data, worktree)?;
            let name = match name {
                Some(name) => name,
                None => st
                    .read_head()?
                    .ok_or_else(|| snapvault::Error::SnapshotNotFound("HEAD".to_string()))?,
            };
            for line in status(&st, &name, 0)? {
                println!("{}", line);
            }
        }

        Commands::List { packs } => {
            let st = Store::open(data, worktree)?;
            if packs {
                for p in st.objects().packs().iter() {
                    println!(
                        "{}\t{} object(s)\t{} bytes",
                        p.name(),
                        p.object_count(),
                        p.index().pack_size
                    );
                }
            } else {
                let head = st.read_head()?;
                for info in snapshot::list(&st)? {
                    let marker = if head.as_deref() == Some(info.name.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {}\t{} file(s)", marker, info.name, info.files);
                }
            }
        }

        Commands::Fsck => {
            let st = Store::open(data, worktree)?;
            let report = fsck(&st, 0)?;

            println!("objects checked: {}", report.objects_checked);
            println!("packs checked: {}", report.packs_checked);

            if !report.corrupt.is_empty() {
                println!("\ncorrupt:");
                for obj in &report.corrupt {
                    println!("  {}: {}", obj.location, obj.message);
                }
            }

            if !report.missing.is_empty() {
                println!("\nmissing objects:");
                for obj in &report.missing {
                    println!("  {} {} (snapshot {})", obj.hash, obj.path, obj.snapshot);
                }
            }

            if report.is_ok() {
                println!("\nstore is healthy");
            } else {
                println!("\nstore has issues");
                let paths = report
                    .corrupt
                    .iter()
                    .map(|c| c.location.clone())
                    .chain(report.missing.iter().map(|m| m.path.clone()))
                    .collect();
                return Err(snapvault::Error::Corruption { paths });
            }
        }
    }

    Ok(())
}
