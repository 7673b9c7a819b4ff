use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use photosift::enrichment::LabelSet;
use photosift::scanner::AssetOutcome;
use photosift::tasks::{BackgroundScan, ScanMode, TaskState};
use photosift::{
    logging, Config, Enricher, FsLibrary, NoopEnrichment, ScanEngine, ScanEvent, ScanStatus,
};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug)]
enum Command {
    Scan,
    Once,
    Status,
    ResetCursor,
    ResetAll,
    Groups,
    Blurry(usize),
    Recalc,
    People(usize),
    Labels(usize),
    Merge { target: String, source: String },
    Delete(Vec<String>),
}

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    eprintln!("Run 'photosift --help' for usage.");
    std::process::exit(1);
}

fn parse_limit(arg: Option<&String>) -> usize {
    match arg {
        Some(value) => value
            .parse()
            .unwrap_or_else(|_| usage_error(&format!("invalid limit '{}'", value))),
        None => DEFAULT_LIST_LIMIT,
    }
}

fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photosift {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    usage_error("--config requires a path argument");
                }
            }
            arg if arg.starts_with('-') => usage_error(&format!("unknown option {}", arg)),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let Some((name, rest)) = positional.split_first() else {
        print_help();
        std::process::exit(1);
    };

    let command = match name.as_str() {
        "scan" => Command::Scan,
        "once" => Command::Once,
        "status" => Command::Status,
        "reset-cursor" => Command::ResetCursor,
        "reset-all" => Command::ResetAll,
        "groups" => Command::Groups,
        "blurry" => Command::Blurry(parse_limit(rest.first())),
        "recalc" => Command::Recalc,
        "people" => Command::People(parse_limit(rest.first())),
        "labels" => Command::Labels(parse_limit(rest.first())),
        "merge" => match rest {
            [target, source] => Command::Merge {
                target: target.clone(),
                source: source.clone(),
            },
            _ => usage_error("merge requires TARGET and SOURCE group ids"),
        },
        "delete" => {
            if rest.is_empty() {
                usage_error("delete requires at least one asset id");
            }
            Command::Delete(rest.to_vec())
        }
        other => usage_error(&format!("unknown command '{}'", other)),
    };

    Cli { config_path, command }
}

fn print_help() {
    println!(
        r#"photosift - incremental blur and duplicate analysis for photo libraries

USAGE:
    photosift [OPTIONS] <COMMAND>

COMMANDS:
    scan                Sync the library and analyze every pending photo
    once                Analyze a single batch from the saved cursor
    status              Show pending, done and failed counts
    reset-cursor        Start the next scan from the beginning
    reset-all           Forget all analysis results and groups
    groups              List duplicate groups and their best shots
    blurry [LIMIT]      List photos classified as blurry
    recalc              Re-elect the best shot of every group
    people [LIMIT]      List photos with detected faces
    labels [LIMIT]      List photos with their categories and content labels
    merge TARGET SOURCE Fold duplicate group SOURCE into TARGET
    delete ID...        Move photos to the trash and drop them from groups

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTOSIFT_CONFIG    Path to config file (overrides default location)
    PHOTOSIFT_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photosift/config.toml"#
    );
}

fn print_status(status: &ScanStatus) {
    println!(
        "pending: {}  done: {}  failed: {}  batch: {}{}",
        status.total_pending,
        status.total_done,
        status.total_error,
        status.current_batch,
        if status.is_running { "  (running)" } else { "" }
    );
}

/// Run a scan on a worker thread and print progress until it finishes.
fn run_scan(engine: Arc<ScanEngine>, mode: ScanMode) -> Result<()> {
    let mut scan = BackgroundScan::spawn(engine, mode).context("Failed to start scan worker")?;
    let mut last_progress = None;

    loop {
        let finished = scan.is_finished();
        for event in scan.poll_updates() {
            match event {
                ScanEvent::Progress(status) if last_progress != Some(status.total_done) => {
                    last_progress = Some(status.total_done);
                    print_status(&status);
                }
                ScanEvent::AssetScanned {
                    asset_id,
                    outcome: AssetOutcome::Failed { message },
                } => eprintln!("failed: {} ({})", asset_id, message),
                _ => {}
            }
        }
        if finished || !scan.is_running() {
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    let elapsed = scan.elapsed();
    let (state, _) = scan.wait();
    match state {
        TaskState::Completed => {
            println!("Scan finished in {:.1}s", elapsed.as_secs_f64());
            Ok(())
        }
        TaskState::Cancelled => {
            println!("Scan stopped");
            Ok(())
        }
        TaskState::Failed(message) => bail!("scan failed: {}", message),
        TaskState::Running => Ok(()),
    }
}

fn list_groups(engine: &ScanEngine) -> Result<()> {
    let listing = engine.with_db(|db| {
        let groups = db.groups();
        groups
            .all_groups()?
            .into_iter()
            .map(|group| {
                let members = groups.members(&group.group_id)?;
                Ok::<_, photosift::Error>((group, members))
            })
            .collect::<photosift::Result<Vec<_>>>()
    })?;

    if listing.is_empty() {
        println!("No duplicate groups");
        return Ok(());
    }
    for (group, members) in listing {
        let best = group.best_asset_id.as_deref().unwrap_or("-");
        println!("{} ({} photos)", group.group_id, members.len());
        for member in members {
            let marker = if member.asset_id == best { "*" } else { " " };
            println!("  {} {}  distance {}", marker, member.asset_id, member.distance);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = parse_args();

    // Long scans log to the journal or a file; everything else to stderr.
    match cli.command {
        Command::Scan => {
            let _ = logging::init(Some(Config::config_dir().join("logs")));
        }
        _ => {
            let _ = logging::init_stderr();
        }
    }

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let library = Arc::new(FsLibrary::new(&config.library));
    let enricher = Enricher::new(Arc::new(NoopEnrichment), config.enrichment.clone());
    let engine = ScanEngine::open(&config, library, enricher)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;

    match cli.command {
        Command::Scan => run_scan(Arc::new(engine), ScanMode::Full)?,
        Command::Once => run_scan(Arc::new(engine), ScanMode::OneBatch)?,
        Command::Status => print_status(&engine.status()?),
        Command::ResetCursor => {
            engine.reset_cursor()?;
            println!("Scan cursor reset");
        }
        Command::ResetAll => {
            engine.reset_all_progress()?;
            println!("All analysis progress cleared");
        }
        Command::Groups => list_groups(&engine)?,
        Command::Blurry(limit) => {
            for (asset, verdict) in engine.blurry_assets(limit)? {
                println!(
                    "{}  sharpness {:.1} < {:.1}",
                    asset.asset_id,
                    asset.blur_score.unwrap_or_default(),
                    verdict.adjusted_threshold
                );
            }
        }
        Command::Recalc => {
            let changed = engine.recalculate_all_best_shots()?;
            println!("{} best shots changed", changed);
        }
        Command::People(limit) => {
            for asset in engine.with_db(|db| db.assets().people_assets(limit))? {
                println!("{}  faces {}", asset.asset_id, asset.face_count);
            }
        }
        Command::Labels(limit) => {
            for asset in engine.with_db(|db| db.assets().labeled_assets(limit))? {
                let Some(set) = LabelSet::from_column(asset.labels_json.as_deref())? else {
                    println!("{}", asset.asset_id);
                    continue;
                };
                let categories: Vec<&str> =
                    set.categories().into_iter().map(|c| c.as_str()).collect();
                if categories.is_empty() {
                    println!("{}  {}", asset.asset_id, set.texts().join(", "));
                } else {
                    println!(
                        "{}  [{}]  {}",
                        asset.asset_id,
                        categories.join(", "),
                        set.texts().join(", ")
                    );
                }
            }
        }
        Command::Merge { target, source } => {
            let moved = engine.merge_groups(&target, &source)?;
            println!("Moved {} photos from {} into {}", moved, source, target);
        }
        Command::Delete(ids) => {
            let deleted = engine.delete_assets(&ids)?;
            println!("Moved {} of {} photos to the trash", deleted, ids.len());
        }
    }

    Ok(())
}
