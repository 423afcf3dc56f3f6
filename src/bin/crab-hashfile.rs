use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Open (or create) a crab-hashfile database and run a small demo workload
/// against it.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the database file. Created if it doesn't exist.
    path: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), crab_hashfile::AllocError> {
    log::info!("opening {}", args.path.display());
    let mut engine = crab_hashfile::Engine::create(&args.path)?;

    let mut tags = engine.root_multimap()?;
    for (tag, items) in DEMO_WORKLOAD {
        for item in *items {
            tags.insert(&mut engine, tag.as_bytes(), item.as_bytes())?;
        }
    }

    for key in tags.iterate_keys(&engine) {
        let key = String::from_utf8_lossy(&key);
        let mut values: Vec<String> = tags
            .values_of(&engine, key.as_bytes())
            .into_iter()
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .collect();
        values.sort();
        log::info!("{key}: {values:?}");
    }

    engine.sync()?;
    log::info!("done, database synced to disk");
    Ok(())
}

const DEMO_WORKLOAD: &[(&str, &[&str])] = &[
    ("fruit", &["apple", "pear", "plum"]),
    ("veggie", &["carrot", "kale"]),
];
