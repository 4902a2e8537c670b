use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod allocation;
mod error;
#[cfg(test)]
mod fixtures;
mod inputs;
mod runtime;
mod settings;
mod stages;
mod store;

use settings::Settings;
use stages::{StageEnv, StageTiming};
use store::DataContext;

#[derive(Parser)]
#[command(name = "baseyear-prep", about = "Base-year data preprocessing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load raw CSV tables into the store.
    Import {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        csv_dir: PathBuf,
        #[arg(long, value_delimiter = ',', default_value = "buildings,households,parcels")]
        tables: Vec<String>,
    },
    /// Run every preprocessing stage in dependency order.
    Run {
        #[arg(long)]
        store: PathBuf,
        /// Directory holding the control, override, edit and target CSVs.
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        settings: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        /// Fail the run when a baseline data check fails.
        #[arg(long)]
        strict_checks: bool,
    },
    /// Print the resolved stage order.
    Plan {
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Write a stored table as CSV.
    Export {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long)]
        out: PathBuf,
    },
}

fn import(store: &Path, csv_dir: &Path, tables: &[String]) -> Result<()> {
    let mut ctx = DataContext::open(store)?;
    for name in tables {
        let path = csv_dir.join(format!("{name}.csv"));
        let table = store::read_csv_table(&path, name)
            .with_context(|| format!("import {}", path.display()))?;
        ctx.commit(name, table)?;
    }
    Ok(())
}

struct RunOptions<'a> {
    store: &'a Path,
    data_dir: &'a Path,
    settings: &'a Settings,
    seed: Option<u64>,
    strict_checks: bool,
}

fn run_pipeline(opts: &RunOptions<'_>) -> Result<Vec<StageTiming>> {
    let seed = runtime::detect_seed(opts.seed);
    tracing::info!(seed = seed.value, source = %seed.source, "sampling seed");
    let mut rng = seed.rng();

    let mut ctx = DataContext::open(opts.store)?;
    let stored = ctx.stored_tables()?;
    tracing::info!(store = %ctx.root().display(), tables = stored.len(), "store opened");
    let ordered = stages::plan(stages::default_stages(), &stored)?;
    let env = StageEnv {
        settings: opts.settings,
        data_dir: opts.data_dir,
        strict_checks: opts.strict_checks,
    };
    stages::run_all(&ordered, &mut ctx, &env, &mut rng)
}

fn print_plan(store: Option<&Path>) -> Result<()> {
    let stored = match store {
        Some(dir) => DataContext::open(dir)?.stored_tables()?,
        None => ["buildings", "households", "parcels"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };
    let ordered = stages::plan(stages::default_stages(), &stored)?;
    for (k, s) in ordered.iter().enumerate() {
        println!(
            "{:>2}. {:<28} reads={:?} writes={:?} updates={:?}",
            k + 1,
            s.name(),
            s.reads(),
            s.writes(),
            s.updates()
        );
    }
    Ok(())
}

fn export(store: &Path, table: &str, out: &Path) -> Result<()> {
    let mut ctx = DataContext::open(store)?;
    let t = ctx.read(table)?;
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
    }
    store::write_csv_table(out, t, "id")?;
    tracing::info!(table, rows = t.len(), out = %out.display(), "exported");
    Ok(())
}

fn main() -> Result<()> {
    runtime::configure_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Import {
            store,
            csv_dir,
            tables,
        } => import(&store, &csv_dir, &tables),
        Command::Run {
            store,
            data_dir,
            settings,
            seed,
            strict_checks,
        } => {
            let settings = Settings::load(settings.as_deref())?;
            let timings = run_pipeline(&RunOptions {
                store: &store,
                data_dir: &data_dir,
                settings: &settings,
                seed,
                strict_checks,
            })?;
            for t in &timings {
                println!("{:<28} {:>9.2}s", t.name, t.seconds);
            }
            Ok(())
        }
        Command::Plan { store } => print_plan(store.as_deref()),
        Command::Export { store, table, out } => export(&store, &table, &out),
    }
}
