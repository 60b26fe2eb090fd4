use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use arboard::Clipboard;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tg::domain::{GridConfig, GridError, Message};
use tg::generator::{self, SyntheticGenerator};
use tg::grid::{Grid, Status};
use tg::loader;

mod controller;
mod ui;

use controller::{Controller, body_rows};
use ui::TableUI;

/// Browse and edit tabular data in the terminal.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// CSV, Parquet or Arrow file to open. Without one a sample table is shown.
    file: Option<String>,

    /// Start on a new table with this many generated rows instead.
    #[arg(long)]
    rows: Option<usize>,

    /// Seed for generated data.
    #[arg(long)]
    seed: Option<u64>,

    /// Rows per loaded page.
    #[arg(long, default_value_t = tg::domain::PAGE_SIZE)]
    page_size: usize,

    /// Simulated latency of a page load.
    #[arg(long, default_value_t = tg::domain::LOAD_LATENCY_MS)]
    latency_ms: u64,

    /// Write every new table to this CSV file.
    #[arg(long)]
    export: Option<String>,

    #[arg(long, default_value = "tg.log")]
    log_file: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_file) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }
    let result = run(args);
    ratatui::restore();
    match result {
        Err(e) => {
            error!("Terminated with {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn expand_path(path: &str) -> Result<PathBuf, GridError> {
    shellexpand::full(path)
        .map(|p| PathBuf::from(p.into_owned()))
        .map_err(|e| GridError::LoadingFailed(e.to_string()))
}

fn init_logging(log_file: &str) -> Result<(), GridError> {
    let file = File::create(expand_path(log_file)?)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn run(args: Args) -> Result<(), GridError> {
    info!("Starting tg with {:?}", args);

    // The terminal draws one row per line.
    let mut cfg = GridConfig::default()
        .row_height(1)
        .page_size(args.page_size)
        .load_latency(Duration::from_millis(args.latency_ms));
    cfg.seed = args.seed;

    let table = match (&args.file, args.rows) {
        (Some(path), _) => Some(loader::load_table(&expand_path(path)?)?),
        (None, Some(rows)) => {
            let generator = match cfg.seed {
                Some(seed) => SyntheticGenerator::seeded(seed),
                None => SyntheticGenerator::random(),
            };
            Some(generator::blank_table("Untitled Table", rows, &generator))
        }
        (None, None) => None,
    };

    let export = args.export.as_deref().map(expand_path).transpose()?;
    let mut grid = Grid::new(cfg.clone(), table).on_table_replaced(move |table| {
        info!(
            "Table replaced: \"{}\" with {} rows and {} columns",
            table.name(),
            table.len(),
            table.fields().len()
        );
        if let Some(path) = export.as_deref()
            && let Err(e) = loader::write_csv(table, path)
        {
            warn!("Exporting to {:?} failed: {e}", path);
        }
    });

    let mut ui = TableUI::new(&cfg);
    let controller = Controller::new(&cfg);
    let mut clipboard = Clipboard::new()
        .map_err(|e| warn!("No clipboard available: {e}"))
        .ok();

    let mut terminal = ratatui::init();
    let size = terminal.size()?;
    grid.update(Message::Resize(body_rows(size.height)))?;

    while grid.status != Status::Quitting {
        // Render the current view
        terminal.draw(|f| ui.draw(&grid, f))?;

        // Deferred work runs after the frame showing it was scheduled
        grid.tick(Instant::now());

        // Handle events and map to a Message
        let Some(message) = controller.handle_event(&grid)? else {
            continue;
        };
        let text = match message {
            Message::CopyCell => grid.active_cell_text(),
            Message::CopyRow => grid.active_row_text(),
            _ => None,
        };
        if let Some(text) = text
            && let Some(clipboard) = clipboard.as_mut()
        {
            match clipboard.set_text(text) {
                Ok(_) => info!("Copied to clipboard."),
                Err(e) => warn!("Error copying to clipboard: {:?}", e),
            }
        }
        grid.update(message)?;
    }

    Ok(())
}
