//! result_verify - structural check of a persisted results.json
//!
//! Confirms that:
//! - `__meta__` bounds are both set or both null, and name emitted frames
//!   (the end bound may be the last available frame)
//! - Timestamps are well formed, start at zero and never go backwards
//! - Every prediction has a label, an ordered box and a confidence in [0, 1]
//!
//! Prints the result digest so two runs can be compared.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use minimap_window::storage::load_result_file;
use minimap_window::verify;

// Frame progress bars are only used by match_window.
#[allow(dead_code)]
#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "result_verify", about = "Verify a persisted match-window result file")]
struct Args {
    /// Path to results.json
    #[arg(long, default_value = "data/results.json", value_name = "PATH")]
    results: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let result = {
        let _stage = ui.stage("Load results");
        load_result_file(&args.results)?
    };

    println!("result_verify: checking {}", args.results.display());

    let report = {
        let _stage = ui.stage("Verify results");
        verify::verify_result(&result)?
    };

    if args.verbose {
        for frame in &result.frames {
            println!(
                "  {}  {}  {} detections",
                frame.frame_id,
                frame.timestamp,
                frame.predictions.len()
            );
        }
    }

    println!(
        "  window:     {} .. {}",
        result.meta.start_frame.as_deref().unwrap_or("null"),
        result.meta.end_frame.as_deref().unwrap_or("null")
    );
    if !report.end_emitted && result.meta.end_frame.is_some() {
        println!("  note:       end_frame is the last available frame, not an emitted one");
    }
    println!("  frames:     {}", report.frames);
    println!("  in window:  {}", report.window_len);
    println!("  detections: {}", report.detections);
    println!("  digest:     {}", report.digest);
    println!("OK");
    Ok(())
}
