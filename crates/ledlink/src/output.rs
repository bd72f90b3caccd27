use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ledlink_peer::StripStatusEntry;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct StatusOutput<'a> {
    pub driver: &'a str,
    pub strips: &'a [StripStatusEntry],
}

/// Result of a `play` run.
#[derive(Debug, Serialize)]
pub struct PlayOutput {
    pub driver: String,
    pub effect: String,
    pub frequency_hz: u32,
    pub strips: Vec<u8>,
    pub uploaded_configuration: bool,
    pub stopped_by: String,
}

pub fn print_status(out: &StatusOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(out)),
        OutputFormat::Table => println!("{}", status_table(out.strips)),
        OutputFormat::Pretty => {
            println!("Driver {}:", out.driver);
            if out.strips.is_empty() {
                println!("  (no strips configured)");
            }
            for entry in out.strips {
                println!(
                    "  strip {:>3}  {:<16}  {}",
                    entry.index,
                    entry.status.to_string(),
                    entry.strip_id
                );
            }
        }
        OutputFormat::Raw => {
            for entry in out.strips {
                println!("{} {}", entry.index, entry.status);
            }
        }
    }
}

pub fn print_play(out: &PlayOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(out)),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Played {} at {} Hz on {}", out.effect, out.frequency_hz, out.driver);
            println!("  Strips:        {}", join(&out.strips));
            println!(
                "  Configuration: {}",
                if out.uploaded_configuration {
                    "uploaded"
                } else {
                    "already current"
                }
            );
            println!("  Stopped by:    {}", out.stopped_by);
        }
        OutputFormat::Raw => println!("{}", out.stopped_by),
    }
}

fn status_table(strips: &[StripStatusEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["INDEX", "STATUS", "STRIP ID"]);
    for entry in strips {
        table.add_row(vec![
            entry.index.to_string(),
            entry.status.to_string(),
            entry.strip_id.to_string(),
        ]);
    }
    table
}

fn join(indices: &[u8]) -> String {
    indices
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
