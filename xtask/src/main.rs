//! Task runner: generates `langdap`'s adapter-specific launch/attach
//! argument structs from a JSON Schema fragment. The `dap` crate already
//! covers the protocol-defined requests/responses/events; this tool only
//! covers the free-form `additionalData` bag those leave to each adapter.
//!
//! Offline and checked-in, not run at build time: `cargo run -p xtask --
//! generate-schema` regenerates `src/launch_args.rs` from
//! `xtask/schema/launch.json` and the output is committed rather than
//! produced by a build script.

mod schema;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "langdap workspace task runner")]
struct Cli {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand, Debug)]
enum Task {
    /// Regenerate src/launch_args.rs from xtask/schema/launch.json.
    GenerateSchema {
        #[arg(long, default_value = "xtask/schema/launch.json")]
        schema: PathBuf,

        #[arg(long, default_value = "src/launch_args.rs")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.task {
        Task::GenerateSchema { schema, out } => generate_schema(&schema, &out),
    }
}

fn generate_schema(schema_path: &PathBuf, out_path: &PathBuf) -> Result<()> {
    let text = fs::read_to_string(schema_path)
        .with_context(|| format!("reading schema {}", schema_path.display()))?;
    let doc: schema::SchemaDoc =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", schema_path.display()))?;
    let rendered = schema::render(&doc)?;
    fs::write(out_path, rendered).with_context(|| format!("writing {}", out_path.display()))?;
    println!("wrote {}", out_path.display());
    Ok(())
}
