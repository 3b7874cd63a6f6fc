//! hdfmap command-line interface.
//!
//! Builds a namespace from the first file and applies it to every file given.

use clap::{Parser, Subcommand};

use hdfmap_core::Value;
use hdfmap_io::{create_map, multi_eval, multi_format, multi_get_data, open_source};
use hdfmap_namespace::{HdfMap, MapConfig};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    HdfmapIo(#[from] hdfmap_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] hdfmap_core::Error),

    #[error("no input files")]
    NoInput,
}

/// Name-based access and expressions over HDF5/NeXus files.
#[derive(Parser)]
#[command(name = "hdfmap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with namespace options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the namespace of a file
    Info {
        /// Input file
        file: String,

        /// Also list the scannables and groups
        #[arg(short, long)]
        all: bool,
    },

    /// Evaluate an expression in each file
    Eval {
        /// Input file(s); the first one defines the namespace
        #[arg(required = true)]
        files: Vec<String>,

        /// Expression to evaluate
        #[arg(short, long)]
        expression: String,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fill a format template from each file
    Format {
        /// Input file(s); the first one defines the namespace
        #[arg(required = true)]
        files: Vec<String>,

        /// Template with {expression[:spec]} fields
        #[arg(short, long)]
        template: String,
    },

    /// Read named datasets from each file
    Get {
        /// Input file(s); the first one defines the namespace
        #[arg(required = true)]
        files: Vec<String>,

        /// Names, paths or classes to read
        #[arg(short, long, required = true, num_args = 1..)]
        names: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => MapConfig::from_file(path)?,
        None => MapConfig::default(),
    };

    match cli.command {
        Commands::Info { file, all } => {
            let map = create_map(&file, &config, &open_source)?;
            print!("{map}");
            if all {
                println!("\nScannables:\n{}", map.info_scannables());
                println!("\nGroups:\n{}", map.info_groups());
            }
            for issue in map.scan_issues() {
                eprintln!("warning: {issue}");
            }
        }
        Commands::Eval {
            files,
            expression,
            json,
        } => {
            let map = first_map(&files, &config)?;
            let values = multi_eval(&files, &expression, &map, &open_source)?;
            print_values(&files, &[expression.as_str()], values.into_iter().map(|v| vec![v]), json);
        }
        Commands::Format { files, template } => {
            let map = first_map(&files, &config)?;
            for line in multi_format(&files, &template, &map, &open_source)? {
                println!("{line}");
            }
        }
        Commands::Get { files, names, json } => {
            let map = first_map(&files, &config)?;
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let rows = multi_get_data(&files, &names, &map, &open_source)?;
            print_values(&files, &names, rows.into_iter(), json);
        }
    }

    Ok(())
}

fn first_map(files: &[String], config: &MapConfig) -> Result<HdfMap> {
    let first = files.first().ok_or(CliError::NoInput)?;
    Ok(create_map(first, config, &open_source)?)
}

fn print_values(
    files: &[String],
    columns: &[&str],
    rows: impl Iterator<Item = Vec<Value>>,
    json: bool,
) {
    if json {
        let mut out = serde_json::Map::new();
        for (file, row) in files.iter().zip(rows) {
            let entry: serde_json::Map<String, serde_json::Value> = columns
                .iter()
                .zip(&row)
                .map(|(name, value)| ((*name).to_string(), to_json(value)))
                .collect();
            out.insert(file.clone(), serde_json::Value::Object(entry));
        }
        println!("{}", serde_json::Value::Object(out));
        return;
    }
    for (file, row) in files.iter().zip(rows) {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        let cells = cells.join(", ");
        println!("{file}: {cells}");
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.clone()),
        Value::Array(array) => nested(&array.view(), &|x: &f64| {
            serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number)
        }),
        Value::TextArray(array) => nested(&array.view(), &|s: &String| Json::String(s.clone())),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Dataset(dataset) => Json::String(dataset.path().to_string()),
    }
}

fn nested<T>(
    array: &ndarray::ArrayViewD<'_, T>,
    item: &dyn Fn(&T) -> serde_json::Value,
) -> serde_json::Value {
    if array.ndim() == 0 {
        return array.iter().next().map_or(serde_json::Value::Null, item);
    }
    serde_json::Value::Array(array.outer_iter().map(|sub| nested(&sub, item)).collect())
}
