mod config;
mod definition;
mod error;

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use mcp::ToolServer;
use runtime::ToolSpec;
use serde_json::{Map, Value};
use storage::{Needle, NeedleStore};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use definition::Definition;
use error::{Error, Result};

const CONFIG_FILE: &str = "needle.toml";
const DB_FILE: &str = "needles.db";
const DEFAULT_LOG_FILTER: &str = "warn,needle=info,runtime=info,mcp=info,cli=info";

#[derive(Parser)]
#[command(name = "needle")]
#[command(about = "Small typed Lua tools, run in a sandbox and served over MCP", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a needle from a TOML or JSON definition (updates one with the same name)
    Add {
        /// Definition file
        file: PathBuf,
    },
    /// List stored needles
    List,
    /// Show a needle's definition and input schema
    Show { name: String },
    /// Remove a needle
    Remove { name: String },
    /// Run a needle once and print its result
    Run {
        name: String,
        /// Argument as KEY=VALUE (repeatable)
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// Arguments as a JSON object; --arg values override it
        #[arg(long, value_name = "OBJECT")]
        json: Option<String>,
    },
    /// Serve every needle as an MCP tool on stdin/stdout
    Serve,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Add { file } => cmd_add(&file),
        Commands::List => cmd_list(),
        Commands::Show { name } => cmd_show(&name),
        Commands::Remove { name } => cmd_remove(&name),
        Commands::Run { name, args, json } => {
            cmd_run(&cli.config, &name, &args, json.as_deref()).await
        }
        Commands::Serve => cmd_serve(&cli.config).await,
    }
}

fn cmd_add(file: &Path) -> Result<()> {
    let definition = Definition::load(file)?;
    let store = open_store(true)?;

    let existing = store.find_by_name(&definition.name)?;
    let updating = existing.is_some();
    let needle = definition.into_needle(existing);
    store.save(&needle)?;

    let verb = if updating { "Updated" } else { "Added" };
    println!("{verb} needle '{}' ({})", needle.name, needle.id);
    Ok(())
}

fn cmd_list() -> Result<()> {
    let store = open_store(false)?;
    let needles = store.list()?;

    if needles.is_empty() {
        println!("No needles found.");
        return Ok(());
    }

    println!(
        "{:<24}  {:<8}  {:<4}  {:<16}  DESCRIPTION",
        "NAME", "RETURNS", "ARGS", "UPDATED"
    );
    println!("{}", "-".repeat(80));

    for needle in needles {
        let updated = Local
            .from_utc_datetime(&needle.updated_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        println!(
            "{:<24}  {:<8}  {:<4}  {:<16}  {}",
            needle.name,
            needle.return_type.to_string(),
            needle.args.len(),
            updated.to_string(),
            first_line(&needle.description)
        );
    }

    Ok(())
}

fn cmd_show(name: &str) -> Result<()> {
    let store = open_store(false)?;
    let needle = find_needle(&store, name)?;

    println!("Name:        {}", needle.name);
    println!("ID:          {}", needle.id);
    if !needle.description.is_empty() {
        println!("Description: {}", needle.description);
    }
    println!("Returns:     {}", needle.return_type);
    println!("Updated:     {}", Local.from_utc_datetime(&needle.updated_at.naive_utc()));

    if !needle.args.is_empty() {
        println!("\nArguments:");
        for arg in &needle.args {
            let mut line = format!("  {}: {}", arg.name, arg.value_type);
            match (&arg.default_value, arg.required) {
                (Some(default), _) => line.push_str(&format!(" = {default}")),
                (None, false) => line.push_str(" (optional)"),
                (None, true) => {}
            }
            if !arg.description.is_empty() {
                line.push_str(&format!("  - {}", arg.description));
            }
            println!("{line}");
        }
    }

    let schema = serde_json::to_string_pretty(&ToolSpec::from(&needle).input_schema)
        .unwrap_or_default();
    println!("\nInput schema:\n{schema}");
    println!("\nCode:\n{}", needle.code);
    Ok(())
}

fn cmd_remove(name: &str) -> Result<()> {
    let store = open_store(false)?;
    let needle = find_needle(&store, name)?;
    store.delete(needle.id)?;
    println!("Removed needle '{}'", needle.name);
    Ok(())
}

async fn cmd_run(config_path: &Path, name: &str, pairs: &[String], json: Option<&str>) -> Result<()> {
    let arguments = build_arguments(json, pairs)?;
    let store = open_store(false)?;
    let needle = find_needle(&store, name)?;

    let executor = load_config(config_path)?.executor()?;
    let result = executor.execute_json(&arguments, &needle).await?;
    println!("{result}");
    Ok(())
}

async fn cmd_serve(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let executor = config.executor()?;
    let store = open_store(true)?;

    tracing::info!(
        sandbox = %config.sandbox.root.display(),
        needles = store.list()?.len(),
        "serving needles over stdio"
    );
    ToolServer::new(store, executor).serve_stdio().await?;
    Ok(())
}

/// Merge `--json` and `--arg` input into one argument map.
///
/// `--arg` values stay strings; the needle's declared types decide how
/// they are read.
fn build_arguments(json: Option<&str>, pairs: &[String]) -> Result<Map<String, Value>> {
    let mut arguments = match json {
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(Error::InvalidArgument("--json must be a JSON object".into())),
            Err(e) => return Err(Error::InvalidArgument(format!("--json: {e}"))),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::InvalidArgument(format!("expected KEY=VALUE, got '{pair}'")))?;
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!("missing key in '{pair}'")));
        }
        arguments.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(arguments)
}

fn find_needle(store: &NeedleStore, name: &str) -> Result<Needle> {
    store
        .find_by_name(name)?
        .ok_or_else(|| Error::NeedleNotFound {
            name: name.to_string(),
        })
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn open_store(create: bool) -> Result<NeedleStore> {
    let data_dir = dirs_data_dir().unwrap_or_else(|| ".needle".into());
    let db_path = data_dir.join(DB_FILE);

    if !db_path.exists() {
        if !create {
            return Err(Error::DatabaseNotFound { path: db_path });
        }
        std::fs::create_dir_all(&data_dir)?;
    }

    Ok(NeedleStore::open(&db_path)?)
}

fn dirs_data_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("NEEDLE_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/needle"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("needle"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("needle"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "loading config");
        Ok(Config::load(path)?)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using restrictive defaults");
        Ok(Config::default_config())
    }
}
