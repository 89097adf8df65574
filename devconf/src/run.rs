use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use crate::{
    config::{ConfiguratorConfig, DEFAULT_CONFIG_PATH},
    form::Group,
    session::{Configurator, DeviceSession},
    store::FileDocumentStore,
};

#[derive(Parser, Debug)]
#[command(name = "devconf", version, about = "Compile device configuration forms from JSON Schema")]
pub struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Print the compiled form of a device as JSON.
    Form {
        /// Device document (`.json` or `.toml`).
        #[arg(long)]
        device: PathBuf,
        /// Edit URL of a nested record; the device root when omitted.
        #[arg(long)]
        url: Option<String>,
        /// Group to open: attr, child or ext.
        #[arg(long, value_parser = parse_group)]
        group: Option<Group>,
    },
    /// Print the breadcrumb trail of an edit URL.
    Trail {
        #[arg(long)]
        device: PathBuf,
        #[arg(long)]
        url: String,
    },
    /// Merge edited values into a device and print the result.
    Merge {
        #[arg(long)]
        device: PathBuf,
        /// JSON object of edited values.
        #[arg(long)]
        edits: PathBuf,
        /// Device path of the edited record.
        #[arg(long)]
        at: Option<String>,
        /// Replace OLD with NEW through every `--refs` expression.
        #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
        propagate: Option<Vec<String>>,
        /// Reference expressions such as `dicomNetworkAE[*].dicomAETitle`.
        #[arg(long, num_args = 1..)]
        refs: Vec<String>,
    },
    /// Print the JSON Schema of the settings file.
    ConfigSchema,
}

fn parse_group(s: &str) -> Result<Group, String> {
    Group::parse(s).ok_or_else(|| format!("unknown group `{s}`, expected attr, child or ext"))
}

/// Execute one command, printing its result to stdout.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfiguratorConfig::load(&cli.config).await?;

    match cli.cmd {
        Cmd::Form { device, url, group } => {
            let mut session = open_file(&config, &device).await?;
            let Some(form) = session.compile_form(url.as_deref(), group).await else {
                bail!("no form for {}", url.as_deref().unwrap_or("device root"));
            };
            print_json(&form)
        }
        Cmd::Trail { device, url } => {
            let mut session = open_file(&config, &device).await?;
            print_json(&session.trail(&url).await)
        }
        Cmd::Merge {
            device,
            edits,
            at,
            propagate,
            refs,
        } => {
            let mut session = open_file(&config, &device).await?;
            let edits = match read_document(&edits).await? {
                Value::Object(map) => map,
                other => bail!("edits must be an object, got {other}"),
            };
            if !session.apply_edits(at.as_deref(), &edits) {
                bail!("cannot write at {}", at.as_deref().unwrap_or_default());
            }
            if let Some([old, new]) = propagate.as_deref() {
                let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
                for e in session.propagate(&Value::from(old.as_str()), &Value::from(new.as_str()), &refs) {
                    eprintln!("warning: {e}");
                }
            }
            print_json(session.device())
        }
        Cmd::ConfigSchema => print_json(&ConfiguratorConfig::json_schema()?),
    }
}

/// Open a session on a device file; siblings of the file form the store.
async fn open_file(config: &ConfiguratorConfig, path: &Path) -> anyhow::Result<DeviceSession> {
    let device = read_document(path).await?;
    let id = device
        .get("dicomDeviceName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let dir = path.parent().unwrap_or(Path::new("."));

    let configurator =
        Configurator::with_store(config.clone(), Arc::new(FileDocumentStore::new(dir)));
    configurator.session(&id, device).await
}

/// Read a JSON or TOML document, chosen by file extension.
async fn read_document(path: &Path) -> anyhow::Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let value = match ext {
        "json" => serde_json::from_str(&content)?,
        "toml" => {
            let v: toml::Value = toml::from_str(&content)?;
            serde_json::to_value(v)?
        }
        _ => bail!("Unsupported document extension: {ext:?}"),
    };
    Ok(value)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
