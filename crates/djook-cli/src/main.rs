use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use djook_core::types::sniff_image;
use djook_core::ReferenceDataset;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "djook", about = "djook person search CLI")]
struct Cli {
    /// Base URL of the djookd daemon
    #[arg(long, global = true, env = "DJOOK_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find known persons in a photo
    Search {
        /// JPEG or PNG file to search
        image: PathBuf,
    },
    /// Show daemon status
    Status,
    /// Load and validate a reference dataset manifest without the daemon
    Dataset {
        #[arg(short, long, env = "DJOOK_DATASET", default_value = "dataset/persons.toml")]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/');

    match cli.command {
        Commands::Search { image } => {
            let bytes = read_image(&image)?;
            let url = format!("{server}/search-person");
            tracing::debug!(%url, len = bytes.len(), "sending search request");

            let response = reqwest::Client::new()
                .post(&url)
                .json(&serde_json::json!({ "image": STANDARD.encode(&bytes) }))
                .send()
                .await
                .with_context(|| format!("failed to reach {server}"))?;

            let status = response.status();
            let body: serde_json::Value = response
                .json()
                .await
                .context("daemon returned a non-JSON body")?;
            if !status.is_success() {
                let message = body["error"].as_str().unwrap_or("unknown error");
                bail!("search failed ({status}): {message}");
            }

            let names: Vec<String> =
                serde_json::from_value(body).context("unexpected search response")?;
            tracing::debug!(found = names.len(), "search finished");
            println!("{}", render_names(&names));
        }
        Commands::Status => {
            tracing::debug!(server, "querying status");
            let body: serde_json::Value = reqwest::get(format!("{server}/status"))
                .await
                .with_context(|| format!("failed to reach {server}"))?
                .json()
                .await
                .context("daemon returned a non-JSON body")?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Dataset { manifest } => {
            tracing::debug!(manifest = %manifest.display(), "loading dataset");
            let dataset = ReferenceDataset::load(&manifest)
                .with_context(|| format!("failed to load {}", manifest.display()))?;
            println!("{} person(s) in {}", dataset.len(), manifest.display());
            for person in &dataset {
                println!("  {:<20} {:>9} bytes", person.name, person.image.len());
            }
        }
    }

    Ok(())
}

/// Read an image and check its header before it costs a round trip.
fn read_image(path: &Path) -> Result<Vec<u8>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (format, width, height) = sniff_image(&bytes)
        .with_context(|| format!("{} is not a usable image", path.display()))?;
    tracing::debug!(?format, width, height, "image ok");
    Ok(bytes)
}

/// One name per line, or a fixed message when nobody was recognized.
fn render_names(names: &[String]) -> String {
    if names.is_empty() {
        "no known person found".to_string()
    } else {
        names.join("\n")
    }
}
