use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hacktrack_core::Project;
use hacktrack_storage::HttpFetcher;
use hacktrack_sync::{sync_project_data, MergeOutcome, SyncConfig, SyncReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hacktrack-cli")]
#[command(about = "Hackathon project-data tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the normalized record a reference URL resolves to.
    Fetch { reference: String },
    /// Score a project stored as JSON.
    Score {
        project: PathBuf,
        #[arg(long, default_value_t = 0)]
        activities: usize,
    },
    /// Sync a project stored as JSON from its autotext URL and print the result.
    Sync {
        project: PathBuf,
        #[arg(long, default_value_t = 0)]
        activities: usize,
    },
    /// Render the embed box for a line linking a datapackage.json.
    Box { line: String },
}

async fn read_project(path: &Path) -> Result<Project> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hacktrack=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command {
        Commands::Fetch { reference } => {
            let http = HttpFetcher::new(config.http_client_config())?;
            let dispatcher = config.dispatcher().await?;
            let Some(record) = dispatcher.get_project_data(&http, &reference).await else {
                bail!("no project data at {reference}");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Score {
            project,
            activities,
        } => {
            let project = read_project(&project).await?;
            println!("{}", project.calculate_score(activities));
        }
        Commands::Sync {
            project,
            activities,
        } => {
            let mut project = read_project(&project).await?;
            if !project.is_autoupdateable() {
                bail!("project {} has no autotext_url", project.id);
            }
            let http = HttpFetcher::new(config.http_client_config())?;
            let dispatcher = config.dispatcher().await?;
            let Some(record) = dispatcher
                .get_project_data(&http, &project.autotext_url)
                .await
            else {
                bail!("{} ({})", SyncReport::NoData.message(), project.autotext_url);
            };
            let outcome = sync_project_data(&mut project, &record);
            if let MergeOutcome::Updated { fields } = &outcome {
                tracing::info!(source = %record.kind, fields = ?fields, "project updated");
            }
            let report = if project.autotext.trim().is_empty() {
                SyncReport::EmptyReadme {
                    source: record.kind,
                }
            } else {
                SyncReport::Synced {
                    source: record.kind,
                    bytes: project.autotext.len(),
                    changed: outcome.changed(),
                }
            };
            eprintln!("{}", report.message());
            project.update(activities);
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Commands::Box { line } => {
            if !hacktrack_adapters::chk_datapackage(&line) {
                bail!("{line:?} does not link a datapackage.json");
            }
            let http = HttpFetcher::new(config.http_client_config())?;
            let Some(html) = hacktrack_adapters::box_datapackage(&line, &http, None).await else {
                bail!("no data package box for {line:?}");
            };
            println!("{html}");
        }
    }

    Ok(())
}
