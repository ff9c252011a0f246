use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use sound_weaver::blobstore::BlobStore;
use sound_weaver::config::Config;
use sound_weaver::datastore::Datastore;
use sound_weaver::fetch::HttpMediaFetcher;
use sound_weaver::logging;
use sound_weaver::messenger::GraphApiClient;
use sound_weaver::prompts::PromptCounter;
use sound_weaver::server::{self, AppContext};
use sound_weaver::store::{DocumentStore, SqliteStore};

#[derive(Parser)]
#[command(name = "sound_weaver")]
#[command(about = "Messenger chatbot backend that archives daily voice notes")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Port to bind; overrides the PORT environment variable
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create a new prompt (administrative)
    CreatePrompt {
        /// Question the prompt asks
        #[arg(long)]
        text: String,
        /// Window start, `2024-01-04 00:00:00` or RFC 3339
        #[arg(long)]
        begins: String,
        /// Window end, same formats as --begins
        #[arg(long)]
        ends: String,
    },
    /// Choose which prompt new submissions are recorded against
    SetActivePrompt {
        /// Prompt id; omit to clear the active prompt
        #[arg(long)]
        id: Option<i64>,
    },
    /// List registered users
    Users,
}

fn parse_datetime(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("cannot parse datetime {raw:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::from_env();

    // One document-store connection for the whole process; serve teardown
    // happens on exit below.
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let docs: Arc<dyn DocumentStore> = store.clone();
    let datastore = Datastore::new(docs.clone(), BlobStore::new(&config.voices_dir));
    let prompts = PromptCounter::new(docs);
    // Repairs a crash between a prompt insert and its counter advance.
    prompts.reconcile().await?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let timeout = Duration::from_secs(config.http_timeout_secs);
            let platform = Arc::new(GraphApiClient::new(
                &config.graph_api_base,
                &config.page_access_token,
                timeout,
            )?);
            let fetcher = Arc::new(HttpMediaFetcher::new(timeout)?);

            info!(port, "starting webhook server");
            let ctx = Arc::new(AppContext {
                config,
                datastore,
                prompts,
                platform,
                fetcher,
            });
            server::start_server(ctx, port).await?;
        }
        Commands::CreatePrompt { text, begins, ends } => {
            let begins = parse_datetime(&begins)?;
            let ends = parse_datetime(&ends)?;
            let id = prompts.create_prompt(&text, begins, ends).await?;
            println!("Created prompt {id}");
        }
        Commands::SetActivePrompt { id } => {
            prompts.set_active_prompt(id).await?;
            match id {
                Some(id) => println!("Prompt {id} is now active"),
                None => println!("Cleared the active prompt"),
            }
        }
        Commands::Users => {
            for user in datastore.get_users().await? {
                println!(
                    "{}\t{}\t{} {}",
                    user.id,
                    user.username,
                    user.first_name,
                    user.last_name.as_deref().unwrap_or("")
                );
            }
        }
    }

    store.shutdown();
    Ok(())
}
