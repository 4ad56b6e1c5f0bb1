//! toolbridge CLI
//!
//! Starts the configured tool servers, runs one request against them and
//! shuts everything down again.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use toolbridge::domains::github::DEFAULT_EXTENSIONS;
use toolbridge::domains::rag::{
    IndexSummary, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_STORE, DEFAULT_TOP_K,
};
use toolbridge::domains::tasks::GetTasks;
use toolbridge::domains::RerankMode;
use toolbridge::tool_client::ToolInvocation;
use toolbridge::{AppContext, Domain};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about = "Supervised clients for assistant tool servers")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to tool-servers.yaml (defaults to $TOOLBRIDGE_CONFIG or an upward search)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every server and report its state
    Status,

    /// Call any tool on a configured server
    Call {
        /// Server name from the config (weather, news, mobile, ollama, github, tasks)
        server: String,

        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Override the call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Current weather for a city
    Weather {
        city: String,

        /// Include the forecast
        #[arg(long)]
        forecast: bool,
    },

    /// Ask the knowledge base
    Ask {
        query: String,

        /// Vector store to search
        #[arg(long, default_value = DEFAULT_STORE)]
        store: String,

        /// Chunks to retrieve
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,

        /// Re-ranking mode (light or strict)
        #[arg(long)]
        rerank: Option<RerankMode>,
    },

    /// Embed a text file and append it to a vector store
    Index {
        /// Vector store to extend
        store: String,

        /// Text or markdown file to index
        file: PathBuf,

        /// Characters per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,

        /// Characters shared by neighbouring chunks
        #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
        overlap: u32,
    },

    /// Index files from a GitHub repository into a vector store
    IndexRepo {
        /// Repository as owner/name
        repo: String,

        /// Vector store to extend
        #[arg(long, default_value = DEFAULT_STORE)]
        store: String,

        /// File suffixes to include (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,
    },

    /// List tasks
    Tasks {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    toolbridge::init_tracing();

    let (path, config) = toolbridge::resolve_config(cli.config.as_deref())
        .context("failed to load tool server config")?;
    let ctx = AppContext::from_config(&config)
        .with_context(|| format!("invalid server entry in {}", path.display()))?;

    let failures = ctx.start_all().await;
    let outcome = run(&ctx, cli.command, &failures).await;
    ctx.shutdown_all().await;
    outcome
}

async fn run(
    ctx: &AppContext,
    command: Commands,
    failures: &[(Domain, toolbridge::ToolError)],
) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            for (domain, state) in ctx.status() {
                println!("{:<8} {state}", domain.key());
            }
            for (domain, err) in failures {
                eprintln!("{}: {err}", domain.key());
            }
        }

        Commands::Call {
            server,
            tool,
            args,
            timeout,
        } => {
            let Some(domain) = Domain::from_key(&server) else {
                bail!("unknown server '{server}'");
            };
            let Some(client) = ctx.client(domain) else {
                bail!("server '{server}' is not configured");
            };
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }

            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| client.call_timeout());
            match client
                .call_with(ToolInvocation::new(&tool, arguments, timeout))
                .await
            {
                Ok(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
                Err(e) => {
                    eprintln!("{e}");
                    println!("{}", domain.unavailable_message());
                }
            }
        }

        Commands::Weather { city, forecast } => {
            let report = match &ctx.weather {
                Some(weather) => weather.get_weather(&city, forecast).await,
                None => None,
            };
            match report {
                Some(report) => println!("{}", report.weather_info),
                None => println!("{}", Domain::Weather.unavailable_message()),
            }
        }

        Commands::Ask {
            query,
            store,
            top_k,
            rerank,
        } => {
            let answer = match &ctx.rag {
                Some(rag) => rag.answer_question(&store, &query, top_k, rerank).await,
                None => None,
            };
            match answer {
                Some(answer) => {
                    println!("{}", answer.answer);
                    if !answer.sources.is_empty() {
                        println!();
                        println!("Sources:");
                        for source in &answer.sources {
                            match source.as_str() {
                                Some(s) => println!("  - {s}"),
                                None => println!("  - {source}"),
                            }
                        }
                    }
                }
                None => println!("{}", Domain::Ollama.unavailable_message()),
            }
        }

        Commands::Index {
            store,
            file,
            chunk_size,
            overlap,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let summary = match &ctx.rag {
                Some(rag) => rag.index_text(&store, &text, chunk_size, overlap).await,
                None => None,
            };
            report_index(&store, summary);
        }

        Commands::IndexRepo {
            repo,
            store,
            extensions,
        } => {
            let Some((owner, name)) = repo.split_once('/') else {
                bail!("repository must be given as owner/name");
            };
            let extensions: Vec<&str> = if extensions.is_empty() {
                DEFAULT_EXTENSIONS.to_vec()
            } else {
                extensions.iter().map(String::as_str).collect()
            };
            let summary = ctx
                .index_repository(owner, name, &store, &extensions)
                .await;
            report_index(&store, summary);
        }

        Commands::Tasks { status } => {
            let tasks = match &ctx.tasks {
                Some(tasks) => {
                    tasks
                        .get_tasks(GetTasks {
                            status,
                            ..GetTasks::default()
                        })
                        .await
                }
                None => None,
            };
            match tasks {
                Some(tasks) => println!("{}", serde_json::to_string_pretty(&tasks)?),
                None => println!("{}", Domain::Tasks.unavailable_message()),
            }
        }
    }

    Ok(())
}

fn report_index(store: &str, summary: Option<IndexSummary>) {
    match summary {
        Some(summary) => println!(
            "Added {} chunks to {store} ({} total)",
            summary.added, summary.total
        ),
        None => println!("{}", Domain::Ollama.unavailable_message()),
    }
}
