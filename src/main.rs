//! # Chat Universe CLI (`chatu`)
//!
//! The `chatu` binary is the primary interface for Chat Universe. It
//! provides commands for database initialization, importing normalized
//! conversation exports, browsing providers, chats, terms and the thread
//! network, running reindex jobs, hybrid search, and embedding backfill.
//!
//! ## Usage
//!
//! ```bash
//! chatu --config ./config/chatu.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatu init` | Create the SQLite database and run schema migrations |
//! | `chatu import <root>` | Ingest normalized conversation JSON files |
//! | `chatu stats` | Corpus counts and per-provider breakdown |
//! | `chatu providers` | List providers |
//! | `chatu chats <provider>` | List a provider's chats |
//! | `chatu chat <id>` / `chatu turns <id>` | Show one chat / its turns |
//! | `chatu network <id>` | Co-occurrence edges around a chat |
//! | `chatu terms <term>` | Occurrences of a term with context |
//! | `chatu parallel` | Strongest thread pairs across the universe |
//! | `chatu reindex` | Rebuild lexicon, occurrences and edges |
//! | `chatu runs` | Ingest run history |
//! | `chatu search "<query>"` | Hybrid full-text + semantic search |
//! | `chatu embed pending` | Backfill missing or stale embeddings |

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use chat_universe::browse::{self, Paging};
use chat_universe::search::SearchOptions;
use chat_universe::{config, embed_cmd, import, jobs, logging, migrate, search, stats};

/// Chat Universe CLI: a local-first corpus of AI assistant chat exports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chatu.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chatu",
    about = "Chat Universe: index, connect and search your AI assistant chat exports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chatu.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Pagination and output flags shared by listing commands.
#[derive(Args, Clone, Copy)]
struct PageArgs {
    /// Maximum number of items (default 50, at most 500).
    #[arg(long, default_value_t = 50)]
    limit: i64,

    /// Number of items to skip.
    #[arg(long, default_value_t = 0)]
    offset: i64,

    /// Print the raw JSON page.
    #[arg(long)]
    json: bool,
}

impl From<PageArgs> for Paging {
    fn from(args: PageArgs) -> Self {
        Paging {
            limit: args.limit,
            offset: args.offset,
            json: args.json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Import normalized conversation exports from a directory.
    ///
    /// Files that cannot be parsed are quarantined and listed in a policy
    /// report next to the database.
    Import {
        /// Directory to scan.
        root: PathBuf,
    },

    /// Show corpus statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// List providers with account, thread and turn counts.
    Providers {
        #[command(flatten)]
        page: PageArgs,
    },

    /// List a provider's chats, most recently updated first.
    Chats {
        /// Provider id (`chatgpt`, `claude`, `gemini`, `grok`, `copilot`).
        provider: String,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Show one chat.
    Chat {
        /// Thread id.
        id: String,
        #[arg(long)]
        json: bool,
    },

    /// List a chat's turns in order.
    Turns {
        /// Thread id.
        id: String,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Show thematic edges touching a chat.
    Network {
        /// Thread id.
        id: String,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Find occurrences of a term, with surrounding context.
    Terms {
        term: String,
        /// Restrict to one provider.
        #[arg(long)]
        provider: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },

    /// List the strongest thematic edges across the universe.
    Parallel {
        /// Only edges between threads of different providers.
        #[arg(long)]
        cross_provider: bool,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Rebuild the lexicon, term occurrences and thematic edges.
    Reindex {
        /// Look up an earlier reindex run instead of starting one.
        #[arg(long)]
        status: Option<String>,

        /// Only recompute lexicon document frequencies.
        #[arg(long)]
        repair_doc_freq: bool,
    },

    /// Show ingest runs, or one run by id.
    Runs {
        id: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Hybrid search over chat turns.
    Search {
        query: String,

        /// Filter by document source id; `claude` also matches unlinked units.
        #[arg(long)]
        source: Option<String>,

        /// Filter by document format.
        #[arg(long)]
        format: Option<String>,

        /// Only units on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only units on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        fts_weight: Option<f64>,

        #[arg(long)]
        semantic_weight: Option<f64>,

        /// Fall back to full-text only when the embedding backend is
        /// unavailable.
        #[arg(long)]
        keyword_fallback: bool,

        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed units that are missing or have stale embeddings.
    Pending {
        /// Maximum number of units to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { root } => {
            import::run_import(&cfg, &root).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Providers { page } => {
            browse::run_providers(&cfg, page.into()).await?;
        }
        Commands::Chats { provider, page } => {
            browse::run_chats(&cfg, &provider, page.into()).await?;
        }
        Commands::Chat { id, json } => {
            browse::run_chat(&cfg, &id, json).await?;
        }
        Commands::Turns { id, page } => {
            browse::run_turns(&cfg, &id, page.into()).await?;
        }
        Commands::Network { id, page } => {
            browse::run_network(&cfg, &id, page.into()).await?;
        }
        Commands::Terms {
            term,
            provider,
            page,
        } => {
            browse::run_terms(&cfg, &term, provider.as_deref(), page.into()).await?;
        }
        Commands::Parallel {
            cross_provider,
            page,
        } => {
            browse::run_parallel(&cfg, cross_provider, page.into()).await?;
        }
        Commands::Reindex {
            status,
            repair_doc_freq,
        } => {
            jobs::run_reindex(&cfg, status.as_deref(), repair_doc_freq).await?;
        }
        Commands::Runs { id, page } => {
            browse::run_runs(&cfg, id.as_deref(), page.into()).await?;
        }
        Commands::Search {
            query,
            source,
            format,
            since,
            until,
            limit,
            fts_weight,
            semantic_weight,
            keyword_fallback,
            json,
        } => {
            let opts = SearchOptions {
                source,
                format,
                since,
                until,
                limit,
                fts_weight,
                semantic_weight,
                keyword_fallback,
                json,
            };
            search::run_search(&cfg, &query, &opts).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
    }

    Ok(())
}
