//! Scanvault command line interface: database setup, album import, search,
//! and the debug HTTP server.

mod api;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use scanvault_core::{logging, Config, Db, Pipeline, Uploader};

#[derive(Parser)]
#[command(name = "scanvault", about = "Scanvault document query", version)]
struct Cli {
    /// Path to the configuration file; overrides CONFIG_FILE.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the SQL database.
    InitDb {
        /// Database connection URI (sqlite://...).
        #[arg(long)]
        uri: Option<String>,
        /// Path to the SQL file.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Import albums and documents into the system.
    ImportAlbums {
        /// Base data path for albums.
        #[arg(long)]
        data_path: Option<PathBuf>,
        /// Name of the batch to import.
        #[arg(long)]
        batch_name: Option<String>,
        /// Path to the search index.
        #[arg(long)]
        index_path: Option<PathBuf>,
    },
    /// Search and create megadocs from the results.
    Search {
        query: String,
        /// Base data path.
        #[arg(long)]
        data_path: Option<PathBuf>,
        /// Path to the search index.
        #[arg(long)]
        index_path: Option<PathBuf>,
        /// Comma-separated list of megadoc types.
        #[arg(long)]
        megadoc_types: Option<String>,
    },
    /// Run the debug server.
    Debug {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Accept either `--path` or a `sqlite://`-style `--uri`.
fn resolve_sql_path(config: &Config, uri: Option<String>, path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }
    if let Some(uri) = uri {
        let trimmed = uri
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    config.db.sql_path.clone()
}

fn build_uploader(config: &Config) -> Option<Uploader> {
    match Uploader::from_config(&config.s3, config.db.retries) {
        Ok(uploader) => Some(uploader),
        Err(e) => {
            warn!("object store unavailable, megadocs will not upload: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli).context("could not load configuration")?;
    logging::init_logging(
        &config.logging.directory,
        &config.logging.filename,
        &config.logging.level,
    )?;

    match cli.command {
        Command::InitDb { uri, path } => {
            let sql_path = resolve_sql_path(&config, uri, path);
            println!("Initializing database at {}", sql_path.display());
            Db::open(&sql_path, config.db.retries)?;
            println!("Database initialization complete");
        }

        Command::ImportAlbums {
            data_path,
            batch_name,
            index_path,
        } => {
            if let Some(batch_name) = batch_name {
                config.app.batch_name = batch_name;
            }
            if let Some(data_path) = data_path {
                config.app.data_path = Some(data_path);
            }
            if let Some(index_path) = index_path {
                config.app.index_path = Some(index_path);
            }

            let albums_path = config
                .data_path()
                .join(&config.app.batch_name)
                .join("json");
            println!("Importing batch '{}' from {}", config.app.batch_name,
                     albums_path.display());

            let config = Arc::new(config);
            let db = Db::open(&config.db.sql_path, config.db.retries)?;
            let pipeline = Pipeline::new(db, config, None);
            let report = pipeline.start_load(&albums_path).await?;

            println!(
                "Imported {} albums: {} scans, {} documents ({} skipped, {} bad files)",
                report.albums,
                report.ingest.scans_created,
                report.ingest.documents_created,
                report.ingest.documents_skipped,
                report.ingest.bad_files,
            );
            println!(
                "Corpus {} over {} documents; {} indexed, {} unreadable",
                report.index.corpus.checksum,
                report.index.corpus.document_count,
                report.index.indexed,
                report.index.unreadable,
            );
        }

        Command::Search {
            query,
            data_path,
            index_path,
            megadoc_types,
        } => {
            if let Some(data_path) = data_path {
                config.app.data_path = Some(data_path);
            }
            if let Some(index_path) = index_path {
                config.app.index_path = Some(index_path);
            }
            let filetypes: Vec<String> = megadoc_types
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| config.app.megadoc_types.clone());

            println!("Searching for '{query}'");
            let uploader = build_uploader(&config);
            let config = Arc::new(config);
            let db = Db::open(&config.db.sql_path, config.db.retries)?;
            let pipeline = Pipeline::new(db, config.clone(), uploader);

            let search = pipeline.start_search(&query, &filetypes).await?;
            let (count, megadocs) = pipeline
                .db()
                .read(|conn| Ok((search.document_count(conn)?, search.megadocs(conn)?)))?;

            println!("Search <{}> finished with {count} results", search.meta.guid);
            for megadoc in megadocs {
                println!(
                    "  {} megadoc <{}> [{}]: {}",
                    megadoc.filetype, megadoc.meta.guid, megadoc.status, megadoc.url
                );
            }
        }

        Command::Debug { host, port } => {
            let uploader = build_uploader(&config);
            let config = Arc::new(config);
            let db = Db::open(&config.db.sql_path, config.db.retries)?;
            let pipeline = Arc::new(Pipeline::new(db, config, uploader));

            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .context("invalid host/port")?;
            println!("Launching debug server at http://{addr}");

            let app = api::router(api::AppState {
                pipeline: pipeline.clone(),
            });
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::signal::ctrl_c().await.ok();
                    pipeline.shutdown();
                })
                .await?;
        }
    }

    Ok(())
}
