//! mailsyncd - polls every linked mailbox and keeps the store and vector
//! index in step with it

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;

use mailsync::{
    AccountRun, EmbeddingGateway, GmailDecoder, GmailTransport, MessageIndexer, MessageStore,
    OpenAiEmbeddings, PineconeIndex, SqliteMessageStore, SyncConfig, SyncEngine, SyncScheduler,
    VectorIndex, VectorIndexAdapter,
};

#[derive(Parser)]
#[command(name = "mailsyncd", version, about = "Mailbox sync and indexing daemon")]
struct Cli {
    /// Run a single pass over all accounts and exit
    #[arg(long)]
    once: bool,

    /// Run an initial sync for one account and exit
    #[arg(long, value_name = "ACCOUNT_ID")]
    initial: Option<String>,

    /// Search filter for --initial (Gmail query syntax)
    #[arg(long, value_name = "QUERY", requires = "initial")]
    query: Option<String>,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Bootstrap config and data directories
    config::init()?;
    let settings = SyncConfig::load()?;

    let db_path = settings.database_path()?;
    info!("Opening database at {}", db_path.display());
    let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(&db_path)?);

    let engine = Arc::new(build_engine(&settings, store.clone())?);
    let scheduler = SyncScheduler::new(engine, settings.sync_cooldown_secs);

    if let Some(account_id) = cli.initial.as_deref() {
        let account = store
            .get_account(account_id)?
            .with_context(|| format!("Unknown account: {}", account_id))?;
        return match scheduler.run_initial(&account, cli.query.as_deref()) {
            AccountRun::Completed(stats) => {
                info!("Initial sync done: {}", stats);
                Ok(())
            }
            AccountRun::Failed(e) => Err(e),
            other => {
                warn!("Initial sync did not run: {:?}", other);
                Ok(())
            }
        };
    }

    if cli.once {
        for run in scheduler.run_all()? {
            match run.run {
                AccountRun::Completed(stats) => info!("{}: {}", run.account_id, stats),
                other => info!("{}: {:?}", run.account_id, other),
            }
        }
        return Ok(());
    }

    info!(
        "Syncing every {} minutes",
        settings.schedule_period().as_secs() / 60
    );
    scheduler.run_periodic(settings.schedule_period());
    Ok(())
}

/// Wire the Gmail transport, OpenAI embeddings and vector index together
fn build_engine(settings: &SyncConfig, store: Arc<dyn MessageStore>) -> Result<SyncEngine> {
    let timeout = settings.http_timeout();
    let retry = settings.retry_policy();

    let transport = GmailTransport::new(
        SyncConfig::require(&settings.google_client_id, "GOOGLE_CLIENT_ID")?.to_string(),
        SyncConfig::require(&settings.google_client_secret, "GOOGLE_CLIENT_SECRET")?.to_string(),
        timeout,
    )
    .with_page_sizes(settings.list_page_size, settings.history_page_size);

    let mut embeddings = OpenAiEmbeddings::new(
        SyncConfig::require(&settings.openai_api_key, "OPENAI_API_KEY")?,
        settings.embedding_model.clone(),
        timeout,
    )
    .with_dimensions(settings.embedding_dimensions);
    if let Some(base_url) = &settings.openai_base_url {
        embeddings = embeddings.with_base_url(base_url.clone());
    }

    // The store outlives the process, so the vectors it marks indexed must too
    let index: Arc<dyn VectorIndex> = Arc::new(PineconeIndex::new(
        SyncConfig::require(&settings.pinecone_api_key, "PINECONE_API_KEY")?,
        SyncConfig::require(&settings.pinecone_index_host, "PINECONE_INDEX_HOST")?,
        timeout,
    ));

    let indexer = MessageIndexer::new(
        settings.chunker(),
        EmbeddingGateway::new(Arc::new(embeddings), retry),
        VectorIndexAdapter::new(index, retry),
    );

    Ok(SyncEngine::new(
        Arc::new(transport),
        Arc::new(GmailDecoder::new()),
        store,
        indexer,
    ))
}
