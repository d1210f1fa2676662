//! folio-core entry point.

use clap::Parser;
use folio_core::cache::ConversionCache;
use folio_core::config::{Cli, Command, Config};
use folio_core::converter::Converter;
use folio_core::delivery::DeliveryService;
use folio_core::discovery::DiscoveryService;
use folio_core::error::{FolioError, Result};
use folio_core::metadata::MetadataAggregator;
use folio_core::provider::{FileSecretStore, FsBookProvider, SecretStore, SMTP_PASSWORD_ACCOUNT};
use folio_core::server;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("folio_core=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().or_else(Config::find_config_file);
    let config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Serve { bind, library }) => cmd_serve(config, bind, library).await,
        Some(Command::Deliver { book_id, destination }) => cmd_deliver(config, book_id, destination).await,
        Some(Command::Discover { seconds }) => cmd_discover(seconds).await,
        None => cmd_serve(config, None, None).await,
    }
}

fn cmd_init(force: bool) -> Result<()> {
    let config_path = PathBuf::from("config.toml");
    if config_path.exists() && !force {
        return Err(FolioError::Config(format!(
            "config file already exists: {} (use --force to overwrite)",
            config_path.display()
        )));
    }
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let library_path = PathBuf::from("data/library");
    std::fs::create_dir_all(&library_path)?;
    println!("Created library directory: {}", library_path.display());

    Ok(())
}

async fn cmd_serve(
    config: Config,
    bind: Option<std::net::SocketAddr>,
    library_override: Option<PathBuf>,
) -> Result<()> {
    let library_path = library_override.unwrap_or_else(|| config.library.path.clone());
    let provider: Arc<dyn folio_core::provider::BookProvider> =
        Arc::new(FsBookProvider::new(&library_path, config.library.recursive)?);

    let secrets_path = library_path.join(".folio-secrets.json");
    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(secrets_path));

    let converter = Arc::new(Converter::new(config.converter.binary_path.clone()));
    let cache = Arc::new(ConversionCache::new(config.cache.dir.clone())?);

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| FolioError::Config(e.to_string()))?;
    let metadata = Arc::new(MetadataAggregator::with_default_providers(http_client));

    let delivery = Arc::new(DeliveryService::new(config.smtp.to_model()));

    let discovery = if config.discovery.advertise {
        let instance_name = config
            .discovery
            .service_name
            .clone()
            .unwrap_or_else(|| "Folio Library".to_string());
        match DiscoveryService::new(instance_name) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                tracing::warn!(error = %e, "could not start LAN discovery");
                None
            }
        }
    } else {
        None
    };

    let state = server::AppState::new(
        Arc::new(config.clone()),
        provider,
        secrets,
        converter,
        cache,
        metadata,
        delivery,
        discovery.clone(),
    );

    let (listener, port) = match bind {
        Some(addr) => (
            tokio::net::TcpListener::bind(addr).await.map_err(FolioError::Io)?,
            addr.port(),
        ),
        None => server::bind_in_range(config.server.port_range_start, config.server.port_range_end).await?,
    };

    let url = server::server_url(port);
    state.mark_bound(url.clone(), port);
    tracing::info!(url = %url, "folio-core listening");

    if let Some(discovery) = &discovery {
        let mut txt = HashMap::new();
        txt.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        txt.insert("platform".to_string(), std::env::consts::OS.to_string());
        txt.insert("books".to_string(), state.provider.list().len().to_string());
        if let Err(e) = discovery.advertise(port, txt) {
            tracing::warn!(error = %e, "failed to advertise on the LAN");
        }
    }

    let router = server::create_router(state);
    axum::serve(listener, router).await.map_err(|e| FolioError::Config(e.to_string()))?;

    Ok(())
}

async fn cmd_deliver(config: Config, book_id: String, destination: String) -> Result<()> {
    let provider = FsBookProvider::new(&config.library.path, config.library.recursive)?;
    let secrets_path = config.library.path.join(".folio-secrets.json");
    let secrets = FileSecretStore::new(secrets_path);

    if secrets.get(SMTP_PASSWORD_ACCOUNT).is_none() {
        return Err(FolioError::Config(
            "no SMTP password configured; set it before delivering".to_string(),
        ));
    }

    let access = provider
        .get_book_file_url(&book_id)
        .ok_or_else(|| FolioError::BookNotFound(book_id.clone()))?;
    let format = provider
        .get_book_format(&book_id)
        .ok_or_else(|| FolioError::BookNotFound(book_id.clone()))?;
    let title = provider
        .get_book_metadata(&book_id)
        .and_then(|m| m.title)
        .unwrap_or_else(|| book_id.clone());

    let delivery = DeliveryService::new(config.smtp.to_model());
    let result = delivery
        .send(access.path(), &destination, &title, format, &secrets)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result).map_err(|e| FolioError::Config(e.to_string()))?);
    Ok(())
}

async fn cmd_discover(seconds: u64) -> Result<()> {
    let service = DiscoveryService::new("folio-discover-cli")?;
    let mut events = service.browse()?;

    let deadline = tokio::time::sleep(std::time::Duration::from_secs(seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(folio_core::model::DiscoveryEvent::Added(peer)) => {
                        println!("{} at {:?}:{:?}", peer.name, peer.host, peer.port);
                    }
                    Some(folio_core::model::DiscoveryEvent::Removed(id)) => {
                        println!("{id} went away");
                    }
                    None => break,
                }
            }
            _ = &mut deadline => break,
        }
    }

    Ok(())
}
