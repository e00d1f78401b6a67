use clap::{Args, Parser, Subcommand};
use shared::types::NodeConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, Level};
use umbra_core::checkpoints::Checkpoints;
use umbra_core::core::{run_pool_cleaner, Core, RealTimeProvider};
use umbra_core::currency::CurrencyBuilder;
use umbra_core::storage::{create_swapped_main_chain_storage, SnapshotStore};

mod network;
use network::{P2PConfig, P2PNode};

/// Período entre passes do limpador do pool
const POOL_CLEAN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "umbra")]
#[command(about = "Umbra - nó da blockchain UTXO com assinaturas em anel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inicia o nó completo (núcleo + rede P2P)
    StartNode(StartNodeArgs),
    /// Mostra informações de versão
    Version,
}

#[derive(Args)]
struct StartNodeArgs {
    /// Porta P2P (0 para aleatória)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Nós de bootstrap (multiaddr)
    #[arg(short, long)]
    bootstrap: Vec<String>,

    /// Diretório de dados do nó
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Arquivo CSV de checkpoints (indice,hash)
    #[arg(long)]
    checkpoints: Option<String>,

    /// Desabilita a descoberta local via mDNS
    #[arg(long)]
    no_mdns: bool,

    /// Nível de log (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> shared::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::StartNode(args)) => start_node(args).await,
        Some(Commands::Version) => {
            show_version();
            Ok(())
        }
        None => {
            show_version();
            Ok(())
        }
    }
}

async fn start_node(args: &StartNodeArgs) -> shared::Result<()> {
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = NodeConfig {
        p2p_port: args.port,
        bootstrap_peers: args.bootstrap.clone(),
        data_dir: args.data_dir.clone(),
        checkpoints_file: args.checkpoints.clone(),
        ..NodeConfig::default()
    };

    info!(data_dir = %config.data_dir, "Iniciando o nó Umbra");

    let currency = CurrencyBuilder::new().currency();
    info!(genesis = %currency.genesis_hash(), "Moeda inicializada");

    let mut checkpoints = Checkpoints::new();
    if let Some(file) = &config.checkpoints_file {
        checkpoints.load_from_file(Path::new(file))?;
    }

    let data_dir = PathBuf::from(&config.data_dir);
    let storage = create_swapped_main_chain_storage(&data_dir)?;
    let snapshot = SnapshotStore::open(data_dir.join("cache"))?;

    let core = Core::load(
        currency,
        checkpoints,
        Box::new(storage),
        Some(snapshot),
        Box::new(RealTimeProvider),
    )
    .map_err(|err| shared::NodeError::StorageError(err.to_string()))?;

    let start_time = chrono::DateTime::from_timestamp(core.start_time() as i64, 0)
        .map(|instant| instant.to_rfc3339())
        .unwrap_or_default();
    info!(
        top_index = core.top_block_index(),
        top_hash = %core.top_block_hash(),
        %start_time,
        "Núcleo pronto"
    );

    let core = Arc::new(RwLock::new(core));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Limpador do pool: passes periódicos, cancelável
    let cleaner = tokio::spawn(run_pool_cleaner(
        Arc::clone(&core),
        POOL_CLEAN_INTERVAL,
        shutdown_rx.clone(),
    ));

    // Rede P2P
    let p2p_config = P2PConfig {
        port: config.p2p_port,
        bootstrap_nodes: config.bootstrap_peers.clone(),
        enable_mdns: !args.no_mdns,
        ..P2PConfig::default()
    };
    let node = P2PNode::new(p2p_config, Arc::clone(&core)).await?;
    let network_task = tokio::spawn(node.run(shutdown_rx));

    // Desligamento gracioso via Ctrl+C
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| shared::NodeError::IoError(err.to_string()))?;
    info!("Sinal de desligamento recebido");

    core.read().await.interrupt();
    let _ = shutdown_tx.send(true);

    match network_task.await {
        Ok(Err(err)) => error!(error = %err, "Rede terminou com falha"),
        Err(err) => error!(error = %err, "Tarefa de rede abortada"),
        Ok(Ok(())) => {}
    }
    let _ = cleaner.await;

    // Compacta e persiste o estado antes de sair
    if let Err(err) = core.write().await.save() {
        error!(error = %err, "Falha ao persistir o estado do núcleo");
    } else {
        info!("Estado persistido; até logo");
    }

    Ok(())
}

fn show_version() {
    println!("Umbra v{}", env!("CARGO_PKG_VERSION"));
    println!("Blockchain UTXO com endereços furtivos e assinaturas em anel");
}
