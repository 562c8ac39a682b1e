use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Duration;
use tracing::{error, info};

use emberkv_common::{
    DEFAULT_BIND, DEFAULT_LOG_MAX_BYTES, DEFAULT_MAX_CONNECTIONS, DEFAULT_SWEEP_INTERVAL_MS,
    EmberError, EmberResult, PersistError,
};
use emberkv_server::{Connection, handle_connection};
use emberkv_storage::{DataDir, DurabilityMode, Store, SweeperConfig, create_log, replay, spawn_sweeper};

#[derive(Parser, Debug)]
#[command(name = "emberkv-server", about = "EmberKV — in-memory key-value store")]
struct Args {
    #[arg(long, default_value = DEFAULT_BIND, env = "KVSTORE_BIND")]
    bind: String,
    #[arg(long, value_name = "DIR", env = "KVSTORE_DIR")]
    dir: Option<PathBuf>,
    #[arg(long, default_value = "off", value_parser = parse_mode)]
    persistence: DurabilityMode,
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval_ms: u64,
    #[arg(long, default_value_t = DEFAULT_LOG_MAX_BYTES)]
    log_max_bytes: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
}

fn parse_mode(s: &str) -> Result<DurabilityMode, String> {
    match s.to_lowercase().as_str() {
        "off" => Ok(DurabilityMode::Off),
        "buffered" => Ok(DurabilityMode::Buffered),
        "flush" => Ok(DurabilityMode::Flush),
        "sync" => Ok(DurabilityMode::Sync),
        _ => Err(format!("valor inválido: '{s}'. Use: off, buffered, flush, sync")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emberkv_server=info".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let persist = match args.persistence {
        DurabilityMode::Off => None,
        mode => match &args.dir {
            Some(dir) => Some((dir.clone(), mode)),
            None => {
                eprintln!("--dir é obrigatório quando --persistence não é off");
                return ExitCode::from(1);
            }
        },
    };

    match run(args, persist).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("erro fatal: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &EmberError) -> u8 {
    match e {
        EmberError::Persist(PersistError::Locked(_)) => 2,
        EmberError::Persist(PersistError::Corrupt(_)) => 3,
        EmberError::Persist(PersistError::Io(_)) => 4,
        EmberError::Connection(_) => 4,
        _ => 1,
    }
}

async fn run(args: Args, persist: Option<(PathBuf, DurabilityMode)>) -> EmberResult<()> {
    let store = Store::new();
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    // O handle do DataDir segura o lock do diretório até o fim do processo.
    let mut _data_dir = None;
    let mut writer_handle = None;

    if let Some((path, mode)) = persist {
        let data_dir = DataDir::acquire(&path)?;
        let dir = data_dir.path().to_path_buf();
        let replay_store = store.clone();
        let stats = tokio::task::spawn_blocking(move || replay(&dir, &replay_store))
            .await
            .map_err(|e| PersistError::Io(std::io::Error::other(e)))??;
        info!(
            snapshot = stats.snapshot_records,
            log = stats.log_records,
            chaves = store.len(),
            "estado recuperado do disco"
        );

        let (log_tx, writer) = create_log(data_dir.path().to_path_buf(), mode, args.log_max_bytes);
        store.attach_log(log_tx);

        let writer_store = store.clone();
        let writer_shutdown = shutdown_tx.clone();
        writer_handle = Some(tokio::spawn(async move {
            if let Err(e) = writer.run().await {
                error!("log writer falhou: {e}");
                // Escritas passam a ser recusadas; o servidor desce.
                writer_store.mark_persist_failed();
                let _ = writer_shutdown.send(());
            }
        }));
        _data_dir = Some(data_dir);
    }

    let sweeper = spawn_sweeper(
        store.clone(),
        SweeperConfig {
            interval: Duration::from_millis(args.sweep_interval_ms),
            ..Default::default()
        },
        shutdown_tx.subscribe(),
    );

    let listener = TcpListener::bind(&args.bind).await?;
    info!("EmberKV escutando em {}", args.bind);

    let semaphore = Arc::new(Semaphore::new(args.max_connections));
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit.unwrap(),
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
            _ = shutdown_rx.recv() => break,
        };

        let (socket, addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        error!("erro ao aceitar conexão: {e}");
                        continue;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
            _ = shutdown_rx.recv() => break,
        };

        info!("nova conexão: {addr}");
        let store = store.clone();
        let mut conn_shutdown = shutdown_tx.subscribe();
        let conn_shutdown_tx = shutdown_tx.clone();

        tokio::spawn(async move {
            let conn = Connection::new(socket);
            if let Err(e) = handle_connection(conn, store, &mut conn_shutdown, conn_shutdown_tx).await
            {
                error!("erro na conexão {addr}: {e}");
            }
            info!("conexão encerrada: {addr}");
            drop(permit);
        });
    }

    // Shutdown gracioso: avisa handlers e sweeper, solta o sender do log e
    // espera o writer drenar a fila.
    let _ = shutdown_tx.send(());
    store.detach_log();
    if let Some(handle) = writer_handle {
        let _ = handle.await;
    }
    let _ = sweeper.await;
    info!("encerrado");
    Ok(())
}
