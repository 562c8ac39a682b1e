use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::debug;

use emberkv_common::{DEFAULT_SWEEP_INTERVAL_MS, SWEEP_REPEAT_THRESHOLD, SWEEP_SAMPLES};

use crate::store::Store;

/// Configuração do sweeper de expiração ativa.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Intervalo entre varreduras.
    pub interval: Duration,
    /// Máximo de chaves sorteadas por lote.
    pub samples: usize,
    /// Acima desta fração de expiradas no lote, repete sem esperar o timer.
    pub repeat_threshold: f64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            samples: SWEEP_SAMPLES,
            repeat_threshold: SWEEP_REPEAT_THRESHOLD,
        }
    }
}

/// Sobe a task de varredura. Ela sorteia um lote de chaves com TTL a cada
/// tick e remove as expiradas; um lote muito "sujo" dispara outro lote
/// imediato, limitando o trabalho por acordada mas acompanhando cargas com
/// muita expiração. Encerra no broadcast de shutdown.
pub fn spawn_sweeper(
    store: Store,
    config: SweeperConfig,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(sweep_loop(store, config, shutdown))
}

async fn sweep_loop(store: Store, config: SweeperConfig, mut shutdown: broadcast::Receiver<()>) {
    let mut tick = interval(config.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(intervalo_ms = config.interval.as_millis() as u64, "sweeper iniciado");

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.recv() => {
                debug!("sweeper encerrado");
                return;
            }
        }

        loop {
            let stats = store.sweep_sample(config.samples);
            if stats.expired > 0 {
                debug!(
                    amostradas = stats.sampled,
                    expiradas = stats.expired,
                    "varredura removeu chaves expiradas"
                );
            }
            if stats.sampled == 0 {
                break;
            }
            let rate = stats.expired as f64 / stats.sampled as f64;
            if rate <= config.repeat_threshold {
                break;
            }
            // O lock já foi solto entre os lotes; só cede o executor.
            tokio::task::yield_now().await;
        }
    }
}
