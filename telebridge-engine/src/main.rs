/**
 * TELEBRIDGE ENGINE - Point d'entrée du pont d'ingestion
 *
 * Bootstrap : config clé=valeur, ouverture des sinks (chacun optionnel,
 * le pont tourne même si l'un manque au démarrage, comme le pont
 * historique), heartbeat de fond, puis boucle MQTT jusqu'à Ctrl-C.
 */

use telebridge_engine::bridge::Bridge;
use telebridge_engine::config::load_config;
use telebridge_engine::export::CsvExporter;
use telebridge_engine::heartbeat::spawn_heartbeat;
use telebridge_engine::history::SqliteHistory;
use telebridge_engine::influx::InfluxSink;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas
    tracing_subscriber::fmt().init();

    let cfg = load_config().await;

    // Sink time-series : seulement si l'URL Influx est renseignée
    let timeseries = match &cfg.influx {
        Some(influx_conf) => {
            info!("sink Influx actif sur {}", influx_conf.url);
            Some(InfluxSink::new(influx_conf.clone(), cfg.fields.clone()))
        }
        None => {
            warn!("pas d'INFLUX_URL, le pont tourne sans time-series");
            None
        }
    };

    // Sink SQL : un échec d'ouverture n'est pas fatal, on continue sans
    let history = match SqliteHistory::open(&cfg.sql.path, &cfg.sql.table) {
        Ok(sink) => {
            info!(
                "historique SQL ouvert ({}, {} lignes retenues)",
                cfg.sql.path.display(),
                sink.len()
            );
            Some(sink)
        }
        Err(e) => {
            error!("ouverture SQL échouée: {e}");
            warn!("le pont continue sans journalisation SQL");
            None
        }
    };

    let exporter = CsvExporter::new(&cfg.export_path);
    let mut bridge = Bridge::new(timeseries, history, exporter);

    // Signal de vie + arrêt propre sur Ctrl-C
    let cancel = CancellationToken::new();
    let heartbeat = spawn_heartbeat(cfg.heartbeat_path.clone(), cancel.clone());
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C reçu, arrêt du pont");
                cancel.cancel();
            }
        });
    }

    bridge.run(&cfg.mqtt, cancel).await?;
    let _ = heartbeat.await;
    Ok(())
}
