/**
 * API STATUT TELEBRIDGE - Lectures consommées par le dashboard
 *
 * RÔLE :
 * Petit serveur Axum exposant les deux lectures dont le dashboard a besoin :
 * - GET /status  → {"running": bool}   (fraîcheur du fichier heartbeat)
 * - GET /devices → {device: last_seen} (réduction max(timestamp) sur la
 *   table historique, bornée par le ring de 100 lignes)
 *
 * Ce process ne fait que lire : jamais d'écriture dans l'état du pont.
 * Une lecture peut croiser un écrasement du ring et voir l'ancienne ou la
 * nouvelle ligne, staleness admise.
 */

use axum::{extract::State, routing::get, Json, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use telebridge_engine::config::{load_config, BridgeConfig};
use telebridge_engine::{heartbeat, history};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    cfg: BridgeConfig,
}

#[derive(serde::Serialize)]
struct StatusView {
    running: bool,
}

/// Mapping device → horodatage RFC3339 pour l'API
fn to_view(seen: HashMap<String, OffsetDateTime>) -> HashMap<String, String> {
    seen.into_iter()
        .filter_map(|(device, ts)| ts.format(&Rfc3339).ok().map(|s| (device, s)))
        .collect()
}

// GET /status (liveness du pont, sans IPC)
async fn bridge_status(State(app): State<AppState>) -> Json<StatusView> {
    let running = heartbeat::is_running(&app.cfg.heartbeat_path);
    Json(StatusView { running })
}

// GET /devices (last-seen par device depuis la table historique)
async fn devices(State(app): State<AppState>) -> Json<HashMap<String, String>> {
    match history::last_seen(&app.cfg.sql.path, &app.cfg.sql.table, &app.cfg.fields.device) {
        Ok(seen) => Json(to_view(seen)),
        Err(e) => {
            // table absente ou illisible : mapping vide, comme le dashboard historique
            warn!("lecture last-seen échouée: {e}");
            Json(HashMap::new())
        }
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(bridge_status))
        .route("/devices", get(devices))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg = load_config().await;
    let port = cfg.status_port;
    let app = build_router(AppState { cfg });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("API statut à l'écoute sur http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
