/**
 * BATTEMENT DE CŒUR - Signal de vie explicite du pont
 *
 * Remplace l'inspection de la table de process de l'OS (fragile, dépendante
 * du matching nom/cmdline) : le pont réécrit périodiquement un fichier
 * horodaté, le dashboard le lit. Vivant = horodatage plus frais que le
 * seuil de péremption.
 */

use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Période de réécriture du fichier heartbeat
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// Au-delà de cet âge le pont est considéré mort
pub const STALE_AFTER: time::Duration = time::Duration::seconds(30);

/// Réécrit le fichier avec l'horodatage courant (RFC3339)
pub fn beat(path: &Path) -> std::io::Result<()> {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(std::io::Error::other)?;
    std::fs::write(path, now)
}

/// Task de fond : un battement toutes les 10s jusqu'à annulation
pub fn spawn_heartbeat(path: PathBuf, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = beat(&path) {
                        warn!("heartbeat non écrit: {e}");
                    }
                }
            }
        }
    })
}

/// Côté dashboard : liveness sans IPC, juste la fraîcheur du fichier
pub fn is_running(path: &Path) -> bool {
    is_running_at(path, OffsetDateTime::now_utc())
}

pub fn is_running_at(path: &Path, now: OffsetDateTime) -> bool {
    let Ok(txt) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(stamp) = OffsetDateTime::parse(txt.trim(), &Rfc3339) else {
        return false;
    };
    now - stamp < STALE_AFTER
}
