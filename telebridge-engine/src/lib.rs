/**
 * TELEBRIDGE ENGINE - Pont d'ingestion télémétrie MQTT → SQL + InfluxDB
 *
 * Process longue durée : connexion durable au broker (retry infini),
 * décodage des payloads, fan-out vers deux sinks indépendants (points
 * InfluxDB + historique SQL borné à 100 lignes avec export CSV), signal
 * de vie par fichier heartbeat. Les fonctions de lecture (liveness,
 * last-seen par device) sont exposées ici pour telebridge-status.
 */

pub mod bridge;
pub mod config;
pub mod error;
pub mod export;
pub mod heartbeat;
pub mod history;
pub mod influx;
pub mod ring;
pub mod telemetry;
