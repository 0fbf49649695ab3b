/**
 * SINK TIME-SERIES - Écriture synchrone de points vers InfluxDB v2
 *
 * RÔLE :
 * Construit un point line-protocol par message (tag device + champs
 * valeur + timestamp explicite ou heure d'arrivée) et le POSTe sur
 * l'API /api/v2/write. Extraction de schéma souple : champ attendu
 * manquant → zéro/vide, on préfère écrire quelque chose que rien.
 *
 * Un échec ici est isolé : loggé par le moteur, le sink SQL n'en sait rien.
 */

use crate::config::{FieldConf, InfluxConf};
use crate::error::SinkError;
use crate::telemetry::Telemetry;
use serde_json::Value;
use time::OffsetDateTime;

/// Interface d'écriture time-series (seam de test du moteur)
pub trait TimeSeriesSink {
    async fn write_point(
        &self,
        telemetry: &Telemetry,
        arrival: OffsetDateTime,
    ) -> Result<(), SinkError>;
}

pub struct InfluxSink {
    client: reqwest::Client,
    conf: InfluxConf,
    fields: FieldConf,
}

// Échappements line protocol (mesure / tags / clés champ / valeurs chaîne)

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn escape_field_key(s: &str) -> String {
    escape_tag(s)
}

fn escape_string_value(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn push_field(out: &mut Vec<String>, key: &str, value: Option<&Value>) {
    let key = escape_field_key(key);
    match value {
        Some(Value::Number(n)) => out.push(format!("{key}={}", n.as_f64().unwrap_or(0.0))),
        Some(Value::String(s)) => out.push(format!("{key}=\"{}\"", escape_string_value(s))),
        // champ attendu absent ou non scalaire : zéro plutôt qu'échec
        _ => out.push(format!("{key}=0")),
    }
}

/// Construit la ligne line-protocol d'un message.
/// Champs valeur configurés, sinon tous les scalaires hors device/timestamp.
pub fn line_protocol(
    telemetry: &Telemetry,
    measurement: &str,
    fields: &FieldConf,
    arrival: OffsetDateTime,
) -> String {
    let device = telemetry.device_id(&fields.device);

    let mut parts: Vec<String> = Vec::new();
    if fields.values.is_empty() {
        for (key, value) in telemetry.scalar_fields() {
            if key == fields.device || key == fields.time {
                continue;
            }
            push_field(&mut parts, key, Some(value));
        }
    } else {
        for key in &fields.values {
            push_field(&mut parts, key, telemetry.get(key));
        }
    }
    if parts.is_empty() {
        // un point sans champ est invalide; valeur sentinelle
        parts.push("value=0".to_string());
    }

    let timestamp = telemetry.timestamp(&fields.time).unwrap_or(arrival);

    format!(
        "{},device={} {} {}",
        escape_measurement(measurement),
        escape_tag(&device),
        parts.join(","),
        timestamp.unix_timestamp_nanos()
    )
}

impl InfluxSink {
    pub fn new(conf: InfluxConf, fields: FieldConf) -> Self {
        Self {
            client: reqwest::Client::new(),
            conf,
            fields,
        }
    }
}

impl TimeSeriesSink for InfluxSink {
    async fn write_point(
        &self,
        telemetry: &Telemetry,
        arrival: OffsetDateTime,
    ) -> Result<(), SinkError> {
        let line = line_protocol(telemetry, &self.conf.measurement, &self.fields, arrival);
        let url = format!("{}/api/v2/write", self.conf.url.trim_end_matches('/'));

        let resp = self
            .client
            .post(&url)
            .query(&[
                ("org", self.conf.org.as_str()),
                ("bucket", self.conf.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.conf.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
