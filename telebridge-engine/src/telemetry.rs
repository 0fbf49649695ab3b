/**
 * DÉCODEUR TÉLÉMÉTRIE - Parsing strict des payloads MQTT
 *
 * RÔLE :
 * Transforme les octets bruts d'un message broker en mapping champ → valeur.
 * Parsing strict : payload non-JSON ou JSON non-objet rejeté en bloc,
 * loggé par l'appelant, aucun sink touché.
 *
 * Les accesseurs sont volontairement laxistes (champ manquant → zéro/vide) :
 * mieux vaut un point partiel écrit qu'aucun point du tout quand un device
 * change de schéma.
 */

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Message télémétrie décodé : mapping champ → valeur scalaire.
/// Éphémère, vit le temps d'un cycle de dispatch.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(transparent)]
pub struct Telemetry {
    fields: Map<String, Value>,
}

impl Telemetry {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload)?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    /// Identifiant device; "unknown" si le champ manque (comportement historique)
    pub fn device_id(&self, field: &str) -> String {
        match self.fields.get(field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "unknown".to_string(),
        }
    }

    /// Timestamp applicatif : RFC3339 ou epoch millisecondes.
    /// None si absent/illisible → l'appelant prend l'heure d'arrivée.
    pub fn timestamp(&self, field: &str) -> Option<OffsetDateTime> {
        match self.fields.get(field)? {
            Value::String(s) => OffsetDateTime::parse(s, &Rfc3339).ok(),
            Value::Number(n) => {
                let millis = n.as_i64()?;
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
            }
            _ => None,
        }
    }

    /// Valeur numérique d'un champ, 0.0 si manquant ou non convertible
    pub fn number(&self, field: &str) -> f64 {
        match self.fields.get(field) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Champs scalaires (nombre/chaîne), ordre stable par nom de champ
    pub fn scalar_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(|(_, v)| matches!(v, Value::Number(_) | Value::String(_)))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Sérialisation canonique pour stockage SQL (forme texte neutre)
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_decode_valid_object() {
        let t = Telemetry::decode(br#"{"DEV_EUI":"abc123","Water level":3.5}"#).unwrap();
        assert_eq!(t.device_id("DEV_EUI"), "abc123");
        assert_eq!(t.number("Water level"), 3.5);
    }

    #[test]
    fn test_decode_malformed_json_rejected() {
        let err = Telemetry::decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_non_object_rejected() {
        let err = Telemetry::decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject));
    }

    #[test]
    fn test_missing_device_is_unknown() {
        let t = Telemetry::decode(br#"{"Water level":1.0}"#).unwrap();
        assert_eq!(t.device_id("DEV_EUI"), "unknown");
    }

    #[test]
    fn test_missing_number_defaults_to_zero() {
        let t = Telemetry::decode(br#"{"DEV_EUI":"x"}"#).unwrap();
        assert_eq!(t.number("Water level"), 0.0);
    }

    #[test]
    fn test_timestamp_rfc3339() {
        let t = Telemetry::decode(br#"{"TIMESTAMP":"2024-05-01T12:00:00Z"}"#).unwrap();
        assert_eq!(t.timestamp("TIMESTAMP").unwrap(), datetime!(2024-05-01 12:00:00 UTC));
    }

    #[test]
    fn test_timestamp_epoch_millis() {
        let t = Telemetry::decode(br#"{"TIMESTAMP":1714564800000}"#).unwrap();
        assert_eq!(t.timestamp("TIMESTAMP").unwrap(), datetime!(2024-05-01 12:00:00 UTC));
    }

    #[test]
    fn test_timestamp_missing_is_none() {
        let t = Telemetry::decode(br#"{"DEV_EUI":"x"}"#).unwrap();
        assert!(t.timestamp("TIMESTAMP").is_none());
    }

    #[test]
    fn test_scalar_fields_skip_nested() {
        let t = Telemetry::decode(br#"{"a":1,"b":"x","c":{"nested":true},"d":[1]}"#).unwrap();
        let names: Vec<&str> = t.scalar_fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
