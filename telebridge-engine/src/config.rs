use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Configuration complète du pont, chargée depuis config.txt (format clé=valeur)
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttConf,
    pub influx: Option<InfluxConf>,
    pub sql: SqlConf,
    pub fields: FieldConf,
    pub export_path: PathBuf,
    pub heartbeat_path: PathBuf,
    pub status_port: u16,
}

#[derive(Debug, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Section InfluxDB — absente si INFLUX_URL vide (le pont tourne sans time-series)
#[derive(Debug, Clone)]
pub struct InfluxConf {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
}

#[derive(Debug, Clone)]
pub struct SqlConf {
    pub path: PathBuf,
    pub table: String,
}

/// Champs télémétrie extraits pour le point time-series.
/// Configurable : les deux variantes historiques du pont ne s'accordaient pas
/// sur le schéma (Water level/TIMESTAMP vs millis/message).
#[derive(Debug, Clone)]
pub struct FieldConf {
    pub device: String,
    pub time: String,
    /// Champs valeur à écrire côté Influx; vide = tous les champs scalaires
    pub values: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf {
                host: "localhost".into(),
                port: 8883,
                topic: "fielddevices/telemetry".into(),
                username: None,
                password: None,
            },
            influx: None,
            sql: SqlConf {
                path: "historical_data.db".into(),
                table: "historical_data".into(),
            },
            fields: FieldConf {
                device: "DEV_EUI".into(),
                time: "TIMESTAMP".into(),
                values: Vec::new(),
            },
            export_path: "historical_data.csv".into(),
            heartbeat_path: "telebridge.heartbeat".into(),
            status_port: 5050,
        }
    }
}

/// Parse le contenu clé=valeur : lignes vides, commentaires # et lignes sans = ignorés
fn parse_kv(txt: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in txt.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn non_empty(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

impl BridgeConfig {
    /// Construit la config depuis les paires clé=valeur, défauts pour le reste
    pub fn from_kv(map: &HashMap<String, String>) -> Self {
        let mut cfg = Self::default();

        if let Some(host) = non_empty(map, "MQTT_BROKER") {
            cfg.mqtt.host = host;
        }
        if let Some(port) = non_empty(map, "MQTT_PORT").and_then(|p| p.parse().ok()) {
            cfg.mqtt.port = port;
        }
        if let Some(topic) = non_empty(map, "MQTT_TOPIC") {
            cfg.mqtt.topic = topic;
        }
        cfg.mqtt.username = non_empty(map, "MQTT_USERNAME");
        cfg.mqtt.password = non_empty(map, "MQTT_PASSWORD");

        // Influx activé seulement si l'URL est renseignée
        if let Some(url) = non_empty(map, "INFLUX_URL") {
            cfg.influx = Some(InfluxConf {
                url,
                token: non_empty(map, "INFLUX_TOKEN").unwrap_or_default(),
                org: non_empty(map, "INFLUX_ORG").unwrap_or_default(),
                bucket: non_empty(map, "INFLUX_BUCKET").unwrap_or_default(),
                measurement: non_empty(map, "INFLUX_MEASUREMENT")
                    .unwrap_or_else(|| "fielddevices".into()),
            });
        }

        if let Some(path) = non_empty(map, "SQL_PATH") {
            cfg.sql.path = path.into();
        }
        if let Some(table) = non_empty(map, "SQL_TABLE") {
            cfg.sql.table = table;
        }

        if let Some(device) = non_empty(map, "DEVICE_FIELD") {
            cfg.fields.device = device;
        }
        if let Some(time) = non_empty(map, "TIME_FIELD") {
            cfg.fields.time = time;
        }
        if let Some(values) = non_empty(map, "VALUE_FIELDS") {
            cfg.fields.values = values
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }

        if let Some(path) = non_empty(map, "EXPORT_PATH") {
            cfg.export_path = path.into();
        }
        if let Some(path) = non_empty(map, "HEARTBEAT_PATH") {
            cfg.heartbeat_path = path.into();
        }
        if let Some(port) = non_empty(map, "STATUS_PORT").and_then(|p| p.parse().ok()) {
            cfg.status_port = port;
        }

        cfg
    }
}

/// Chemin du fichier de config : TELEBRIDGE_CONFIG ou config.txt
pub fn config_path() -> PathBuf {
    std::env::var("TELEBRIDGE_CONFIG")
        .unwrap_or_else(|_| "config.txt".into())
        .into()
}

pub async fn load_config() -> BridgeConfig {
    let path = config_path();
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        BridgeConfig::from_kv(&parse_kv(&txt))
    } else {
        warn!("pas de {}, usage config par défaut", path.display());
        BridgeConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kv_skips_comments_and_blanks() {
        let txt = "# commentaire\n\nMQTT_BROKER=broker.example.com\nligne sans egal\nMQTT_PORT=8883\n";
        let map = parse_kv(txt);
        assert_eq!(map.get("MQTT_BROKER").unwrap(), "broker.example.com");
        assert_eq!(map.get("MQTT_PORT").unwrap(), "8883");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_influx_disabled_without_url() {
        let map = parse_kv("MQTT_BROKER=x\nINFLUX_TOKEN=secret\n");
        let cfg = BridgeConfig::from_kv(&map);
        assert!(cfg.influx.is_none());
    }

    #[test]
    fn test_influx_enabled_with_url() {
        let txt = "INFLUX_URL=http://localhost:8086\nINFLUX_TOKEN=t\nINFLUX_ORG=o\nINFLUX_BUCKET=b\n";
        let cfg = BridgeConfig::from_kv(&parse_kv(txt));
        let influx = cfg.influx.unwrap();
        assert_eq!(influx.url, "http://localhost:8086");
        assert_eq!(influx.measurement, "fielddevices");
    }

    #[test]
    fn test_value_fields_split() {
        let cfg = BridgeConfig::from_kv(&parse_kv("VALUE_FIELDS=Water level, millis\n"));
        assert_eq!(cfg.fields.values, vec!["Water level", "millis"]);
    }

    #[test]
    fn test_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.fields.device, "DEV_EUI");
        assert_eq!(cfg.fields.time, "TIMESTAMP");
        assert!(cfg.fields.values.is_empty());
        assert_eq!(cfg.sql.table, "historical_data");
    }
}
