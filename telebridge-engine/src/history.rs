/**
 * SINK HISTORIQUE SQL - Miroir durable du ring borné
 *
 * RÔLE :
 * Persiste l'historique télémétrie dans une table SQLite à 100 lignes max.
 * Le ring en mémoire décide insert-ou-overwrite (voir ring.rs), la table
 * exécute la décision dans une transaction unique; une connexion longue
 * durée pour toute la vie du process, pas de pool.
 *
 * La requête last-seen (consommée par le dashboard) lit la même table en
 * lecture seule depuis un autre process; une lecture peut croiser un
 * écrasement du ring et voir l'ancienne ou la nouvelle ligne, c'est admis.
 */

use crate::error::SinkError;
use crate::ring::{HistoryRecord, HistoryRing, WritePlan, HISTORY_CAPACITY};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

/// Interface d'écriture de l'historique borné (seam de test du moteur)
pub trait HistorySink {
    /// Écrit un payload sous l'horodatage donné; commit atomique, ring ensuite
    fn append(&mut self, timestamp: OffsetDateTime, payload: &str) -> Result<(), SinkError>;

    /// Snapshot complet de l'historique courant, du plus récent au plus ancien
    fn snapshot(&self) -> Vec<HistoryRecord>;
}

pub struct SqliteHistory {
    conn: Connection,
    table: String,
    ring: HistoryRing,
}

/// Le nom de table vient de la config et s'interpole dans le SQL :
/// on ne laisse passer que [A-Za-z0-9_]
fn check_table_name(table: &str) -> Result<(), SinkError> {
    let ok = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.chars().next().unwrap_or('0').is_ascii_digit();
    if ok {
        Ok(())
    } else {
        Err(SinkError::InvalidTable(table.to_string()))
    }
}

fn load_records(conn: &Connection, table: &str) -> Result<Vec<HistoryRecord>, SinkError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, timestamp, json_data FROM {table} ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, ts_text, payload) = row?;
        match OffsetDateTime::parse(&ts_text, &Rfc3339) {
            Ok(timestamp) => records.push(HistoryRecord {
                id,
                timestamp,
                payload,
            }),
            Err(e) => warn!("ligne {id} ignorée, timestamp illisible '{ts_text}': {e}"),
        }
    }
    Ok(records)
}

impl SqliteHistory {
    /// Ouvre (ou crée) le miroir SQL et reconstruit le ring depuis son contenu
    pub fn open(path: &Path, table: &str) -> Result<Self, SinkError> {
        check_table_name(table)?;
        let conn = Connection::open(path)?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    json_data TEXT NOT NULL
                )"
            ),
            [],
        )?;
        let records = load_records(&conn, table)?;
        let ring = HistoryRing::seed(HISTORY_CAPACITY, records);
        Ok(Self {
            conn,
            table: table.to_string(),
            ring,
        })
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl HistorySink for SqliteHistory {
    fn append(&mut self, timestamp: OffsetDateTime, payload: &str) -> Result<(), SinkError> {
        let ts_text = timestamp.format(&Rfc3339)?;
        let plan = self.ring.plan();

        // count-check + insert-ou-update + commit : une seule unité logique
        let tx = self.conn.transaction()?;
        match plan {
            WritePlan::Insert { id } => {
                tx.execute(
                    &format!("INSERT INTO {} (id, timestamp, json_data) VALUES (?1, ?2, ?3)", self.table),
                    params![id, ts_text, payload],
                )?;
            }
            WritePlan::Overwrite { id } => {
                tx.execute(
                    &format!("UPDATE {} SET timestamp = ?1, json_data = ?2 WHERE id = ?3", self.table),
                    params![ts_text, payload, id],
                )?;
            }
        }
        tx.commit()?;

        // le ring ne bouge qu'après commit : pas d'état fantôme si le SQL échoue
        self.ring.apply(plan, timestamp, payload.to_string());
        Ok(())
    }

    fn snapshot(&self) -> Vec<HistoryRecord> {
        self.ring.snapshot_newest_first()
    }
}

/// Last-seen par device : réduction max(timestamp) sur les payloads retenus.
/// Recalculée à la demande, jamais matérialisée — bornée par le ring de 100
/// lignes, un device évincé disparaît du mapping.
pub fn last_seen_from_records(
    records: &[HistoryRecord],
    device_field: &str,
) -> HashMap<String, OffsetDateTime> {
    let mut out: HashMap<String, OffsetDateTime> = HashMap::new();
    for rec in records {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&rec.payload) else {
            continue;
        };
        let Some(device) = value.get(device_field).and_then(|v| v.as_str()) else {
            continue;
        };
        out.entry(device.to_string())
            .and_modify(|ts| {
                if rec.timestamp > *ts {
                    *ts = rec.timestamp;
                }
            })
            .or_insert(rec.timestamp);
    }
    out
}

/// Variante dashboard : ouverture lecture seule par requête, autre process
pub fn last_seen(
    db_path: &Path,
    table: &str,
    device_field: &str,
) -> Result<HashMap<String, OffsetDateTime>, SinkError> {
    check_table_name(table)?;
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let records = load_records(&conn, table)?;
    Ok(last_seen_from_records(&records, device_field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn ts(secs: i64) -> OffsetDateTime {
        datetime!(2024-01-01 00:00:00 UTC) + time::Duration::seconds(secs)
    }

    fn payload(device: &str, n: i64) -> String {
        format!(r#"{{"DEV_EUI":"{device}","seq":{n}}}"#)
    }

    #[test]
    fn test_rejects_bad_table_name() {
        assert!(check_table_name("historical_data").is_ok());
        assert!(check_table_name("x; DROP TABLE y").is_err());
        assert!(check_table_name("").is_err());
        assert!(check_table_name("1table").is_err());
    }

    #[test]
    fn test_rows_match_writes_under_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("hist.db");
        let mut sink = SqliteHistory::open(&db, "historical_data").unwrap();
        for i in 0..40 {
            sink.append(ts(i), &payload("A", i)).unwrap();
        }
        assert_eq!(sink.len(), 40);

        let conn = Connection::open(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM historical_data", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 40);
        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM historical_data ORDER BY id ASC")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(ids, (1..=40).collect::<Vec<i64>>());
    }

    #[test]
    fn test_capacity_capped_at_100_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("hist.db");
        let mut sink = SqliteHistory::open(&db, "historical_data").unwrap();
        for i in 0..150 {
            sink.append(ts(i), &payload("A", i)).unwrap();
        }
        let conn = Connection::open(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM historical_data", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 100);

        // la table retient les 100 payloads les plus récents
        let kept: Vec<String> = conn
            .prepare("SELECT json_data FROM historical_data")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(kept.contains(&payload("A", 149)));
        assert!(kept.contains(&payload("A", 50)));
        assert!(!kept.contains(&payload("A", 49)));
    }

    #[test]
    fn test_reopen_restores_ring_state() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("hist.db");
        {
            let mut sink = SqliteHistory::open(&db, "historical_data").unwrap();
            for i in 0..5 {
                sink.append(ts(i), &payload("A", i)).unwrap();
            }
        }
        let mut sink = SqliteHistory::open(&db, "historical_data").unwrap();
        assert_eq!(sink.len(), 5);
        sink.append(ts(5), &payload("A", 5)).unwrap();

        let conn = Connection::open(&db).unwrap();
        let max_id: i64 = conn
            .query_row("SELECT MAX(id) FROM historical_data", [], |r| r.get(0))
            .unwrap();
        assert_eq!(max_id, 6);
    }

    #[test]
    fn test_last_seen_two_devices() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("hist.db");
        let mut sink = SqliteHistory::open(&db, "historical_data").unwrap();
        sink.append(ts(10), &payload("A", 0)).unwrap();
        sink.append(ts(20), &payload("B", 1)).unwrap();

        let seen = last_seen(&db, "historical_data", "DEV_EUI").unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen["A"], ts(10));
        assert_eq!(seen["B"], ts(20));
    }

    #[test]
    fn test_last_seen_drops_evicted_device() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("hist.db");
        let mut sink = SqliteHistory::open(&db, "historical_data").unwrap();
        sink.append(ts(0), &payload("A", 0)).unwrap();
        // 100 écritures de B seul : A sort du ring
        for i in 1..=100 {
            sink.append(ts(i), &payload("B", i)).unwrap();
        }
        let seen = last_seen(&db, "historical_data", "DEV_EUI").unwrap();
        assert!(!seen.contains_key("A"));
        assert_eq!(seen["B"], ts(100));
    }

    #[test]
    fn test_last_seen_skips_payload_without_device() {
        let records = vec![
            HistoryRecord { id: 1, timestamp: ts(0), payload: r#"{"x":1}"#.into() },
            HistoryRecord { id: 2, timestamp: ts(1), payload: payload("A", 1) },
        ];
        let seen = last_seen_from_records(&records, "DEV_EUI");
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key("A"));
    }
}
