/**
 * EXPORT CSV - Snapshot à plat de l'historique pour consommation externe
 *
 * Réécrit le fichier en entier après chaque commit SQL réussi (jamais
 * d'append) : en-tête reprenant les colonnes de la table, une ligne par
 * enregistrement, du plus récent au plus ancien. Un échec d'export est
 * loggé par l'appelant et ne remet jamais en cause le commit.
 */

use crate::error::SinkError;
use crate::ring::HistoryRecord;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;

pub struct CsvExporter {
    path: PathBuf,
}

/// Quoting CSV minimal : les payloads JSON contiennent virgules et guillemets
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl CsvExporter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn export(&self, records: &[HistoryRecord]) -> Result<(), SinkError> {
        let mut out = String::from("id,timestamp,json_data\n");
        for rec in records {
            let ts = rec.timestamp.format(&Rfc3339)?;
            out.push_str(&format!("{},{},{}\n", rec.id, ts, csv_escape(&rec.payload)));
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(id: i64, secs: i64, payload: &str) -> HistoryRecord {
        HistoryRecord {
            id,
            timestamp: datetime!(2024-01-01 00:00:00 UTC) + time::Duration::seconds(secs),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_export_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let exporter = CsvExporter::new(&path);
        exporter.export(&[record(2, 1, "plain")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "id,timestamp,json_data");
        assert_eq!(lines[1], "2,2024-01-01T00:00:01Z,plain");
    }

    #[test]
    fn test_export_quotes_json_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let exporter = CsvExporter::new(&path);
        exporter
            .export(&[record(1, 0, r#"{"DEV_EUI":"A","v":1}"#)])
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(r#""{""DEV_EUI"":""A"",""v"":1}""#));
    }

    #[test]
    fn test_export_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let exporter = CsvExporter::new(&path);
        let records = vec![record(1, 5, r#"{"a":1}"#), record(2, 3, "x,y")];

        exporter.export(&records).unwrap();
        let first = std::fs::read(&path).unwrap();
        exporter.export(&records).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_export_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let exporter = CsvExporter::new(&path);
        exporter
            .export(&[record(1, 0, "one"), record(2, 1, "two")])
            .unwrap();
        exporter.export(&[record(1, 0, "one")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("two"));
    }
}
