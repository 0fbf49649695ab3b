/**
 * HISTORIQUE BORNÉ - Ring buffer explicite de 100 enregistrements
 *
 * RÔLE :
 * Version assumée du pattern "count puis insert-ou-update" du pont d'origine :
 * un ring de capacité fixe dont la table SQL est le miroir durable.
 * La décision insert/overwrite se prend ici, en un seul point, puis le
 * miroir SQL l'exécute dans une transaction; le ring n'est mis à jour
 * qu'après commit (plan → commit SQL → apply).
 *
 * INVARIANTS :
 * - jamais plus de `capacity` enregistrements
 * - ids ordinaux strictement croissants à l'insertion, stables ensuite
 * - plein : on écrase l'enregistrement au timestamp minimum (id conservé)
 */

use time::OffsetDateTime;

pub const HISTORY_CAPACITY: usize = 100;

/// Ligne d'historique : id ordinal + horodatage + payload JSON sérialisé
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub timestamp: OffsetDateTime,
    pub payload: String,
}

/// Ce que le miroir SQL doit exécuter pour la prochaine écriture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    /// INSERT d'une nouvelle ligne sous cet id
    Insert { id: i64 },
    /// UPDATE timestamp+payload de la ligne existante (id conservé)
    Overwrite { id: i64 },
}

#[derive(Debug)]
pub struct HistoryRing {
    capacity: usize,
    records: Vec<HistoryRecord>,
    next_id: i64,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::with_capacity(capacity),
            next_id: 1,
        }
    }

    /// Reconstruit le ring depuis les lignes du miroir SQL au démarrage
    pub fn seed(capacity: usize, records: Vec<HistoryRecord>) -> Self {
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Self {
            capacity,
            records,
            next_id,
        }
    }

    /// Décide l'opération pour la prochaine écriture, sans muter le ring
    pub fn plan(&self) -> WritePlan {
        if self.records.len() < self.capacity {
            WritePlan::Insert { id: self.next_id }
        } else {
            // plein : cible = timestamp minimum, égalité tranchée par ordre de stockage
            let oldest = self
                .records
                .iter()
                .min_by_key(|r| r.timestamp)
                .map(|r| r.id)
                .unwrap_or(self.next_id);
            WritePlan::Overwrite { id: oldest }
        }
    }

    /// Applique le plan après commit du miroir SQL
    pub fn apply(&mut self, plan: WritePlan, timestamp: OffsetDateTime, payload: String) {
        match plan {
            WritePlan::Insert { id } => {
                self.records.push(HistoryRecord {
                    id,
                    timestamp,
                    payload,
                });
                self.next_id = id + 1;
            }
            WritePlan::Overwrite { id } => {
                if let Some(rec) = self.records.iter_mut().find(|r| r.id == id) {
                    rec.timestamp = timestamp;
                    rec.payload = payload;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Snapshot trié du plus récent au plus ancien (ordre de l'export CSV)
    pub fn snapshot_newest_first(&self) -> Vec<HistoryRecord> {
        let mut out = self.records.clone();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }
}
