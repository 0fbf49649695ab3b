/// Erreurs possibles lors d'une écriture vers un sink (SQL, Influx, export)
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("time-series store rejected write: {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp format error: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("invalid table name: {0}")]
    InvalidTable(String),
}
