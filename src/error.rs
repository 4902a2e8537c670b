use thiserror::Error;

/// Fatal data conditions. Any of these aborts the pipeline; nothing after the
/// failing stage is committed.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("zone {zone}: control total {expected} jobs but {actual} allocated")]
    JobTotalMismatch { zone: i64, expected: i64, actual: i64 },

    #[error("{what} in zone {zone}: {requested} units requested but no candidate has positive capacity")]
    EmptyCandidates {
        what: &'static str,
        zone: i64,
        requested: usize,
    },

    #[error("zone {zone}: capacity weight {weight} for location {location} is not a finite non-negative number")]
    InvalidWeight { zone: i64, location: i64, weight: f64 },

    #[error("{jurisdiction}: {surplus} jobs to move but no destination buildings in {target}")]
    NoRelocationTargets {
        jurisdiction: String,
        target: String,
        surplus: usize,
    },

    #[error("table {table}: duplicate row id {id}")]
    DuplicateRow { table: String, id: i64 },

    #[error("table {table}: column {column} has {found} rows, table has {expected}")]
    ColumnLength {
        table: String,
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("table {table}: no row with id {id}")]
    UnknownRow { table: String, id: i64 },

    #[error("table {table}: no column {column}")]
    UnknownColumn { table: String, column: String },

    #[error("table {table}: column {column} is {found}, expected {expected}")]
    ColumnType {
        table: String,
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("table {table}: cannot parse {value:?} for column {column} ({dtype})")]
    BadValue {
        table: String,
        column: String,
        value: String,
        dtype: &'static str,
    },

    #[error("household {id}: income {income} is not finite")]
    NonFiniteIncome { id: i64, income: f64 },

    #[error("sector schema: {0}")]
    SectorSchema(String),

    #[error("stage plan: {0}")]
    Plan(String),

    #[error("{failed} baseline data check(s) failed")]
    ChecksFailed { failed: usize },
}
