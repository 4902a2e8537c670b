//! Readers for the external CSV inputs. These are read-only collaborators of
//! the pipeline; none of them is written back to the store.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ValidationError;

pub const SECTOR_PREFIX: &str = "emp_sec";
pub const TOTAL_COLUMN: &str = "emp_tot";

#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    pub id: u32,
    pub name: String,
    /// Position of the column in the controls file.
    pub column: usize,
}

/// Sector id -> controls column, checked against the configured names when
/// the controls header is read.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorSchema {
    pub sectors: Vec<Sector>,
    pub total_column: Option<usize>,
}

/// "emp_sec01" -> 1. Anything without the prefix or without digits is not a
/// sector column.
pub fn sector_id_from_column(col: &str) -> Option<u32> {
    let rest = col.strip_prefix(SECTOR_PREFIX)?;
    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

impl SectorSchema {
    pub fn from_header(
        header: &[&str],
        names: &BTreeMap<u32, String>,
    ) -> Result<Self, ValidationError> {
        let mut sectors = Vec::new();
        let mut total_column = None;
        for (k, &col) in header.iter().enumerate() {
            if col == TOTAL_COLUMN {
                total_column = Some(k);
                continue;
            }
            if !col.starts_with(SECTOR_PREFIX) {
                continue;
            }
            let id = sector_id_from_column(col).ok_or_else(|| {
                ValidationError::SectorSchema(format!("column {col} has no sector id"))
            })?;
            let name = names.get(&id).ok_or_else(|| {
                ValidationError::SectorSchema(format!("column {col}: sector {id} has no name"))
            })?;
            if sectors.iter().any(|s: &Sector| s.id == id) {
                return Err(ValidationError::SectorSchema(format!(
                    "sector {id} appears in more than one column"
                )));
            }
            sectors.push(Sector {
                id,
                name: name.clone(),
                column: k,
            });
        }
        if sectors.is_empty() {
            return Err(ValidationError::SectorSchema(format!(
                "no {SECTOR_PREFIX}* columns in controls"
            )));
        }
        Ok(SectorSchema {
            sectors,
            total_column,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneControl {
    pub zone_id: i64,
    /// Parallel to `SectorSchema::sectors`.
    pub counts: Vec<u64>,
    pub emp_tot: Option<i64>,
}

impl ZoneControl {
    pub fn sector_total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlTotals {
    pub schema: SectorSchema,
    pub zones: Vec<ZoneControl>,
}

fn parse_count(field: &str) -> Option<f64> {
    let t = field.trim();
    if t.is_empty() {
        return Some(0.0);
    }
    t.parse::<f64>().ok()
}

/// Zone controls: first column is the zone id, sector columns are
/// `emp_sec<id>`, `emp_tot` is optional, anything else is ignored.
pub fn read_control_totals(path: &Path, names: &BTreeMap<u32, String>) -> Result<ControlTotals> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let header: Vec<&str> = headers.iter().collect();
    let schema = SectorSchema::from_header(&header, names)?;

    let mut zones = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("{}: record {}", path.display(), line + 1))?;
        let zone_id: i64 = rec
            .get(0)
            .unwrap_or("")
            .trim()
            .parse()
            .with_context(|| format!("{}: record {}: bad zone id", path.display(), line + 1))?;

        let mut counts = Vec::with_capacity(schema.sectors.len());
        for s in &schema.sectors {
            let raw = rec.get(s.column).unwrap_or("");
            let v = match parse_count(raw) {
                Some(v) if v >= 0.0 && v.is_finite() => v,
                _ => bail!(
                    "{}: zone {} column {}: bad count {:?}",
                    path.display(),
                    zone_id,
                    header[s.column],
                    raw
                ),
            };
            // job counts are whole units; fractional control cells truncate
            counts.push(v as u64);
        }
        let emp_tot = match schema.total_column {
            Some(k) => match parse_count(rec.get(k).unwrap_or("")) {
                Some(v) => Some(v as i64),
                None => bail!("{}: zone {}: bad {}", path.display(), zone_id, TOTAL_COLUMN),
            },
            None => None,
        };
        zones.push(ZoneControl {
            zone_id,
            counts,
            emp_tot,
        });
    }
    zones.sort_by_key(|z| z.zone_id);
    Ok(ControlTotals { schema, zones })
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HouseholdOverride {
    pub household_id: i64,
    pub building_id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeedRestrictedTarget {
    #[serde(alias = "taz", alias = "zone_id")]
    pub taz_key: i64,
    pub units: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManualEdit {
    pub id: i64,
    pub attribute: String,
    pub new_value: String,
    pub table: String,
}

fn read_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    for (line, rec) in rdr.deserialize().enumerate() {
        let rec: T = rec.with_context(|| format!("{}: record {}", path.display(), line + 1))?;
        out.push(rec);
    }
    Ok(out)
}

/// Rows are kept in file order so later rows win when applied.
pub fn read_household_overrides(path: &Path) -> Result<Vec<HouseholdOverride>> {
    read_records(path)
}

pub fn read_deed_restricted_targets(path: &Path) -> Result<Vec<DeedRestrictedTarget>> {
    read_records(path)
}

/// Edits for `table` only, in file order.
pub fn read_manual_edits(path: &Path, table: &str) -> Result<Vec<ManualEdit>> {
    let all: Vec<ManualEdit> = read_records(path)?;
    Ok(all.into_iter().filter(|e| e.table == table).collect())
}
