use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Input file names, resolved against `--data-dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputFiles {
    pub taz_controls: String,
    pub household_overrides: String,
    pub deed_restricted_totals: String,
    pub manual_edits: String,
}

impl Default for InputFiles {
    fn default() -> Self {
        InputFiles {
            taz_controls: "baseyear_taz_controls.csv".to_string(),
            household_overrides: "household_building_id_overrides.csv".to_string(),
            deed_restricted_totals: "deed_restricted_zone_totals.csv".to_string(),
            manual_edits: "manual_edits.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Relocation {
    pub source: String,
    pub target: String,
    pub ceiling: usize,
}

impl Default for Relocation {
    fn default() -> Self {
        Relocation {
            source: "Portola Valley".to_string(),
            target: "San Mateo County".to_string(),
            ceiling: 1500,
        }
    }
}

/// Per-building ceilings on excess job-space capacity over realized jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VacancyCeilings {
    pub default_county: f64,
    pub county: BTreeMap<String, f64>,
    pub juris: BTreeMap<String, f64>,
}

fn owned_map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
}

impl Default for VacancyCeilings {
    fn default() -> Self {
        VacancyCeilings {
            default_county: 0.2,
            county: owned_map(&[
                ("Alameda", 0.42),
                ("Contra Costa", 0.57),
                ("Marin", 0.28),
                ("Napa", 0.7),
                ("San Francisco", 0.08),
                ("San Mateo", 0.4),
                ("Santa Clara", 0.32),
                ("Solano", 0.53),
                ("Sonoma", 0.4),
            ]),
            juris: owned_map(&[
                ("Berkeley", 0.65),
                ("Atherton", 0.05),
                ("Belvedere", 0.0),
                ("Corte Madera", 0.0),
                ("Cupertino", 0.1),
                ("Healdsburg", 0.0),
                ("Larkspur", 0.0),
                ("Los Altos Hills", 0.0),
                ("Los Gatos", 0.0),
                ("Monte Sereno", 0.0),
                ("Piedmont", 0.0),
                ("Portola Valley", 0.0),
                ("Ross", 0.0),
                ("San Anselmo", 0.0),
                ("Saratoga", 0.0),
                ("Woodside", 0.0),
                ("Alameda", 0.2),
            ]),
        }
    }
}

impl VacancyCeilings {
    /// min(county ceiling, jurisdiction ceiling); an unmapped county takes the
    /// default, an unmapped jurisdiction leaves the county value in place.
    pub fn ceiling_for(&self, county: &str, juris: &str) -> f64 {
        let c = self.county.get(county).copied().unwrap_or(self.default_county);
        match self.juris.get(juris) {
            Some(&j) => c.min(j),
            None => c,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Sector id (the digits of an `emp_sec` column) to sector name.
    pub sector_names: BTreeMap<u32, String>,
    pub inputs: InputFiles,
    pub relocation: Relocation,
    pub vacancy: VacancyCeilings,
    /// building_type_id -> short type code.
    pub building_types: BTreeMap<i64, String>,
    pub parking_types: Vec<String>,
    /// Placeholder type code and what it becomes.
    pub unknown_type: String,
    pub unknown_type_fallback: String,
    /// Building type -> sqft per job, used when buildings carry no
    /// `sqft_per_job` column.
    pub sqft_per_job: BTreeMap<String, f64>,
    pub default_sqft_per_job: f64,
    pub duplicate_households: Vec<i64>,
    pub default_redfin_sale_year: f64,
    pub dropped_building_columns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let sector_names = [
            (1, "RETEMPN"),
            (2, "FPSEMPN"),
            (3, "HEREMPN"),
            (4, "AGREMPN"),
            (5, "MWTEMPN"),
            (6, "OTHEMPN"),
        ]
        .iter()
        .map(|&(k, v)| (k, v.to_string()))
        .collect();

        let building_types = [
            "O", "HS", "HT", "HM", "OF", "HO", "SC", "IL", "IW", "IH", "RS", "RB", "MR", "MT",
            "ME", "PA", "PA2",
        ]
        .iter()
        .enumerate()
        .map(|(k, v)| (k as i64, v.to_string()))
        .collect();

        Settings {
            sector_names,
            inputs: InputFiles::default(),
            relocation: Relocation::default(),
            vacancy: VacancyCeilings::default(),
            building_types,
            parking_types: vec!["PA".to_string(), "PA2".to_string()],
            unknown_type: "O".to_string(),
            unknown_type_fallback: "OF".to_string(),
            sqft_per_job: BTreeMap::new(),
            default_sqft_per_job: 400.0,
            duplicate_households: vec![1132542, 1306618, 950630, 886585],
            default_redfin_sale_year: 2012.0,
            dropped_building_columns: [
                "development_type_id",
                "improvement_value",
                "sqft_per_unit",
                "nonres_rent_per_sqft",
                "res_price_per_sqft",
                "redfin_home_type",
                "costar_property_type",
                "costar_rent",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Settings {
    /// Load from JSON; fields absent from the file keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        match path {
            None => Ok(Settings::default()),
            Some(p) => {
                let text =
                    std::fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parse {}", p.display()))
            }
        }
    }

    /// Type code for a raw building_type_id; unmapped ids and the placeholder
    /// code both resolve to the fallback.
    pub fn building_type_code(&self, type_id: i64) -> &str {
        match self.building_types.get(&type_id) {
            Some(code) if *code != self.unknown_type => code,
            _ => &self.unknown_type_fallback,
        }
    }

    pub fn sqft_per_job_for(&self, building_type: &str) -> f64 {
        self.sqft_per_job
            .get(building_type)
            .copied()
            .unwrap_or(self.default_sqft_per_job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"relocation": {"ceiling": 10}, "vacancy": {"default_county": 0.3}}"#)
                .unwrap();
        assert_eq!(s.relocation.ceiling, 10);
        assert_eq!(s.relocation.source, "Portola Valley");
        assert_eq!(s.vacancy.default_county, 0.3);
        assert_eq!(s.vacancy.county.get("Napa"), Some(&0.7));
        assert_eq!(s.sector_names.len(), 6);
    }

    #[test]
    fn ceiling_lookup_rules() {
        let v = VacancyCeilings::default();
        assert_eq!(v.ceiling_for("San Mateo", "Portola Valley"), 0.0);
        assert_eq!(v.ceiling_for("Alameda", "Berkeley"), 0.42);
        assert_eq!(v.ceiling_for("Alameda", "Alameda"), 0.2);
        assert_eq!(v.ceiling_for("Nowhere", "Nowhere"), 0.2);
        assert_eq!(v.ceiling_for("Napa", "Unlisted"), 0.7);
    }

    #[test]
    fn building_type_codes() {
        let s = Settings::default();
        assert_eq!(s.building_type_code(1), "HS");
        assert_eq!(s.building_type_code(16), "PA2");
        assert_eq!(s.building_type_code(0), "OF");
        assert_eq!(s.building_type_code(42), "OF");
    }
}
