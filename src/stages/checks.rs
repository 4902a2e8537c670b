//! Post-run sanity checks over the preprocessed tables. Findings are
//! warnings unless the run asked for strict checks.

use anyhow::Result;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, BTreeSet};

use super::{Stage, StageEnv};
use crate::allocation::{ZoneIndex, reindex_str, tally};
use crate::error::ValidationError;
use crate::inputs::{
    ControlTotals, DeedRestrictedTarget, ManualEdit, read_control_totals,
    read_deed_restricted_targets, read_manual_edits,
};
use crate::settings::Settings;
use crate::stages::jobs::jurisdictions_of;
use crate::store::{Column, DataContext, Table};

/// Columns rewritten after manual edits are applied, so an edit to them is not
/// expected to survive.
const DERIVED_COLUMNS: &[&str] = &["building_sqft", "non_residential_sqft", "job_spaces"];

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: &'static str,
    pub failures: Vec<String>,
}

impl CheckResult {
    fn new(name: &'static str, failures: Vec<String>) -> Self {
        CheckResult { name, failures }
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Jobs per zone, found through each job's building, against the control
/// totals. Zones holding a building in the relocation source or target
/// jurisdiction are skipped, since relocation moves jobs across their edges.
pub fn check_zone_totals(
    jobs: &Table,
    buildings: &Table,
    parcels: &Table,
    controls: &ControlTotals,
    settings: &Settings,
) -> Result<CheckResult, ValidationError> {
    let zones = ZoneIndex::build(buildings, parcels)?;
    let realized: BTreeMap<i64, i64> = tally(&jobs.i64_values("building_id")?)
        .into_iter()
        .fold(BTreeMap::new(), |mut acc, (b, n)| {
            let zone = buildings.position(b).map_or(-1, |p| zones.zone_of(p));
            *acc.entry(zone).or_insert(0) += n as i64;
            acc
        });

    let reloc = &settings.relocation;
    let parcel_ids = buildings.i64_values("parcel_id")?;
    let juris = reindex_str(parcels, "juris", &parcel_ids)?;
    let exempt: BTreeSet<i64> = juris
        .iter()
        .enumerate()
        .filter(|(_, j)| **j == reloc.source || **j == reloc.target)
        .map(|(pos, _)| zones.zone_of(pos))
        .collect();

    let mut expected: BTreeMap<i64, i64> = BTreeMap::new();
    for z in &controls.zones {
        *expected.entry(z.zone_id).or_insert(0) += z.emp_tot.unwrap_or(z.sector_total() as i64);
    }

    let mut failures = Vec::new();
    for (&zone, &want) in &expected {
        let got = realized.get(&zone).copied().unwrap_or(0);
        if got != want && !exempt.contains(&zone) {
            failures.push(format!("zone {zone}: {got} jobs, control {want}"));
        }
    }
    for (&zone, &got) in &realized {
        if !expected.contains_key(&zone) && !exempt.contains(&zone) {
            failures.push(format!("zone {zone}: {got} jobs, no control row"));
        }
    }
    Ok(CheckResult::new("zone job totals", failures))
}

pub fn check_relocation_ceiling(
    jobs: &Table,
    buildings: &Table,
    parcels: &Table,
    settings: &Settings,
) -> Result<CheckResult, ValidationError> {
    let reloc = &settings.relocation;
    let juris = jurisdictions_of(&jobs.i64_values("building_id")?, buildings, parcels)?;
    let n = juris.iter().filter(|j| **j == reloc.source).count();
    let mut failures = Vec::new();
    if n > reloc.ceiling {
        failures.push(format!("{}: {} jobs, ceiling {}", reloc.source, n, reloc.ceiling));
    }
    Ok(CheckResult::new("relocation ceiling", failures))
}

fn cell_matches(col: &Column, pos: usize, raw: &str) -> bool {
    let raw = raw.trim();
    match col {
        Column::Str(v) => v[pos] == raw,
        Column::Int(v) => raw.parse::<f64>().is_ok_and(|x| x == v[pos] as f64),
        Column::Float(v) => match raw.parse::<f64>() {
            Ok(x) => x == v[pos],
            Err(_) => raw.is_empty() && v[pos].is_nan(),
        },
    }
}

/// The last edit of every (row, column) is visible in the final table, except
/// for columns that are dropped or derived afterwards.
pub fn check_manual_edits(buildings: &Table, edits: &[ManualEdit]) -> CheckResult {
    let mut last: BTreeMap<(i64, &str), &str> = BTreeMap::new();
    for e in edits {
        last.insert((e.id, e.attribute.as_str()), e.new_value.as_str());
    }
    let mut failures = Vec::new();
    for ((id, attr), value) in last {
        if DERIVED_COLUMNS.contains(&attr) {
            continue;
        }
        let (Some(pos), Ok(col)) = (buildings.position(id), buildings.column(attr)) else {
            continue;
        };
        if !cell_matches(col, pos, value) {
            failures.push(format!(
                "building {}: {} is {:?}, edit says {:?}",
                id,
                attr,
                col.cell(pos),
                value
            ));
        }
    }
    CheckResult::new("manual edits applied", failures)
}

pub fn check_deed_restricted_targets(
    buildings: &Table,
    parcels: &Table,
    targets: &[DeedRestrictedTarget],
) -> Result<CheckResult, ValidationError> {
    let zones = ZoneIndex::build(buildings, parcels)?;
    let deed = buildings.i64_values("deed_restricted_units")?;
    let mut per_zone: BTreeMap<i64, i64> = BTreeMap::new();
    for (pos, &d) in deed.iter().enumerate() {
        *per_zone.entry(zones.zone_of(pos)).or_insert(0) += d;
    }
    let target: BTreeMap<i64, i64> = targets.iter().map(|t| (t.taz_key, t.units)).collect();
    let failures = per_zone
        .iter()
        .filter(|&(_, &units)| units > 0)
        .filter_map(|(zone, &units)| {
            let cap = target.get(zone).copied().unwrap_or(0);
            (units > cap).then(|| format!("zone {zone}: {units} deed restricted units, target {cap}"))
        })
        .collect();
    Ok(CheckResult::new("deed restricted totals", failures))
}

pub fn check_units_cover_households(
    buildings: &Table,
    households: &Table,
) -> Result<CheckResult, ValidationError> {
    let occupancy = tally(&households.i64_values("building_id")?);
    let units = buildings.i64_values("residential_units")?;
    let failures = occupancy
        .iter()
        .filter_map(|(&b, &n)| {
            let p = buildings.position(b)?;
            (units[p] < n as i64).then(|| format!("building {b}: {} units, {n} households", units[p]))
        })
        .collect();
    Ok(CheckResult::new("residential units >= households", failures))
}

/// Every building holds at least as many job spaces as jobs placed in it.
pub fn check_job_spaces_cover_jobs(
    buildings: &Table,
    jobs: &Table,
) -> Result<CheckResult, ValidationError> {
    let placed = tally(&jobs.i64_values("building_id")?);
    let spaces = buildings.i64_values("job_spaces")?;
    let failures = placed
        .iter()
        .filter_map(|(&b, &n)| {
            let p = buildings.position(b)?;
            (spaces[p] < n as i64).then(|| format!("building {b}: {} job spaces, {n} jobs", spaces[p]))
        })
        .collect();
    Ok(CheckResult::new("job spaces >= jobs", failures))
}

pub fn check_deed_within_units(buildings: &Table) -> Result<CheckResult, ValidationError> {
    let units = buildings.i64_values("residential_units")?;
    let deed = buildings.i64_values("deed_restricted_units")?;
    let failures = buildings
        .index()
        .iter()
        .zip(units.iter().zip(&deed))
        .filter(|(_, (u, d))| d > u)
        .map(|(id, (u, d))| format!("building {id}: {d} deed restricted of {u} units"))
        .collect();
    Ok(CheckResult::new("deed restricted <= residential units", failures))
}

/// Log every result; return the number of failed checks.
pub fn report(results: &[CheckResult]) -> usize {
    let mut failed = 0;
    for r in results {
        if r.passed() {
            tracing::info!(check = r.name, "ok");
            continue;
        }
        failed += 1;
        tracing::warn!(check = r.name, failures = r.failures.len(), "check failed");
        for f in r.failures.iter().take(10) {
            tracing::warn!(check = r.name, "{f}");
        }
    }
    failed
}

pub struct BaselineDataChecks;

impl Stage for BaselineDataChecks {
    fn name(&self) -> &'static str {
        "baseline_data_checks"
    }

    fn reads(&self) -> &'static [&'static str] {
        &["jobs_preproc", "households_preproc", "buildings_preproc", "parcels"]
    }

    fn run(&self, ctx: &mut DataContext, env: &StageEnv<'_>, _rng: &mut StdRng) -> Result<()> {
        let settings = env.settings;
        ctx.ensure(self.reads())?;
        let jobs = ctx.get("jobs_preproc")?;
        let households = ctx.get("households_preproc")?;
        let buildings = ctx.get("buildings_preproc")?;
        let parcels = ctx.get("parcels")?;

        let mut results = Vec::new();

        let controls_path = env.input(&settings.inputs.taz_controls);
        let controls = read_control_totals(&controls_path, &settings.sector_names)?;
        results.push(check_zone_totals(jobs, buildings, parcels, &controls, settings)?);
        results.push(check_relocation_ceiling(jobs, buildings, parcels, settings)?);

        let edits_path = env.input(&settings.inputs.manual_edits);
        if edits_path.exists() {
            let edits = read_manual_edits(&edits_path, "buildings")?;
            results.push(check_manual_edits(buildings, &edits));
        }
        let targets_path = env.input(&settings.inputs.deed_restricted_totals);
        let targets = if targets_path.exists() {
            read_deed_restricted_targets(&targets_path)?
        } else {
            Vec::new()
        };
        results.push(check_deed_restricted_targets(buildings, parcels, &targets)?);
        results.push(check_units_cover_households(buildings, households)?);
        results.push(check_deed_within_units(buildings)?);
        results.push(check_job_spaces_cover_jobs(buildings, jobs)?);

        let failed = report(&results);
        if failed > 0 && env.strict_checks {
            return Err(ValidationError::ChecksFailed { failed }.into());
        }
        tracing::info!(checks = results.len(), failed, "baseline data checks finished");
        Ok(())
    }
}
