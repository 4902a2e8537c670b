//! Building reconciliation: occupancy-driven unit counts, manual edits,
//! type codes, deed-restricted units and derived job spaces.

use anyhow::{Context, Result};
use rand::Rng;
use rand::rngs::StdRng;

use super::{Stage, StageEnv};
use crate::allocation::{Candidate, ZoneIndex, sample_with_replacement, tally};
use crate::error::ValidationError;
use crate::inputs::{
    DeedRestrictedTarget, ManualEdit, read_deed_restricted_targets, read_manual_edits,
};
use crate::settings::Settings;
use crate::store::{Column, DataContext, Table};

/// Raise `residential_units` to the number of households living in each
/// building. Returns how many households point at unknown buildings.
pub fn reconcile_residential_units(
    buildings: &mut Table,
    households: &Table,
) -> Result<usize, ValidationError> {
    let occupancy = tally(&households.i64_values("building_id")?);
    let mut units = buildings.f64_values("residential_units")?;
    let mut orphans = 0usize;
    for (&building, &n) in &occupancy {
        match buildings.position(building) {
            // NaN.max(n) == n
            Some(p) => units[p] = units[p].max(n as f64),
            None => orphans += n as usize,
        }
    }
    buildings.set_column("residential_units", Column::Float(units))?;
    Ok(orphans)
}

/// Apply edits in order; a later edit of the same cell wins.
pub fn apply_manual_edits(table: &mut Table, edits: &[ManualEdit]) -> Result<(), ValidationError> {
    for e in edits {
        table.set_value(e.id, &e.attribute, &e.new_value)?;
    }
    Ok(())
}

fn fill_nan(values: &mut [f64], with: f64) {
    for v in values.iter_mut().filter(|v| v.is_nan()) {
        *v = with;
    }
}

/// Everything up to deed-restriction assignment.
pub fn reconcile(
    mut df: Table,
    households: &Table,
    edits: &[ManualEdit],
    settings: &Settings,
) -> Result<Table, ValidationError> {
    let orphans = reconcile_residential_units(&mut df, households)?;
    if orphans > 0 {
        tracing::warn!(households = orphans, "households in buildings that do not exist");
    }

    let dropped: Vec<&str> = settings
        .dropped_building_columns
        .iter()
        .map(|s| s.as_str())
        .collect();
    df.drop_columns(&dropped);

    apply_manual_edits(&mut df, edits)?;

    let mut units = df.f64_values("residential_units")?;
    fill_nan(&mut units, 0.0);
    df.set_column(
        "residential_units",
        Column::Int(units.iter().map(|&u| u as i64).collect()),
    )?;

    let res_sqft = df.f64_values("residential_sqft")?;
    let mut nonres = df.f64_values("non_residential_sqft")?;
    let mut total = df.f64_values("building_sqft")?;
    for i in 0..total.len() {
        total[i] = total[i].max(res_sqft[i] + nonres[i]);
    }

    let types: Vec<String> = df
        .i64_values("building_type_id")?
        .into_iter()
        .map(|id| settings.building_type_code(id).to_string())
        .collect();
    df.remove_column("building_type_id");

    // parking lots never redevelop
    let mut parking = 0usize;
    for (i, t) in types.iter().enumerate() {
        if settings.parking_types.contains(t) {
            total[i] = 0.0;
            nonres[i] = 0.0;
            parking += 1;
        }
    }
    tracing::debug!(parking, "parking lots zeroed");

    df.set_column("building_sqft", Column::Float(total))?;
    df.set_column("non_residential_sqft", Column::Float(nonres))?;
    df.set_column("building_type", Column::Str(types))?;

    let year = settings.default_redfin_sale_year;
    let sale_year = if df.has_column("redfin_sale_year") {
        let mut v = df.f64_values("redfin_sale_year")?;
        fill_nan(&mut v, year);
        v
    } else {
        vec![year; df.len()]
    };
    df.set_column("redfin_sale_year", Column::Float(sale_year))?;

    let n = df.len();
    df.set_column("residential_price", Column::Float(vec![0.0; n]))?;
    df.set_column("non_residential_rent", Column::Float(vec![0.0; n]))?;
    Ok(df)
}

/// Sample deed-restricted units into each target zone, weighted by
/// residential units, then cap each building at its residential units.
/// Returns the totals before and after capping.
pub fn assign_deed_restricted_units<R: Rng + ?Sized>(
    df: &mut Table,
    zones: &ZoneIndex,
    targets: &[DeedRestrictedTarget],
    rng: &mut R,
) -> Result<(i64, i64), ValidationError> {
    let ids = df.index().to_vec();
    let units = df.i64_values("residential_units")?;
    let mut deed = vec![0i64; df.len()];

    for t in targets.iter().filter(|t| t.units > 0) {
        let candidates: Vec<Candidate> = zones
            .members(t.taz_key)
            .iter()
            .filter(|&&p| units[p] > 0)
            .map(|&p| Candidate {
                id: ids[p],
                weight: units[p] as f64,
            })
            .collect();
        let draws = sample_with_replacement(
            "deed_restricted_units",
            t.taz_key,
            t.units as usize,
            &candidates,
            rng,
        )?;
        for (building, n) in tally(&draws) {
            if let Some(p) = df.position(building) {
                deed[p] += n as i64;
            }
        }
    }

    let sampled: i64 = deed.iter().sum();
    tracing::info!(units = sampled, "deed restricted units after random selection");
    for (d, &u) in deed.iter_mut().zip(&units) {
        *d = (*d).min(u);
    }
    let capped: i64 = deed.iter().sum();
    tracing::info!(units = capped, "deed restricted units after truncating to res units");

    df.set_column("deed_restricted_units", Column::Int(deed))?;
    Ok((sampled, capped))
}

/// `sqft_per_job` (kept from the input when present) and the job spaces it
/// implies.
pub fn derive_job_spaces(df: &mut Table, settings: &Settings) -> Result<(), ValidationError> {
    let per_job = if df.has_column("sqft_per_job") {
        df.f64_values("sqft_per_job")?
    } else {
        df.strs("building_type")?
            .iter()
            .map(|t| settings.sqft_per_job_for(t))
            .collect()
    };
    let nonres = df.f64_values("non_residential_sqft")?;
    let spaces = nonres
        .iter()
        .zip(&per_job)
        .map(|(&sqft, &per)| {
            if per > 0.0 && sqft.is_finite() {
                (sqft / per).floor() as i64
            } else {
                0
            }
        })
        .collect();
    df.set_column("sqft_per_job", Column::Float(per_job))?;
    df.set_column("job_spaces", Column::Int(spaces))?;
    Ok(())
}

pub struct PreprocBuildings;

impl Stage for PreprocBuildings {
    fn name(&self) -> &'static str {
        "preproc_buildings"
    }

    fn reads(&self) -> &'static [&'static str] {
        &["buildings", "households_preproc", "parcels"]
    }

    fn writes(&self) -> &'static [&'static str] {
        &["buildings_preproc"]
    }

    fn run(&self, ctx: &mut DataContext, env: &StageEnv<'_>, rng: &mut StdRng) -> Result<()> {
        let settings = env.settings;

        let edits_path = env.input(&settings.inputs.manual_edits);
        let edits = if edits_path.exists() {
            read_manual_edits(&edits_path, "buildings")?
        } else {
            tracing::warn!(path = %edits_path.display(), "no manual edit file, skipping");
            Vec::new()
        };
        let targets_path = env.input(&settings.inputs.deed_restricted_totals);
        let targets = if targets_path.exists() {
            read_deed_restricted_targets(&targets_path)?
        } else {
            tracing::warn!(path = %targets_path.display(), "no deed restricted targets, skipping");
            Vec::new()
        };

        ctx.ensure(self.reads())?;
        let raw = ctx.get("buildings")?.clone();
        let households = ctx.get("households_preproc")?;
        let parcels = ctx.get("parcels")?;

        let mut df = reconcile(raw, households, &edits, settings).context("reconcile buildings")?;
        tracing::info!(edits = edits.len(), "manual edits applied");

        let zones = ZoneIndex::build(&df, parcels)?;
        assign_deed_restricted_units(&mut df, &zones, &targets, rng)?;
        derive_job_spaces(&mut df, settings)?;

        ctx.commit("buildings_preproc", df)
    }
}
