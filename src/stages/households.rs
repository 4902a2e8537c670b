use anyhow::{Context, Result};
use rand::rngs::StdRng;

use super::{Stage, StageEnv};
use crate::error::ValidationError;
use crate::inputs::{HouseholdOverride, read_household_overrides};
use crate::store::{Column, DataContext, Table};

pub fn tenure_of(hownrent: i64) -> &'static str {
    match hownrent {
        1 => "own",
        2 => "rent",
        _ => "",
    }
}

/// Linearly interpolated quantile edges `q(0), q(1/n), .., q(1)` of sorted data.
fn quantile_edges(sorted: &[f64], n: usize) -> Vec<f64> {
    let last = (sorted.len() - 1) as f64;
    (0..=n)
        .map(|i| {
            let h = last * i as f64 / n as f64;
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(sorted.len() - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        })
        .collect()
}

/// Equal-frequency bin label in `1..=n` for every value. Ties at an edge fall
/// into the lower bin. Repeated edges (heavily tied incomes) are not an error
/// here, unlike pandas `qcut`: the bins between them are simply left empty.
pub fn quantile_labels(ids: &[i64], values: &[f64], n: usize) -> Result<Vec<i64>, ValidationError> {
    if let Some((&id, &income)) = ids.iter().zip(values).find(|(_, v)| !v.is_finite()) {
        return Err(ValidationError::NonFiniteIncome { id, income });
    }
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let edges = quantile_edges(&sorted, n);
    Ok(values
        .iter()
        .map(|&x| {
            // first upper edge at or above x; the top edge is the max so one exists
            let bin = edges[1..].partition_point(|&e| e < x);
            (bin.min(n - 1) + 1) as i64
        })
        .collect())
}

/// Move households to new buildings, later rows winning.
pub fn apply_overrides(
    households: &mut Table,
    overrides: &[HouseholdOverride],
) -> Result<(), ValidationError> {
    for o in overrides {
        households.set_value(o.household_id, "building_id", &o.building_id.to_string())?;
    }
    Ok(())
}

pub struct PreprocHouseholds;

impl Stage for PreprocHouseholds {
    fn name(&self) -> &'static str {
        "preproc_households"
    }

    fn reads(&self) -> &'static [&'static str] {
        &["households"]
    }

    fn writes(&self) -> &'static [&'static str] {
        &["households_preproc"]
    }

    fn run(&self, ctx: &mut DataContext, env: &StageEnv<'_>, _rng: &mut StdRng) -> Result<()> {
        let mut df = ctx.read_owned("households")?;

        let tenure = df
            .i64_values("hownrent")?
            .into_iter()
            .map(|c| tenure_of(c).to_string())
            .collect();
        df.set_column("tenure", Column::Str(tenure))?;

        // cohort labels are fixed here and carried by every later copy of a row
        let income = df.f64_values("income")?;
        let quartile = quantile_labels(df.index(), &income, 4)?;
        let octile = quantile_labels(df.index(), &income, 8)?;
        df.set_column("base_income_quartile", Column::Int(quartile))?;
        df.set_column("base_income_octile", Column::Int(octile))?;

        let path = env.input(&env.settings.inputs.household_overrides);
        if path.exists() {
            let overrides = read_household_overrides(&path)?;
            apply_overrides(&mut df, &overrides)
                .with_context(|| format!("apply {}", path.display()))?;
            tracing::info!(overrides = overrides.len(), "household building overrides applied");
        } else {
            tracing::warn!(path = %path.display(), "no household override file, skipping");
        }

        let dupes = &env.settings.duplicate_households;
        let first = df.max_id().map_or(0, |m| m + 1);
        let added = df.append_copies(dupes, first)?;
        tracing::info!(added = added.len(), first_id = first, "duplicate households appended");

        ctx.commit("households_preproc", df)
    }
}
