use anyhow::Result;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

use super::{Stage, StageEnv};
use crate::allocation::{reindex_str, tally};
use crate::error::ValidationError;
use crate::settings::VacancyCeilings;
use crate::store::{Column, DataContext, Table};

/// Job spaces over jobs minus one, per group. Groups with no jobs are left out.
pub fn vacancy_rates(
    groups: &[String],
    job_spaces: &[i64],
    jobs_per_building: &[u64],
) -> BTreeMap<String, f64> {
    let mut spaces: BTreeMap<&str, i64> = BTreeMap::new();
    let mut jobs: BTreeMap<&str, u64> = BTreeMap::new();
    for ((g, &s), &j) in groups.iter().zip(job_spaces).zip(jobs_per_building) {
        *spaces.entry(g.as_str()).or_insert(0) += s;
        *jobs.entry(g.as_str()).or_insert(0) += j;
    }
    spaces
        .into_iter()
        .filter_map(|(g, s)| {
            let j = jobs.get(g).copied().unwrap_or(0);
            (j > 0).then(|| (g.to_string(), s as f64 / j as f64 - 1.0))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VacancyReport {
    pub by_county: BTreeMap<String, f64>,
    pub by_juris: BTreeMap<String, f64>,
}

/// Cap each building's job spaces at its job count grown by the building's
/// surplus-vacancy ceiling, and shrink non-residential sqft to match.
pub fn correct_vacancies(
    buildings: &mut Table,
    jobs: &Table,
    parcels: &Table,
    ceilings: &VacancyCeilings,
) -> Result<VacancyReport, ValidationError> {
    let parcel_ids = buildings.i64_values("parcel_id")?;
    let county = reindex_str(parcels, "county", &parcel_ids)?;
    let juris = reindex_str(parcels, "juris", &parcel_ids)?;

    let per_building = tally(&jobs.i64_values("building_id")?);
    let job_counts: Vec<u64> = buildings
        .index()
        .iter()
        .map(|id| per_building.get(id).copied().unwrap_or(0))
        .collect();

    let spaces = buildings.i64_values("job_spaces")?;
    let per_job = buildings.f64_values("sqft_per_job")?;

    let mut corrected = Vec::with_capacity(spaces.len());
    let mut nonres = Vec::with_capacity(spaces.len());
    for i in 0..spaces.len() {
        let ceiling = ceilings.ceiling_for(&county[i], &juris[i]);
        let allowed = (job_counts[i] as f64 * (1.0 + ceiling)) as i64;
        let c = allowed.min(spaces[i]);
        corrected.push(c);
        // no usable sqft_per_job means no job spaces and no non-residential sqft
        nonres.push(if per_job[i].is_finite() {
            c as f64 * per_job[i]
        } else {
            0.0
        });
    }

    let before: i64 = spaces.iter().sum();
    let after: i64 = corrected.iter().sum();
    tracing::info!(before, after, "job spaces capped by vacancy ceilings");

    buildings.set_column("non_residential_sqft", Column::Float(nonres))?;
    buildings.set_column("job_spaces", Column::Int(corrected.clone()))?;

    let report = VacancyReport {
        by_county: vacancy_rates(&county, &corrected, &job_counts),
        by_juris: vacancy_rates(&juris, &corrected, &job_counts),
    };
    for (c, rate) in &report.by_county {
        tracing::info!(county = %c, rate = *rate, "vacancy rate");
    }
    for (j, rate) in &report.by_juris {
        tracing::debug!(juris = %j, rate = *rate, "vacancy rate");
    }
    Ok(report)
}

pub struct CorrectBaseyearVacancies;

impl Stage for CorrectBaseyearVacancies {
    fn name(&self) -> &'static str {
        "correct_baseyear_vacancies"
    }

    fn reads(&self) -> &'static [&'static str] {
        &["jobs_preproc", "parcels"]
    }

    fn updates(&self) -> &'static [&'static str] {
        &["buildings_preproc"]
    }

    fn run(&self, ctx: &mut DataContext, env: &StageEnv<'_>, _rng: &mut StdRng) -> Result<()> {
        ctx.ensure(&["buildings_preproc", "jobs_preproc", "parcels"])?;
        let mut buildings = ctx.get("buildings_preproc")?.clone();
        correct_vacancies(
            &mut buildings,
            ctx.get("jobs_preproc")?,
            ctx.get("parcels")?,
            &env.settings.vacancy,
        )?;
        ctx.update("buildings_preproc", buildings)
    }
}
