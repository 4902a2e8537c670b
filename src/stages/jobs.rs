//! Job disaggregation, weighted placement into buildings and the
//! jurisdiction relocation fix-up.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

use super::{Stage, StageEnv};
use crate::allocation::{
    Candidate, CapacitySource, ZoneIndex, reindex_i64, reindex_str, sample_with_replacement,
    with_fallback,
};
use crate::error::ValidationError;
use crate::inputs::{ControlTotals, read_control_totals};
use crate::settings::Relocation;
use crate::store::{Column, DataContext, Table};

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub sector_id: u32,
    pub sector_name: String,
    /// Zone whose control total produced this job.
    pub zone_id: i64,
    /// -1 until placed.
    pub building_id: i64,
}

/// One unplaced job per unit of every zone x sector control count.
pub fn disaggregate(controls: &ControlTotals) -> Vec<Job> {
    let total: u64 = controls.zones.iter().map(|z| z.sector_total()).sum();
    let mut jobs = Vec::with_capacity(total as usize);
    for zone in &controls.zones {
        for (sector, &n) in controls.schema.sectors.iter().zip(&zone.counts) {
            for _ in 0..n {
                jobs.push(Job {
                    sector_id: sector.id,
                    sector_name: sector.name.clone(),
                    zone_id: zone.zone_id,
                    building_id: -1,
                });
            }
        }
    }
    jobs
}

fn zone_progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} zones {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Place every job in a building of its zone, weighted by non-residential
/// sqft, or by total building sqft when the zone has no non-residential space.
pub fn allocate_jobs<R: Rng + ?Sized>(
    jobs: &mut [Job],
    buildings: &Table,
    zones: &ZoneIndex,
    rng: &mut R,
) -> Result<(), ValidationError> {
    let nonres = buildings.f64_values("non_residential_sqft")?;
    let total_sqft = buildings.f64_values("building_sqft")?;
    let ids = buildings.index();

    let mut by_zone: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, job) in jobs.iter().enumerate() {
        by_zone.entry(job.zone_id).or_default().push(i);
    }

    let pb = zone_progress(by_zone.len());
    let mut fallback_zones = 0usize;
    for (&zone, members) in &by_zone {
        pb.set_message(format!("zone={} jobs={}", zone, members.len()));

        let in_zone = zones.members(zone);
        // NaN capacity counts as none
        let weight = |v: f64| if v.is_nan() { 0.0 } else { v };
        let primary = in_zone.iter().map(|&p| Candidate {
            id: ids[p],
            weight: weight(nonres[p]),
        });
        let fallback = in_zone.iter().map(|&p| Candidate {
            id: ids[p],
            weight: weight(total_sqft[p]),
        });
        let (candidates, source) = with_fallback(primary.collect(), fallback.collect());
        if source == CapacitySource::Fallback {
            fallback_zones += 1;
            tracing::debug!(zone, jobs = members.len(), "no non-residential space, using building sqft");
        }

        let draws = sample_with_replacement("jobs", zone, members.len(), &candidates, rng)?;
        for (&i, b) in members.iter().zip(draws) {
            jobs[i].building_id = b;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    tracing::info!(
        jobs = jobs.len(),
        zones = by_zone.len(),
        fallback_zones,
        "jobs allocated"
    );
    Ok(())
}

/// Re-aggregate placed jobs by the zone of their building and compare with
/// the controls (`emp_tot` when present, else the sector sum).
pub fn validate_job_totals(
    jobs: &[Job],
    controls: &ControlTotals,
    buildings: &Table,
    zones: &ZoneIndex,
) -> Result<(), ValidationError> {
    let mut realized: BTreeMap<i64, i64> = BTreeMap::new();
    for job in jobs {
        let zone = buildings
            .position(job.building_id)
            .map(|p| zones.zone_of(p))
            .unwrap_or(-1);
        *realized.entry(zone).or_insert(0) += 1;
    }

    let mut expected: BTreeMap<i64, i64> = BTreeMap::new();
    for z in &controls.zones {
        let target = z.emp_tot.unwrap_or(z.sector_total() as i64);
        *expected.entry(z.zone_id).or_insert(0) += target;
    }

    for (&zone, &want) in &expected {
        let got = realized.get(&zone).copied().unwrap_or(0);
        if got != want {
            return Err(ValidationError::JobTotalMismatch {
                zone,
                expected: want,
                actual: got,
            });
        }
    }
    if let Some((&zone, &got)) = realized.iter().find(|(z, _)| !expected.contains_key(z)) {
        return Err(ValidationError::JobTotalMismatch {
            zone,
            expected: 0,
            actual: got,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelocationSummary {
    pub before: usize,
    pub moved: usize,
}

/// Jurisdiction of each building id via building -> parcel -> juris; unknown
/// buildings map to "".
pub fn jurisdictions_of(
    building_ids: &[i64],
    buildings: &Table,
    parcels: &Table,
) -> Result<Vec<String>, ValidationError> {
    let parcel_ids = reindex_i64(buildings, "parcel_id", building_ids, -1)?;
    reindex_str(parcels, "juris", &parcel_ids)
}

fn building_ids(jobs: &[Job]) -> Vec<i64> {
    jobs.iter().map(|j| j.building_id).collect()
}

/// Move the jobs above `reloc.ceiling` out of the source jurisdiction into
/// buildings that already host jobs in the target jurisdiction.
pub fn relocate_jobs<R: Rng + ?Sized>(
    jobs: &mut [Job],
    buildings: &Table,
    parcels: &Table,
    reloc: &Relocation,
    rng: &mut R,
) -> Result<RelocationSummary, ValidationError> {
    let juris = jurisdictions_of(&building_ids(jobs), buildings, parcels)?;
    let in_source: Vec<usize> = (0..jobs.len()).filter(|&i| juris[i] == reloc.source).collect();
    let surplus = in_source.len().saturating_sub(reloc.ceiling);
    if surplus == 0 {
        tracing::info!(
            jurisdiction = %reloc.source,
            jobs = in_source.len(),
            ceiling = reloc.ceiling,
            "within ceiling, nothing to move"
        );
        return Ok(RelocationSummary {
            before: in_source.len(),
            moved: 0,
        });
    }

    let destinations: Vec<i64> = (0..jobs.len())
        .filter(|&i| juris[i] == reloc.target)
        .map(|i| jobs[i].building_id)
        .collect();
    if destinations.is_empty() {
        return Err(ValidationError::NoRelocationTargets {
            jurisdiction: reloc.source.clone(),
            target: reloc.target.clone(),
            surplus,
        });
    }

    let chosen = rand::seq::index::sample(rng, in_source.len(), surplus);
    for k in chosen.iter() {
        let dest = destinations[rng.gen_range(0..destinations.len())];
        jobs[in_source[k]].building_id = dest;
    }

    tracing::info!(
        from = %reloc.source,
        to = %reloc.target,
        moved = surplus,
        remaining = reloc.ceiling,
        "jobs relocated"
    );
    Ok(RelocationSummary {
        before: in_source.len(),
        moved: surplus,
    })
}

pub fn jobs_to_table(jobs: &[Job]) -> Result<Table, ValidationError> {
    let mut t = Table::with_row_numbers("jobs", jobs.len());
    t.set_column(
        "sector_id",
        Column::Int(jobs.iter().map(|j| j.sector_id as i64).collect()),
    )?;
    t.set_column(
        "sector_name",
        Column::Str(jobs.iter().map(|j| j.sector_name.clone()).collect()),
    )?;
    t.set_column("zone_id", Column::Int(jobs.iter().map(|j| j.zone_id).collect()))?;
    t.set_column(
        "building_id",
        Column::Int(jobs.iter().map(|j| j.building_id).collect()),
    )?;
    Ok(t)
}

pub struct PreprocJobs;

impl Stage for PreprocJobs {
    fn name(&self) -> &'static str {
        "preproc_jobs"
    }

    fn reads(&self) -> &'static [&'static str] {
        &["buildings", "parcels"]
    }

    fn writes(&self) -> &'static [&'static str] {
        &["jobs_preproc"]
    }

    fn run(&self, ctx: &mut DataContext, env: &StageEnv<'_>, rng: &mut StdRng) -> Result<()> {
        let controls = read_control_totals(
            &env.input(&env.settings.inputs.taz_controls),
            &env.settings.sector_names,
        )?;
        tracing::info!(
            zones = controls.zones.len(),
            sectors = controls.schema.sectors.len(),
            "control totals loaded"
        );

        ctx.ensure(self.reads())?;
        let buildings = ctx.get("buildings")?;
        let parcels = ctx.get("parcels")?;
        let zones = ZoneIndex::build(buildings, parcels)?;

        let mut jobs = disaggregate(&controls);
        allocate_jobs(&mut jobs, buildings, &zones, rng)?;
        validate_job_totals(&jobs, &controls, buildings, &zones)?;
        relocate_jobs(&mut jobs, buildings, parcels, &env.settings.relocation, rng)?;

        let table = jobs_to_table(&jobs)?;
        ctx.commit("jobs_preproc", table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::inputs::{Sector, SectorSchema, ZoneControl};
    use rand::SeedableRng;

    fn controls(zones: &[(i64, u64, u64)]) -> ControlTotals {
        ControlTotals {
            schema: SectorSchema {
                sectors: vec![
                    Sector {
                        id: 1,
                        name: "RETEMPN".into(),
                        column: 1,
                    },
                    Sector {
                        id: 2,
                        name: "FPSEMPN".into(),
                        column: 2,
                    },
                ],
                total_column: None,
            },
            zones: zones
                .iter()
                .map(|&(zone_id, a, b)| ZoneControl {
                    zone_id,
                    counts: vec![a, b],
                    emp_tot: None,
                })
                .collect(),
        }
    }

    #[test]
    fn disaggregate_expands_counts() {
        let jobs = disaggregate(&controls(&[(5, 2, 1), (6, 0, 0)]));
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].sector_name, "RETEMPN");
        assert_eq!(jobs[2].sector_id, 2);
        assert!(jobs.iter().all(|j| j.zone_id == 5 && j.building_id == -1));
    }

    #[test]
    fn hundred_jobs_split_by_nonres_sqft() {
        let (buildings, parcels) = fixtures::two_office_zone();
        let zones = ZoneIndex::build(&buildings, &parcels).unwrap();
        let c = controls(&[(5, 100, 0)]);
        let mut in_big = 0usize;
        for seed in 0..100u64 {
            let mut jobs = disaggregate(&c);
            let mut rng = StdRng::seed_from_u64(seed);
            allocate_jobs(&mut jobs, &buildings, &zones, &mut rng).unwrap();
            validate_job_totals(&jobs, &c, &buildings, &zones).unwrap();
            assert_eq!(jobs.len(), 100);
            in_big += jobs.iter().filter(|j| j.building_id == 2).count();
        }
        let share = in_big as f64 / 10_000.0;
        assert!((share - 0.7).abs() < 0.02, "share {share}");
    }

    #[test]
    fn residential_zone_falls_back_to_building_sqft() {
        let (buildings, parcels) = fixtures::residential_only_zone();
        let zones = ZoneIndex::build(&buildings, &parcels).unwrap();
        let c = controls(&[(8, 10, 0)]);
        let mut jobs = disaggregate(&c);
        let mut rng = StdRng::seed_from_u64(4);
        allocate_jobs(&mut jobs, &buildings, &zones, &mut rng).unwrap();
        // building 31 has zero sqft of any kind
        assert!(jobs.iter().all(|j| j.building_id == 30));
        validate_job_totals(&jobs, &c, &buildings, &zones).unwrap();
    }

    #[test]
    fn zone_without_capacity_is_fatal() {
        let (buildings, parcels) = fixtures::two_office_zone();
        let zones = ZoneIndex::build(&buildings, &parcels).unwrap();
        let mut jobs = disaggregate(&controls(&[(404, 1, 0)]));
        let mut rng = StdRng::seed_from_u64(4);
        let err = allocate_jobs(&mut jobs, &buildings, &zones, &mut rng).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyCandidates { zone: 404, .. }));
    }

    #[test]
    fn emp_tot_disagreement_is_fatal() {
        let (buildings, parcels) = fixtures::two_office_zone();
        let zones = ZoneIndex::build(&buildings, &parcels).unwrap();
        let mut c = controls(&[(5, 10, 0)]);
        c.zones[0].emp_tot = Some(11);
        let mut jobs = disaggregate(&c);
        allocate_jobs(&mut jobs, &buildings, &zones, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(
            validate_job_totals(&jobs, &c, &buildings, &zones),
            Err(ValidationError::JobTotalMismatch {
                zone: 5,
                expected: 11,
                actual: 10
            })
        );
    }

    fn placed(building_id: i64, n: usize) -> Vec<Job> {
        (0..n)
            .map(|_| Job {
                sector_id: 1,
                sector_name: "RETEMPN".into(),
                zone_id: 1,
                building_id,
            })
            .collect()
    }

    #[test]
    fn relocation_caps_source_jurisdiction() {
        let (buildings, parcels) = fixtures::two_jurisdictions();
        let reloc = Relocation {
            ceiling: 20,
            ..Relocation::default()
        };
        let mut jobs = placed(40, 50);
        jobs.extend(placed(41, 5));
        let mut rng = StdRng::seed_from_u64(9);
        let s = relocate_jobs(&mut jobs, &buildings, &parcels, &reloc, &mut rng).unwrap();
        assert_eq!(s, RelocationSummary { before: 50, moved: 30 });

        let juris = jurisdictions_of(&building_ids(&jobs), &buildings, &parcels).unwrap();
        assert_eq!(juris.iter().filter(|j| *j == "Portola Valley").count(), 20);
        assert_eq!(juris.iter().filter(|j| *j == "San Mateo County").count(), 35);
    }

    #[test]
    fn relocation_below_ceiling_is_noop() {
        let (buildings, parcels) = fixtures::two_jurisdictions();
        let mut jobs = placed(40, 10);
        let before = jobs.clone();
        let mut rng = StdRng::seed_from_u64(9);
        let s = relocate_jobs(&mut jobs, &buildings, &parcels, &Relocation::default(), &mut rng)
            .unwrap();
        assert_eq!(s.moved, 0);
        assert_eq!(jobs, before);
    }

    #[test]
    fn relocation_without_destinations_fails() {
        let (buildings, parcels) = fixtures::two_jurisdictions();
        let reloc = Relocation {
            ceiling: 1,
            ..Relocation::default()
        };
        let mut jobs = placed(40, 3);
        let mut rng = StdRng::seed_from_u64(9);
        assert!(matches!(
            relocate_jobs(&mut jobs, &buildings, &parcels, &reloc, &mut rng),
            Err(ValidationError::NoRelocationTargets { surplus: 2, .. })
        ));
    }
}
