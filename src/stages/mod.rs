//! Pipeline stages and the scheduler that orders them by the tables they read
//! and write.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::ValidationError;
use crate::settings::Settings;
use crate::store::DataContext;

pub mod buildings;
pub mod checks;
pub mod households;
pub mod jobs;
pub mod vacancy;

/// Everything a stage may consult besides the store.
pub struct StageEnv<'a> {
    pub settings: &'a Settings,
    pub data_dir: &'a Path,
    pub strict_checks: bool,
}

impl StageEnv<'_> {
    pub fn input(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

pub trait Stage {
    fn name(&self) -> &'static str;
    /// Tables that must be materialized before the stage runs.
    fn reads(&self) -> &'static [&'static str];
    /// Tables the stage creates. Each table has one writer per pipeline.
    fn writes(&self) -> &'static [&'static str] {
        &[]
    }
    /// Tables rewritten in place. They must exist first; readers that are not
    /// updaters themselves are scheduled after every updater.
    fn updates(&self) -> &'static [&'static str] {
        &[]
    }
    fn run(&self, ctx: &mut DataContext, env: &StageEnv<'_>, rng: &mut StdRng) -> Result<()>;
}

pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(jobs::PreprocJobs),
        Box::new(households::PreprocHouseholds),
        Box::new(buildings::PreprocBuildings),
        Box::new(vacancy::CorrectBaseyearVacancies),
        Box::new(checks::BaselineDataChecks),
    ]
}

/// Order `stages` so every read is satisfied. `stored` lists the tables
/// already in the store; a stored table that some stage writes is treated as
/// stale until that stage has run.
pub fn plan(
    stages: Vec<Box<dyn Stage>>,
    stored: &[String],
) -> Result<Vec<Box<dyn Stage>>, ValidationError> {
    let mut writer_of: Vec<(&'static str, &'static str)> = Vec::new();
    for s in &stages {
        for &t in s.writes() {
            if let Some((_, other)) = writer_of.iter().find(|(tbl, _)| *tbl == t) {
                return Err(ValidationError::Plan(format!(
                    "table {t} written by both {other} and {}",
                    s.name()
                )));
            }
            writer_of.push((t, s.name()));
        }
    }

    let mut available: BTreeSet<&str> = stored
        .iter()
        .map(|s| s.as_str())
        .filter(|t| !writer_of.iter().any(|(w, _)| w == t))
        .collect();

    let mut pending = stages;
    let mut ordered: Vec<Box<dyn Stage>> = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let next = pending.iter().position(|s| {
            let inputs_ready = s
                .reads()
                .iter()
                .chain(s.updates())
                .all(|t| available.contains(t));
            // plain readers wait for every pending in-place update of their inputs
            let updates_done = s.reads().iter().all(|t| {
                s.updates().contains(t)
                    || !pending
                        .iter()
                        .any(|o| o.name() != s.name() && o.updates().contains(t))
            });
            inputs_ready && updates_done
        });

        let Some(idx) = next else {
            let stuck: Vec<String> = pending
                .iter()
                .map(|s| {
                    let missing: Vec<&str> = s
                        .reads()
                        .iter()
                        .chain(s.updates())
                        .filter(|t| !available.contains(*t))
                        .copied()
                        .collect();
                    format!("{} (missing: {})", s.name(), missing.join(", "))
                })
                .collect();
            return Err(ValidationError::Plan(format!(
                "cannot schedule {}",
                stuck.join("; ")
            )));
        };

        let stage = pending.remove(idx);
        for &t in stage.writes() {
            available.insert(t);
        }
        ordered.push(stage);
    }
    Ok(ordered)
}

#[derive(Debug, Clone)]
pub struct StageTiming {
    pub name: &'static str,
    pub seconds: f64,
}

/// Run already-planned stages in order. The first failure stops the run;
/// tables committed by earlier stages stay in the store.
pub fn run_all(
    stages: &[Box<dyn Stage>],
    ctx: &mut DataContext,
    env: &StageEnv<'_>,
    rng: &mut StdRng,
) -> Result<Vec<StageTiming>> {
    let t0 = Instant::now();
    let mut timings = Vec::with_capacity(stages.len());
    for stage in stages {
        let span = tracing::info_span!("stage", name = stage.name());
        let _guard = span.enter();
        tracing::info!(
            reads = ?stage.reads(),
            writes = ?stage.writes(),
            updates = ?stage.updates(),
            "start"
        );
        let ts = Instant::now();
        stage
            .run(ctx, env, rng)
            .with_context(|| format!("stage {} failed", stage.name()))?;
        let seconds = ts.elapsed().as_secs_f64();
        tracing::info!(seconds, "done");
        timings.push(StageTiming {
            name: stage.name(),
            seconds,
        });
    }
    tracing::info!(
        stages = timings.len(),
        wall = t0.elapsed().as_secs_f64(),
        "pipeline complete"
    );
    Ok(timings)
}
