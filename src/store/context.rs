use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::io::{load_table, save_table};
use super::types::Table;

/// Directory-backed dataset store plus the in-memory tables of the current run.
/// Stages receive this explicitly; there is no global table registry.
pub struct DataContext {
    root: PathBuf,
    cache: BTreeMap<String, Table>,
}

impl DataContext {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create store dir {}", root.display()))?;
        Ok(DataContext {
            root,
            cache: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.npz"))
    }

    /// Table names committed to disk.
    pub fn stored_tables(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("list {}", self.root.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("npz") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.contains_key(name) || self.table_path(name).exists()
    }

    /// Load `names` into memory if they are not there yet.
    pub fn ensure(&mut self, names: &[&str]) -> Result<()> {
        for &name in names {
            if self.cache.contains_key(name) {
                continue;
            }
            let path = self.table_path(name);
            if !path.exists() {
                bail!("table {} is not in store {}", name, self.root.display());
            }
            let table = load_table(&path, name).with_context(|| format!("load table {name}"))?;
            tracing::debug!(table = name, rows = table.len(), "loaded");
            self.cache.insert(name.to_string(), table);
        }
        Ok(())
    }

    /// Borrow a table that is already in memory (see [`DataContext::ensure`]).
    pub fn get(&self, name: &str) -> Result<&Table> {
        self.cache
            .get(name)
            .with_context(|| format!("table {name} has not been loaded"))
    }

    /// Borrow a table, loading it from disk on first use.
    pub fn read(&mut self, name: &str) -> Result<&Table> {
        self.ensure(&[name])?;
        self.get(name)
    }

    /// Owned copy for stages that derive a new table from an input.
    pub fn read_owned(&mut self, name: &str) -> Result<Table> {
        Ok(self.read(name)?.clone())
    }

    /// Persist a table under `name` and make it visible to later stages. The
    /// archive is written next to its final path and renamed into place.
    pub fn commit(&mut self, name: &str, table: Table) -> Result<()> {
        let table = table.renamed(name);
        let final_path = self.table_path(name);
        let tmp_path = self.root.join(format!("{name}.npz.tmp"));
        save_table(&tmp_path, &table).with_context(|| format!("write table {name}"))?;
        std::fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("rename {} into place", tmp_path.display()))?;
        tracing::info!(
            table = name,
            rows = table.len(),
            columns = table.column_names().len(),
            "committed"
        );
        self.cache.insert(name.to_string(), table);
        Ok(())
    }

    /// Replace the contents of an existing table in place.
    pub fn update(&mut self, name: &str, table: Table) -> Result<()> {
        if !self.contains(name) {
            bail!("cannot update {name}: table does not exist");
        }
        self.commit(name, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Column;
    use tempfile::tempdir;

    #[test]
    fn commit_then_reopen() {
        let dir = tempdir().unwrap();
        let mut t = Table::new("x", vec![1, 2]).unwrap();
        t.set_column("v", Column::Int(vec![3, 4])).unwrap();
        {
            let mut ctx = DataContext::open(dir.path()).unwrap();
            ctx.commit("jobs_preproc", t.clone()).unwrap();
            assert!(ctx.contains("jobs_preproc"));
        }
        let mut ctx = DataContext::open(dir.path()).unwrap();
        assert_eq!(ctx.stored_tables().unwrap(), vec!["jobs_preproc".to_string()]);
        let back = ctx.read("jobs_preproc").unwrap();
        assert_eq!(back.name(), "jobs_preproc");
        assert_eq!(back.i64_values("v").unwrap(), vec![3, 4]);
        assert!(!dir.path().join("jobs_preproc.npz.tmp").exists());
    }

    #[test]
    fn missing_table_and_update_are_errors() {
        let dir = tempdir().unwrap();
        let mut ctx = DataContext::open(dir.path()).unwrap();
        assert!(ctx.read("buildings").is_err());
        assert!(ctx.get("buildings").is_err());
        let t = Table::new("b", vec![1]).unwrap();
        assert!(ctx.update("buildings", t).is_err());
    }
}
