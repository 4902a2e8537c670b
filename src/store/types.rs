use ahash::AHashMap;

use crate::error::ValidationError;

/// One typed column. Missing floats are NaN, missing strings are empty.
#[derive(Debug, Clone)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
}

impl Column {
    pub const DTYPE_INT: u8 = 0;
    pub const DTYPE_FLOAT: u8 = 1;
    pub const DTYPE_STR: u8 = 2;

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype_code(&self) -> u8 {
        match self {
            Column::Int(_) => Self::DTYPE_INT,
            Column::Float(_) => Self::DTYPE_FLOAT,
            Column::Str(_) => Self::DTYPE_STR,
        }
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Column::Int(_) => "int",
            Column::Float(_) => "float",
            Column::Str(_) => "str",
        }
    }

    /// Render one cell for CSV output; NaN renders as an empty field.
    pub fn cell(&self, pos: usize) -> String {
        match self {
            Column::Int(v) => v[pos].to_string(),
            Column::Float(v) if v[pos].is_nan() => String::new(),
            Column::Float(v) => v[pos].to_string(),
            Column::Str(v) => v[pos].clone(),
        }
    }

    fn push_copy_of(&mut self, pos: usize) {
        match self {
            Column::Int(v) => v.push(v[pos]),
            Column::Float(v) => v.push(v[pos]),
            Column::Str(v) => {
                let s = v[pos].clone();
                v.push(s);
            }
        }
    }

    /// Infer a column from raw text cells: all integers -> Int, all numeric or
    /// empty -> Float, anything else -> Str.
    pub fn infer(raw: Vec<String>) -> Column {
        let all_int = raw.iter().all(|s| s.trim().parse::<i64>().is_ok());
        if all_int {
            return Column::Int(raw.iter().map(|s| s.trim().parse().unwrap_or(0)).collect());
        }
        let all_num = raw
            .iter()
            .all(|s| s.trim().is_empty() || s.trim().parse::<f64>().is_ok());
        if all_num {
            return Column::Float(
                raw.iter()
                    .map(|s| s.trim().parse().unwrap_or(f64::NAN))
                    .collect(),
            );
        }
        Column::Str(raw)
    }
}

// NaN == NaN here: two tables that went through the same edits must compare equal.
impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Column::Int(a), Column::Int(b)) => a == b,
            (Column::Str(a), Column::Str(b)) => a == b,
            (Column::Float(a), Column::Float(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            }
            _ => false,
        }
    }
}

/// Named columns over one unique `i64` row index (the entity id).
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    index: Vec<i64>,
    columns: Vec<(String, Column)>,
    positions: AHashMap<i64, usize>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.index == other.index && self.columns == other.columns
    }
}

fn build_positions(name: &str, index: &[i64]) -> Result<AHashMap<i64, usize>, ValidationError> {
    let mut positions = AHashMap::with_capacity(index.len());
    for (pos, &id) in index.iter().enumerate() {
        if positions.insert(id, pos).is_some() {
            return Err(ValidationError::DuplicateRow {
                table: name.to_string(),
                id,
            });
        }
    }
    Ok(positions)
}

impl Table {
    pub fn new(name: impl Into<String>, index: Vec<i64>) -> Result<Self, ValidationError> {
        let name = name.into();
        let positions = build_positions(&name, &index)?;
        Ok(Table {
            name,
            index,
            columns: Vec::new(),
            positions,
        })
    }

    /// Table indexed 0..n, used for fungible records such as jobs.
    pub fn with_row_numbers(name: impl Into<String>, n: usize) -> Self {
        let index: Vec<i64> = (0..n as i64).collect();
        let positions = index.iter().enumerate().map(|(p, &id)| (id, p)).collect();
        Table {
            name: name.into(),
            index,
            columns: Vec::new(),
            positions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    #[inline]
    pub fn position(&self, id: i64) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == column)
    }

    pub fn column(&self, column: &str) -> Result<&Column, ValidationError> {
        self.columns
            .iter()
            .find(|(n, _)| n == column)
            .map(|(_, c)| c)
            .ok_or_else(|| self.unknown_column(column))
    }

    fn unknown_column(&self, column: &str) -> ValidationError {
        ValidationError::UnknownColumn {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }

    fn wrong_type(&self, column: &str, expected: &'static str, found: &Column) -> ValidationError {
        ValidationError::ColumnType {
            table: self.name.clone(),
            column: column.to_string(),
            expected,
            found: found.dtype_name(),
        }
    }

    pub fn strs(&self, column: &str) -> Result<&[String], ValidationError> {
        match self.column(column)? {
            Column::Str(v) => Ok(v),
            other => Err(self.wrong_type(column, "str", other)),
        }
    }

    /// Numeric column as floats; integer columns are widened.
    pub fn f64_values(&self, column: &str) -> Result<Vec<f64>, ValidationError> {
        match self.column(column)? {
            Column::Float(v) => Ok(v.clone()),
            Column::Int(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            other => Err(self.wrong_type(column, "numeric", other)),
        }
    }

    /// Numeric column as integers; floats are truncated and NaN reads as -1
    /// (the "unset id" convention).
    pub fn i64_values(&self, column: &str) -> Result<Vec<i64>, ValidationError> {
        match self.column(column)? {
            Column::Int(v) => Ok(v.clone()),
            Column::Float(v) => Ok(v
                .iter()
                .map(|&x| if x.is_nan() { -1 } else { x as i64 })
                .collect()),
            other => Err(self.wrong_type(column, "numeric", other)),
        }
    }

    /// Insert or replace a column, keeping its position when it already exists.
    pub fn set_column(&mut self, column: &str, values: Column) -> Result<(), ValidationError> {
        if values.len() != self.len() {
            return Err(ValidationError::ColumnLength {
                table: self.name.clone(),
                column: column.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == column) {
            Some((_, slot)) => *slot = values,
            None => self.columns.push((column.to_string(), values)),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, column: &str) -> Option<Column> {
        let pos = self.columns.iter().position(|(n, _)| n == column)?;
        Some(self.columns.remove(pos).1)
    }

    /// Drop whichever of `names` exist; missing ones are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        self.columns.retain(|(n, _)| !names.contains(&n.as_str()));
    }

    /// Overwrite one cell, parsing `raw` into the column's type.
    pub fn set_value(&mut self, id: i64, column: &str, raw: &str) -> Result<(), ValidationError> {
        let pos = self.position(id).ok_or_else(|| ValidationError::UnknownRow {
            table: self.name.clone(),
            id,
        })?;
        let table = self.name.clone();
        let slot = self
            .columns
            .iter_mut()
            .find(|(n, _)| n == column)
            .map(|(_, c)| c)
            .ok_or_else(|| ValidationError::UnknownColumn {
                table: table.clone(),
                column: column.to_string(),
            })?;
        let bad = |dtype: &'static str| ValidationError::BadValue {
            table: table.clone(),
            column: column.to_string(),
            value: raw.to_string(),
            dtype,
        };
        let trimmed = raw.trim();
        match slot {
            Column::Int(v) => {
                // edit tables carry numbers as text, "12.0" included
                v[pos] = match trimmed.parse::<i64>() {
                    Ok(x) => x,
                    Err(_) => match trimmed.parse::<f64>() {
                        Ok(x) if x.fract() == 0.0 && x.is_finite() => x as i64,
                        _ => return Err(bad("int")),
                    },
                };
            }
            Column::Float(v) => {
                v[pos] = if trimmed.is_empty() {
                    f64::NAN
                } else {
                    trimmed.parse::<f64>().map_err(|_| bad("float"))?
                };
            }
            Column::Str(v) => v[pos] = raw.to_string(),
        }
        Ok(())
    }

    /// Append copies of the rows `source_ids` under consecutive new ids starting
    /// at `first_new_id`. Returns the new ids.
    pub fn append_copies(
        &mut self,
        source_ids: &[i64],
        first_new_id: i64,
    ) -> Result<Vec<i64>, ValidationError> {
        let mut src_pos = Vec::with_capacity(source_ids.len());
        for &id in source_ids {
            let pos = self.position(id).ok_or_else(|| ValidationError::UnknownRow {
                table: self.name.clone(),
                id,
            })?;
            src_pos.push(pos);
        }
        let new_ids: Vec<i64> = (0..source_ids.len() as i64)
            .map(|k| first_new_id + k)
            .collect();
        for &id in &new_ids {
            if self.positions.contains_key(&id) {
                return Err(ValidationError::DuplicateRow {
                    table: self.name.clone(),
                    id,
                });
            }
        }
        for (&pos, &id) in src_pos.iter().zip(&new_ids) {
            for (_, col) in self.columns.iter_mut() {
                col.push_copy_of(pos);
            }
            self.positions.insert(id, self.index.len());
            self.index.push(id);
        }
        Ok(new_ids)
    }

    pub fn max_id(&self) -> Option<i64> {
        self.index.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buildings() -> Table {
        let mut t = Table::new("buildings", vec![10, 11, 12]).unwrap();
        t.set_column("parcel_id", Column::Int(vec![1, 1, 2])).unwrap();
        t.set_column("building_sqft", Column::Float(vec![100.0, f64::NAN, 50.0]))
            .unwrap();
        t.set_column(
            "note",
            Column::Str(vec!["a".into(), "b".into(), "c".into()]),
        )
        .unwrap();
        t
    }

    #[test]
    fn duplicate_index_rejected() {
        assert_eq!(
            Table::new("t", vec![1, 2, 1]).err(),
            Some(ValidationError::DuplicateRow {
                table: "t".to_string(),
                id: 1
            })
        );
    }

    #[test]
    fn short_column_rejected() {
        let mut t = buildings();
        assert_eq!(
            t.set_column("parcel_id", Column::Int(vec![1, 2])),
            Err(ValidationError::ColumnLength {
                table: "buildings".to_string(),
                column: "parcel_id".to_string(),
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn typed_access_and_coercion() {
        let t = buildings();
        assert_eq!(t.i64_values("parcel_id").unwrap(), vec![1, 1, 2]);
        assert_eq!(t.i64_values("building_sqft").unwrap(), vec![100, -1, 50]);
        assert_eq!(t.f64_values("parcel_id").unwrap(), vec![1.0, 1.0, 2.0]);
        assert!(matches!(
            t.f64_values("note"),
            Err(ValidationError::ColumnType { .. })
        ));
        assert!(matches!(
            t.column("nope"),
            Err(ValidationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn set_value_parses_per_dtype() {
        let mut t = buildings();
        t.set_value(11, "parcel_id", "7.0").unwrap();
        t.set_value(11, "building_sqft", "2500").unwrap();
        t.set_value(12, "note", "edited").unwrap();
        assert_eq!(t.i64_values("parcel_id").unwrap(), vec![1, 7, 2]);
        assert_eq!(t.f64_values("building_sqft").unwrap()[1], 2500.0);
        assert_eq!(t.strs("note").unwrap()[2], "edited");

        assert!(matches!(
            t.set_value(99, "note", "x"),
            Err(ValidationError::UnknownRow { id: 99, .. })
        ));
        assert!(matches!(
            t.set_value(10, "parcel_id", "abc"),
            Err(ValidationError::BadValue { .. })
        ));
    }

    #[test]
    fn append_copies_keeps_values_and_assigns_ids() {
        let mut t = buildings();
        let ids = t.append_copies(&[12, 10], 13).unwrap();
        assert_eq!(ids, vec![13, 14]);
        assert_eq!(t.len(), 5);
        assert_eq!(t.position(14), Some(4));
        assert_eq!(t.i64_values("parcel_id").unwrap(), vec![1, 1, 2, 2, 1]);
        assert!(matches!(
            t.append_copies(&[10], 12),
            Err(ValidationError::DuplicateRow { id: 12, .. })
        ));
        assert!(t.append_copies(&[404], 100).is_err());
    }

    #[test]
    fn nan_cells_compare_equal() {
        assert_eq!(buildings(), buildings());
    }

    #[test]
    fn infer_types() {
        let ints = Column::infer(vec!["1".into(), " 2".into()]);
        assert!(matches!(ints, Column::Int(_)));
        let floats = Column::infer(vec!["1.5".into(), "".into()]);
        match floats {
            Column::Float(v) => assert!(v[1].is_nan()),
            _ => panic!("expected float"),
        }
        let strs = Column::infer(vec!["Alameda".into(), "3".into()]);
        assert!(matches!(strs, Column::Str(_)));
    }
}
