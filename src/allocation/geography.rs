use ahash::AHashMap;

use crate::error::ValidationError;
use crate::store::{Column, Table};

/// Look up `parent[column]` for each key in `keys` (matched against the
/// parent's row index). Keys with no parent row map to `missing`.
pub fn reindex_i64(
    parent: &Table,
    column: &str,
    keys: &[i64],
    missing: i64,
) -> Result<Vec<i64>, ValidationError> {
    let values = parent.i64_values(column)?;
    Ok(keys
        .iter()
        .map(|&k| parent.position(k).map(|p| values[p]).unwrap_or(missing))
        .collect())
}

/// String flavour of [`reindex_i64`]; unmatched keys map to "".
pub fn reindex_str(parent: &Table, column: &str, keys: &[i64]) -> Result<Vec<String>, ValidationError> {
    let values = match parent.column(column)? {
        Column::Str(v) => v,
        other => {
            return Err(ValidationError::ColumnType {
                table: parent.name().to_string(),
                column: column.to_string(),
                expected: "str",
                found: other.dtype_name(),
            });
        }
    };
    Ok(keys
        .iter()
        .map(|&k| parent.position(k).map(|p| values[p].clone()).unwrap_or_default())
        .collect())
}

/// Zone of every building (building -> parcel -> zone) and the buildings of
/// every zone, by row position. Buildings on unknown parcels sit in zone -1.
#[derive(Debug, Clone)]
pub struct ZoneIndex {
    zone_of: Vec<i64>,
    members: AHashMap<i64, Vec<usize>>,
}

impl ZoneIndex {
    pub fn build(buildings: &Table, parcels: &Table) -> Result<Self, ValidationError> {
        let parcel_ids = buildings.i64_values("parcel_id")?;
        let zone_of = reindex_i64(parcels, "zone_id", &parcel_ids, -1)?;
        let mut members: AHashMap<i64, Vec<usize>> = AHashMap::default();
        for (pos, &z) in zone_of.iter().enumerate() {
            members.entry(z).or_default().push(pos);
        }
        Ok(ZoneIndex { zone_of, members })
    }

    #[inline]
    pub fn zone_of(&self, pos: usize) -> i64 {
        self.zone_of[pos]
    }

    pub fn members(&self, zone: i64) -> &[usize] {
        self.members.get(&zone).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buildings_grouped_by_parcel_zone() {
        let mut parcels = Table::new("parcels", vec![100, 200]).unwrap();
        parcels.set_column("zone_id", Column::Int(vec![5, 6])).unwrap();
        parcels
            .set_column("juris", Column::Str(vec!["Ross".into(), "Napa".into()]))
            .unwrap();

        let mut b = Table::new("buildings", vec![1, 2, 3, 4]).unwrap();
        b.set_column("parcel_id", Column::Int(vec![100, 200, 100, 999]))
            .unwrap();

        let idx = ZoneIndex::build(&b, &parcels).unwrap();
        assert_eq!((0..4).map(|p| idx.zone_of(p)).collect::<Vec<_>>(), vec![5, 6, 5, -1]);
        assert_eq!(idx.members(5), &[0, 2]);
        assert_eq!(idx.members(-1), &[3]);
        assert!(idx.members(77).is_empty());

        let juris = reindex_str(&parcels, "juris", &[200, 999]).unwrap();
        assert_eq!(juris, vec!["Napa".to_string(), String::new()]);
        assert!(reindex_str(&parcels, "zone_id", &[100]).is_err());
    }
}
