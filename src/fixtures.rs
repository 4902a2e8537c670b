//! Small hand-built tables shared by the unit tests.

use crate::store::{Column, Table};

fn ints(v: &[i64]) -> Column {
    Column::Int(v.to_vec())
}

fn floats(v: &[f64]) -> Column {
    Column::Float(v.to_vec())
}

fn strs(v: &[&str]) -> Column {
    Column::Str(v.iter().map(|s| s.to_string()).collect())
}

/// (parcel_id, zone_id, juris, county)
pub fn parcels(rows: &[(i64, i64, &str, &str)]) -> Table {
    let mut t = Table::new("parcels", rows.iter().map(|r| r.0).collect()).unwrap();
    let zone: Vec<i64> = rows.iter().map(|r| r.1).collect();
    let juris: Vec<&str> = rows.iter().map(|r| r.2).collect();
    let county: Vec<&str> = rows.iter().map(|r| r.3).collect();
    t.set_column("zone_id", ints(&zone)).unwrap();
    t.set_column("juris", strs(&juris)).unwrap();
    t.set_column("county", strs(&county)).unwrap();
    t
}

fn sqft_buildings(ids: &[i64], parcel_ids: &[i64], nonres: &[f64], total: &[f64]) -> Table {
    let mut b = Table::new("buildings", ids.to_vec()).unwrap();
    b.set_column("parcel_id", ints(parcel_ids)).unwrap();
    b.set_column("non_residential_sqft", floats(nonres)).unwrap();
    b.set_column("building_sqft", floats(total)).unwrap();
    b
}

/// Zone 5 with two offices of 300 and 700 non-residential sqft.
pub fn two_office_zone() -> (Table, Table) {
    let b = sqft_buildings(&[1, 2], &[500, 500], &[300.0, 700.0], &[300.0, 700.0]);
    (b, parcels(&[(500, 5, "Ross", "Marin")]))
}

/// Zone 8 with no non-residential space: one house and one empty lot.
pub fn residential_only_zone() -> (Table, Table) {
    let b = sqft_buildings(&[30, 31], &[800, 800], &[0.0, 0.0], &[2000.0, 0.0]);
    (b, parcels(&[(800, 8, "Napa", "Napa")]))
}

/// Building 40 in Portola Valley, building 41 in unincorporated San Mateo.
pub fn two_jurisdictions() -> (Table, Table) {
    let b = sqft_buildings(&[40, 41], &[1, 2], &[1000.0, 1000.0], &[1000.0, 1000.0]);
    let p = parcels(&[
        (1, 1, "Portola Valley", "San Mateo"),
        (2, 2, "San Mateo County", "San Mateo"),
    ]);
    (b, p)
}

/// Raw buildings 10, 11, 12 before reconciliation: a house, a placeholder
/// typed office and a parking lot.
pub fn raw_buildings() -> Table {
    let mut b = Table::new("buildings", vec![10, 11, 12]).unwrap();
    b.set_column("parcel_id", ints(&[100, 100, 100])).unwrap();
    b.set_column("residential_units", floats(&[2.0, f64::NAN, 0.0]))
        .unwrap();
    b.set_column("residential_sqft", floats(&[1000.0, 0.0, 0.0]))
        .unwrap();
    b.set_column("non_residential_sqft", floats(&[500.0, 4000.0, 300.0]))
        .unwrap();
    b.set_column("building_sqft", floats(&[1000.0, 5000.0, 800.0]))
        .unwrap();
    b.set_column("building_type_id", ints(&[1, 0, 15])).unwrap();
    b.set_column("redfin_sale_year", floats(&[f64::NAN, 2005.0, f64::NAN]))
        .unwrap();
    b.set_column("costar_rent", floats(&[1.0, 1.0, 1.0])).unwrap();
    b
}

/// (household_id, building_id)
pub fn households_in(rows: &[(i64, i64)]) -> Table {
    let mut h = Table::new("households", rows.iter().map(|r| r.0).collect()).unwrap();
    let b: Vec<i64> = rows.iter().map(|r| r.1).collect();
    h.set_column("building_id", ints(&b)).unwrap();
    h
}

/// Buildings 1..=n in zone 3 with the given residential units.
pub fn deed_zone(units: &[i64]) -> (Table, Table) {
    let ids: Vec<i64> = (1..=units.len() as i64).collect();
    let mut b = Table::new("buildings", ids).unwrap();
    b.set_column("parcel_id", ints(&vec![300; units.len()])).unwrap();
    b.set_column("residential_units", ints(units)).unwrap();
    (b, parcels(&[(300, 3, "Ross", "Marin")]))
}

/// Buildings 1, 2, 3 in Sonoma/Santa Rosa, Marin/Ross and an unmapped county,
/// with 250 sqft per job.
pub fn vacancy_buildings(job_spaces: &[i64]) -> (Table, Table) {
    let mut b = Table::new("buildings_preproc", vec![1, 2, 3]).unwrap();
    b.set_column("parcel_id", ints(&[1, 2, 3])).unwrap();
    b.set_column("job_spaces", ints(job_spaces)).unwrap();
    b.set_column("sqft_per_job", floats(&[250.0; 3])).unwrap();
    let nonres: Vec<f64> = job_spaces.iter().map(|&s| s as f64 * 250.0).collect();
    b.set_column("non_residential_sqft", floats(&nonres)).unwrap();
    let p = parcels(&[
        (1, 1, "Santa Rosa", "Sonoma"),
        (2, 2, "Ross", "Marin"),
        (3, 3, "Elsewhere", "Nowhere"),
    ]);
    (b, p)
}

/// (building_id, number of jobs)
pub fn jobs_in(counts: &[(i64, usize)]) -> Table {
    let building_ids: Vec<i64> = counts
        .iter()
        .flat_map(|&(b, n)| std::iter::repeat(b).take(n))
        .collect();
    let mut t = Table::with_row_numbers("jobs", building_ids.len());
    t.set_column("building_id", Column::Int(building_ids)).unwrap();
    t
}
