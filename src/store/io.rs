use anyhow::{Context, Result, bail};
use ndarray::Array1;
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::File;
use std::path::Path;

use super::types::{Column, Table};

// -------------------------------------------------------------------------------------
// NPZ layout, one archive per table:
//   index.npy                      i64 row ids
//   columns_data.npy / _indptr.npy column names, CSR over utf-8 bytes
//   dtypes.npy                     u8 per column (Column::DTYPE_*)
//   c{k}.npy                       numeric column k
//   c{k}_data.npy / c{k}_indptr.npy string column k, CSR over utf-8 bytes
// -------------------------------------------------------------------------------------

fn read_arr<R, A>(npz: &mut NpzReader<R>, name: &str) -> Result<Array1<A>>
where
    R: std::io::Read + std::io::Seek,
    A: ndarray_npy::ReadableElement,
{
    let arr: Array1<A> = npz
        .by_name(name)
        .with_context(|| format!("missing {}", name))?;
    Ok(arr)
}

fn pack_strings(values: &[String]) -> (Vec<u8>, Vec<i64>) {
    let mut data: Vec<u8> = Vec::new();
    let mut indptr: Vec<i64> = Vec::with_capacity(values.len() + 1);
    indptr.push(0);
    for s in values {
        data.extend_from_slice(s.as_bytes());
        indptr.push(data.len() as i64);
    }
    (data, indptr)
}

fn unpack_strings(data: &[u8], indptr: &[i64]) -> Result<Vec<String>> {
    let n = indptr.len().saturating_sub(1);
    let mut out = Vec::with_capacity(n);
    for r in 0..n {
        let lo = indptr[r] as usize;
        let hi = indptr[r + 1] as usize;
        if lo > hi || hi > data.len() {
            bail!("string offsets out of range: [{}, {}) of {}", lo, hi, data.len());
        }
        let s = std::str::from_utf8(&data[lo..hi]).context("string column is not utf-8")?;
        out.push(s.to_string());
    }
    Ok(out)
}

fn read_strings<R: std::io::Read + std::io::Seek>(
    npz: &mut NpzReader<R>,
    prefix: &str,
) -> Result<Vec<String>> {
    let data: Array1<u8> = read_arr(npz, &format!("{}_data.npy", prefix))?;
    let indptr: Array1<i64> = read_arr(npz, &format!("{}_indptr.npy", prefix))?;
    unpack_strings(&data.to_vec(), &indptr.to_vec())
}

fn write_strings<W: std::io::Write + std::io::Seek>(
    npz: &mut NpzWriter<W>,
    prefix: &str,
    values: &[String],
) -> Result<()> {
    let (data, indptr) = pack_strings(values);
    npz.add_array(format!("{}_data.npy", prefix), &Array1::from_vec(data))?;
    npz.add_array(format!("{}_indptr.npy", prefix), &Array1::from_vec(indptr))?;
    Ok(())
}

pub fn load_table(path: &Path, name: &str) -> Result<Table> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut npz = NpzReader::new(f).context("read npz")?;

    let index: Array1<i64> = read_arr(&mut npz, "index.npy")?;
    let names = read_strings(&mut npz, "columns")?;
    let dtypes: Array1<u8> = read_arr(&mut npz, "dtypes.npy")?;
    if dtypes.len() != names.len() {
        bail!(
            "{}: {} column names but {} dtypes",
            path.display(),
            names.len(),
            dtypes.len()
        );
    }

    let mut table = Table::new(name, index.to_vec())?;
    for (k, (col_name, &dtype)) in names.iter().zip(dtypes.iter()).enumerate() {
        let col = match dtype {
            Column::DTYPE_INT => {
                Column::Int(read_arr::<_, i64>(&mut npz, &format!("c{}.npy", k))?.to_vec())
            }
            Column::DTYPE_FLOAT => {
                Column::Float(read_arr::<_, f64>(&mut npz, &format!("c{}.npy", k))?.to_vec())
            }
            Column::DTYPE_STR => Column::Str(read_strings(&mut npz, &format!("c{}", k))?),
            other => bail!("{}: column {} has unknown dtype {}", path.display(), col_name, other),
        };
        table
            .set_column(col_name, col)
            .with_context(|| format!("{}: column {}", path.display(), col_name))?;
    }
    Ok(table)
}

pub fn save_table(path: &Path, table: &Table) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut npz = NpzWriter::new(f);

    npz.add_array("index.npy", &Array1::from_vec(table.index().to_vec()))?;

    let names: Vec<String> = table.column_names().iter().map(|s| s.to_string()).collect();
    write_strings(&mut npz, "columns", &names)?;
    let dtypes: Vec<u8> = table.columns().map(|(_, c)| c.dtype_code()).collect();
    npz.add_array("dtypes.npy", &Array1::from_vec(dtypes))?;

    for (k, (_, col)) in table.columns().enumerate() {
        match col {
            Column::Int(v) => npz.add_array(format!("c{}.npy", k), &Array1::from_vec(v.clone()))?,
            Column::Float(v) => {
                npz.add_array(format!("c{}.npy", k), &Array1::from_vec(v.clone()))?
            }
            Column::Str(v) => write_strings(&mut npz, &format!("c{}", k), v)?,
        }
    }

    npz.finish()?;
    Ok(())
}

// -------------------------------------------------------------------------------------
// CSV <-> Table. First CSV column is the row index.
// -------------------------------------------------------------------------------------

pub fn read_csv_table(path: &Path, name: &str) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        bail!("{}: no header row", path.display());
    }

    let mut index: Vec<i64> = Vec::new();
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len() - 1];
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("{}: record {}", path.display(), line + 1))?;
        let id_field = rec.get(0).unwrap_or("").trim();
        let id = match id_field.parse::<i64>() {
            Ok(x) => x,
            Err(_) => match id_field.parse::<f64>() {
                Ok(x) if x.fract() == 0.0 => x as i64,
                _ => bail!(
                    "{}: record {}: index {:?} is not an integer",
                    path.display(),
                    line + 1,
                    id_field
                ),
            },
        };
        index.push(id);
        for (k, cells) in raw.iter_mut().enumerate() {
            cells.push(rec.get(k + 1).unwrap_or("").to_string());
        }
    }

    let mut table = Table::new(name, index)?;
    for (k, cells) in raw.into_iter().enumerate() {
        table.set_column(&headers[k + 1], Column::infer(cells))?;
    }
    Ok(table)
}

pub fn write_csv_table(path: &Path, table: &Table, index_label: &str) -> Result<()> {
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    let mut header = vec![index_label.to_string()];
    header.extend(table.column_names().iter().map(|s| s.to_string()));
    wtr.write_record(&header)?;

    let cols: Vec<&Column> = table.columns().map(|(_, c)| c).collect();
    for (pos, id) in table.index().iter().enumerate() {
        let mut row = Vec::with_capacity(cols.len() + 1);
        row.push(id.to_string());
        row.extend(cols.iter().map(|c| c.cell(pos)));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}
