//! MatrixMarket coordinate format reader/writer (sparse matrices, spec §6).
//! 1-indexed on disk, converted to 0-indexed triplets in memory.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Result, SmurffError};

pub fn read_matrixmarket(path: &Path) -> Result<(usize, usize, Vec<(u32, u32, f64)>)> {
    let file = File::open(path).map_err(|e| SmurffError::io(path, e))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .ok_or_else(|| SmurffError::format(path, "empty file"))?
        .map_err(|e| SmurffError::io(path, e))?;
    if !header.starts_with("%%MatrixMarket") {
        return Err(SmurffError::format(path, "missing MatrixMarket header"));
    }
    if !header.contains("coordinate") {
        return Err(SmurffError::format(
            path,
            "only coordinate (sparse) MatrixMarket files are supported",
        ));
    }

    let mut dims_line = None;
    for line in lines.by_ref() {
        let line = line.map_err(|e| SmurffError::io(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        dims_line = Some(trimmed.to_string());
        break;
    }
    let dims_line =
        dims_line.ok_or_else(|| SmurffError::format(path, "missing dimension line"))?;
    let mut parts = dims_line.split_whitespace();
    let nrow: usize = parse_field(path, parts.next())?;
    let ncol: usize = parse_field(path, parts.next())?;
    let nnz: usize = parse_field(path, parts.next())?;

    let mut triplets = Vec::with_capacity(nnz);
    for line in lines {
        let line = line.map_err(|e| SmurffError::io(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let row: u32 = parse_field(path, parts.next())?;
        let col: u32 = parse_field(path, parts.next())?;
        let val: f64 = match parts.next() {
            Some(s) => s
                .parse()
                .map_err(|_| SmurffError::format(path, format!("bad value field: {s}")))?,
            None => 1.0, // pattern matrices: entry presence implies value 1.0
        };
        if row == 0 || col == 0 {
            return Err(SmurffError::format(path, "MatrixMarket indices are 1-based"));
        }
        triplets.push((row - 1, col - 1, val));
    }

    if triplets.len() != nnz {
        return Err(SmurffError::format(
            path,
            format!(
                "header declared {} entries but {} were read",
                nnz,
                triplets.len()
            ),
        ));
    }

    Ok((nrow, ncol, triplets))
}

fn parse_field<T: std::str::FromStr>(path: &Path, field: Option<&str>) -> Result<T> {
    field
        .ok_or_else(|| SmurffError::format(path, "missing field in dimension line"))?
        .parse()
        .map_err(|_| SmurffError::format(path, "malformed dimension field"))
}

pub fn write_matrixmarket(
    path: &Path,
    nrow: usize,
    ncol: usize,
    triplets: &[(u32, u32, f64)],
) -> Result<()> {
    let file = File::create(path).map_err(|e| SmurffError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| SmurffError::io(path, e);
    writeln!(w, "%%MatrixMarket matrix coordinate real general").map_err(io_err)?;
    writeln!(w, "{nrow} {ncol} {}", triplets.len()).map_err(io_err)?;
    for &(row, col, val) in triplets {
        writeln!(w, "{} {} {}", row + 1, col + 1, val).map_err(io_err)?;
    }
    w.flush().map_err(io_err)?;
    Ok(())
}
