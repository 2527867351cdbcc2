//! Reading and writing complex arrays as BART `.cfl`/`.hdr` pairs.
//!
//! BART stores arrays column-major, so the dimensions in the header are the reverse of the
//! row-major ndarray shape and the sample order on disk is the standard ndarray iteration order.

use crate::error::{ReconError, Result};
use crate::message::{ImageHeader, ReconImage};
use crate::solver::SolveReport;
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use num_complex::Complex32;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    base.with_extension(ext)
}

pub fn write_cfl<S, D>(base: impl AsRef<Path>, data: &ArrayBase<S, D>) -> Result<()>
where
    S: Data<Elem = Complex32>,
    D: Dimension,
{
    let base = base.as_ref();
    let mut dims: Vec<String> = data.shape().iter().rev().map(|d| d.to_string()).collect();
    if dims.is_empty() {
        dims.push("1".to_string());
    }
    let mut hdr = File::create(with_ext(base, "hdr"))?;
    writeln!(hdr, "# Dimensions")?;
    writeln!(hdr, "{}", dims.join(" "))?;

    let values: Vec<f32> = data.iter().flat_map(|x| [x.re, x.im]).collect();
    let mut bytes = vec![0u8; values.len() * size_of::<f32>()];
    LittleEndian::write_f32_into(&values, &mut bytes);
    File::create(with_ext(base, "cfl"))?.write_all(&bytes)?;
    Ok(())
}

/// reads a cfl pair into a row-major array
pub fn read_cfl(base: impl AsRef<Path>) -> Result<ArrayD<Complex32>> {
    let base = base.as_ref();
    let mut hdr = String::new();
    File::open(with_ext(base, "hdr"))?.read_to_string(&mut hdr)?;
    let dims_line = hdr
        .lines()
        .find(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .ok_or_else(|| ReconError::Data(format!("{} has no dimension line", base.display())))?;
    let mut shape = dims_line
        .split_ascii_whitespace()
        .map(|d| d.parse::<usize>().map_err(|e| ReconError::Data(format!("bad dimension {d}: {e}"))))
        .collect::<Result<Vec<usize>>>()?;
    shape.reverse();
    let n: usize = shape.iter().product();

    let mut bytes = Vec::with_capacity(n * size_of::<Complex32>());
    File::open(with_ext(base, "cfl"))?.read_to_end(&mut bytes)?;
    if bytes.len() != n * size_of::<Complex32>() {
        return Err(ReconError::Data(format!(
            "{} holds {} bytes, header announces {n} complex values",
            base.display(),
            bytes.len()
        )));
    }
    let mut values = vec![0f32; 2 * n];
    LittleEndian::read_f32_into(&bytes, &mut values);
    let data = values.chunks_exact(2).map(|c| Complex32::new(c[0], c[1])).collect();
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| ReconError::Data(e.to_string()))
}

#[derive(Serialize)]
struct ImageSidecar<'a> {
    header: &'a ImageHeader,
    report: &'a SolveReport,
}

/// Writes the image data as cfl and its header and solver report as a json sidecar.
pub fn write_image(base: impl AsRef<Path>, image: &ReconImage) -> Result<()> {
    let base = base.as_ref();
    write_cfl(base, &image.data)?;
    let sidecar = ImageSidecar { header: &image.header, report: &image.report };
    let json = serde_json::to_string_pretty(&sidecar).map_err(|e| ReconError::Data(e.to_string()))?;
    File::create(with_ext(base, "json"))?.write_all(json.as_bytes())?;
    Ok(())
}
