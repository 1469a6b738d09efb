//! The binary cache of the dynamic density responses: a fixed-size header
//! keyed on the grids and the state point, followed by the four (nx × nW)
//! arrays φ_re, φ_im, ψ_re, ψ_im. Loading requires every header field to
//! match the input to within the binary round-trip tolerance and the file to
//! end exactly after the last array.

use crate::error::{CacheError, SolverError};
use crate::state::StatePoint;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use jellium_mesher::{Discretisation, FrequencyGrid, WaveVectorGrid};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

// Tolerates endian/format round-trips; bitwise equality is the intent
const HEADER_TOLERANCE: f64 = 1e-15;

/// The four density-response grids of a dynamic run
pub(crate) struct DynamicResponses {
    /// Re φ(x_i, ω_j)
    pub phi_re: Array2<f64>,
    /// Im φ(x_i, ω_j)
    pub phi_im: Array2<f64>,
    /// Re ψ(x_i, ω_j)
    pub psi_re: Array2<f64>,
    /// Im ψ(x_i, ω_j)
    pub psi_im: Array2<f64>,
}

/// The canonical cache file name, namespaced by the state point
pub(crate) fn cache_name(rs: f64, theta: f64, theory: &str) -> String {
    format!("dynamic_adr_rs{rs:.3}_theta{theta:.3}_{theory}.bin")
}

/// Serialize the density responses with their compatibility header.
pub(crate) fn write_dynamic_cache(
    path: &Path,
    grid: &WaveVectorGrid<f64>,
    frequencies: &FrequencyGrid<f64>,
    state: &StatePoint,
    responses: &DynamicResponses,
) -> Result<(), SolverError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_i32::<LittleEndian>(grid.num_points() as i32)?;
    writer.write_f64::<LittleEndian>(grid.spacing())?;
    writer.write_f64::<LittleEndian>(grid.cutoff())?;
    writer.write_i32::<LittleEndian>(frequencies.num_points() as i32)?;
    writer.write_f64::<LittleEndian>(frequencies.spacing())?;
    writer.write_f64::<LittleEndian>(frequencies.cutoff())?;
    writer.write_f64::<LittleEndian>(state.theta)?;
    writer.write_f64::<LittleEndian>(state.rs)?;
    for array in [
        &responses.phi_re,
        &responses.phi_im,
        &responses.psi_re,
        &responses.psi_im,
    ] {
        for &value in array.iter() {
            writer.write_f64::<LittleEndian>(value)?;
        }
    }
    Ok(())
}

/// Load a cache written by [`write_dynamic_cache`], re-validating the header
/// against the current input.
pub(crate) fn read_dynamic_cache(
    path: &Path,
    grid: &WaveVectorGrid<f64>,
    frequencies: &FrequencyGrid<f64>,
    state: &StatePoint,
) -> Result<DynamicResponses, SolverError> {
    let mut reader = BufReader::new(File::open(path)?);
    let nx_file = reader.read_i32::<LittleEndian>()? as usize;
    let dx_file = reader.read_f64::<LittleEndian>()?;
    let xmax_file = reader.read_f64::<LittleEndian>()?;
    let nw_file = reader.read_i32::<LittleEndian>()? as usize;
    let dw_file = reader.read_f64::<LittleEndian>()?;
    let wmax_file = reader.read_f64::<LittleEndian>()?;
    let theta_file = reader.read_f64::<LittleEndian>()?;
    let rs_file = reader.read_f64::<LittleEndian>()?;

    check_header("grid points (nx)", grid.num_points() as f64, nx_file as f64)?;
    check_header("resolution (dx)", grid.spacing(), dx_file)?;
    check_header("cutoff (xmax)", grid.cutoff(), xmax_file)?;
    check_header(
        "frequency points (nW)",
        frequencies.num_points() as f64,
        nw_file as f64,
    )?;
    check_header("frequency resolution (dW)", frequencies.spacing(), dw_file)?;
    check_header("frequency cutoff (Wmax)", frequencies.cutoff(), wmax_file)?;
    check_header("degeneracy parameter (Theta)", state.theta, theta_file)?;
    check_header("coupling parameter (rs)", state.rs, rs_file)?;

    let per_array = nx_file * nw_file;
    let expected = 4 * per_array;
    let mut arrays = Vec::with_capacity(4);
    let mut read = 0;
    for _ in 0..4 {
        let mut body = vec![0.0; per_array];
        for slot in body.iter_mut() {
            *slot = reader
                .read_f64::<LittleEndian>()
                .map_err(|_| SolverError::Cache(CacheError::Truncated { expected, read }))?;
            read += 1;
        }
        arrays.push(
            Array2::from_shape_vec((nx_file, nw_file), body)
                .expect("the body length was sized from the header"),
        );
    }
    // EOF must be reached exactly after the last array
    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(SolverError::Cache(CacheError::Truncated {
            expected,
            read: expected + 1,
        }));
    }

    let psi_im = arrays.pop().unwrap();
    let psi_re = arrays.pop().unwrap();
    let phi_im = arrays.pop().unwrap();
    let phi_re = arrays.pop().unwrap();
    Ok(DynamicResponses {
        phi_re,
        phi_im,
        psi_re,
        psi_im,
    })
}

fn check_header(quantity: &'static str, input: f64, file: f64) -> Result<(), SolverError> {
    if (input - file).abs() > HEADER_TOLERANCE {
        return Err(SolverError::Cache(CacheError::Incompatible {
            quantity,
            input,
            file,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::theory::Theory;
    use ndarray::Array2;

    fn fixture() -> (WaveVectorGrid<f64>, FrequencyGrid<f64>, StatePoint, DynamicResponses) {
        let grid = WaveVectorGrid::build(0.5, 5.0).unwrap();
        let frequencies = FrequencyGrid::build(0.5, 4.0).unwrap();
        let state = StatePoint::new(1.0, 1.0, Theory::QstlsHnc, -10.0, 10.0).unwrap();
        let shape = (grid.num_points(), frequencies.num_points());
        let fill = |offset: f64| {
            Array2::from_shape_fn(shape, move |(i, j)| offset + i as f64 * 0.01 + j as f64)
        };
        let responses = DynamicResponses {
            phi_re: fill(0.0),
            phi_im: fill(100.0),
            psi_re: fill(200.0),
            psi_im: fill(300.0),
        };
        (grid, frequencies, state, responses)
    }

    #[test]
    fn cache_round_trips_bit_exactly() {
        let (grid, frequencies, state, responses) = fixture();
        let path = std::env::temp_dir().join("jellium_dynamic_cache_roundtrip.bin");
        write_dynamic_cache(&path, &grid, &frequencies, &state, &responses).unwrap();
        let reread = read_dynamic_cache(&path, &grid, &frequencies, &state).unwrap();
        for (written, read) in [
            (&responses.phi_re, &reread.phi_re),
            (&responses.phi_im, &reread.phi_im),
            (&responses.psi_re, &reread.psi_re),
            (&responses.psi_im, &reread.psi_im),
        ] {
            for (a, b) in written.iter().zip(read.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn one_percent_resolution_change_is_incompatible() {
        let (grid, frequencies, state, responses) = fixture();
        let path = std::env::temp_dir().join("jellium_dynamic_cache_dx.bin");
        write_dynamic_cache(&path, &grid, &frequencies, &state, &responses).unwrap();
        let shifted = WaveVectorGrid::build(0.505, 5.0).unwrap();
        assert!(matches!(
            read_dynamic_cache(&path, &shifted, &frequencies, &state),
            Err(SolverError::Cache(CacheError::Incompatible { .. }))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let (grid, frequencies, state, responses) = fixture();
        let path = std::env::temp_dir().join("jellium_dynamic_cache_trailing.bin");
        write_dynamic_cache(&path, &grid, &frequencies, &state, &responses).unwrap();
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&[0u8; 4]);
        std::fs::write(&path, &raw).unwrap();
        assert!(matches!(
            read_dynamic_cache(&path, &grid, &frequencies, &state),
            Err(SolverError::Cache(CacheError::Truncated { .. }))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn cache_names_are_namespaced_by_the_state_point() {
        assert_eq!(
            cache_name(1.0, 1.0, "QSTLS-HNC"),
            "dynamic_adr_rs1.000_theta1.000_QSTLS-HNC.bin"
        );
    }
}
