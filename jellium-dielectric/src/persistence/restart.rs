//! The binary restart of the static schemes: the full input record followed
//! by φ(x, l) in row-major order (wave-vector major) and S_HF(x).

use crate::app::configuration::Configuration;
use crate::error::{CacheError, SolverError};
use crate::theory::{IetMapping, Mode, Theory};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Serialize the input record and the state-point data.
pub(crate) fn write_restart(
    path: &Path,
    record: &Configuration,
    idr: &Array2<f64>,
    ssf_hf: &Array1<f64>,
) -> Result<(), SolverError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_record(&mut writer, record)?;
    for &value in idr.iter() {
        writer.write_f64::<LittleEndian>(value)?;
    }
    for &value in ssf_hf.iter() {
        writer.write_f64::<LittleEndian>(value)?;
    }
    Ok(())
}

/// Read a restart written by [`write_restart`]; the caller adopts the grid
/// and state-point fields of the embedded record.
pub(crate) fn read_restart(
    path: &Path,
) -> Result<(Configuration, Array2<f64>, Array1<f64>), SolverError> {
    let mut reader = BufReader::new(File::open(path)?);
    let record = read_record(&mut reader)?;
    let nx = record.nx();
    let nl = record.nl;

    let expected = nx * nl + nx;
    let mut body = vec![0.0; expected];
    for (read, slot) in body.iter_mut().enumerate() {
        *slot = reader
            .read_f64::<LittleEndian>()
            .map_err(|_| SolverError::Cache(CacheError::Truncated { expected, read }))?;
    }
    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(SolverError::Cache(CacheError::Truncated {
            expected,
            read: expected + 1,
        }));
    }

    let ssf_hf = Array1::from_vec(body.split_off(nx * nl));
    let idr = Array2::from_shape_vec((nx, nl), body)
        .expect("the body length was sized from the record");
    Ok((record, idr, ssf_hf))
}

fn write_record<W: Write>(writer: &mut W, record: &Configuration) -> Result<(), SolverError> {
    write_str(writer, record.theory.label())?;
    write_str(writer, mode_label(record.mode))?;
    writer.write_f64::<LittleEndian>(record.theta)?;
    writer.write_f64::<LittleEndian>(record.rs)?;
    writer.write_f64::<LittleEndian>(record.mu)?;
    writer.write_f64::<LittleEndian>(record.mu_lo)?;
    writer.write_f64::<LittleEndian>(record.mu_hi)?;
    writer.write_f64::<LittleEndian>(record.dx)?;
    writer.write_f64::<LittleEndian>(record.xmax)?;
    writer.write_i32::<LittleEndian>(record.nx() as i32)?;
    writer.write_i32::<LittleEndian>(record.nl as i32)?;
    writer.write_i32::<LittleEndian>(record.n_iter as i32)?;
    writer.write_f64::<LittleEndian>(record.err_min_iter)?;
    writer.write_f64::<LittleEndian>(record.a_mix)?;
    writer.write_i32::<LittleEndian>(record.n_threads as i32)?;
    write_str(writer, mapping_label(record.iet_mapping))?;
    write_path(writer, &record.stls_guess_file)?;
    write_path(writer, &record.qstls_guess_file)?;
    write_path(writer, &record.qstls_fixed_file)?;
    write_path(writer, &record.qstls_iet_fixed_file)?;
    writer.write_i32::<LittleEndian>(record.qstls_iet_static as i32)?;
    writer.write_f64::<LittleEndian>(record.vs_drs)?;
    writer.write_f64::<LittleEndian>(record.vs_dt)?;
    writer.write_f64::<LittleEndian>(record.vs_alpha)?;
    writer.write_f64::<LittleEndian>(record.vs_err_min_iter)?;
    writer.write_f64::<LittleEndian>(record.vs_a_mix)?;
    writer.write_i32::<LittleEndian>(record.vs_solve_csr as i32)?;
    write_path(writer, &record.vs_thermo_file)?;
    writer.write_f64::<LittleEndian>(record.dyn_dw)?;
    writer.write_f64::<LittleEndian>(record.dyn_wmax)?;
    writer.write_f64::<LittleEndian>(record.dyn_xtarget)?;
    write_path(writer, &record.dyn_adr_file)?;
    Ok(())
}

fn read_record<R: Read>(reader: &mut R) -> Result<Configuration, SolverError> {
    let theory = parse_theory(&read_str(reader)?)?;
    let mode = parse_mode(&read_str(reader)?)?;
    let theta = reader.read_f64::<LittleEndian>()?;
    let rs = reader.read_f64::<LittleEndian>()?;
    let mu = reader.read_f64::<LittleEndian>()?;
    let mu_lo = reader.read_f64::<LittleEndian>()?;
    let mu_hi = reader.read_f64::<LittleEndian>()?;
    let dx = reader.read_f64::<LittleEndian>()?;
    let xmax = reader.read_f64::<LittleEndian>()?;
    let _nx = reader.read_i32::<LittleEndian>()?;
    let nl = reader.read_i32::<LittleEndian>()? as usize;
    let n_iter = reader.read_i32::<LittleEndian>()? as usize;
    let err_min_iter = reader.read_f64::<LittleEndian>()?;
    let a_mix = reader.read_f64::<LittleEndian>()?;
    let n_threads = reader.read_i32::<LittleEndian>()? as usize;
    let iet_mapping = parse_mapping(&read_str(reader)?)?;
    let stls_guess_file = read_path(reader)?;
    let qstls_guess_file = read_path(reader)?;
    let qstls_fixed_file = read_path(reader)?;
    let qstls_iet_fixed_file = read_path(reader)?;
    let qstls_iet_static = reader.read_i32::<LittleEndian>()? != 0;
    let vs_drs = reader.read_f64::<LittleEndian>()?;
    let vs_dt = reader.read_f64::<LittleEndian>()?;
    let vs_alpha = reader.read_f64::<LittleEndian>()?;
    let vs_err_min_iter = reader.read_f64::<LittleEndian>()?;
    let vs_a_mix = reader.read_f64::<LittleEndian>()?;
    let vs_solve_csr = reader.read_i32::<LittleEndian>()? != 0;
    let vs_thermo_file = read_path(reader)?;
    let dyn_dw = reader.read_f64::<LittleEndian>()?;
    let dyn_wmax = reader.read_f64::<LittleEndian>()?;
    let dyn_xtarget = reader.read_f64::<LittleEndian>()?;
    let dyn_adr_file = read_path(reader)?;

    Ok(Configuration {
        theory,
        mode,
        theta,
        rs,
        mu,
        mu_lo,
        mu_hi,
        dx,
        xmax,
        nl,
        n_iter,
        err_min_iter,
        a_mix,
        n_threads,
        iet_mapping,
        stls_guess_file,
        qstls_guess_file,
        qstls_fixed_file,
        qstls_iet_fixed_file,
        qstls_iet_static,
        vs_drs,
        vs_dt,
        vs_alpha,
        vs_err_min_iter,
        vs_a_mix,
        vs_solve_csr,
        vs_thermo_file,
        dyn_dw,
        dyn_wmax,
        dyn_xtarget,
        dyn_adr_file,
    })
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<(), SolverError> {
    writer.write_u32::<LittleEndian>(value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(reader: &mut R) -> Result<String, SolverError> {
    let length = reader.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| {
        SolverError::Cache(CacheError::Truncated {
            expected: length,
            read: 0,
        })
    })
}

fn write_path<W: Write>(writer: &mut W, value: &Option<PathBuf>) -> Result<(), SolverError> {
    match value {
        Some(path) => write_str(writer, &path.to_string_lossy()),
        None => write_str(writer, ""),
    }
}

fn read_path<R: Read>(reader: &mut R) -> Result<Option<PathBuf>, SolverError> {
    let value = read_str(reader)?;
    Ok((!value.is_empty()).then(|| PathBuf::from(value)))
}

fn parse_theory(label: &str) -> Result<Theory, SolverError> {
    [
        Theory::Rpa,
        Theory::Esa,
        Theory::Stls,
        Theory::StlsHnc,
        Theory::StlsIoi,
        Theory::StlsLct,
        Theory::VsStls,
        Theory::Qstls,
        Theory::QstlsHnc,
        Theory::QstlsIoi,
        Theory::QstlsLct,
        Theory::QVsStls,
    ]
    .into_iter()
    .find(|theory| theory.label() == label)
    .ok_or_else(|| SolverError::InputInvalid {
        field: "theory",
        message: format!("unknown theory `{label}` in restart data"),
    })
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Static => "static",
        Mode::Dynamic => "dynamic",
        Mode::Guess => "guess",
    }
}

fn parse_mode(label: &str) -> Result<Mode, SolverError> {
    match label {
        "static" => Ok(Mode::Static),
        "dynamic" => Ok(Mode::Dynamic),
        "guess" => Ok(Mode::Guess),
        other => Err(SolverError::InputInvalid {
            field: "mode",
            message: format!("unknown mode `{other}` in restart data"),
        }),
    }
}

fn mapping_label(mapping: IetMapping) -> &'static str {
    match mapping {
        IetMapping::Standard => "standard",
        IetMapping::Sqrt => "sqrt",
        IetMapping::Linear => "linear",
    }
}

fn parse_mapping(label: &str) -> Result<IetMapping, SolverError> {
    match label {
        "standard" => Ok(IetMapping::Standard),
        "sqrt" => Ok(IetMapping::Sqrt),
        "linear" => Ok(IetMapping::Linear),
        other => Err(SolverError::InputInvalid {
            field: "iet_mapping",
            message: format!("unknown mapping `{other}` in restart data"),
        }),
    }
}
