//! Text result files: one `x value` pair per line, C-style `%.8e`
//! formatting, space separated, LF terminated.

use crate::error::SolverError;
use crate::outer_loop::ThermoTable;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Format a double as C's `%.8e`: eight fractional digits and a signed
/// two-digit (or wider) exponent.
pub(crate) fn format_scientific(value: f64) -> String {
    if !value.is_finite() {
        return format!("{value}");
    }
    let formatted = format!("{value:.8e}");
    let (mantissa, exponent) = formatted
        .split_once('e')
        .expect("the exponential format always carries an exponent");
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Write paired columns, one pair per line.
pub(crate) fn write_pairs<'a>(
    path: &Path,
    pairs: impl Iterator<Item = (f64, f64)> + 'a,
) -> Result<(), SolverError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (x, value) in pairs {
        writeln!(
            writer,
            "{} {}",
            format_scientific(x),
            format_scientific(value)
        )?;
    }
    Ok(())
}

/// Write the thermodynamic-integration table of the variational schemes:
/// one `theta rs rsu` triple per line, Θ-stencil major, with a fourth
/// `Q` column when the table carries the quantum sum-rule integral.
pub(crate) fn write_thermo(
    path: &Path,
    thetas: &[f64; 3],
    table: &ThermoTable,
) -> Result<(), SolverError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (t, &theta) in thetas.iter().enumerate() {
        for (k, &rs) in table.rsp.iter().enumerate() {
            write!(
                writer,
                "{} {} {}",
                format_scientific(theta),
                format_scientific(rs),
                format_scientific(table.integrand[[t, k]])
            )?;
            if let Some(adder) = &table.adder {
                write!(writer, " {}", format_scientific(adder[[t, k]]))?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}

/// Read a thermodynamic-integration table written by [`write_thermo`].
///
/// The coupling grid is reconstructed from the center Θ row; the file is
/// trusted beyond basic shape validation, as the reference solver trusts its
/// thermodynamic input. Every line must carry the same column count.
pub(crate) fn read_thermo(path: &Path) -> Result<ThermoTable, SolverError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows: Vec<(f64, f64, f64, Option<f64>)> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let parse = |field: Option<&str>| -> Result<f64, SolverError> {
            field
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| SolverError::InputInvalid {
                    field: "vs_thermo_file",
                    message: format!("malformed thermodynamic table line `{line}`"),
                })
        };
        let theta = parse(fields.next())?;
        let rs = parse(fields.next())?;
        let integrand = parse(fields.next())?;
        let adder = fields.next().map(|raw| parse(Some(raw))).transpose()?;
        rows.push((theta, rs, integrand, adder));
    }
    if rows.len() % 3 != 0 || rows.is_empty() {
        return Err(SolverError::InputInvalid {
            field: "vs_thermo_file",
            message: format!(
                "the thermodynamic table must hold three equal Θ blocks, found {} rows",
                rows.len()
            ),
        });
    }
    let with_adder = rows[0].3.is_some();
    if rows.iter().any(|row| row.3.is_some() != with_adder) {
        return Err(SolverError::InputInvalid {
            field: "vs_thermo_file",
            message: "the thermodynamic table mixes three- and four-column lines".to_string(),
        });
    }
    let stride = rows.len() / 3;
    let rsp: Vec<f64> = rows[stride..2 * stride].iter().map(|row| row.1).collect();
    let mut integrand = Array2::zeros((3, stride));
    let mut adder = with_adder.then(|| Array2::zeros((3, stride)));
    for (index, row) in rows.iter().enumerate() {
        integrand[[index / stride, index % stride]] = row.2;
        if let Some(adder) = adder.as_mut() {
            adder[[index / stride, index % stride]] =
                row.3.expect("the column count was validated above");
        }
    }
    Ok(ThermoTable {
        rsp,
        integrand,
        adder,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn formatting_matches_the_c_reference() {
        assert_eq!(format_scientific(1.05), "1.05000000e+00");
        assert_eq!(format_scientific(-0.000123456789), "-1.23456789e-04");
        assert_eq!(format_scientific(0.0), "0.00000000e+00");
        assert_eq!(format_scientific(5.8e-1), "5.80000000e-01");
        assert_eq!(format_scientific(3.0e12), "3.00000000e+12");
    }

    #[test]
    fn pair_files_are_line_oriented() {
        let path = std::env::temp_dir().join("jellium_pairs.dat");
        write_pairs(&path, [(0.05, 0.1), (0.15, 0.2)].into_iter()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "5.00000000e-02 1.00000000e-01\n1.50000000e-01 2.00000000e-01\n"
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn thermo_table_round_trips() {
        let table = ThermoTable {
            rsp: vec![0.7, 0.8, 0.9, 1.0, 1.1],
            integrand: Array2::from_shape_fn((3, 5), |(t, k)| -(t as f64 + 1.0) * (k as f64 + 0.5)),
            adder: None,
        };
        let path = std::env::temp_dir().join("jellium_thermo.dat");
        write_thermo(&path, &[0.9, 1.0, 1.1], &table).unwrap();
        let reread = read_thermo(&path).unwrap();
        assert_eq!(reread.rsp.len(), 5);
        assert!(reread.adder.is_none());
        for (a, b) in table.rsp.iter().zip(reread.rsp.iter()) {
            approx::assert_relative_eq!(*a, *b, max_relative = 1e-8);
        }
        for (a, b) in table.integrand.iter().zip(reread.integrand.iter()) {
            approx::assert_relative_eq!(*a, *b, max_relative = 1e-8);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn quantum_thermo_table_keeps_its_fourth_column() {
        let table = ThermoTable {
            rsp: vec![0.7, 0.8, 0.9, 1.0, 1.1],
            integrand: Array2::from_shape_fn((3, 5), |(t, k)| -(t as f64 + 1.0) * (k as f64 + 0.5)),
            adder: Some(Array2::from_shape_fn((3, 5), |(t, k)| {
                0.1 * (t as f64 - 1.0) + 0.01 * k as f64
            })),
        };
        let path = std::env::temp_dir().join("jellium_thermo_quantum.dat");
        write_thermo(&path, &[0.9, 1.0, 1.1], &table).unwrap();
        let reread = read_thermo(&path).unwrap();
        let reread_adder = reread.adder.expect("the fourth column survives the round trip");
        for (a, b) in table.adder.unwrap().iter().zip(reread_adder.iter()) {
            approx::assert_relative_eq!(*a, *b, max_relative = 1e-8);
        }
        std::fs::remove_file(&path).ok();
    }
}
