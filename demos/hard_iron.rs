//! Estimate a magnetometer hard-iron offset from logged samples.
//!
//! Usage: cargo run --example hard_iron <samples.csv>
//! The CSV needs a header with numeric `mx`, `my`, `mz` columns.

use fdw_node::HardIronCalibrator;

const MIN_SAMPLES: u32 = 20;
const COLUMNS_MSG: &str = "CSV must contain numeric mx,my,mz columns";

fn column(header: &csv::StringRecord, name: &str) -> Option<usize> {
    header.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Feed every `mx,my,mz` row into a calibrator. Extra columns are ignored.
fn accumulate<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<HardIronCalibrator, String> {
    let header = reader.headers().map_err(|e| e.to_string())?.clone();
    let (Some(ix), Some(iy), Some(iz)) = (column(&header, "mx"), column(&header, "my"), column(&header, "mz")) else {
        return Err(COLUMNS_MSG.to_string());
    };

    let mut cal = HardIronCalibrator::new();
    for (index, row) in reader.records().enumerate() {
        let record = row.map_err(|e| format!("Row {}: {}", index + 2, e))?;
        let value = |i: usize| record.get(i).and_then(|f| f.parse::<f32>().ok());
        match (value(ix), value(iy), value(iz)) {
            (Some(x), Some(y), Some(z)) => cal.update([x, y, z]),
            _ => return Err(format!("Row {}: {}", index + 2, COLUMNS_MSG)),
        }
    }
    Ok(cal)
}

fn main() {
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: hard_iron <samples.csv>");
        std::process::exit(2);
    };
    let mut reader = match csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(&path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path, e);
            std::process::exit(1);
        }
    };
    let cal = match accumulate(&mut reader) {
        Ok(cal) => cal,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if cal.sample_count() < MIN_SAMPLES {
        eprintln!(
            "Need at least {} samples for a meaningful estimate (got {})",
            MIN_SAMPLES,
            cal.sample_count()
        );
        std::process::exit(1);
    }

    let (Some(offset), Some(radius)) = (cal.offset(), cal.radius()) else {
        std::process::exit(1);
    };
    println!("Hard-iron offset estimate ({} samples)", cal.sample_count());
    println!("mx_offset={:.6}", offset[0]);
    println!("my_offset={:.6}", offset[1]);
    println!("mz_offset={:.6}", offset[2]);
    println!("half-span=({:.2}, {:.2}, {:.2})", radius[0], radius[1], radius[2]);
    println!("Apply offsets as corrected = measured - offset");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(text: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes())
    }

    #[test]
    fn test_quoted_header_and_values() {
        let mut text = String::from("\"t\",\"mx\",\"my\",\"mz\"\n");
        for i in 0..25 {
            let (mx, my, mz) = if i % 2 == 0 { (30.0, -2.0, 5.0) } else { (-6.0, -22.0, -2.0) };
            text.push_str(&format!("\"{}\",{},\"{}\", {}\n", i, mx, my, mz));
        }
        let cal = accumulate(&mut reader(&text)).unwrap();
        assert_eq!(cal.sample_count(), 25);
        assert_eq!(cal.offset(), Some([12.0, -12.0, 1.5]));
    }

    #[test]
    fn test_quoted_field_with_comma_stays_one_column() {
        let text = "note,mx,my,mz\n\"left, then right\",1,2,3\n";
        let cal = accumulate(&mut reader(text)).unwrap();
        assert_eq!(cal.offset(), Some([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_missing_column_rejected() {
        let err = accumulate(&mut reader("mx,my\n1,2\n")).unwrap_err();
        assert_eq!(err, COLUMNS_MSG);
        let err = accumulate(&mut reader("mx,my,mz\n1,x,3\n")).unwrap_err();
        assert!(err.starts_with("Row 2:"), "{}", err);
    }
}
