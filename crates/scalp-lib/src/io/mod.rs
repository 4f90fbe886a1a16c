use crate::signal::ChannelMatrix;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::path::Path;

/// Read a channel-major CSV matrix: one row per channel, one column per
/// sample, no header. Mixed row lengths are rejected.
pub fn read_csv_matrix(path: &Path) -> Result<ChannelMatrix> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut channels = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {} of {}", row + 1, path.display()))?;
        let mut samples = Vec::with_capacity(record.len());
        for (col, field) in record.iter().enumerate() {
            if field.is_empty() {
                continue;
            }
            let value: f64 = field.parse().with_context(|| {
                format!(
                    "row {} column {} of {} is not a number: {}",
                    row + 1,
                    col + 1,
                    path.display(),
                    field
                )
            })?;
            samples.push(value);
        }
        if !samples.is_empty() {
            channels.push(samples);
        }
    }
    if channels.is_empty() {
        anyhow::bail!("no samples found in {}", path.display());
    }
    ChannelMatrix::new(channels)
        .with_context(|| format!("{} has unequal channel lengths", path.display()))
}

/// Write a channel-major CSV matrix in the layout `read_csv_matrix` accepts.
pub fn write_csv_matrix(path: &Path, matrix: &ChannelMatrix) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for channel in matrix.channels() {
        let fields: Vec<String> = channel.iter().map(|v| v.to_string()).collect();
        writer
            .write_record(&fields)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_channel_major_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "1.0,2.0,3.0").unwrap();
        writeln!(file, "-1.5,0.0,4.25").unwrap();
        drop(file);
        let matrix = read_csv_matrix(&path).unwrap();
        assert_eq!(matrix.channel_count(), 2);
        assert_eq!(matrix.sample_count(), 3);
        assert_eq!(matrix.channel(1).unwrap()[2], 4.25);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "1,2,3\n4,5\n").unwrap();
        let err = read_csv_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("unequal channel lengths"));
    }

    #[test]
    fn junk_cell_names_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.csv");
        std::fs::write(&path, "1,2\n3,oops\n").unwrap();
        let err = read_csv_matrix(&path).unwrap_err();
        assert!(format!("{err:#}").contains("row 2 column 2"));
    }

    #[test]
    fn written_matrix_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let matrix = ChannelMatrix::new(vec![vec![0.5, 1.5], vec![2.5, 3.5]]).unwrap();
        write_csv_matrix(&path, &matrix).unwrap();
        assert_eq!(read_csv_matrix(&path).unwrap(), matrix);
    }
}
