use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray, ListArray,
    UInt32Array,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{infer_frequencies, RecordedSpectrum, SpectrumRecording};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load recorded spectra from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – `magnitudes` list column, optional `frequencies` list,
///   `timestamp` integer and `tag` string columns
/// * `.json`    – an array of objects with `magnitudes` and optional
///   `frequencies`, `timestamp` and `tag` fields
/// * `.csv`     – `magnitudes` (and optionally `frequencies`) columns holding
///   semicolon-separated floats, plus optional `timestamp` and `tag`
///
/// When `frequencies` is absent, 21- and 257-bin spectra get the device's
/// frequency axis; any other length is an error.
pub fn load_file(path: &Path) -> Result<SpectrumRecording> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let recording = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!("loaded {} spectra from {}", recording.len(), path.display());
    Ok(recording)
}

/// Pair magnitudes with an explicit or inferred frequency axis.
fn build_spectrum(
    row: usize,
    timestamp: Option<u32>,
    frequencies: Option<Vec<f32>>,
    magnitudes: Vec<f32>,
    tag: Option<String>,
) -> Result<RecordedSpectrum> {
    let frequencies = match frequencies {
        Some(f) => f,
        None => infer_frequencies(magnitudes.len()).with_context(|| {
            format!(
                "Row {row}: no 'frequencies' and {} bins is not a device spectrum size",
                magnitudes.len()
            )
        })?,
    };
    if frequencies.len() != magnitudes.len() {
        bail!(
            "Row {row}: frequencies has {} values but magnitudes has {}",
            frequencies.len(),
            magnitudes.len()
        );
    }
    Ok(RecordedSpectrum {
        timestamp,
        frequencies,
        magnitudes,
        tag,
    })
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<SpectrumRecording> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut spectra = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let magnitudes = json_array_to_f32(obj.get("magnitudes"), i, "magnitudes")?;
        let frequencies = match obj.get("frequencies") {
            None | Some(JsonValue::Null) => None,
            some => Some(json_array_to_f32(some, i, "frequencies")?),
        };
        let timestamp = match obj.get("timestamp") {
            None | Some(JsonValue::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|t| u32::try_from(t).ok())
                    .with_context(|| format!("Row {i}: 'timestamp' is not a u32"))?,
            ),
        };
        let tag = match obj.get("tag") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            _ => None,
        };

        spectra.push(build_spectrum(i, timestamp, frequencies, magnitudes, tag)?);
    }

    Ok(SpectrumRecording::from_spectra(spectra))
}

fn json_array_to_f32(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f32>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .map(|f| f as f32)
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

fn load_csv(path: &Path) -> Result<SpectrumRecording> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let mag_idx = column("magnitudes").context("CSV missing 'magnitudes' column")?;
    let freq_idx = column("frequencies");
    let ts_idx = column("timestamp");
    let tag_idx = column("tag");

    let mut spectra = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let cell = |idx: Option<usize>| {
            let value = record.get(idx?)?;
            (!value.trim().is_empty()).then_some(value)
        };

        let magnitudes = record.get(mag_idx).unwrap_or("");
        let magnitudes = parse_semicolon_floats(magnitudes, row_no, "magnitudes")?;
        let frequencies = cell(freq_idx)
            .map(|s| parse_semicolon_floats(s, row_no, "frequencies"))
            .transpose()?;
        let timestamp = cell(ts_idx)
            .map(|s| {
                s.trim()
                    .parse::<u32>()
                    .with_context(|| format!("Row {row_no}: '{s}' is not a timestamp"))
            })
            .transpose()?;
        let tag = cell(tag_idx).map(str::to_string);

        spectra.push(build_spectrum(row_no, timestamp, frequencies, magnitudes, tag)?);
    }

    Ok(SpectrumRecording::from_spectra(spectra))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f32>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f32>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

fn load_parquet(path: &Path) -> Result<SpectrumRecording> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .build()
        .context("building parquet reader")?;

    let mut spectra = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let mag_idx = schema
            .index_of("magnitudes")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'magnitudes' column"))?;
        let mag_col = batch.column(mag_idx);
        let optional = |name: &str| schema.index_of(name).ok().map(|i| batch.column(i));
        let freq_col = optional("frequencies");
        let ts_col = optional("timestamp");
        let tag_col = optional("tag");

        for row in 0..batch.num_rows() {
            let index = spectra.len();
            let magnitudes = extract_f32_list(mag_col, row)
                .with_context(|| format!("Row {index}: failed to read 'magnitudes'"))?;
            let frequencies = match freq_col {
                Some(col) if !col.is_null(row) => Some(
                    extract_f32_list(col, row)
                        .with_context(|| format!("Row {index}: failed to read 'frequencies'"))?,
                ),
                _ => None,
            };
            let timestamp = match ts_col {
                Some(col) => extract_timestamp(col, row)
                    .with_context(|| format!("Row {index}: failed to read 'timestamp'"))?,
                None => None,
            };
            let tag = tag_col.and_then(|col| extract_string(col, row));

            spectra.push(build_spectrum(index, timestamp, frequencies, magnitudes, tag)?);
        }
    }

    Ok(SpectrumRecording::from_spectra(spectra))
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f32>` from a List or LargeList column at the given row.
fn extract_f32_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f32>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // Device spectra are f32, but pandas writes f64 by default.
    if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    } else if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        let values = f64_arr.iter().map(|v| v.unwrap_or(f64::NAN));
        Ok(values.map(|v| v as f32).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float32 or Float64",
            values_array.data_type()
        )
    }
}

fn extract_timestamp(col: &Arc<dyn Array>, row: usize) -> Result<Option<u32>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value: i64 = match col.data_type() {
        DataType::UInt32 => col
            .as_any()
            .downcast_ref::<UInt32Array>()
            .context("expected UInt32Array")?
            .value(row)
            .into(),
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("expected Int32Array")?
            .value(row)
            .into(),
        DataType::Int64 => col
            .as_any()
            .downcast_ref::<Int64Array>()
            .context("expected Int64Array")?
            .value(row),
        other => bail!("Expected integer timestamp column, got {other:?}"),
    };
    u32::try_from(value)
        .map(Some)
        .with_context(|| format!("timestamp {value} out of range"))
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Utf8 => Some(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Some(col.as_string::<i64>().value(row).to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use arrow::array::{ArrayRef, Float32Builder, ListBuilder, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    fn temp_with(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut builder = tempfile::Builder::new();
        let mut file = builder.suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn json_with_and_without_frequencies() {
        let mags21 = vec!["0.1"; 21].join(",");
        let file = temp_with(
            ".json",
            &format!(
                r#"[
                    {{ "timestamp": 5, "frequencies": [10, 20, 30],
                       "magnitudes": [1, 2, 3], "tag": "bench" }},
                    {{ "magnitudes": [{mags21}] }}
                ]"#
            ),
        );
        let recording = load_file(file.path()).unwrap();
        assert_eq!(recording.len(), 2);
        assert_eq!(recording.spectra[0].timestamp, Some(5));
        assert_eq!(recording.spectra[0].frequencies, vec![10.0, 20.0, 30.0]);
        assert_eq!(recording.spectra[0].tag.as_deref(), Some("bench"));
        assert_eq!(recording.spectra[1].frequencies[20], 500.0);
        assert_eq!(recording.spectra[1].timestamp, None);
    }

    #[test]
    fn json_length_mismatch_is_an_error() {
        let json = r#"[{ "frequencies": [1, 2], "magnitudes": [1] }]"#;
        let file = temp_with(".json", json);
        let err = load_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("frequencies has 2 values"));
    }

    #[test]
    fn csv_semicolon_cells() {
        let file = temp_with(
            ".csv",
            "timestamp,frequencies,magnitudes,tag\n\
             7,5;10;15,0.1;0.2;0.3,quarry\n\
             ,,1;2;3,\n",
        );
        let err = load_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("not a device spectrum size"));

        let file = temp_with(
            ".csv",
            "timestamp,frequencies,magnitudes,tag\n7,5;10;15,0.1;0.2;0.3,quarry\n",
        );
        let recording = load_file(file.path()).unwrap();
        assert_eq!(recording.spectra[0].magnitudes, vec![0.1, 0.2, 0.3]);
        assert_eq!(recording.spectra[0].tag.as_deref(), Some("quarry"));
    }

    #[test]
    fn unsupported_extension() {
        let file = temp_with(".pkl", "");
        assert!(load_file(file.path()).is_err());
    }

    #[test]
    fn parquet_list_columns() {
        let mut mags = ListBuilder::new(Float32Builder::new());
        for row in 0..3 {
            for bin in 0..257 {
                let value = (row * 257 + bin) as f32 * 1e-4;
                mags.values().append_value(value);
            }
            mags.append(true);
        }
        let mags = mags.finish();
        let tags = StringArray::from(vec![Some("a"), None, Some("c")]);
        let stamps = Int64Array::from(vec![0, 256, 512]);

        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("magnitudes", DataType::List(item), false),
            Field::new("tag", DataType::Utf8, true),
            Field::new("timestamp", DataType::Int64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![Arc::new(mags), Arc::new(tags), Arc::new(stamps)];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

        let file = temp_with(".parquet", "");
        let mut writer = ArrowWriter::try_new(file.reopen().unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let recording = load_file(file.path()).unwrap();
        assert_eq!(recording.len(), 3);
        assert_eq!(recording.spectra[1].timestamp, Some(256));
        assert_eq!(recording.spectra[1].tag, None);
        assert_eq!(recording.spectra[2].tag.as_deref(), Some("c"));
        assert_eq!(recording.spectra[0].frequencies.len(), 257);
        assert!((recording.spectra[2].magnitudes[0] - 514.0 * 1e-4).abs() < 1e-6);
    }
}
