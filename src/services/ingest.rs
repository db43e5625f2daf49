use polars::prelude::*;
use std::io::Cursor;
use crate::error::AppError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CSV_CONTENT_TYPES: [&str; 3] = ["text/csv", "application/csv", "application/vnd.ms-excel"];

/// Rejects uploads whose name or MIME type says they are not CSV. An upload
/// carrying neither is let through and judged by the parser.
pub fn validate_upload_name(file_name: Option<&str>, content_type: Option<&str>) -> Result<(), AppError> {
    let name_ok = file_name.map(|name| name.to_lowercase().ends_with(".csv"));
    let type_ok = content_type.map(|mime| {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_lowercase();
        CSV_CONTENT_TYPES.contains(&essence.as_str())
    });

    match (name_ok, type_ok) {
        (Some(true), _) | (_, Some(true)) | (None, None) => Ok(()),
        _ => {
            tracing::warn!("Rejected upload {:?} with content type {:?}", file_name, content_type);
            Err(AppError::InvalidInput("Only CSV files are supported".to_string()))
        }
    }
}

/// Parses an uploaded byte stream into a frame. The first line is the header
/// and column types are inferred from every row.
pub fn load_csv(data: &[u8]) -> Result<DataFrame, AppError> {
    let start = std::time::Instant::now();
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);

    if data.iter().all(|b| b.is_ascii_whitespace()) {
        tracing::warn!("Rejected empty upload");
        return Err(AppError::Ingestion("No columns to parse from file".to_string()));
    }

    if let Err(e) = std::str::from_utf8(data) {
        tracing::warn!("Upload is not valid UTF-8: {}", e);
        return Err(AppError::Ingestion(format!(
            "invalid UTF-8 sequence at byte {}",
            e.valid_up_to()
        )));
    }

    check_row_widths(data)?;

    let df = CsvReader::new(Cursor::new(data))
        .has_header(true)
        .infer_schema(None)
        .finish()
        .map_err(|e| {
            tracing::warn!("Failed to parse CSV upload: {}", e);
            AppError::Ingestion(e.to_string())
        })?;

    if df.width() == 0 {
        return Err(AppError::Ingestion("No columns to parse from file".to_string()));
    }

    tracing::info!(
        "Loaded CSV with {} rows x {} columns in {:?}",
        df.height(),
        df.width(),
        start.elapsed()
    );
    Ok(df)
}

/// A record with more fields than the header has no column to land in.
/// Shorter records are allowed and padded with missing cells by the parser.
fn check_row_widths(data: &[u8]) -> Result<(), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let expected = reader
        .headers()
        .map_err(|e| AppError::Ingestion(e.to_string()))?
        .len();

    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(false) => return Ok(()),
            Ok(true) if record.len() > expected => {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                tracing::warn!("Upload has {} fields on line {}, header has {}", record.len(), line, expected);
                return Err(AppError::Ingestion(format!(
                    "Expected {} fields in line {}, saw {}",
                    expected,
                    line,
                    record.len()
                )));
            }
            Ok(true) => {}
            Err(e) => return Err(AppError::Ingestion(e.to_string())),
        }
    }
}
