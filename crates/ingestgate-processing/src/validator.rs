use ingestgate_core::AppError;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Bytes read from the start of a file for signature and structure checks.
pub const INSPECT_BYTES: usize = 1024;
/// Window used for the binary-content ratio.
const BINARY_SAMPLE_BYTES: usize = 512;
/// Share of control characters above which content is considered binary.
const BINARY_CONTROL_RATIO: f64 = 0.10;
/// Records examined for delimiter consistency, header included.
const STRUCTURE_SAMPLE_RECORDS: usize = 10;
/// Share of data records that must agree with the header's column count.
const STRUCTURE_CONSISTENCY_RATIO: f64 = 0.7;
const MAX_FILENAME_LENGTH: usize = 255;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Leading bytes of formats that must never pass as delimited text.
const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    (b"MZ", "Windows executable"),
    (b"\x7fELF", "ELF executable"),
    (b"PK\x03\x04", "ZIP archive"),
    (b"PK\x05\x06", "ZIP archive"),
    (b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", "OLE2 compound document"),
    (b"%PDF", "PDF document"),
    (b"\x1f\x8b", "GZIP archive"),
    (b"\x89PNG\r\n\x1a\n", "PNG image"),
    (b"\xff\xd8\xff", "JPEG image"),
    (b"GIF87a", "GIF image"),
    (b"GIF89a", "GIF image"),
    (b"7z\xbc\xaf\x27\x1c", "7-Zip archive"),
    (b"Rar!\x1a\x07", "RAR archive"),
];

/// Validation errors for declared metadata and file content
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Empty file")]
    EmptyFile,

    #[error("File appears to contain binary content")]
    BinaryContent,

    #[error("File is a {format} disguised as text")]
    DisguisedBinary { format: String },

    #[error("Malformed delimited structure: {0}")]
    MalformedStructure(String),

    #[error("Failed to read file: {0}")]
    Unreadable(String),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { max, .. } => AppError::PayloadTooLarge(format!(
                "File size exceeds maximum allowed size of {} MB",
                max / 1024 / 1024
            )),
            ValidationError::InvalidExtension { allowed, .. } => AppError::UnsupportedMediaType(
                format!("Invalid file extension. Allowed extensions: {}", allowed.join(", ")),
            ),
            ValidationError::InvalidContentType { content_type, .. } => {
                AppError::UnsupportedMediaType(format!("Invalid content type: {}", content_type))
            }
            ValidationError::InvalidFilename(msg) => AppError::InvalidInput(msg),
            ValidationError::EmptyFile => AppError::InvalidInput("File is empty".to_string()),
            e @ (ValidationError::BinaryContent
            | ValidationError::DisguisedBinary { .. }
            | ValidationError::MalformedStructure(_)) => AppError::InvalidFormat(e.to_string()),
            ValidationError::Unreadable(msg) => AppError::Internal(msg),
        }
    }
}

/// What structural inspection learned about a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularProfile {
    pub delimiter: u8,
    /// Columns in the header record
    pub columns: usize,
    /// Records inspected, header included
    pub sampled_records: usize,
}

/// Reduce a declared file name to a safe final path component.
///
/// Rejects traversal anywhere in the input; replaces every character outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidFilename(
            "Filename is empty".to_string(),
        ));
    }

    if trimmed
        .split(['/', '\\'])
        .any(|component| component == "..")
        || trimmed.contains('\0')
    {
        return Err(ValidationError::InvalidFilename(
            "Filename contains invalid path traversal".to_string(),
        ));
    }

    let filename_only = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    if filename_only.contains("..") {
        return Err(ValidationError::InvalidFilename(
            "Filename contains invalid path traversal".to_string(),
        ));
    }

    let sanitized: String = filename_only
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches(|c: char| c == '.' || c == '_').is_empty() {
        return Err(ValidationError::InvalidFilename(format!(
            "Filename '{}' has no usable characters",
            filename
        )));
    }

    Ok(sanitized)
}

/// Strip MIME parameters ("text/csv; charset=utf-8" -> "text/csv") and lowercase.
fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .map(|s| s.trim())
        .unwrap_or(content_type)
        .to_lowercase()
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Validator for delimited text uploads
///
/// The declared checks (`validate_*`) run before a session exists; the content
/// checks (`inspect_*`) run against the reassembled file.
#[derive(Debug, Clone)]
pub struct TabularValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
    allowed_content_types: Vec<String>,
}

impl TabularValidator {
    pub fn new(
        max_file_size: u64,
        allowed_extensions: Vec<String>,
        allowed_content_types: Vec<String>,
    ) -> Self {
        Self {
            max_file_size,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            allowed_content_types: allowed_content_types
                .into_iter()
                .map(|ct| normalize_mime_type(&ct))
                .collect(),
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Validate file size
    pub fn validate_file_size(&self, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    /// Validate file extension
    pub fn validate_extension(&self, filename: &str) -> Result<(), ValidationError> {
        let extension = extension_of(filename)
            .ok_or_else(|| ValidationError::InvalidFilename(format!("{} has no extension", filename)))?;

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.allowed_extensions.clone(),
            });
        }

        Ok(())
    }

    /// Validate content type; MIME parameters never affect the decision
    pub fn validate_content_type(&self, content_type: &str) -> Result<(), ValidationError> {
        let normalized = normalize_mime_type(content_type);

        if !self.allowed_content_types.contains(&normalized) {
            return Err(ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.allowed_content_types.clone(),
            });
        }

        Ok(())
    }

    /// Validate that Content-Type is plausible for the file extension
    pub fn validate_extension_content_type_match(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<(), ValidationError> {
        let extension = extension_of(filename)
            .ok_or_else(|| ValidationError::InvalidFilename(format!("{} has no extension", filename)))?;
        let normalized = normalize_mime_type(content_type);

        let expected: &[&str] = match extension.as_str() {
            "csv" => &["text/csv", "application/csv", "text/plain"],
            "tsv" => &["text/tab-separated-values", "text/plain"],
            "txt" => &["text/plain", "text/csv"],
            _ => {
                tracing::debug!(
                    extension = %extension,
                    content_type = %content_type,
                    "Unknown extension, skipping Content-Type/extension cross-validation"
                );
                return Ok(());
            }
        };

        if !expected.contains(&normalized.as_str()) {
            return Err(ValidationError::InvalidContentType {
                content_type: format!(
                    "{} (does not match extension '{}'. Expected one of: {})",
                    content_type,
                    extension,
                    expected.join(", ")
                ),
                allowed: self.allowed_content_types.clone(),
            });
        }

        Ok(())
    }

    /// Validate every declared property of an upload before it starts
    pub fn validate_declared(
        &self,
        filename: &str,
        content_type: &str,
        file_size: u64,
    ) -> Result<(), ValidationError> {
        self.validate_file_size(file_size)?;
        self.validate_extension(filename)?;
        self.validate_content_type(content_type)?;
        self.validate_extension_content_type_match(filename, content_type)?;
        Ok(())
    }

    /// Inspect the leading bytes of a file on disk
    pub async fn inspect_file(&self, path: &Path) -> Result<TabularProfile, ValidationError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?;

        let mut head = Vec::with_capacity(INSPECT_BYTES + 1);
        (&mut file)
            .take(INSPECT_BYTES as u64 + 1)
            .read_to_end(&mut head)
            .await
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?;

        let complete = head.len() <= INSPECT_BYTES;
        head.truncate(INSPECT_BYTES);
        self.inspect_bytes(&head, complete)
    }

    /// Inspect a file head.
    ///
    /// `complete` is true when `head` holds the whole file; otherwise its
    /// trailing partial record is ignored.
    pub fn inspect_bytes(
        &self,
        head: &[u8],
        complete: bool,
    ) -> Result<TabularProfile, ValidationError> {
        if head.is_empty() {
            return Err(ValidationError::EmptyFile);
        }

        check_signature(head)?;

        let body = head.strip_prefix(UTF8_BOM).unwrap_or(head);
        check_binary_ratio(body)?;
        check_structure(body, complete)
    }
}

fn check_signature(head: &[u8]) -> Result<(), ValidationError> {
    if let Some((_, format)) = MAGIC_NUMBERS.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Err(ValidationError::DisguisedBinary {
            format: format.to_string(),
        });
    }
    Ok(())
}

fn check_binary_ratio(body: &[u8]) -> Result<(), ValidationError> {
    let sample = &body[..body.len().min(BINARY_SAMPLE_BYTES)];
    if sample.is_empty() {
        return Err(ValidationError::EmptyFile);
    }

    let control = sample
        .iter()
        .filter(|b| (**b < 0x20 && !matches!(**b, b'\t' | b'\n' | b'\r')) || **b == 0x7f)
        .count();

    if control as f64 / sample.len() as f64 > BINARY_CONTROL_RATIO {
        return Err(ValidationError::BinaryContent);
    }
    Ok(())
}

/// Split into records on newlines outside double quotes.
/// Returns the records and whether the final one was newline-terminated.
fn split_records(body: &[u8]) -> (Vec<&[u8]>, bool) {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, &b) in body.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                let mut record = &body[start..i];
                if let Some(stripped) = record.strip_suffix(b"\r") {
                    record = stripped;
                }
                records.push(record);
                start = i + 1;
            }
            _ => {}
        }
    }

    let terminated = start == body.len();
    if !terminated {
        records.push(&body[start..]);
    }
    (records, terminated)
}

fn count_delimiter(record: &[u8], delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for &b in record {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

fn check_structure(body: &[u8], complete: bool) -> Result<TabularProfile, ValidationError> {
    let (mut records, terminated) = split_records(body);
    if !complete && !terminated {
        // truncated by the inspection window
        records.pop();
    }

    let sample: Vec<&[u8]> = records
        .into_iter()
        .filter(|r| !r.iter().all(|b| b.is_ascii_whitespace()))
        .take(STRUCTURE_SAMPLE_RECORDS)
        .collect();

    let header = sample.first().ok_or_else(|| {
        ValidationError::MalformedStructure("no complete record in the first 1 KiB".to_string())
    })?;

    // Ties resolve to the earlier delimiter in DELIMITERS.
    let (delimiter, header_count) = DELIMITERS
        .iter()
        .map(|d| (*d, count_delimiter(header, *d)))
        .fold((DELIMITERS[0], 0), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });

    if header_count == 0 {
        return Err(ValidationError::MalformedStructure(
            "no delimiter found in header".to_string(),
        ));
    }

    let rows = &sample[1..];
    if !rows.is_empty() {
        let consistent = rows
            .iter()
            .filter(|r| count_delimiter(r, delimiter).abs_diff(header_count) <= 1)
            .count();
        let ratio = consistent as f64 / rows.len() as f64;
        if ratio <= STRUCTURE_CONSISTENCY_RATIO {
            return Err(ValidationError::MalformedStructure(format!(
                "only {} of {} sampled rows match the header's {} columns",
                consistent,
                rows.len(),
                header_count + 1
            )));
        }
    }

    Ok(TabularProfile {
        delimiter,
        columns: header_count + 1,
        sampled_records: sample.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_validator() -> TabularValidator {
        TabularValidator::new(
            1024 * 1024, // 1MB
            vec!["csv".to_string()],
            vec![
                "text/csv".to_string(),
                "application/csv".to_string(),
                "text/plain".to_string(),
            ],
        )
    }

    #[test]
    fn test_validate_file_size() {
        let validator = test_validator();
        assert!(validator.validate_file_size(512 * 1024).is_ok());
        assert!(matches!(
            validator.validate_file_size(2 * 1024 * 1024),
            Err(ValidationError::FileTooLarge { .. })
        ));
        assert_eq!(validator.validate_file_size(0), Err(ValidationError::EmptyFile));
    }

    #[test]
    fn test_validate_extension() {
        let validator = test_validator();
        assert!(validator.validate_extension("data.csv").is_ok());
        assert!(validator.validate_extension("DATA.CSV").is_ok());
        assert!(matches!(
            validator.validate_extension("data.xlsx"),
            Err(ValidationError::InvalidExtension { .. })
        ));
        assert!(matches!(
            validator.validate_extension("data"),
            Err(ValidationError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_validate_content_type_strips_parameters() {
        let validator = test_validator();
        assert!(validator.validate_content_type("text/csv").is_ok());
        assert!(validator.validate_content_type("Text/CSV; charset=utf-8").is_ok());
        assert!(validator.validate_content_type("application/pdf").is_err());
    }

    #[test]
    fn test_validate_declared() {
        let validator = test_validator();
        assert!(validator.validate_declared("report.csv", "text/csv", 1000).is_ok());
        assert!(validator
            .validate_declared("report.csv", "application/octet-stream", 1000)
            .is_err());
        assert!(validator
            .validate_declared("report.exe", "text/csv", 1000)
            .is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("data.csv").unwrap(), "data.csv");
        assert_eq!(sanitize_filename("my data (1).csv").unwrap(), "my_data__1_.csv");
        assert_eq!(sanitize_filename("C:\\Users\\me\\data.csv").unwrap(), "data.csv");
        assert_eq!(sanitize_filename("nested/dir/data.csv").unwrap(), "data.csv");
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("foo/../bar.csv").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("   ").is_err());
    }

    #[test]
    fn test_error_mapping_to_app_error() {
        let err: AppError = ValidationError::BinaryContent.into();
        assert_eq!(err.error_type(), "InvalidFormat");

        let err: AppError = ValidationError::FileTooLarge { size: 2, max: 1 }.into();
        assert_eq!(err.error_type(), "PayloadTooLarge");

        let err: AppError = ValidationError::InvalidContentType {
            content_type: "image/png".to_string(),
            allowed: vec![],
        }
        .into();
        assert_eq!(err.error_type(), "UnsupportedMediaType");
    }

    #[test]
    fn test_inspect_well_formed_csv() {
        let validator = test_validator();
        let profile = validator
            .inspect_bytes(b"name,age,city\nalice,30,paris\nbob,25,\"new york, ny\"\n", true)
            .unwrap();
        assert_eq!(profile.delimiter, b',');
        assert_eq!(profile.columns, 3);
        assert_eq!(profile.sampled_records, 3);
    }

    #[test]
    fn test_inspect_detects_semicolon_and_tab() {
        let validator = test_validator();
        let profile = validator.inspect_bytes(b"a;b;c\n1;2;3\n", true).unwrap();
        assert_eq!(profile.delimiter, b';');

        let profile = validator.inspect_bytes(b"a\tb\n1\t2", true).unwrap();
        assert_eq!(profile.delimiter, b'\t');
        assert_eq!(profile.sampled_records, 2);
    }

    #[test]
    fn test_inspect_skips_bom() {
        let validator = test_validator();
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(b"a,b\n1,2\n");
        assert!(validator.inspect_bytes(&data, true).is_ok());
    }

    #[test]
    fn test_inspect_lone_header_is_valid() {
        let validator = test_validator();
        let profile = validator.inspect_bytes(b"id,name,email", true).unwrap();
        assert_eq!(profile.columns, 3);
        assert_eq!(profile.sampled_records, 1);
    }

    #[test]
    fn test_inspect_rejects_magic_numbers() {
        let validator = test_validator();
        for (data, format) in [
            (&b"MZ\x90\x00\x03"[..], "Windows executable"),
            (&b"PK\x03\x04\x14\x00"[..], "ZIP archive"),
            (&b"%PDF-1.7\n"[..], "PDF document"),
            (&b"\x7fELF\x02\x01"[..], "ELF executable"),
        ] {
            assert_eq!(
                validator.inspect_bytes(data, true),
                Err(ValidationError::DisguisedBinary {
                    format: format.to_string()
                })
            );
        }
    }

    #[test]
    fn test_inspect_rejects_binary_content() {
        let validator = test_validator();
        let mut data = b"a,b\n".to_vec();
        data.extend(std::iter::repeat(0x01u8).take(100));
        assert_eq!(
            validator.inspect_bytes(&data, true),
            Err(ValidationError::BinaryContent)
        );
    }

    #[test]
    fn test_inspect_rejects_missing_delimiter() {
        let validator = test_validator();
        assert!(matches!(
            validator.inspect_bytes(b"just some prose\nwith lines\n", true),
            Err(ValidationError::MalformedStructure(_))
        ));
    }

    #[test]
    fn test_inspect_rejects_inconsistent_rows() {
        let validator = test_validator();
        let data = b"a,b,c,d,e\n1\n2\n3\n4,5,6,7,8\n";
        assert!(matches!(
            validator.inspect_bytes(data, true),
            Err(ValidationError::MalformedStructure(_))
        ));
    }

    #[test]
    fn test_inspect_tolerates_off_by_one_rows() {
        let validator = test_validator();
        let data = b"a,b,c\n1,2\n1,2,3,4\n1,2,3\n";
        assert!(validator.inspect_bytes(data, true).is_ok());
    }

    #[test]
    fn test_inspect_ignores_truncated_last_record() {
        let validator = test_validator();
        // final record cut mid-way by the inspection window
        let data = b"a,b,c\n1,2,3\n4,5,6\nxxxxxxxxxxxxxxxx";
        assert!(validator.inspect_bytes(data, false).is_ok());
    }

    #[tokio::test]
    async fn test_inspect_file_reads_head_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.csv");
        let mut data = b"id,value\n".to_vec();
        for i in 0..5000 {
            data.extend_from_slice(format!("{},{}\n", i, i * 2).as_bytes());
        }
        tokio::fs::write(&path, &data).await.unwrap();

        let profile = test_validator().inspect_file(&path).await.unwrap();
        assert_eq!(profile.columns, 2);
        assert_eq!(profile.sampled_records, STRUCTURE_SAMPLE_RECORDS);
    }

    #[tokio::test]
    async fn test_inspect_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let result = test_validator().inspect_file(&dir.path().join("nope.csv")).await;
        assert!(matches!(result, Err(ValidationError::Unreadable(_))));
    }
}
