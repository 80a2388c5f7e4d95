//! Multipart parsing for chunk uploads

use axum::extract::Multipart;
use bytes::Bytes;
use ingestgate_core::AppError;
use uuid::Uuid;

/// Fields of one chunk upload request.
#[derive(Debug)]
pub struct ChunkForm {
    pub upload_id: Uuid,
    pub chunk_index: u32,
    pub checksum: String,
    pub data: Bytes,
}

/// Extract `uploadId`, `chunkIndex`, `checksum` and `chunk` from a multipart form.
/// Unknown fields are skipped; each known field may appear once.
pub async fn extract_chunk_form(mut multipart: Multipart) -> Result<ChunkForm, AppError> {
    let mut upload_id: Option<Uuid> = None;
    let mut chunk_index: Option<u32> = None;
    let mut checksum: Option<String> = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read multipart: {}", e)))?
    {
        let field_name = field.name().map(|s| s.to_string()).unwrap_or_default();

        match field_name.as_str() {
            "uploadId" => {
                let text = read_text(field, &field_name).await?;
                let id = Uuid::parse_str(text.trim()).map_err(|_| {
                    AppError::InvalidInput("uploadId must be a UUID".to_string())
                })?;
                set_once(&mut upload_id, id, &field_name)?;
            }
            "chunkIndex" => {
                let text = read_text(field, &field_name).await?;
                let index = text.trim().parse::<u32>().map_err(|_| {
                    AppError::InvalidInput(
                        "chunkIndex must be a non-negative integer".to_string(),
                    )
                })?;
                set_once(&mut chunk_index, index, &field_name)?;
            }
            "checksum" => {
                let text = read_text(field, &field_name).await?;
                set_once(&mut checksum, text.trim().to_string(), &field_name)?;
            }
            "chunk" => {
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read chunk data: {}", e))
                })?;
                set_once(&mut data, bytes, &field_name)?;
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(ChunkForm {
        upload_id: upload_id.ok_or_else(|| missing("uploadId"))?,
        chunk_index: chunk_index.ok_or_else(|| missing("chunkIndex"))?,
        checksum: checksum.ok_or_else(|| missing("checksum"))?,
        data: data.ok_or_else(|| missing("chunk"))?,
    })
}

async fn read_text(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read field '{}': {}", name, e)))
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<(), AppError> {
    if slot.is_some() {
        return Err(AppError::InvalidInput(format!(
            "Field '{}' must appear exactly once",
            name
        )));
    }
    *slot = Some(value);
    Ok(())
}

fn missing(name: &str) -> AppError {
    AppError::InvalidInput(format!("Missing multipart field '{}'", name))
}
