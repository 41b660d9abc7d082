// Multipart form extraction for transcription requests
//
// The audio part is streamed to its own upload folder while its SHA-256 is
// computed, so the body is never held in memory and the cache key is ready
// once the last chunk is written.

use actix_multipart::{Field, Multipart};
use futures::{StreamExt, TryStreamExt};
use log::{debug, error, info};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::{self, ServerConfig};
use crate::error::HandlerError;
use crate::file_utils::{generate_unique_upload_paths, UploadPaths};
use crate::models::{AudioInput, TranscriptionParams};

/// Form field carrying the audio content
const AUDIO_FIELD: &str = "audio";

/// Parse a form boolean, keeping `default` for anything unrecognized
fn parse_flag(value: &str, default: bool) -> bool {
    config::parse_flag(value).unwrap_or(default)
}

async fn read_text(field: &mut Field, name: &str) -> Result<String, HandlerError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk
            .map_err(|e| HandlerError::form_error(format!("Error reading field {}: {}", name, e)))?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

/// Stream the audio part to disk, returning its digest and size
async fn save_audio(
    field: &mut Field,
    paths: &UploadPaths,
    max_size: u64,
) -> Result<(String, u64), HandlerError> {
    let mut file = File::create(&paths.audio_file).await?;
    let mut hasher = Sha256::new();
    let mut total_size: u64 = 0;

    while let Some(chunk) = field.next().await {
        let data = chunk
            .map_err(|e| HandlerError::form_error(format!("Error processing file upload: {}", e)))?;
        total_size += data.len() as u64;
        if total_size > max_size {
            return Err(HandlerError::FileTooLarge(total_size, max_size));
        }
        hasher.update(&data);
        file.write_all(&data).await?;
    }
    file.flush().await?;

    Ok((hex::encode(hasher.finalize()), total_size))
}

/// Extract the uploaded audio and the recognition parameters
///
/// On error the upload folder, if one was created, is already removed.
pub async fn extract_upload(
    mut form: Multipart,
    config: &ServerConfig,
    default_engine_model: &str,
) -> Result<(AudioInput, TranscriptionParams), HandlerError> {
    let mut params = TranscriptionParams {
        engine_model: default_engine_model.to_string(),
        ..TranscriptionParams::default()
    };
    let mut audio: Option<AudioInput> = None;

    config.ensure_temp_dir().map_err(|e| {
        error!("Failed to create upload directory {}: {}", config.temp_dir, e);
        HandlerError::FileError(e)
    })?;

    let folder = |audio: &Option<AudioInput>| audio.as_ref().and_then(|a| a.folder.clone());

    loop {
        let next = form.try_next().await.map_err(|e| {
            HandlerError::form_error(format!("Malformed multipart body: {}", e))
                .with_cleanup(folder(&audio).as_ref())
        })?;
        let Some(mut field) = next else { break };

        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .unwrap_or_default()
            .to_string();

        match name.as_str() {
            AUDIO_FIELD if audio.is_none() => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(String::from);
                let paths = generate_unique_upload_paths(&config.temp_dir, filename.as_deref())
                    .map_err(|e| {
                        error!("Failed to create upload folder: {}", e);
                        HandlerError::FileError(e)
                    })?;

                let (digest, size_bytes) =
                    save_audio(&mut field, &paths, config.max_file_size_bytes)
                        .await
                        .map_err(|e| e.with_cleanup(Some(&paths.folder)))?;

                info!(
                    "Saved upload {} ({} bytes) to {}",
                    paths.id,
                    size_bytes,
                    paths.audio_file.display()
                );
                audio = Some(AudioInput {
                    folder: Some(paths.folder),
                    path: paths.audio_file,
                    digest,
                    size_bytes,
                });
            }
            "speaker_diarization" | "emotion_recognition" | "engine_model" => {
                let value = read_text(&mut field, &name)
                    .await
                    .map_err(|e| e.with_cleanup(folder(&audio).as_ref()))?;
                match name.as_str() {
                    "speaker_diarization" => {
                        params.speaker_diarization = parse_flag(&value, true)
                    }
                    "emotion_recognition" => {
                        params.emotion_recognition = parse_flag(&value, true)
                    }
                    _ if !value.is_empty() => params.engine_model = value,
                    _ => {}
                }
            }
            _ => {
                debug!("Skipping form field '{}'", name);
                while field.next().await.is_some() {}
            }
        }
    }

    let audio = audio.ok_or(HandlerError::NoAudioFile)?;
    Ok((audio, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("Yes", false));
        assert!(!parse_flag(" off ", true));
        assert!(parse_flag("maybe", true));
        assert!(!parse_flag("", false));
    }
}
