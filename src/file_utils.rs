// File utilities for the Transcription API
//
// Every upload gets its own folder under the temp directory. The folder is
// removed once its job reaches a terminal state, or right away when the
// request is answered from the cache or rejected.

use log::{debug, error};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension used when the uploaded file name carries none
const DEFAULT_EXTENSION: &str = "audio";

/// Locations reserved for one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPaths {
    /// Folder owning every file of the upload
    pub folder: PathBuf,
    /// Path the audio is written to
    pub audio_file: PathBuf,
    pub id: String,
}

/// Create `<base_dir>/<uuid>/` and pick the audio file name inside it
///
/// # Errors
///
/// Returns an IO error if directory creation fails
pub fn generate_unique_upload_paths(
    base_dir: &str,
    original_filename: Option<&str>,
) -> io::Result<UploadPaths> {
    let id = Uuid::new_v4().to_string();
    let folder = Path::new(base_dir).join(&id);
    fs::create_dir_all(&folder)?;

    let extension = original_filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(sanitize_extension)
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let audio_file = folder.join(format!("upload_{}.{}", id, extension));

    Ok(UploadPaths {
        folder,
        audio_file,
        id,
    })
}

/// Keep only ASCII alphanumerics so a client cannot steer the path
fn sanitize_extension(ext: &str) -> String {
    ext.chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Clean up a folder and its contents
///
/// This function logs errors but doesn't return them to the caller
pub fn cleanup_folder(folder_path: &Path) {
    match fs::remove_dir_all(folder_path) {
        Ok(()) => debug!("Cleaned up folder: {}", folder_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to clean up folder {}: {}", folder_path.display(), e),
    }
}
