use std::path::{Path, PathBuf};

use parley_core::{
    ClientAction, CoreError, DecodedMedia, MAX_MEDIA_BYTES, encode_media, sanitize_file_name,
};

use crate::error::SessionError;

const MAX_NAME_COLLISIONS: u32 = 200;

/// Read a local file and turn it into a `sendMedia` action.
///
/// The size check runs on metadata first so an oversized file is never read
/// into memory.
pub async fn read_media_file(path: PathBuf) -> Result<ClientAction, SessionError> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || read_media_file_blocking(&task_path))
        .await
        .map_err(|err| SessionError::FileRead {
            path,
            source: std::io::Error::other(err.to_string()),
        })?
}

fn read_media_file_blocking(path: &Path) -> Result<ClientAction, SessionError> {
    let meta = std::fs::metadata(path).map_err(|source| SessionError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    if meta.is_dir() {
        return Err(SessionError::FileRead {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "is a directory"),
        });
    }

    let len = usize::try_from(meta.len()).unwrap_or(usize::MAX);
    if len > MAX_MEDIA_BYTES {
        return Err(SessionError::MediaRejected(CoreError::MediaTooLarge {
            size: len,
            max: MAX_MEDIA_BYTES,
        }));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(path).map_err(|source| SessionError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    encode_media(&file_name, &bytes).map_err(SessionError::MediaRejected)
}

/// Write a received attachment into `dir` on the blocking pool, never
/// overwriting an existing file.
pub async fn save_incoming_media(
    dir: PathBuf,
    media: DecodedMedia,
) -> Result<PathBuf, SessionError> {
    let task_dir = dir.clone();
    tokio::task::spawn_blocking(move || save_incoming_media_blocking(&task_dir, &media))
        .await
        .map_err(|err| SessionError::MediaSave {
            path: dir,
            source: std::io::Error::other(err.to_string()),
        })?
}

fn save_incoming_media_blocking(dir: &Path, media: &DecodedMedia) -> Result<PathBuf, SessionError> {
    std::fs::create_dir_all(dir).map_err(|source| SessionError::MediaSave {
        path: dir.to_path_buf(),
        source,
    })?;

    let dest = unique_destination(dir, &sanitize_file_name(&media.file_name));
    std::fs::write(&dest, &media.bytes).map_err(|source| SessionError::MediaSave {
        path: dest.clone(),
        source,
    })?;
    Ok(dest)
}

fn unique_destination(dir: &Path, safe_name: &str) -> PathBuf {
    let first = dir.join(safe_name);
    if !first.exists() {
        return first;
    }

    let safe_path = Path::new(safe_name);
    let stem = safe_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = safe_path.extension().and_then(|s| s.to_str());
    for i in 1..=MAX_NAME_COLLISIONS {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{stem} ({i}).{ext}")),
            None => dir.join(format!("{stem} ({i})")),
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(format!("{}_{safe_name}", crate::controller::now_unix_ms()))
}
