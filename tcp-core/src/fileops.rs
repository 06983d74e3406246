//! Stateless file operations (C4): list, info, create-dir, delete, rename,
//! whole-file upload/download.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::SystemTime;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::CoreError;
use crate::path;
use crate::response::{FileInfo, FileKind};

/// Payloads above this size, passed through [`upload_file`]/[`download_file`],
/// draw a warning advising the chunked session path instead.
const CHUNKED_PATH_ADVISORY_THRESHOLD: u64 = 2 * 1024 * 1024;

pub fn list_files(root: &Path, virtual_path: &str) -> Result<Vec<FileInfo>, CoreError> {
    let dir = path::resolve(root, virtual_path)?;
    if !dir.is_dir() {
        return Err(CoreError::WrongType(format!(
            "{virtual_path} is not a directory"
        )));
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        entries.push(build_file_info(root, &entry.path())?);
    }
    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(entries)
}

pub fn file_info(root: &Path, virtual_path: &str) -> Result<FileInfo, CoreError> {
    let target = path::resolve(root, virtual_path)?;
    if !target.is_file() {
        return Err(CoreError::WrongType(format!(
            "{virtual_path} is not a regular file"
        )));
    }
    build_file_info(root, &target)
}

pub fn create_dir(root: &Path, virtual_path: &str, name: &str) -> Result<(), CoreError> {
    let parent = path::resolve(root, virtual_path)?;
    let target = parent.join(name);
    if target.exists() {
        return Err(CoreError::AlreadyExists(format!("{virtual_path}/{name}")));
    }
    fs::create_dir_all(&target)?;
    Ok(())
}

pub fn delete_file(root: &Path, virtual_path: &str) -> Result<&'static str, CoreError> {
    let target = path::resolve(root, virtual_path)?;
    if target.is_dir() {
        fs::remove_dir_all(&target)?;
        Ok("directory")
    } else if target.is_file() {
        fs::remove_file(&target)?;
        Ok("file")
    } else {
        Err(CoreError::NotFound(virtual_path.to_string()))
    }
}

pub fn rename_file(
    root: &Path,
    virtual_path: &str,
    new_name: Option<&str>,
    new_path: Option<&str>,
) -> Result<(), CoreError> {
    let source = path::resolve(root, virtual_path)?;
    if !source.exists() {
        return Err(CoreError::NotFound(virtual_path.to_string()));
    }

    let target = if let Some(new_path) = new_path {
        path::resolve_new(root, new_path)?
    } else {
        let name = new_name.ok_or(CoreError::MissingParameter("newName"))?;
        let parent = source
            .parent()
            .ok_or_else(|| CoreError::Internal("path has no parent".into()))?;
        parent.join(name)
    };

    if target.exists() {
        return Err(CoreError::AlreadyExists(
            target.display().to_string(),
        ));
    }

    fs::rename(&source, &target)?;
    Ok(())
}

/// Returns `true` when the caller should attach the chunked-path advisory.
pub fn upload_file(
    root: &Path,
    virtual_path: &str,
    filename: &str,
    data: &[u8],
) -> Result<bool, CoreError> {
    let parent = path::resolve(root, virtual_path)?;
    fs::create_dir_all(&parent)?;
    let target = parent.join(filename);
    fs::write(&target, data)?;
    Ok(data.len() as u64 > CHUNKED_PATH_ADVISORY_THRESHOLD)
}

/// Returns `(bytes, advisory)`.
pub fn download_file(root: &Path, virtual_path: &str) -> Result<(Vec<u8>, bool), CoreError> {
    let target = path::resolve(root, virtual_path)?;
    if !target.is_file() {
        return Err(CoreError::WrongType(format!(
            "{virtual_path} is not a regular file"
        )));
    }
    let data = fs::read(&target)?;
    let advisory = data.len() as u64 > CHUNKED_PATH_ADVISORY_THRESHOLD;
    Ok((data, advisory))
}

fn build_file_info(root: &Path, absolute: &Path) -> Result<FileInfo, CoreError> {
    let metadata = fs::metadata(absolute)?;
    let name = absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let virtual_path = to_virtual_path(root, absolute);
    let file_type = if metadata.is_dir() {
        FileKind::Directory
    } else {
        FileKind::File
    };
    let size = if metadata.is_dir() { 0 } else { metadata.len() };
    let last_modified = format_modified(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));
    let mode = metadata.permissions().mode();
    let permissions = format!("{:03o}", mode & 0o777);
    let readonly = mode & 0o200 == 0;
    let mime_type = if metadata.is_dir() {
        None
    } else {
        Some(guess_mime_type(&name))
    };

    Ok(FileInfo {
        name,
        path: virtual_path,
        file_type,
        size,
        last_modified,
        permissions,
        readonly,
        mime_type,
    })
}

fn to_virtual_path(root: &Path, absolute: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let relative = absolute.strip_prefix(&root).unwrap_or(absolute);
    let mut virtual_path = String::from("/");
    virtual_path.push_str(&relative.to_string_lossy());
    virtual_path
}

fn format_modified(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn guess_mime_type(name: &str) -> String {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "bin" => "application/octet-stream",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tempdir() -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("tcp-core-fileops-{}-{n}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn list_sorts_case_insensitively() {
        let root = tempdir();
        fs::write(root.join("Banana.txt"), b"a").unwrap();
        fs::write(root.join("apple.txt"), b"b").unwrap();
        let files = list_files(&root, "/").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["apple.txt", "Banana.txt"]);
    }

    #[test]
    fn create_dir_refuses_existing() {
        let root = tempdir();
        create_dir(&root, "/", "docs").unwrap();
        let err = create_dir(&root, "/", "docs").unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn delete_reports_kind() {
        let root = tempdir();
        fs::write(root.join("a.txt"), b"x").unwrap();
        let kind = delete_file(&root, "/a.txt").unwrap();
        assert_eq!(kind, "file");
    }

    #[test]
    fn upload_then_download_roundtrips() {
        let root = tempdir();
        upload_file(&root, "/", "data.bin", b"payload").unwrap();
        let (data, advisory) = download_file(&root, "/data.bin").unwrap();
        assert_eq!(data, b"payload");
        assert!(!advisory);
    }

    #[test]
    fn rename_refuses_missing_source() {
        let root = tempdir();
        let err = rename_file(&root, "/missing.txt", Some("new.txt"), None).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
