use lambda_models::{Function, LocalError};
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

pub const TASK_ROOT: &str = "/var/task";

/// Host directory mounted at [`TASK_ROOT`] for one invocation.
///
/// Archives are unpacked into a private temporary directory that is deleted
/// when the mount is dropped.
#[derive(Debug)]
pub struct CodeMount {
    host_path: PathBuf,
    extracted: Option<TempDir>,
}

impl CodeMount {
    pub async fn prepare(function: &Function) -> Result<Self, LocalError> {
        let code_uri = &function.code_uri;
        let mount_error = |reason: String| LocalError::CodeMount {
            function: function.logical_id.clone(),
            reason,
        };

        if is_archive(code_uri) {
            let archive = code_uri.clone();
            let extracted = tokio::task::spawn_blocking(move || unpack(&archive))
                .await
                .map_err(|e| mount_error(e.to_string()))??;
            info!(
                function = %function.logical_id,
                archive = %code_uri.display(),
                directory = %extracted.path().display(),
                "Extracted code archive"
            );
            return Ok(Self {
                host_path: extracted.path().to_path_buf(),
                extracted: Some(extracted),
            });
        }

        let host_path = tokio::fs::canonicalize(code_uri)
            .await
            .map_err(|e| mount_error(format!("{}: {e}", code_uri.display())))?;
        if !host_path.is_dir() {
            return Err(mount_error(format!(
                "{} is neither a directory nor a .zip/.jar archive",
                code_uri.display()
            )));
        }
        debug!(function = %function.logical_id, path = %host_path.display(), "Mounting code directory");
        Ok(Self {
            host_path,
            extracted: None,
        })
    }

    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn is_extracted(&self) -> bool {
        self.extracted.is_some()
    }

    /// `(src, dst, read_only)` bind for the container spec.
    pub fn bind(&self) -> (String, String, bool) {
        (
            self.host_path.to_string_lossy().into_owned(),
            TASK_ROOT.to_string(),
            true,
        )
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip") || ext.eq_ignore_ascii_case("jar"))
}

fn unpack(archive_path: &Path) -> Result<TempDir, LocalError> {
    let invalid = |e: &dyn std::fmt::Display| LocalError::InvalidZipFile {
        reason: format!("{}: {e}", archive_path.display()),
    };
    let file = std::fs::File::open(archive_path).map_err(|e| invalid(&e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| invalid(&e))?;
    let target = tempfile::Builder::new()
        .prefix("lambda-local-code-")
        .tempdir()
        .map_err(|e| invalid(&e))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| invalid(&e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(invalid(&format!("entry {} escapes the archive root", entry.name())));
        };
        let file_path = target.path().join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&file_path).map_err(|e| invalid(&e))?;
            continue;
        }
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| invalid(&e))?;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| invalid(&e))?;
        std::fs::write(&file_path, data).map_err(|e| invalid(&e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(mode))
                .map_err(|e| invalid(&e))?;
        }
    }

    Ok(target)
}
