use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the application home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("no user home directory: set HOME (or USERPROFILE on Windows)")]
    HomeMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn user_home() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Resolve the application home directory.
///
/// - `config_home` given: `~` / `~/rest` expand against the user home; the
///   result must be absolute.
/// - `config_home` missing: `<user home>/<default_subdir>`.
///
/// If `create` is true, the directory is created if missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = resolve_with_home(config_home.as_deref(), user_home().as_deref(), default_subdir)?;
    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

fn resolve_with_home(
    config_home: Option<&str>,
    home: Option<&Path>,
    default_subdir: &str,
) -> Result<PathBuf, HomeDirError> {
    let Some(raw) = config_home else {
        let home = home.ok_or(HomeDirError::HomeMissing)?;
        return Ok(home.join(default_subdir));
    };

    let expanded = if raw == "~" {
        home.ok_or(HomeDirError::HomeMissing)?.to_path_buf()
    } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        home.ok_or(HomeDirError::HomeMissing)?.join(rest)
    } else {
        PathBuf::from(raw)
    };

    if !expanded.is_absolute() {
        return Err(HomeDirError::AbsoluteRequired(
            expanded.to_string_lossy().into(),
        ));
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tilde_expands_against_home() {
        let tmp = tempdir().unwrap();
        let result = resolve_with_home(Some("~/myapp"), Some(tmp.path()), ".reqkit").unwrap();
        assert_eq!(result, tmp.path().join("myapp"));

        let result = resolve_with_home(Some("~"), Some(tmp.path()), ".reqkit").unwrap();
        assert_eq!(result, tmp.path());
    }

    #[test]
    fn missing_config_uses_default_subdir() {
        let tmp = tempdir().unwrap();
        let result = resolve_with_home(None, Some(tmp.path()), ".reqkit").unwrap();
        assert!(result.ends_with(".reqkit"));
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = resolve_with_home(Some("relative/dir"), None, ".reqkit").unwrap_err();
        assert!(matches!(err, HomeDirError::AbsoluteRequired(_)));
    }

    #[test]
    fn tilde_without_home_fails() {
        let err = resolve_with_home(Some("~/x"), None, ".reqkit").unwrap_err();
        assert!(matches!(err, HomeDirError::HomeMissing));
    }

    #[test]
    fn absolute_path_is_created_on_request() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("nested").join("home");
        let result = resolve_home_dir(
            Some(target.to_string_lossy().to_string()),
            ".reqkit",
            true,
        )
        .unwrap();
        assert_eq!(result, target);
        assert!(target.is_dir());
    }
}
