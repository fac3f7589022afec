//! Bootstrap file resolution and loading.
//!
//! The bootstrap is an environment file (`KEY=VALUE` lines, `#` comments)
//! that every child applies to its own environment before decoding its task.
//! When no bootstrap file exists the child binary itself is passed instead,
//! which the child recognizes as "nothing to load".

use crate::error::{PoolError, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File name searched for in the default candidate directories.
pub const BOOTSTRAP_FILE_NAME: &str = "forkpool.env";

static DEFAULT_BOOTSTRAP: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Fixed candidate list, in search order.
fn candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(BOOTSTRAP_FILE_NAME)];
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        candidates.push(dir.join(BOOTSTRAP_FILE_NAME));
        if let Some(parent) = dir.parent() {
            candidates.push(parent.join(BOOTSTRAP_FILE_NAME));
        }
    }
    candidates
}

/// First existing default candidate. Searched once per process.
pub fn default_bootstrap() -> Option<&'static Path> {
    DEFAULT_BOOTSTRAP
        .get_or_init(|| candidates().into_iter().find(|path| path.is_file()))
        .as_deref()
}

/// Resolve the bootstrap path handed to children.
pub fn resolve(override_path: Option<&Path>, binary: &Path) -> PathBuf {
    override_path
        .or_else(|| default_bootstrap())
        .unwrap_or(binary)
        .to_path_buf()
}

/// Parse an environment file into key/value pairs.
pub fn parse_env_file(contents: &str) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=').ok_or_else(|| {
            PoolError::InvalidInput(format!(
                "Bootstrap line {} is not KEY=VALUE: {}",
                index + 1,
                line
            ))
        })?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(PoolError::InvalidInput(format!(
                "Bootstrap line {} has an invalid key: {}",
                index + 1,
                key
            )));
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        vars.push((key.to_string(), value.to_string()));
    }
    Ok(vars)
}

/// Apply a bootstrap file to the current process environment.
///
/// Must run before the process starts any thread.
pub fn load(path: &Path) -> Result<()> {
    if is_current_exe(path) {
        return Ok(());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        PoolError::InvalidInput(format!(
            "Could not read bootstrap {}: {}",
            path.display(),
            e
        ))
    })?;
    for (key, value) in parse_env_file(&contents)? {
        // Safety: the child entry is single-threaded while loading its bootstrap.
        unsafe {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}

fn is_current_exe(path: &Path) -> bool {
    let Ok(exe) = std::env::current_exe() else {
        return false;
    };
    match (path.canonicalize(), exe.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file() {
        let vars = parse_env_file(
            "# comment\n\nGREETING=hello\nexport QUOTED=\"a b\"\n  SPACED = x \n",
        )
        .unwrap();
        assert_eq!(
            vars,
            vec![
                ("GREETING".to_string(), "hello".to_string()),
                ("QUOTED".to_string(), "a b".to_string()),
                ("SPACED".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_env_file_rejects_garbage() {
        assert!(matches!(
            parse_env_file("not an assignment"),
            Err(PoolError::InvalidInput(_))
        ));
        assert!(parse_env_file("BAD KEY=1").is_err());
        assert!(parse_env_file("=1").is_err());
    }

    #[test]
    fn test_resolve_prefers_override() {
        let resolved = resolve(Some(Path::new("/etc/custom.env")), Path::new("/bin/app"));
        assert_eq!(resolved, PathBuf::from("/etc/custom.env"));
    }

    #[test]
    fn test_resolve_is_stable() {
        let first = resolve(None, Path::new("/bin/app"));
        let second = resolve(None, Path::new("/bin/app"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_current_exe_is_noop() {
        let exe = std::env::current_exe().unwrap();
        assert!(load(&exe).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load(Path::new("/nonexistent/forkpool.env")),
            Err(PoolError::InvalidInput(_))
        ));
    }
}
