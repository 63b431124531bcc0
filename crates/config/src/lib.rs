//! Layered configuration.
//!
//! Values are merged, lowest priority first, from:
//!
//! 1. built-in defaults,
//! 2. a configuration file (`config.toml`, `config.yaml`/`.yml` or
//!    `config.json` in the platform configuration directory, or a single
//!    file given explicitly),
//! 3. `DARKROOM_` prefixed environment variables, with `__` separating
//!    nested keys (`DARKROOM_LIBRARY__SCHEME="{{ year }}/{{ camera }}"`).

pub mod error;

use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::error::{ErrorKind, Result};

pub const DEFAULT_SCHEME: &str = "YYYY/MM/DD";
pub const DEFAULT_CONCURRENCY: usize = 16;
const ENV_PREFIX: &str = "DARKROOM_";
const JOURNAL_FILE: &str = "journal.sqlite3";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "darkroom")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub journal: JournalConfig,
    /// Maximum number of files fingerprinted/inspected at once while planning.
    pub concurrency: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            library: LibraryConfig::default(),
            journal: JournalConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root of the organised library. Required to organise, may come from the
    /// command line instead.
    pub destination: Option<PathBuf>,
    /// Folder naming scheme for organised photos.
    pub scheme: String,
    /// Copy instead of move, leaving the source tree untouched.
    pub keep_originals: bool,
    /// Also organise files and directories whose names start with a dot.
    pub include_hidden: bool,
}
impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            destination: None,
            scheme: DEFAULT_SCHEME.to_string(),
            keep_originals: false,
            include_hidden: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub path: PathBuf,
}
impl Default for JournalConfig {
    fn default() -> Self {
        let path = match project_dirs() {
            Some(dirs) => dirs.data_dir().join(JOURNAL_FILE),
            // No home directory (containers, CI...), fall back to the working directory.
            None => PathBuf::from(JOURNAL_FILE),
        };
        Self { path }
    }
}

impl Config {
    /// Load configuration from defaults, the configuration file and the
    /// environment.
    ///
    /// With `explicit` set, only that file is read (and it must exist).
    /// Otherwise every supported file name in the platform configuration
    /// directory is merged if present.
    #[instrument]
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(explicit)?)
    }

    /// The merged, unextracted configuration sources.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match explicit {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                figment = Self::merge_file(figment, path)?;
            },
            None => {
                if let Some(dirs) = project_dirs() {
                    for name in ["config.toml", "config.yaml", "config.yml", "config.json"] {
                        let path = dirs.config_dir().join(name);
                        if path.is_file() {
                            tracing::debug!(path = %path.display(), "loading configuration file");
                            figment = Self::merge_file(figment, &path)?;
                        }
                    }
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// Extract and validate a configuration from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(|e| ErrorKind::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that don't need anything outside of this crate. Whether the
    /// scheme actually compiles is checked when the library is opened.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.library.scheme.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("library scheme must not be empty".to_string()));
        }
        if self.journal.path.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("journal path must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.library.scheme, "YYYY/MM/DD");
        assert_eq!(config.concurrency, 16);
        assert!(!config.library.keep_originals);
        assert!(config.journal.path.ends_with("journal.sqlite3"));
        config.validate().unwrap();
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "darkroom.toml",
                r#"
                    concurrency = 4

                    [library]
                    destination = "/photos/library"
                    scheme = "YYYY/MM"
                "#,
            )?;
            jail.set_env("DARKROOM_LIBRARY__KEEP_ORIGINALS", "true");
            jail.set_env("DARKROOM_CONCURRENCY", "2");
            let config = Config::load(Some(Path::new("darkroom.toml"))).unwrap();
            assert_eq!(config.library.destination, Some(PathBuf::from("/photos/library")));
            assert_eq!(config.library.scheme, "YYYY/MM");
            assert!(config.library.keep_originals);
            // Environment wins over the file.
            assert_eq!(config.concurrency, 2);
            Ok(())
        });
    }

    #[rstest]
    #[case("darkroom.yaml", "library:\n  include_hidden: true\n")]
    #[case("darkroom.json", r#"{"library": {"include_hidden": true}}"#)]
    fn test_other_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let config = Config::load(Some(Path::new(name))).unwrap();
            assert!(config.library.include_hidden);
            assert_eq!(config.library.scheme, DEFAULT_SCHEME);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.ini");
        std::fs::write(&path, "concurrency=1").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        Jail::expect_with(|jail| {
            jail.set_env("DARKROOM_CONCURRENCY", "0");
            let err = Config::from_figment(Config::figment(None).unwrap()).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }
}
