//! Service configuration
//!
//! Every path, URL and identity the orchestrator touches lives here so
//! tests (and other hosts) can substitute them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::User;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::command::ExecIdentity;
use crate::error::ConfigError;

/// Packages installed on the build host by the bootstrap.
pub const DEFAULT_PACKAGES: &[&str] = &[
    "build-essential",
    "libgettextpo-dev",
    "debhelper",
    "fakeroot",
    "python3-launchpadlib",
    "python3-apt",
    "dput",
    "git",
    "devscripts",
    "lintian",
];

pub const DEFAULT_SERVICE_USER: &str = "ubuntu";
pub const DEFAULT_CHECKOUT_NAME: &str = "langpack-o-matic";
pub const DEFAULT_REPO_URL: &str = "https://git.launchpad.net/langpack-o-matic";
pub const DEFAULT_API_ROOT: &str = "https://api.launchpad.net/devel";

/// Langpack builder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangpackConfig {
    /// Account that owns the checkout and the build trees
    pub service_user: String,
    /// Home directory of the service account
    pub home: PathBuf,
    /// Name of the langpack-o-matic checkout below `home`
    pub checkout_dir_name: String,
    pub repo_url: String,
    pub repo_branch: String,
    /// Host serving translation exports (`translations.<host>`)
    pub translations_host: String,
    /// Root of the distribution-tracking web service API
    pub api_root: String,
    pub distribution: String,
    pub packages: Vec<String>,
    /// Passed verbatim as `--treshold=<n>` to the import tool
    pub import_threshold: u32,
    /// Verify TLS certificates when downloading translation archives
    pub verify_tls: bool,
    /// Crontab installed for the service user
    pub crontab_file: PathBuf,
    /// Run service-account commands via `sudo -u` from an elevated caller
    pub elevate: bool,
    /// Kill external commands running longer than this (unset = wait forever)
    pub command_timeout_secs: Option<u64>,
}

/// Static defaults. The home directory is the conventional
/// `/home/<user>` without an account lookup; use [`LangpackConfig::for_user`]
/// or [`LangpackConfig::from_env`] to resolve it through the user database.
impl Default for LangpackConfig {
    fn default() -> Self {
        LangpackConfig {
            service_user: DEFAULT_SERVICE_USER.to_string(),
            home: conventional_home(DEFAULT_SERVICE_USER),
            checkout_dir_name: DEFAULT_CHECKOUT_NAME.to_string(),
            repo_url: DEFAULT_REPO_URL.to_string(),
            repo_branch: "master".to_string(),
            translations_host: "launchpad.net".to_string(),
            api_root: DEFAULT_API_ROOT.to_string(),
            distribution: "ubuntu".to_string(),
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            import_threshold: 10,
            verify_tls: false,
            crontab_file: PathBuf::from("src/crontab"),
            elevate: true,
            command_timeout_secs: None,
        }
    }
}

impl LangpackConfig {
    /// Defaults for `user`, with its home looked up in the user database.
    pub fn for_user(user: &str) -> Result<Self, ConfigError> {
        Self::default().with_service_user(user)
    }

    /// Defaults overridden by `LANGPACK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let user =
            std::env::var("LANGPACK_USER").unwrap_or_else(|_| DEFAULT_SERVICE_USER.to_string());
        let mut config = Self::for_user(&user)?;

        if let Ok(home) = std::env::var("LANGPACK_HOME") {
            config.home = PathBuf::from(home);
        }
        if let Ok(url) = std::env::var("LANGPACK_REPO_URL") {
            config.repo_url = url;
        }
        if let Ok(branch) = std::env::var("LANGPACK_REPO_BRANCH") {
            config.repo_branch = branch;
        }
        if let Ok(host) = std::env::var("LANGPACK_TRANSLATIONS_HOST") {
            config.translations_host = host;
        }
        if let Ok(root) = std::env::var("LANGPACK_API_ROOT") {
            config.api_root = root;
        }
        if let Ok(path) = std::env::var("LANGPACK_CRONTAB") {
            config.crontab_file = PathBuf::from(path);
        }
        if let Some(verify) = env_flag("LANGPACK_VERIFY_TLS") {
            config.verify_tls = verify;
        }
        if let Some(elevate) = env_flag("LANGPACK_ELEVATE") {
            config.elevate = elevate;
        }
        if let Ok(value) = std::env::var("LANGPACK_COMMAND_TIMEOUT") {
            config.command_timeout_secs = parse_timeout(&value);
        }

        Ok(config)
    }

    /// Point the service at a different account, re-deriving its home.
    pub fn with_service_user(mut self, user: &str) -> Result<Self, ConfigError> {
        self.home = home_of(user)?;
        self.service_user = user.to_string();
        Ok(self)
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn with_translations_host(mut self, host: &str) -> Self {
        self.translations_host = host.to_string();
        self
    }

    pub fn with_api_root(mut self, root: &str) -> Self {
        self.api_root = root.to_string();
        self
    }

    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    pub fn with_tls_verification(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = Some(secs);
        self
    }

    /// langpack-o-matic checkout location
    pub fn checkout(&self) -> PathBuf {
        self.home.join(&self.checkout_dir_name)
    }

    /// Per-release build tree
    pub fn workspace_dir(&self, release: &str) -> PathBuf {
        self.home.join(release)
    }

    pub fn archive_name(release: &str) -> String {
        format!("ubuntu-{release}-translations.tar.gz")
    }

    /// Where the translation export for `release` is downloaded to
    pub fn archive_path(&self, release: &str) -> PathBuf {
        self.checkout().join(Self::archive_name(release))
    }

    pub fn archive_url(&self, release: &str) -> String {
        format!(
            "https://translations.{}/{}/{}/+latest-full-language-pack",
            self.translations_host, self.distribution, release
        )
    }

    /// Identity used for everything the service account owns.
    pub fn service_identity(&self) -> ExecIdentity {
        if self.elevate {
            ExecIdentity::ElevatedThenDropped {
                user: self.service_user.clone(),
            }
        } else {
            ExecIdentity::Current
        }
    }

    /// Identity used for crontab management, which needs a login shell.
    pub fn login_identity(&self) -> ExecIdentity {
        if self.elevate {
            ExecIdentity::LoginShell {
                user: self.service_user.clone(),
            }
        } else {
            ExecIdentity::Current
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Seconds from `LANGPACK_COMMAND_TIMEOUT`; anything unparseable disables
/// the timeout with a warning.
fn parse_timeout(value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(e) => {
            warn!(value, "ignoring LANGPACK_COMMAND_TIMEOUT: {e}");
            None
        }
    }
}

fn conventional_home(user: &str) -> PathBuf {
    Path::new("/home").join(user)
}

/// Home directory of `user`, the `~user` expansion.
///
/// Asks the system user database (NSS, so LDAP/SSSD accounts resolve too).
/// Only an account that does not exist falls back to `/home/<user>`; a
/// failing lookup is an error.
pub fn home_of(user: &str) -> Result<PathBuf, ConfigError> {
    match User::from_name(user) {
        Ok(Some(account)) => Ok(account.dir),
        Ok(None) => {
            warn!(user, "no such account, assuming /home/{user}");
            Ok(conventional_home(user))
        }
        Err(errno) => Err(ConfigError::UserLookup {
            user: user.to_string(),
            reason: errno.desc().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = LangpackConfig::default().with_home("/home/ubuntu");
        assert_eq!(config.checkout(), PathBuf::from("/home/ubuntu/langpack-o-matic"));
        assert_eq!(config.workspace_dir("noble"), PathBuf::from("/home/ubuntu/noble"));
        assert_eq!(
            config.archive_path("noble"),
            PathBuf::from("/home/ubuntu/langpack-o-matic/ubuntu-noble-translations.tar.gz")
        );
        assert_eq!(config.import_threshold, 10);
        assert!(!config.verify_tls);
        assert_eq!(config.packages.len(), DEFAULT_PACKAGES.len());
    }

    #[test]
    fn test_archive_url() {
        let config = LangpackConfig::default();
        assert_eq!(
            config.archive_url("oracular"),
            "https://translations.launchpad.net/ubuntu/oracular/+latest-full-language-pack"
        );

        let staging = config.with_translations_host("staging.launchpad.net");
        assert!(staging
            .archive_url("noble")
            .starts_with("https://translations.staging.launchpad.net/ubuntu/noble/"));
    }

    #[test]
    fn test_identities_follow_elevation() {
        let config = LangpackConfig::default();
        assert_eq!(
            config.service_identity(),
            ExecIdentity::ElevatedThenDropped {
                user: "ubuntu".to_string()
            }
        );
        assert_eq!(
            config.login_identity(),
            ExecIdentity::LoginShell {
                user: "ubuntu".to_string()
            }
        );

        let direct = LangpackConfig::default().with_elevation(false);
        assert_eq!(direct.service_identity(), ExecIdentity::Current);
        assert_eq!(direct.login_identity(), ExecIdentity::Current);
    }

    #[test]
    fn test_home_of_existing_account_uses_user_database() {
        let me = User::from_uid(nix::unistd::getuid())
            .unwrap()
            .expect("current uid has an account");
        assert_eq!(home_of(&me.name).unwrap(), me.dir);
    }

    #[test]
    fn test_home_of_unknown_account_falls_back() {
        let home = home_of("langpack-no-such-account").unwrap();
        assert_eq!(home, PathBuf::from("/home/langpack-no-such-account"));
    }

    #[test]
    fn test_for_user_sets_user_and_home() {
        let config = LangpackConfig::for_user("langpack-no-such-account").unwrap();
        assert_eq!(config.service_user, "langpack-no-such-account");
        assert_eq!(
            config.checkout(),
            PathBuf::from("/home/langpack-no-such-account/langpack-o-matic")
        );
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("90"), Some(90));
        assert_eq!(parse_timeout(" 5 "), Some(5));
        assert_eq!(parse_timeout("ten minutes"), None);
        assert_eq!(parse_timeout("-1"), None);
    }

    #[test]
    fn test_command_timeout() {
        assert_eq!(LangpackConfig::default().command_timeout(), None);
        let config = LangpackConfig::default().with_command_timeout(30);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = LangpackConfig::default().with_home("/tmp/lp");
        let json = serde_json::to_string(&config).unwrap();
        let back: LangpackConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
