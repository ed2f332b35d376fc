//! Release catalog
//!
//! Answers two questions about the distribution: which series are active,
//! and which one is the current development series. The Launchpad
//! implementation queries the public web service anonymously; nothing is
//! cached between calls.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LangpackConfig;
use crate::error::CatalogError;

/// Symbolic name for the current development series.
pub const DEVEL_ALIAS: &str = "devel";

/// A concrete, lower-case series name such as `noble`.
///
/// Never holds the `devel` alias; build one with [`resolve_release`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Release(String);

impl Release {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Release {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether `requested` (in any case) is the development alias.
pub fn is_devel_alias(requested: &str) -> bool {
    requested.eq_ignore_ascii_case(DEVEL_ALIAS)
}

/// Lower-case `requested` and substitute `development` for the alias.
///
/// No other normalisation: a padded name stays padded and will not match
/// any active series.
pub fn resolve_release(requested: &str, development: &str) -> Release {
    let lowered = requested.to_lowercase();
    if lowered == DEVEL_ALIAS {
        Release(development.to_lowercase())
    } else {
        Release(lowered)
    }
}

/// Source of truth for which series may be built.
#[async_trait]
pub trait ReleaseCatalog: Send + Sync {
    /// Names of every series currently flagged active.
    async fn active_series(&self) -> Result<BTreeSet<String>, CatalogError>;

    /// Name of the current development series.
    async fn development_series(&self) -> Result<String, CatalogError>;

    /// Resolve a caller-supplied release, querying the development series
    /// only when the alias was requested.
    async fn resolve(&self, requested: &str) -> Result<Release, CatalogError> {
        if is_devel_alias(requested) {
            let development = self.development_series().await?;
            Ok(resolve_release(requested, &development))
        } else {
            Ok(resolve_release(requested, ""))
        }
    }
}

/// One entry of a Launchpad series collection.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesEntry {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesCollection {
    #[serde(default)]
    entries: Vec<SeriesEntry>,
    #[serde(default)]
    next_collection_link: Option<String>,
}

/// Named operations may answer with either a collection or a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeriesPayload {
    Collection(SeriesCollection),
    List(Vec<SeriesEntry>),
}

impl SeriesPayload {
    fn into_entries(self) -> Vec<SeriesEntry> {
        match self {
            SeriesPayload::Collection(c) => c.entries,
            SeriesPayload::List(l) => l,
        }
    }
}

/// Anonymous, read-only client for the Launchpad web service.
pub struct LaunchpadCatalog {
    api_root: String,
    distribution: String,
    http_client: reqwest::Client,
}

impl LaunchpadCatalog {
    pub fn new(api_root: &str, distribution: &str) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("langpacks/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Http {
                url: api_root.to_string(),
                reason: e.to_string(),
            })?;

        Ok(LaunchpadCatalog {
            api_root: api_root.trim_end_matches('/').to_string(),
            distribution: distribution.to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &LangpackConfig) -> Result<Self, CatalogError> {
        Self::new(&config.api_root, &config.distribution)
    }

    fn series_url(&self) -> String {
        format!("{}/{}/series", self.api_root, self.distribution)
    }

    fn development_url(&self) -> String {
        format!(
            "{}/{}?ws.op=getDevelopmentSeries",
            self.api_root, self.distribution
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        debug!(url, "querying release catalog");
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| CatalogError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| CatalogError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| CatalogError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ReleaseCatalog for LaunchpadCatalog {
    async fn active_series(&self) -> Result<BTreeSet<String>, CatalogError> {
        let mut entries = Vec::new();
        let mut next = Some(self.series_url());
        while let Some(url) = next {
            let page: SeriesCollection = self.get_json(&url).await?;
            entries.extend(page.entries);
            next = page.next_collection_link;
        }
        Ok(active_names(&entries))
    }

    async fn development_series(&self) -> Result<String, CatalogError> {
        let payload: SeriesPayload = self.get_json(&self.development_url()).await?;
        first_name(payload.into_entries(), &self.distribution)
    }
}

fn active_names(entries: &[SeriesEntry]) -> BTreeSet<String> {
    entries
        .iter()
        .filter(|s| s.active)
        .map(|s| s.name.to_lowercase())
        .collect()
}

fn first_name(entries: Vec<SeriesEntry>, distribution: &str) -> Result<String, CatalogError> {
    entries
        .into_iter()
        .next()
        .map(|s| s.name.to_lowercase())
        .ok_or_else(|| CatalogError::NoDevelopmentSeries {
            distribution: distribution.to_string(),
        })
}
