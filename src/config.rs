//! Configuration types for jusho-dl

use crate::error::{Error, Result};
use crate::types::SourceSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Number of prefectures covered by the position-reference batch
const PREFECTURE_COUNT: u32 = 47;

/// Entry expected inside the postal-code table archive
const POSTAL_TABLE_ENTRY: &str = "utf_ken_all.csv";

/// Entry expected inside the business-office table archive
const OFFICE_TABLE_ENTRY: &str = "JIGYOSYO.CSV";

/// Subdirectory of the output directory receiving the batch archives
const POSITION_SUBDIR: &str = "mlit_raw";

/// Dataset source configuration (upstream URLs and editions)
///
/// Groups the locations of the three dataset families and the published
/// editions of the position-reference data. Used as a nested sub-config
/// within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Postal-code table URL (default: the Japan Post UTF-8 ken_all archive)
    #[serde(default = "default_postal_table_url")]
    pub postal_table_url: String,

    /// Business-office table URL (default: the Japan Post jigyosyo archive)
    #[serde(default = "default_office_table_url")]
    pub office_table_url: String,

    /// Position-reference URL template
    ///
    /// Must contain the `{version}` and `{pref_code}` placeholders. The
    /// default points at the MLIT position-reference download service.
    #[serde(default = "default_position_url_template")]
    pub position_url_template: String,

    /// Street-block level edition of the position-reference data (default: "23.0a")
    ///
    /// Editions change when MLIT publishes new data; override this field
    /// rather than patching the library.
    #[serde(default = "default_gaiku_version")]
    pub gaiku_version: String,

    /// Town-area level edition of the position-reference data (default: "18.0b")
    #[serde(default = "default_oaza_version")]
    pub oaza_version: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            postal_table_url: default_postal_table_url(),
            office_table_url: default_office_table_url(),
            position_url_template: default_position_url_template(),
            gaiku_version: default_gaiku_version(),
            oaza_version: default_oaza_version(),
        }
    }
}

impl SourcesConfig {
    /// Spec for the postal-code table (always re-fetched, never resumed)
    pub fn postal_spec(&self, output_dir: &Path) -> SourceSpec {
        SourceSpec {
            label: "postal code table".to_string(),
            url: self.postal_table_url.clone(),
            expected_entry: Some(POSTAL_TABLE_ENTRY.to_string()),
            destination: output_dir.join("ken_all.zip"),
        }
    }

    /// Spec for the business-office table (always re-fetched, never resumed)
    pub fn office_spec(&self, output_dir: &Path) -> SourceSpec {
        SourceSpec {
            label: "business office table".to_string(),
            url: self.office_table_url.clone(),
            expected_entry: Some(OFFICE_TABLE_ENTRY.to_string()),
            destination: output_dir.join("jigyosyo.zip"),
        }
    }

    /// Specs for the position-reference batch, in canonical order
    ///
    /// One pair per prefecture, ascending prefecture code, street-block
    /// edition before town-area edition. Batch archives carry no expected
    /// entry; member names inside them vary by prefecture and edition.
    pub fn position_specs(&self, output_dir: &Path) -> Vec<SourceSpec> {
        let batch_dir = output_dir.join(POSITION_SUBDIR);
        let mut specs = Vec::with_capacity(PREFECTURE_COUNT as usize * 2);
        for pref in 1..=PREFECTURE_COUNT {
            let pref_code = format!("{pref:02}000");
            for (level, version) in [("gaiku", &self.gaiku_version), ("oaza", &self.oaza_version)] {
                specs.push(SourceSpec {
                    label: format!("prefecture {pref:02} ({level})"),
                    url: self
                        .position_url_template
                        .replace("{version}", version)
                        .replace("{pref_code}", &pref_code),
                    expected_entry: None,
                    destination: batch_dir.join(format!("{pref_code}-{version}.zip")),
                });
            }
        }
        specs
    }
}

/// Fetch behavior configuration (directories, timeouts, concurrency, skips)
///
/// Groups settings for how archives are fetched and stored. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Directory receiving the downloaded archives (default: "data")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Per-request timeout (default: 300 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Maximum concurrent batch fetches (default: 4)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Skip the position-reference batch
    ///
    /// Defaults to the `SKIP_MLIT` environment toggle ("true", any case),
    /// matching the convention of the surrounding data pipeline. The batch
    /// is large (around 1 GB across all prefectures).
    #[serde(default = "default_skip_position_data")]
    pub skip_position_data: bool,

    /// Skip the two Japan Post tables (default: false)
    #[serde(default)]
    pub skip_postal_data: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            fetch_timeout: default_fetch_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            skip_position_data: default_skip_position_data(),
            skip_postal_data: false,
        }
    }
}

/// How a finished run is judged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Always report success; failures are visible only in the report
    Permissive,

    /// Fail when a selected table fetch failed, or the batch attempted items
    /// but neither saved nor skipped a single one
    #[default]
    RequireProgress,

    /// Fail on any failed unit anywhere in the run
    Strict,
}

/// Main configuration for [`SourceDownloader`](crate::downloader::SourceDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`sources`](SourcesConfig) — upstream URLs and dataset editions
/// - [`fetch`](FetchConfig) — directories, timeouts, concurrency, skips
///
/// Sub-config fields are flattened so the serialized form stays flat
/// (no nesting in JSON/TOML).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream URLs and dataset editions
    #[serde(flatten)]
    pub sources: SourcesConfig,

    /// Fetch behavior settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// How the finished run is judged
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Config {
    /// Directory receiving the downloaded archives
    pub fn output_dir(&self) -> &PathBuf {
        &self.fetch.output_dir
    }

    /// Directory receiving the position-reference batch
    pub fn position_dir(&self) -> PathBuf {
        self.fetch.output_dir.join(POSITION_SUBDIR)
    }

    /// Validate the configuration before a run
    ///
    /// Checks that the table URLs parse, the position template carries both
    /// placeholders and expands to a valid URL, and the concurrency cap is
    /// usable. Called by `SourceDownloader::new`, so a misconfiguration
    /// surfaces at startup rather than mid-run.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("postal_table_url", &self.sources.postal_table_url),
            ("office_table_url", &self.sources.office_table_url),
        ] {
            if let Err(e) = Url::parse(value) {
                return Err(Error::Config {
                    message: format!("invalid URL '{value}': {e}"),
                    key: Some(key.to_string()),
                });
            }
        }

        for placeholder in ["{version}", "{pref_code}"] {
            if !self.sources.position_url_template.contains(placeholder) {
                return Err(Error::Config {
                    message: format!(
                        "position URL template is missing the {placeholder} placeholder"
                    ),
                    key: Some("position_url_template".to_string()),
                });
            }
        }

        // The template must still be a URL once the placeholders are expanded
        let probe = self
            .sources
            .position_url_template
            .replace("{version}", "0.0a")
            .replace("{pref_code}", "01000");
        if let Err(e) = Url::parse(&probe) {
            return Err(Error::Config {
                message: format!("invalid position URL template: {e}"),
                key: Some("position_url_template".to_string()),
            });
        }

        if self.fetch.max_concurrent_fetches == 0 {
            return Err(Error::Config {
                message: "max_concurrent_fetches must be at least 1".to_string(),
                key: Some("max_concurrent_fetches".to_string()),
            });
        }

        Ok(())
    }
}

// Default value functions
fn default_postal_table_url() -> String {
    "https://www.post.japanpost.jp/zipcode/dl/utf/zip/utf_ken_all.zip".to_string()
}

fn default_office_table_url() -> String {
    "https://www.post.japanpost.jp/zipcode/dl/jigyosyo/zip/jigyosyo.zip".to_string()
}

fn default_position_url_template() -> String {
    "https://nlftp.mlit.go.jp/isj/dls/data/{version}/{pref_code}-{version}.zip".to_string()
}

fn default_gaiku_version() -> String {
    "23.0a".to_string()
}

fn default_oaza_version() -> String {
    "18.0b".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_skip_position_data() -> bool {
    std::env::var("SKIP_MLIT").is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
