use crate::core::QueryOptions;
use crate::domain::model::SourceKind;
use crate::utils::error::{Result, ReviewError};
use crate::utils::validation::{validate_url, Validate};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "review-dispatch")]
#[command(about = "Fetch business reviews through the deduplicating parser queue")]
pub struct CliConfig {
    /// Review source: yandex, 2gis or doctors
    #[arg(long)]
    pub kind: SourceKind,

    /// Listing URL, may be repeated
    #[arg(long = "url", required = true)]
    pub urls: Vec<String>,

    /// TOML configuration file; environment variables are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub count: Option<String>,

    #[arg(long)]
    pub min_rating: Option<String>,

    #[arg(long)]
    pub max_rating: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub date_start: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub date_end: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Print dispatcher statistics after the run")]
    pub stats: bool,
}

impl CliConfig {
    pub fn query_options(&self) -> Result<QueryOptions> {
        let pairs = [
            ("count", &self.count),
            ("minRating", &self.min_rating),
            ("maxRating", &self.max_rating),
            ("dateStart", &self.date_start),
            ("dateEnd", &self.date_end),
        ];

        QueryOptions::from_pairs(
            pairs
                .into_iter()
                .filter_map(|(name, value)| value.as_deref().map(|v| (name, v))),
        )
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(ReviewError::ValidationError {
                message: "At least one --url is required".to_string(),
            });
        }
        for url in &self.urls {
            validate_url("url", url)?;
        }
        self.query_options().map(|_| ())
    }
}
