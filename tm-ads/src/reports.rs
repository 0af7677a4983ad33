//! Campaign spend reports
//!
//! Rows come from GAQL `searchStream` queries over the `campaign` resource,
//! one query per date chunk so long ranges stay under the API's response
//! limits. Rows can then be rolled up per week or month and written as CSV.

use crate::client::{build_http_client, AdsClientConfig, AdsCredentials};
use crate::error::{AdsError, Result};
use crate::oauth::TokenProvider;
use chrono::{Datelike, Duration, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use tm_common::config::GoogleAdsConfig;
use tracing::{debug, info};

pub const DEFAULT_CHUNK_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct SpendRow {
    pub date: NaiveDate,
    pub campaign_id: String,
    pub campaign_name: String,
    pub impressions: i64,
    pub clicks: i64,
    pub cost_micros: i64,
    pub conversions: f64,
}

impl SpendRow {
    /// Cost in currency units
    pub fn cost(&self) -> f64 {
        self.cost_micros as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bucket {
    #[default]
    Day,
    Week,
    Month,
}

impl Bucket {
    /// First day of the bucket containing `date` (weeks start on Monday)
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Bucket::Day => date,
            Bucket::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Bucket::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bucket::Day => "day",
            Bucket::Week => "week",
            Bucket::Month => "month",
        })
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Bucket::Day),
            "week" | "weekly" => Ok(Bucket::Week),
            "month" | "monthly" => Ok(Bucket::Month),
            other => Err(format!("Unknown bucket: {} (expected day, week or month)", other)),
        }
    }
}

/// Roll rows up into buckets, one row per (bucket start, campaign).
/// The most recent campaign name wins when a campaign was renamed.
pub fn aggregate(rows: &[SpendRow], bucket: Bucket) -> Vec<SpendRow> {
    let mut grouped: BTreeMap<(NaiveDate, String), SpendRow> = BTreeMap::new();

    for row in rows {
        let start = bucket.start_of(row.date);
        let entry = grouped
            .entry((start, row.campaign_id.clone()))
            .or_insert_with(|| SpendRow {
                date: start,
                campaign_id: row.campaign_id.clone(),
                campaign_name: row.campaign_name.clone(),
                impressions: 0,
                clicks: 0,
                cost_micros: 0,
                conversions: 0.0,
            });
        entry.impressions += row.impressions;
        entry.clicks += row.clicks;
        entry.cost_micros += row.cost_micros;
        entry.conversions += row.conversions;
        entry.campaign_name = row.campaign_name.clone();
    }

    grouped.into_values().collect()
}

#[derive(Serialize)]
struct CsvRecord<'a> {
    date: String,
    campaign_id: &'a str,
    campaign_name: &'a str,
    impressions: i64,
    clicks: i64,
    cost: String,
    conversions: String,
}

/// Write rows as CSV with a header line; cost is in currency units
pub fn write_csv<W: Write>(rows: &[SpendRow], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(CsvRecord {
            date: row.date.format("%Y-%m-%d").to_string(),
            campaign_id: &row.campaign_id,
            campaign_name: &row.campaign_name,
            impressions: row.impressions,
            clicks: row.clicks,
            cost: format!("{:.2}", row.cost()),
            conversions: format!("{:.2}", row.conversions),
        })?;
    }
    if rows.is_empty() {
        wtr.write_record([
            "date",
            "campaign_id",
            "campaign_name",
            "impressions",
            "clicks",
            "cost",
            "conversions",
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Inclusive date windows of at most `chunk_days` covering `from..=to`
pub fn date_chunks(from: NaiveDate, to: NaiveDate, chunk_days: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let step = Duration::days(chunk_days.max(1) as i64);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = (start + step - Duration::days(1)).min(to);
        chunks.push((start, end));
        start = end + Duration::days(1);
    }
    chunks
}

fn spend_query(from: NaiveDate, to: NaiveDate) -> String {
    format!(
        "SELECT segments.date, campaign.id, campaign.name, metrics.impressions, \
         metrics.clicks, metrics.cost_micros, metrics.conversions \
         FROM campaign \
         WHERE segments.date BETWEEN '{}' AND '{}' \
         ORDER BY segments.date",
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d")
    )
}

/// int64 fields arrive as JSON strings
fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    de_i64(deserializer).map(|n| n.to_string())
}

#[derive(Debug, Deserialize)]
struct StreamBatch {
    #[serde(default)]
    results: Vec<StreamRow>,
}

#[derive(Debug, Deserialize)]
struct StreamRow {
    campaign: CampaignFields,
    #[serde(default)]
    metrics: MetricFields,
    segments: SegmentFields,
}

#[derive(Debug, Deserialize)]
struct CampaignFields {
    #[serde(deserialize_with = "de_id")]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricFields {
    #[serde(default, deserialize_with = "de_i64")]
    impressions: i64,
    #[serde(default, deserialize_with = "de_i64")]
    clicks: i64,
    #[serde(default, deserialize_with = "de_i64")]
    cost_micros: i64,
    #[serde(default)]
    conversions: f64,
}

#[derive(Debug, Deserialize)]
struct SegmentFields {
    date: NaiveDate,
}

/// Parse a `searchStream` body: a JSON array of result batches
pub fn parse_search_stream(body: &str) -> Result<Vec<SpendRow>> {
    let batches: Vec<StreamBatch> = serde_json::from_str(body)
        .map_err(|e| AdsError::Parse(format!("searchStream response: {}", e)))?;

    Ok(batches
        .into_iter()
        .flat_map(|b| b.results)
        .map(|r| SpendRow {
            date: r.segments.date,
            campaign_id: r.campaign.id,
            campaign_name: r.campaign.name,
            impressions: r.metrics.impressions,
            clicks: r.metrics.clicks,
            cost_micros: r.metrics.cost_micros,
            conversions: r.metrics.conversions,
        })
        .collect())
}

pub struct SpendReporter {
    http: Client,
    endpoints: AdsClientConfig,
    credentials: AdsCredentials,
    tokens: TokenProvider,
    chunk_days: u32,
}

impl SpendReporter {
    pub fn new(http: Client, endpoints: AdsClientConfig, credentials: AdsCredentials) -> Self {
        let tokens = TokenProvider::new(
            http.clone(),
            &endpoints,
            &credentials.client_id,
            &credentials.client_secret,
            &credentials.refresh_token,
        );
        Self {
            http,
            endpoints,
            credentials,
            tokens,
            chunk_days: DEFAULT_CHUNK_DAYS,
        }
    }

    pub fn from_config(config: &GoogleAdsConfig) -> Result<Self> {
        let credentials = AdsCredentials::from_config(config)?;
        let endpoints = AdsClientConfig::default().with_api_version(&config.api_version);
        Ok(Self::new(build_http_client()?, endpoints, credentials))
    }

    pub fn with_chunk_days(mut self, days: u32) -> Self {
        self.chunk_days = days.max(1);
        self
    }

    /// Daily per-campaign rows for `from..=to`
    pub async fn fetch_spend(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SpendRow>> {
        if from > to {
            return Err(AdsError::Config(format!(
                "Report start {} is after end {}",
                from, to
            )));
        }

        let url = self
            .endpoints
            .customer_method_url(&self.credentials.customer_id, "/googleAds:searchStream");
        let mut rows = Vec::new();

        for (start, end) in date_chunks(from, to, self.chunk_days) {
            let token = self.tokens.access_token().await?;
            let mut request = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .header("developer-token", &self.credentials.developer_token)
                .json(&serde_json::json!({ "query": spend_query(start, end) }));
            if let Some(login) = &self.credentials.login_customer_id {
                request = request.header("login-customer-id", login);
            }

            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(AdsError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let chunk = parse_search_stream(&body)?;
            debug!(%start, %end, rows = chunk.len(), "Fetched spend chunk");
            rows.extend(chunk);
        }

        info!(%from, %to, rows = rows.len(), "Spend report fetched");
        Ok(rows)
    }
}
