//! tm-ads - Google Ads command line tool
//!
//! ```bash
//! tm-ads auth-url [--client-secret-file client_secret.json]
//! tm-ads exchange-code --code <CODE or redirect URL>
//! tm-ads export-spend --from 2024-01-01 --to 2024-03-31 [--bucket week] [--out spend.csv]
//! ```
//!
//! Credentials come from the shared config file and the `GOOGLE_ADS_*`
//! environment variables.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use tm_ads::client::{build_http_client, AdsClientConfig};
use tm_ads::oauth::{self, ClientSecretFile, DEFAULT_REDIRECT_URI};
use tm_ads::reports::{self, Bucket, SpendReporter};
use tm_common::config::AppConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tm-ads")]
#[command(about = "Google Ads tooling for the therapist marketplace")]
#[command(version)]
struct Args {
    /// Config file (falls back to TM_CONFIG, then ./tm.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the consent URL that yields a refresh token
    AuthUrl {
        /// OAuth client downloaded from Google Cloud Console
        #[arg(long, value_name = "FILE")]
        client_secret_file: Option<PathBuf>,

        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Exchange an authorization code for a refresh token
    ExchangeCode {
        /// The `code` parameter, or the whole redirect URL
        #[arg(long)]
        code: String,

        #[arg(long, value_name = "FILE")]
        client_secret_file: Option<PathBuf>,

        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Export campaign spend to CSV
    ExportSpend {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,

        /// Last day (inclusive), YYYY-MM-DD
        #[arg(long)]
        to: NaiveDate,

        /// day, week or month
        #[arg(long, default_value = "day")]
        bucket: Bucket,

        /// Output file (stdout when omitted)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Days per report query
        #[arg(long, default_value_t = reports::DEFAULT_CHUNK_DAYS)]
        chunk_days: u32,
    },
}

/// OAuth client id/secret/redirect from a secret file or the config
fn oauth_client(
    config: &AppConfig,
    secret_file: Option<&PathBuf>,
    redirect_override: Option<String>,
) -> Result<(String, String, String)> {
    if let Some(path) = secret_file {
        let file = ClientSecretFile::load(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        info!("Using {} OAuth client from {}", file.app_type, path.display());
        let redirect = redirect_override.unwrap_or_else(|| file.redirect_uri().to_string());
        return Ok((file.client.client_id, file.client.client_secret, redirect));
    }

    let ads = &config.google_ads;
    let client_id = ads
        .client_id
        .clone()
        .context("GOOGLE_ADS_CLIENT_ID is not set and no --client-secret-file given")?;
    let client_secret = ads
        .client_secret
        .clone()
        .context("GOOGLE_ADS_CLIENT_SECRET is not set and no --client-secret-file given")?;
    let redirect = redirect_override.unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    Ok((client_id, client_secret, redirect))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tm_ads=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let endpoints = AdsClientConfig::default().with_api_version(&config.google_ads.api_version);

    match args.command {
        Command::AuthUrl {
            client_secret_file,
            redirect_uri,
        } => {
            let (client_id, _, redirect) =
                oauth_client(&config, client_secret_file.as_ref(), redirect_uri)?;
            let url = oauth::authorization_url(&endpoints.auth_url, &client_id, &redirect)?;
            println!("Open this URL, approve access, then run `tm-ads exchange-code --code <code>`:");
            println!();
            println!("{}", url);
        }

        Command::ExchangeCode {
            code,
            client_secret_file,
            redirect_uri,
        } => {
            let (client_id, client_secret, redirect) =
                oauth_client(&config, client_secret_file.as_ref(), redirect_uri)?;
            let code = oauth::extract_code(&code)?;
            let http = build_http_client()?;
            let token = oauth::exchange_code(
                &http,
                &endpoints,
                &client_id,
                &client_secret,
                &code,
                &redirect,
            )
            .await
            .context("Authorization code exchange failed")?;

            match token.refresh_token {
                Some(refresh) => {
                    println!("GOOGLE_ADS_REFRESH_TOKEN={}", refresh);
                }
                None => anyhow::bail!(
                    "Google returned no refresh token; remove the app at \
                     https://myaccount.google.com/permissions and authorize again"
                ),
            }
        }

        Command::ExportSpend {
            from,
            to,
            bucket,
            out,
            chunk_days,
        } => {
            let reporter = SpendReporter::from_config(&config.google_ads)?.with_chunk_days(chunk_days);
            let rows = reporter.fetch_spend(from, to).await?;
            let rows = reports::aggregate(&rows, bucket);

            match &out {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    reports::write_csv(&rows, BufWriter::new(file))?;
                    info!("Wrote {} {} rows to {}", rows.len(), bucket, path.display());
                }
                None => reports::write_csv(&rows, io::stdout().lock())?,
            }
        }
    }

    Ok(())
}
