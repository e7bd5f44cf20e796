use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for civic-guard", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Public API base URL, used by `health`
    #[arg(long, default_value = "http://localhost:8080")]
    api_url: String,

    #[arg(short, long, default_value = "admin-secret-key")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version, uptime and aggregate health
    Status,
    /// List every circuit breaker with its counters
    Breakers,
    /// Force one breaker back to CLOSED
    Reset {
        /// Breaker name, e.g. sms
        name: String,
    },
    /// Force every breaker back to CLOSED
    ResetAll,
    /// Detailed health report from the public listener
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)).headers(headers),
        Commands::Breakers => client.get(format!("{}/admin/breakers", cli.url)).headers(headers),
        Commands::Reset { name } => client
            .post(format!("{}/admin/breakers/{}/reset", cli.url, name))
            .headers(headers),
        Commands::ResetAll => client.post(format!("{}/admin/breakers/reset", cli.url)).headers(headers),
        Commands::Health => client.get(format!("{}/health", cli.api_url)),
    }
    .send()
    .await?;

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if status.is_success() {
        let json: Value = res.json().await?;
        println!("{}", serde_json::to_string_pretty(&json)?);
        Ok(())
    } else {
        let text = res.text().await.unwrap_or_default();
        eprintln!("Error: {} - {}", status, text);
        Err(format!("request failed with {status}").into())
    }
}
