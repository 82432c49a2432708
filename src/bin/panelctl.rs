use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "panelctl")]
#[command(about = "Management CLI for the configuration control plane", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8675")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the state of every managed node
    Nodes,
    /// Fetch one configuration document by key
    Config { key: String },
    /// Enable or disable a node
    Toggle {
        node: String,
        #[arg(long)]
        enable: bool,
    },
    /// Restart every enabled node
    Restart,
    /// Download a bundle ("full" or a single key) to a file
    Export {
        target: String,
        #[arg(short, long, default_value = "bundle.bin")]
        out: String,
    },
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

    match cli.command {
        Commands::Nodes => {
            let res = client
                .get(format!("{}/api/nodes", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Config { key } => {
            let res = client
                .get(format!("{}/api/config/{}", cli.url, key))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Toggle { node, enable } => {
            let res = client
                .post(format!("{}/api/nodes/{}/toggle", cli.url, node))
                .headers(headers)
                .json(&serde_json::json!({ "enable": enable }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Restart => {
            let res = client
                .post(format!("{}/api/server/restart", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Export { target, out } => {
            let path = if target == "full" {
                format!("{}/api/export/full", cli.url)
            } else {
                format!("{}/api/export/{}", cli.url, target)
            };
            let res = client.get(path).headers(headers).send().await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: API returned status {}", status);
                if let Ok(text) = res.text().await {
                    eprintln!("Response: {}", text);
                }
                return Ok(());
            }
            let bytes = res.bytes().await?;
            std::fs::write(&out, &bytes)?;
            println!("Wrote {} bytes to {}", bytes.len(), out);
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
