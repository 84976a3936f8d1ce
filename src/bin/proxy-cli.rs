use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the proxy configuration control plane", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081", env = "PROXY_CONTROL_URL")]
    url: String,

    #[arg(short, long, env = "PROXY_CONTROL_KEY")]
    key: String,

    /// Actor recorded in the audit trail.
    #[arg(short, long, env = "USER", default_value = "operator")]
    actor: String,

    /// Assert that the actor holds configuration-write permission.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    permitted: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check control-plane status
    Status,
    /// Dump the full live configuration tree
    Tree,
    /// Manage routes
    Routes {
        #[command(subcommand)]
        action: EntityAction,
    },
    /// Manage middlewares
    Middlewares {
        #[command(subcommand)]
        action: EntityAction,
    },
    /// Manage certificate bindings
    Certificates {
        #[command(subcommand)]
        action: CertificateAction,
    },
    /// Show or replace static settings
    Settings {
        /// JSON file with the new settings; omit to show the current ones
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Manage backups
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Preview which route serves a request
    Match {
        host: String,
        #[arg(default_value = "/")]
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        entry_point: Option<String>,
    },
    /// Test TCP reachability of a backend
    Connectivity { target: String },
    /// Show recent audit records
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum EntityAction {
    List,
    Get { name: String },
    /// Create from a JSON file
    Create { file: PathBuf },
    /// Replace from a JSON file
    Update { name: String, file: PathBuf },
    Delete { name: String },
}

#[derive(Subcommand)]
enum CertificateAction {
    List,
    Get { domain: String },
    Request {
        domain: String,
        #[arg(long)]
        resolver: String,
        #[arg(long = "san")]
        alternate_names: Vec<String>,
        #[arg(long)]
        contact: Option<String>,
    },
    Revoke { domain: String },
}

#[derive(Subcommand)]
enum BackupAction {
    List,
    Create,
    Restore { id: String },
}

struct Api {
    client: reqwest::Client,
    base: String,
    headers: HeaderMap,
}

impl Api {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/admin{}", self.base.trim_end_matches('/'), path))
            .headers(self.headers.clone())
    }
}

fn read_json(path: &PathBuf) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn entity(api: &Api, collection: &str, action: EntityAction) -> Result<RequestBuilder, Box<dyn std::error::Error>> {
    Ok(match action {
        EntityAction::List => api.request(Method::GET, &format!("/{collection}")),
        EntityAction::Get { name } => api.request(Method::GET, &format!("/{collection}/{name}")),
        EntityAction::Create { file } => api
            .request(Method::POST, &format!("/{collection}"))
            .json(&read_json(&file)?),
        EntityAction::Update { name, file } => api
            .request(Method::PUT, &format!("/{collection}/{name}"))
            .json(&read_json(&file)?),
        EntityAction::Delete { name } => api.request(Method::DELETE, &format!("/{collection}/{name}")),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    headers.insert("x-actor-id", HeaderValue::from_str(&cli.actor)?);
    headers.insert(
        "x-actor-permitted",
        HeaderValue::from_static(if cli.permitted { "true" } else { "false" }),
    );

    let api = Api {
        client: reqwest::Client::new(),
        base: cli.url,
        headers,
    };

    let request = match cli.command {
        Commands::Status => api.request(Method::GET, "/status"),
        Commands::Tree => api.request(Method::GET, "/tree"),
        Commands::Routes { action } => entity(&api, "routes", action)?,
        Commands::Middlewares { action } => entity(&api, "middlewares", action)?,
        Commands::Certificates { action } => match action {
            CertificateAction::List => api.request(Method::GET, "/certificates"),
            CertificateAction::Get { domain } => api.request(Method::GET, &format!("/certificates/{domain}")),
            CertificateAction::Request {
                domain,
                resolver,
                alternate_names,
                contact,
            } => api.request(Method::POST, "/certificates").json(&json!({
                "domain": domain,
                "resolver": resolver,
                "alternate_names": alternate_names,
                "contact": contact,
            })),
            CertificateAction::Revoke { domain } => api.request(Method::DELETE, &format!("/certificates/{domain}")),
        },
        Commands::Settings { file: None } => api.request(Method::GET, "/settings"),
        Commands::Settings { file: Some(file) } => api.request(Method::PUT, "/settings").json(&read_json(&file)?),
        Commands::Backups { action } => match action {
            BackupAction::List => api.request(Method::GET, "/backups"),
            BackupAction::Create => api.request(Method::POST, "/backups"),
            BackupAction::Restore { id } => api.request(Method::POST, &format!("/backups/{id}/restore")),
        },
        Commands::Match {
            host,
            path,
            method,
            entry_point,
        } => api.request(Method::POST, "/match").json(&json!({
            "host": host,
            "path": path,
            "method": method,
            "entry_point": entry_point,
        })),
        Commands::Connectivity { target } => api
            .request(Method::POST, "/connectivity")
            .json(&json!({ "target": target })),
        Commands::Audit { limit } => api.request(Method::GET, &format!("/audit?limit={limit}")),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Some(retry) = res.headers().get("retry-after").and_then(|v| v.to_str().ok()) {
            eprintln!("Retry after: {}s", retry);
        }
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
