//! medq-cli: command-line client for the Medq HTTP API
//!
//! Talks to a running `medq-server` over HTTP. Every subcommand maps to one
//! or two API calls and prints either a short human summary or, with
//! `--json`, the raw response body.
//!
//! # Subcommands
//! - `status`                               show server health
//! - `submit <content> [--patient <id>]`    submit a patient query
//! - `triage <id>`                          classify a query
//! - `suggest <id> [--doc <file>]...`       attach text documents and draft a suggestion
//! - `review <id> --doctor <id> --content`  record a doctor's review
//! - `list [--status] [--priority]`         list queries
//! - `purge-awaiting --yes`                 delete every query awaiting review

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
/// Demo patient seeded by the server.
const DEMO_PATIENT: &str = "00000000-0000-0000-0000-000000000001";
const DEFAULT_LIMIT: usize = 10;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "medq-cli", version, about = "Medq medical query triage client")]
struct Cli {
    /// Medq HTTP server URL (overrides MEDQ_HTTP_URL env var)
    #[arg(long, env = "MEDQ_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show Medq server status
    Status,

    /// Submit a patient query
    Submit {
        /// Free-text question
        content: String,

        /// Patient id (defaults to the seeded demo patient)
        #[arg(long, default_value = DEMO_PATIENT)]
        patient: String,
    },

    /// Classify a query and move it to awaiting review
    Triage {
        id: String,
    },

    /// Generate (or fetch) the suggestion for a query
    Suggest {
        id: String,

        /// Text document to attach first (.txt or .csv); repeatable
        #[arg(long = "doc")]
        docs: Vec<String>,
    },

    /// Record a doctor's review
    Review {
        id: String,

        #[arg(long)]
        doctor: String,

        /// Final response text
        #[arg(long)]
        content: String,

        /// Mark the draft as not approved
        #[arg(long)]
        reject: bool,

        #[arg(long)]
        notes: Option<String>,
    },

    /// List queries
    List {
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long, default_value_t = 0)]
        skip: usize,

        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Delete every query that is awaiting review
    PurgeAwaiting {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

/// Page shape returned by `GET /api/query`.
#[derive(Debug, Deserialize)]
struct QueryPage {
    items: Vec<Value>,
    total: u64,
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// One-line summary of a query object from the API.
pub fn format_query_line(q: &Value) -> String {
    let score = q["safety_score"]
        .as_f64()
        .map(|s| format!("{:.1}", s))
        .unwrap_or_else(|| "-".to_string());
    let content: String = q["content"].as_str().unwrap_or("").chars().take(60).collect();
    format!(
        "{}  {:<15} {:<7} {:>4}  {}",
        q["id"].as_str().unwrap_or("?"),
        q["status"].as_str().unwrap_or("?"),
        q["priority"].as_str().unwrap_or("?"),
        score,
        content
    )
}

/// Content type the server expects for a text document, by extension.
pub fn content_type_for(path: &str) -> Option<&'static str> {
    let ext = Path::new(path)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    match ext.as_str() {
        "txt" => Some("text/plain"),
        "csv" => Some("text/csv"),
        _ => None,
    }
}

/// Query string for `GET /api/query`.
pub fn list_params(
    status: Option<&str>,
    priority: Option<&str>,
    skip: usize,
    limit: usize,
) -> Vec<(&'static str, String)> {
    let mut params = vec![("skip", skip.to_string()), ("limit", limit.to_string())];
    if let Some(s) = status {
        params.push(("status", s.to_string()));
    }
    if let Some(p) = priority {
        params.push(("priority", p.to_string()));
    }
    params
}

/// Turn an API error body into a readable message.
pub fn describe_error(status: u16, body: &Value) -> String {
    match (body["kind"].as_str(), body["error"].as_str()) {
        (Some(kind), Some(error)) => format!("{} ({}): {}", kind, status, error),
        _ => format!("server returned {}", status),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request and return the JSON body, or an error built from the API's error body.
fn call(req: RequestBuilder) -> anyhow::Result<Value> {
    let resp = req.send().context("connection failed")?;
    let status = resp.status();
    let body: Value = resp.json().unwrap_or(Value::Null);
    if !status.is_success() {
        bail!(describe_error(status.as_u16(), &body));
    }
    Ok(body)
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str, json: bool) -> anyhow::Result<()> {
    let body = call(client(10)?.get(format!("{}/health", server)))?;
    if json {
        return print_json(&body);
    }
    println!("Medq server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:     {}", body["version"].as_str().unwrap_or("?"));
    println!("Storage:     {}", body["storage"].as_str().unwrap_or("?"));
    if let Some(pg) = body["postgresql"].as_str() {
        println!("PostgreSQL:  {}", pg);
    }
    println!("Model:       {}", body["model"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_submit(server: &str, patient: &str, content: &str, json: bool) -> anyhow::Result<()> {
    let body = call(
        client(10)?
            .post(format!("{}/api/query", server))
            .json(&serde_json::json!({ "patient_id": patient, "content": content })),
    )?;
    if json {
        return print_json(&body);
    }
    println!("Submitted query {}", body["id"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_triage(server: &str, id: &str, json: bool) -> anyhow::Result<()> {
    let body = call(client(10)?.post(format!("{}/api/triage/{}", server, id)))?;
    if json {
        return print_json(&body);
    }
    println!("Priority:     {}", body["priority"].as_str().unwrap_or("?"));
    println!("Safety score: {:.1}", body["safety_score"].as_f64().unwrap_or(0.0));
    if body["escalate"].as_bool().unwrap_or(false) {
        println!("ESCALATE: this query needs immediate attention");
    }
    Ok(())
}

fn do_suggest(server: &str, id: &str, docs: &[String], json: bool) -> anyhow::Result<()> {
    let http = client(120)?;

    for path in docs {
        let content_type = content_type_for(path)
            .with_context(|| format!("{}: only .txt and .csv documents can be attached", path))?;
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let filename = Path::new(path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());

        call(
            http.post(format!("{}/api/query/{}/documents", server, id))
                .json(&serde_json::json!({
                    "filename": filename,
                    "content_type": content_type,
                    "size_bytes": text.len(),
                    "text": text,
                })),
        )?;
        eprintln!("Attached {}", filename);
    }

    let body = call(http.post(format!("{}/api/query/{}/suggestion", server, id)))?;
    if json {
        return print_json(&body);
    }
    println!(
        "Suggestion {} ({}, confidence {:.2})\n",
        body["id"].as_str().unwrap_or("?"),
        body["model_used"].as_str().unwrap_or("?"),
        body["confidence_score"].as_f64().unwrap_or(0.0)
    );
    println!("{}", body["content"].as_str().unwrap_or(""));
    Ok(())
}

fn do_review(
    server: &str,
    id: &str,
    doctor: &str,
    content: &str,
    approved: bool,
    notes: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let body = call(
        client(10)?
            .post(format!("{}/api/review/{}", server, id))
            .json(&serde_json::json!({
                "doctor_id": doctor,
                "content": content,
                "approved": approved,
                "notes": notes,
            })),
    )?;
    if json {
        return print_json(&body);
    }
    println!(
        "Review {} recorded ({})",
        body["id"].as_str().unwrap_or("?"),
        if approved { "approved" } else { "rejected" }
    );
    Ok(())
}

fn do_list(
    server: &str,
    status: Option<&str>,
    priority: Option<&str>,
    skip: usize,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let body = call(
        client(10)?
            .get(format!("{}/api/query", server))
            .query(&list_params(status, priority, skip, limit)),
    )?;
    if json {
        return print_json(&body);
    }

    let page: QueryPage = serde_json::from_value(body).context("unexpected list response")?;
    if page.items.is_empty() {
        eprintln!("No queries found");
        return Ok(());
    }
    for q in &page.items {
        println!("{}", format_query_line(q));
    }
    println!("\n{} of {} shown", page.items.len(), page.total);
    Ok(())
}

fn do_purge(server: &str, yes: bool, json: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to purge without --yes");
    }
    let body = call(client(30)?.delete(format!("{}/api/admin/awaiting", server)))?;
    if json {
        return print_json(&body);
    }
    println!("Removed {} queries", body["removed"].as_u64().unwrap_or(0));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let json = cli.json;

    let result = match cli.command {
        Commands::Status => do_status(&server, json),
        Commands::Submit { content, patient } => do_submit(&server, &patient, &content, json),
        Commands::Triage { id } => do_triage(&server, &id, json),
        Commands::Suggest { id, docs } => do_suggest(&server, &id, &docs, json),
        Commands::Review {
            id,
            doctor,
            content,
            reject,
            notes,
        } => do_review(&server, &id, &doctor, &content, !reject, notes.as_deref(), json),
        Commands::List {
            status,
            priority,
            skip,
            limit,
        } => do_list(
            &server,
            status.as_deref(),
            priority.as_deref(),
            skip,
            limit,
            json,
        ),
        Commands::PurgeAwaiting { yes } => do_purge(&server, yes, json),
    };

    if let Err(e) = result {
        eprintln!("medq-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
