//! CLI Status Command
//!
//! Queries a running gateway for health and provider breaker state.

use anyhow::Result;
use serde_json::Value;

pub async fn run(port: u16) -> Result<()> {
    let client = reqwest::Client::new();
    let base = format!("http://localhost:{port}");

    let health = match client.get(format!("{base}/health")).send().await {
        Ok(resp) => resp.json::<Value>().await?,
        Err(_) => {
            println!("Atlas is not running on port {port}");
            return Ok(());
        }
    };

    println!("\nAtlas status\n");
    println!("  status:     {}", health["status"].as_str().unwrap_or("unknown"));
    println!("  mode:       {}", health["executionMode"].as_str().unwrap_or("unknown"));
    println!("  sessions:   {}", health["sessions"]);
    println!("  uptime:     {}s\n", health["uptimeSeconds"]);

    let state: Value = client
        .get(format!("{base}/providers/state"))
        .send()
        .await?
        .json()
        .await?;

    println!("Providers:");
    match state["providers"].as_object() {
        Some(providers) if !providers.is_empty() => {
            for (name, breaker) in providers {
                let circuit = if breaker["isOpen"].as_bool().unwrap_or(false) {
                    format!("OPEN ({}ms left)", breaker["cooldownRemaining"])
                } else {
                    "closed".to_string()
                };
                println!(
                    "  - {name}: circuit {circuit}, {} failures total",
                    breaker["failuresTotal"]
                );
            }
        }
        _ => println!("  (none configured)"),
    }
    println!();
    Ok(())
}
