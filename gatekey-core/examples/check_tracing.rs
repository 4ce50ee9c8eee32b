//! Example demonstrating the MFA client's tracing instrumentation.
//!
//! Run with: cargo run -p gatekey-core --example check_tracing
//!
//! Environment: GATEKEY_SERVER_URL, GATEKEY_USER, GATEKEY_PASS

use gatekey_core::{MfaApi, MfaClient, MfaServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::new("gatekey_core=debug,info"))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== MFA check tracing demo ===\n");

    let server_url = std::env::var("GATEKEY_SERVER_URL")
        .unwrap_or_else(|_| "https://localhost:8443".to_string());
    let username = std::env::var("GATEKEY_USER").unwrap_or_else(|_| "demo".to_string());
    let pass = std::env::var("GATEKEY_PASS").unwrap_or_default();

    let config = match MfaServerConfig::new(&server_url) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid server URL: {e}");
            return;
        }
    };
    println!("Config: {config:?}\n");

    let client = match MfaClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create client: {e}");
            return;
        }
    };

    println!("\nSending /validate/check...\n");

    match client.check(&username, &pass, None, &[]).await {
        Ok(Some(result)) => {
            println!("\nStatus: {}", result.status);
            println!("Authentication: {:?}", result.authentication_status);
            if !result.messages.is_empty() {
                println!("Messages: {}", result.messages);
            }
            for challenge in result.challenges.iter() {
                println!("Challenge: {} ({})", challenge.serial, challenge.kind.as_str());
            }
        }
        Ok(None) => println!("\nNo usable response from the server"),
        Err(e) => println!("\nFailed: {e}"),
    }
}
