//! Issue one request against an ERP server and print the response.
//!
//! ```sh
//! cargo run -p erp-link --example request -- <CONFIG.yaml> <TYPE> [FIELDS_JSON]
//! ```
//!
//! The bearer token is read from `ERP_TOKEN` when set. Example config:
//!
//! ```yaml
//! url: ws://localhost:8080/ws
//! requestTimeout: 5000
//! debug: true
//! ```
//!
//! The response is printed to stdout as JSON (pipe to `jq` for formatting).

use std::path::Path;

use erp_link::{Client, ConnectionState, Event, EventKind, Frame};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let usage = "usage: request <CONFIG.yaml> <TYPE> [FIELDS_JSON]";
    let config_path = args.first().ok_or(usage)?;
    let kind = args.get(1).ok_or(usage)?;

    let mut frame = Frame::new(kind.as_str());
    if let Some(fields) = args.get(2) {
        let serde_json::Value::Object(map) = serde_json::from_str(fields)? else {
            return Err("FIELDS_JSON must be a JSON object".into());
        };
        frame.payload = map;
    }

    let config = erp_link::load_config(Path::new(config_path)).await?;
    let client = Client::new(config)?;
    if let Ok(token) = std::env::var("ERP_TOKEN") {
        client.set_auth_token(&token);
        if !client.is_authenticated() {
            eprintln!("warning: ERP_TOKEN is not a well-formed token, ignoring it");
        }
    }

    for kind in [EventKind::Close, EventKind::Error, EventKind::AuthError] {
        client.on(kind, |event| match event {
            Event::Close { code, reason, .. } => eprintln!(
                "[close] code={} {}",
                code.map_or_else(|| "-".to_string(), |c| c.to_string()),
                reason.as_deref().unwrap_or("-"),
            ),
            Event::Error { message } => eprintln!("[error] {message}"),
            Event::AuthError { kind, message } => {
                eprintln!("[auth_error] {} {message}", kind.as_str());
            }
            _ => {}
        });
    }

    eprintln!("sending '{kind}' ...");
    let response = client.request(&frame, None).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    client.disconnect(1000, "done")?;
    client.wait_for_state(ConnectionState::Disconnected).await?;
    Ok(())
}
