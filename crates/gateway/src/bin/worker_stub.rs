//! Canned translator worker for integration tests and local demos.
//!
//! Speaks the gateway's worker wire protocol on the Unix socket given as the
//! final argument: one newline-delimited JSON request per connection,
//! answered with one JSON response. An optional leading argument selects the
//! behavior:
//!
//! - `upper` (default): translated text is the input, uppercased
//! - `echo`: translated text is the input unchanged
//! - `dict`: a tiny canned dictionary (`Hello` becomes `Bonjour`)
//! - `fail`: every request is answered with `success=false`
//! - `once`: serve exactly one request, then exit nonzero
//! - `slow`: sleep 15 seconds before answering
//! - `die-once`: on the first run, bind the socket but close it without
//!   ever accepting and exit nonzero shortly after; later runs serve
//!   normally (a marker file next to the socket carries the state)
//! - `never-bind`: exit without creating the socket

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Deserialize)]
struct StubRequest {
    text: String,
    #[serde(default)]
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Serialize)]
struct StubResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    translated_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (mode, socket_path) = match args.as_slice() {
        [socket_path] => ("upper".to_string(), socket_path.clone()),
        [mode, socket_path] => (mode.clone(), socket_path.clone()),
        _ => anyhow::bail!("usage: iskoces-worker-stub [mode] <socket-path>"),
    };

    if mode == "never-bind" {
        eprintln!("refusing to bind (mode=never-bind)");
        std::process::exit(1);
    }

    if mode == "die-once" {
        let marker = format!("{socket_path}.died");
        if !std::path::Path::new(&marker).exists() {
            // Bind so the socket file passes the startup check, but never
            // accept: connections are refused while this process is alive.
            let listener = UnixListener::bind(&socket_path)?;
            std::fs::write(&marker, b"")?;
            drop(listener);
            tokio::time::sleep(Duration::from_secs(2)).await;
            std::process::exit(1);
        }
    }

    let listener = UnixListener::bind(&socket_path)?;

    loop {
        let (stream, _) = listener.accept().await?;
        serve_one(stream, &mode).await?;
        if mode == "once" {
            std::process::exit(1);
        }
    }
}

async fn serve_one(stream: UnixStream, mode: &str) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let request: StubRequest = serde_json::from_str(line.trim_end())?;

    if mode == "slow" {
        tokio::time::sleep(Duration::from_secs(15)).await;
    }

    let response = match mode {
        "fail" => StubResponse {
            success: false,
            translated_text: None,
            error: Some("stub failure".to_string()),
        },
        "echo" => StubResponse {
            success: true,
            translated_text: Some(request.text),
            error: None,
        },
        "dict" => StubResponse {
            success: true,
            translated_text: Some(dict_lookup(
                &request.text,
                &request.source_lang,
                &request.target_lang,
            )),
            error: None,
        },
        // "upper", "once", "slow"
        _ => StubResponse {
            success: true,
            translated_text: Some(request.text.to_uppercase()),
            error: None,
        },
    };

    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    let mut stream = reader.into_inner();
    stream.write_all(&payload).await?;
    Ok(())
}

fn dict_lookup(text: &str, source_lang: &str, target_lang: &str) -> String {
    match (text, target_lang) {
        ("Hello", "fr") => "Bonjour".to_string(),
        ("test", "fr") => "essai".to_string(),
        _ => format!("[{source_lang}->{target_lang}] {text}"),
    }
}
