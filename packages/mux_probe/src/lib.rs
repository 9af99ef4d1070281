// Library interface for mux_probe
// Drives a Multiplexer from a fixed script of listeners and requests

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ws_mux::{Handler, Multiplexer, Request};

/// One `--send TAG=JSON` argument. An empty TAG sends fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub struct SendSpec {
    pub tag: String,
    pub payload: Value,
}

impl FromStr for SendSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (tag, json) = s
            .split_once('=')
            .context("expected TAG=JSON (TAG may be empty)")?;
        let payload: Value =
            serde_json::from_str(json).with_context(|| format!("invalid JSON payload: {json}"))?;
        Ok(Self {
            tag: tag.trim().to_string(),
            payload,
        })
    }
}

/// What the probe registers, sends, and how long it stays connected.
#[derive(Debug, Clone, Default)]
pub struct ProbeScript {
    pub listen: Vec<String>,
    pub catch_all: bool,
    pub sends: Vec<SendSpec>,
    /// Stop after this long; `None` waits for Ctrl-C or the connection to end.
    pub linger: Option<Duration>,
}

/// A handler that forwards `{"tag": .., "message": ..}` lines to `out`.
pub fn line_printer(tag: &str, out: mpsc::UnboundedSender<String>) -> Handler {
    let tag = tag.to_string();
    Handler::from_fn(move |message| {
        let line = json!({ "tag": tag, "message": message }).to_string();
        let _ = out.send(line);
    })
}

/// Register the script's listeners, queue its requests, run until the linger
/// period, Ctrl-C, or the connection ends, then close.
pub async fn run_probe(
    mux: &Multiplexer,
    script: &ProbeScript,
    out: mpsc::UnboundedSender<String>,
) -> Result<()> {
    for tag in &script.listen {
        mux.add_static_listener(tag.clone(), line_printer(tag, out.clone()));
    }
    if script.catch_all {
        let fallback = mux.fallback_tag();
        mux.add_static_listener(fallback, line_printer(fallback, out.clone()));
    }
    for spec in &script.sends {
        let mut request = Request::new(spec.payload.clone(), spec.tag.clone());
        if request.is_tagged() {
            request = request.with_handler(line_printer(&spec.tag, out.clone()));
        }
        mux.queue_request(request);
    }

    mux.run().await.context("Failed to start multiplexer")?;

    let linger = async {
        match script.linger {
            Some(period) => tokio::time::sleep(period).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        result = mux.wait() => result.context("Connection ended with an error"),
        _ = linger => {
            info!("Linger period elapsed");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    if mux.pending_len() > 0 {
        warn!("{} request(s) were never sent", mux.pending_len());
    }
    mux.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use ws_mux::memory;

    #[test]
    fn parse_tagged_send() {
        let spec: SendSpec = r#"login={"type":"LOGIN","email":"a@b.com"}"#.parse().unwrap();
        assert_eq!(spec.tag, "login");
        assert_eq!(spec.payload["type"], "LOGIN");
    }

    #[test]
    fn parse_untagged_send() {
        let spec: SendSpec = r#"={"type":"MESSAGE","message":"a=b"}"#.parse().unwrap();
        assert!(spec.tag.is_empty());
        assert_eq!(spec.payload["message"], "a=b");
    }

    #[test]
    fn parse_rejects_missing_separator_and_bad_json() {
        assert!("login".parse::<SendSpec>().is_err());
        assert!("login={not json".parse::<SendSpec>().is_err());
    }

    #[tokio::test]
    async fn probe_prints_responses_and_listener_hits() {
        let (transport, mut peer) = memory::pair();
        let mux = Multiplexer::new(transport);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let script = ProbeScript {
            listen: vec!["message".to_string()],
            catch_all: false,
            sends: vec![r#"login={"type":"LOGIN"}"#.parse().unwrap()],
            linger: None,
        };

        let server = async {
            let sent = peer.next_sent_json().await.unwrap();
            assert_eq!(sent["type"], "LOGIN");
            peer.push_json(&json!({"type": "login", "result": true}))
                .unwrap();
            peer.push_json(&json!({"type": "message", "text": "hi"}))
                .unwrap();

            let first: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
            let second: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
            assert_eq!(first["tag"], "login");
            assert_eq!(second["tag"], "message");
            assert_eq!(second["message"]["text"], "hi");
            peer.hang_up();
        };

        let (result, ()) = tokio::join!(run_probe(&mux, &script, out_tx), server);
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn probe_stops_after_linger() {
        let (transport, _peer) = memory::pair();
        let mux = Multiplexer::new(transport);
        let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
        let script = ProbeScript {
            linger: Some(Duration::from_millis(20)),
            ..Default::default()
        };

        run_probe(&mux, &script, out_tx).await.unwrap();
        assert_eq!(mux.state(), ws_mux::ConnectionState::Closed);
    }

    #[tokio::test]
    async fn catch_all_uses_configured_fallback_tag() {
        let (transport, peer) = memory::pair();
        let config = ws_mux::MuxConfig {
            fallback_tag: "catch_all".to_string(),
            ..Default::default()
        };
        let mux = Multiplexer::with_config(transport, &config);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let script = ProbeScript {
            catch_all: true,
            ..Default::default()
        };

        let server = async {
            while !mux.is_active("catch_all") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            peer.push_json(&json!({"type": "x"})).unwrap();

            let line: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
            assert_eq!(line["tag"], "catch_all");
            assert_eq!(line["message"]["type"], "x");
            peer.hang_up();
        };

        let (result, ()) = tokio::join!(run_probe(&mux, &script, out_tx), server);
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn probe_surfaces_unrecognized_protocol() {
        let (transport, peer) = memory::pair();
        let mux = Multiplexer::new(transport);
        let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
        peer.push_json(&json!({"type": "surprise"})).unwrap();

        let err = run_probe(&mux, &ProbeScript::default(), out_tx)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("not a recognized protocol"));
    }
}
