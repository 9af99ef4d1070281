use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::MuxError;

// =============================================================================
// Multiplexer config (figment-deserialized from defaults / mux.toml / env vars)
// =============================================================================
//
//   mux.toml:        uri = "wss://chat.example.com/socket"
//                    connect_timeout_secs = 5
//
//   env var:         WS_MUX_URI=wss://chat.example.com/socket
//                    WS_MUX_CONNECT_TIMEOUT_SECS=5

/// Tunables for a [`Multiplexer`](crate::Multiplexer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Connection target. `wss://` selects TLS, `ws://` plain TCP.
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Upper bound on the connect handshake. Zero disables the bound.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Tag consulted when an inbound `type` has no active entry.
    #[serde(default = "default_fallback_tag")]
    pub fallback_tag: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            connect_timeout_secs: default_connect_timeout_secs(),
            fallback_tag: default_fallback_tag(),
        }
    }
}

fn default_uri() -> String {
    "ws://127.0.0.1:8080/socket".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

pub fn default_fallback_tag() -> String {
    "default".to_string()
}

impl MuxConfig {
    /// Extract a config from [`figment`], see there for the layering.
    pub fn load(path: Option<&Path>) -> Result<Self, MuxError> {
        figment(path)
            .extract()
            .map_err(|e| MuxError::Config(Box::new(e)))
    }

    /// `None` when the timeout is disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Build a figment that layers: defaults → TOML file (if given) → `WS_MUX_*` env vars.
///
/// Env vars use double-underscore for nesting, although every current field
/// is top-level: `WS_MUX_FALLBACK_TAG=catch_all` → `fallback_tag = "catch_all"`.
pub fn figment(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut fig = Figment::from(Serialized::defaults(MuxConfig::default()));
    if let Some(path) = path {
        fig = fig.merge(Toml::file(path));
    }
    fig.merge(Env::prefixed("WS_MUX_").split("__"))
}
