//! Pairing links.
//!
//! The wallet learns everything it needs from one link, shown as a QR code
//! or opened directly:
//!
//! ```text
//! https://wallet.sltn.io/connect?session=<encoded pairing string>
//!
//! pairing string = sultan://wl?s=<session id>&k=<base64 secret>&b=<relay url>&n=<app name>&o=<origin>
//! ```
//!
//! Every value is percent-encoded the way browsers' `encodeURIComponent`
//! does it, so links produced here and by the web dApp are identical.

use crate::config::{DEFAULT_DEEP_LINK_SCHEME, WalletLinkConfig};
use crate::error::{Result, WalletLinkError};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use walletlink_crypto::SessionSecret;

/// Characters `encodeURIComponent` leaves alone
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Path of the wallet's pairing page
pub const CONNECT_PATH: &str = "/connect";

/// Query parameter carrying the pairing string
pub const SESSION_PARAM: &str = "session";

/// Result of starting a pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingInfo {
    /// Deep link for the wallet (also the QR payload)
    pub pairing_url: String,
    /// Session identifier
    pub session_id: String,
}

/// Decoded contents of a pairing link
#[derive(Clone)]
pub struct PairingPayload {
    /// Session identifier (`s`)
    pub session_id: String,
    /// Shared secret (`k`)
    pub secret: SessionSecret,
    /// Relay base URL (`b`)
    pub relay_url: String,
    /// Application name (`n`)
    pub app_name: String,
    /// dApp origin (`o`)
    pub origin: String,
}

impl PairingPayload {
    /// Payload for `session_id`/`secret` using the relay, name and origin from `config`.
    #[must_use]
    pub fn new(config: &WalletLinkConfig, session_id: &str, secret: &SessionSecret) -> Self {
        Self {
            session_id: session_id.to_string(),
            secret: secret.clone(),
            relay_url: config.relay_url.clone(),
            app_name: config.app_name.clone(),
            origin: config.origin.clone(),
        }
    }

    /// Inner pairing string under `scheme` (e.g. `sultan://wl`).
    #[must_use]
    pub fn to_pairing_string(&self, scheme: &str) -> String {
        format!(
            "{scheme}?s={}&k={}&b={}&n={}&o={}",
            encode(&self.session_id),
            encode(&self.secret.to_base64()),
            encode(&self.relay_url),
            encode(&self.app_name),
            encode(&self.origin),
        )
    }

    /// Full deep link: `<wallet_url>/connect?session=<encoded pairing string>`.
    #[must_use]
    pub fn to_deep_link(&self, scheme: &str, wallet_url: &str) -> String {
        format!(
            "{}{CONNECT_PATH}?{SESSION_PARAM}={}",
            wallet_url.trim_end_matches('/'),
            encode(&self.to_pairing_string(scheme)),
        )
    }

    /// Deep link built from `config`'s scheme and wallet URL.
    #[must_use]
    pub fn to_link(&self, config: &WalletLinkConfig) -> String {
        self.to_deep_link(&config.deep_link_scheme, &config.wallet_url)
    }

    /// Parse a deep link or a bare pairing string.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidPairing`] if the link is malformed,
    /// a parameter is missing, or the secret is not 32 bytes of base64.
    pub fn parse(link: &str) -> Result<Self> {
        let link = link.trim();
        let pairing = if link.starts_with("http://") || link.starts_with("https://") {
            extract_pairing_string(link)?
        } else {
            link.to_string()
        };
        parse_pairing_string(&pairing)
    }
}

impl std::fmt::Debug for PairingPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingPayload")
            .field("session_id", &self.session_id)
            .field("secret", &self.secret)
            .field("relay_url", &self.relay_url)
            .field("app_name", &self.app_name)
            .field("origin", &self.origin)
            .finish()
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

fn decode(value: &str, name: &'static str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|_| WalletLinkError::InvalidPairing(format!("{name} is not UTF-8").into()))
}

fn extract_pairing_string(link: &str) -> Result<String> {
    let url = url::Url::parse(link)
        .map_err(|e| WalletLinkError::InvalidPairing(format!("{e}").into()))?;
    if url.path().trim_end_matches('/') != CONNECT_PATH {
        return Err(WalletLinkError::InvalidPairing(
            format!("unexpected path {}", url.path()).into(),
        ));
    }
    let query = url
        .query()
        .ok_or(WalletLinkError::invalid_pairing("missing query"))?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == SESSION_PARAM)
        .map(|(_, value)| decode(value, "session"))
        .ok_or(WalletLinkError::invalid_pairing("missing session parameter"))?
}

fn parse_pairing_string(pairing: &str) -> Result<PairingPayload> {
    let (base, query) = pairing
        .split_once('?')
        .ok_or(WalletLinkError::invalid_pairing("missing parameters"))?;
    if !base.contains("://") {
        return Err(WalletLinkError::invalid_pairing("missing scheme"));
    }
    if base != DEFAULT_DEEP_LINK_SCHEME {
        tracing::debug!("Pairing string uses non-default scheme {}", base);
    }

    let mut session_id = None;
    let mut key = None;
    let mut relay_url = None;
    let mut app_name = None;
    let mut origin = None;

    for param in query.split('&') {
        let (name, value) = param.split_once('=').unwrap_or((param, ""));
        match name {
            "s" => session_id = Some(decode(value, "s")?),
            "k" => key = Some(decode(value, "k")?),
            "b" => relay_url = Some(decode(value, "b")?),
            "n" => app_name = Some(decode(value, "n")?),
            "o" => origin = Some(decode(value, "o")?),
            // Unknown parameters are ignored for forward compatibility
            _ => {}
        }
    }

    let session_id = session_id
        .filter(|s| !s.is_empty())
        .ok_or(WalletLinkError::invalid_pairing("missing session id (s)"))?;
    let key = key.ok_or(WalletLinkError::invalid_pairing("missing key (k)"))?;
    let secret = SessionSecret::from_base64(&key)
        .map_err(|e| WalletLinkError::InvalidPairing(format!("key (k): {e}").into()))?;
    let relay_url = relay_url
        .filter(|s| !s.is_empty())
        .ok_or(WalletLinkError::invalid_pairing("missing relay (b)"))?;

    Ok(PairingPayload {
        session_id,
        secret,
        relay_url,
        app_name: app_name.unwrap_or_default(),
        origin: origin.unwrap_or_default(),
    })
}
