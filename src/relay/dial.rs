//! Outbound WebSocket handshake to a relay.

use rustls::crypto::CryptoProvider;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{BouncerError, BouncerResult};

/// Full-duplex stream to a relay.
pub type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Installs the process-wide rustls crypto provider used for `wss://`
/// relays.
///
/// Returns `true` once a provider is in place, whether this call or an
/// earlier one installed it.
#[must_use]
pub fn install_crypto_provider() -> bool {
    if CryptoProvider::get_default().is_some() {
        return true;
    }
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok()
        || CryptoProvider::get_default().is_some()
}

/// Dials `url`, bounded by the configured timeout and by `cancel`.
///
/// Returns `Ok(None)` if `cancel` fired before the handshake finished.
///
/// # Errors
///
/// - [`BouncerError::BackendServerError`] for a 5xx handshake status.
/// - [`BouncerError::BackendRejected`] for any other non-101 status.
/// - [`BouncerError::DialTimeout`] if the timeout elapsed.
/// - [`BouncerError::DialTransport`] for every other failure.
pub async fn dial(
    url: &str,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> BouncerResult<Option<RelayStream>> {
    let mut request = url
        .into_client_request()
        .map_err(|e| BouncerError::DialTransport(format!("invalid relay request: {e}")))?;
    let agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|e| BouncerError::DialTransport(format!("invalid user agent: {e}")))?;
    request.headers_mut().insert(USER_AGENT, agent);

    if request.uri().scheme_str() == Some("wss") && !install_crypto_provider() {
        return Err(BouncerError::DialTransport(
            "no TLS crypto provider available".to_string(),
        ));
    }

    let handshake = tokio::time::timeout(config.dial_timeout, connect_async(request));
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(None),
        outcome = handshake => outcome,
    };

    match outcome {
        Ok(Ok((stream, _response))) => Ok(Some(stream)),
        Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
            Err(classify_status(response.status().as_u16()))
        }
        Ok(Err(e)) => Err(BouncerError::DialTransport(e.to_string())),
        Err(_) => Err(BouncerError::DialTimeout(config.dial_timeout.as_secs())),
    }
}

/// Maps a failed handshake's HTTP status to its retry class.
#[must_use]
pub const fn classify_status(status: u16) -> BouncerError {
    if status >= 500 {
        BouncerError::BackendServerError(status)
    } else {
        BouncerError::BackendRejected(status)
    }
}
