use std::time::Duration;

use tracing::{debug, info};

use crate::error::{PeerError, Result};
use crate::messages::{ConnectReply, ConnectRequest, ErrorKind};
use crate::router::{HandlerError, HandlerResult, MessageRouter};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_VERSION_LEN: usize = 16;

/// Configuration for the connect handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Deadline for the connect exchange.
    pub timeout: Duration,
    /// Local protocol version.
    pub protocol_version: String,
    /// Longest concurrency token either side accepts.
    pub max_token_len: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_token_len: 256,
        }
    }
}

/// What the portal learned from the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// The driver already runs the configuration the token names.
    pub configuration_valid: bool,
    pub protocol_version: String,
}

/// Portal side: announce `concurrency_token` and learn whether the driver's
/// configuration is current.
pub fn portal_handshake(
    router: &MessageRouter,
    concurrency_token: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_version(&config.protocol_version).map_err(PeerError::HandshakeFailed)?;
    validate_token(concurrency_token, config.max_token_len).map_err(PeerError::HandshakeFailed)?;

    let request = ConnectRequest {
        protocol_version: config.protocol_version.clone(),
        concurrency_token: concurrency_token.to_string(),
    };
    let reply = router
        .send_with_timeout(&request, config.timeout)
        .map_err(|err| match err {
            PeerError::Remote {
                kind: ErrorKind::InvalidArgument,
                message,
            } => PeerError::HandshakeFailed(message),
            other => other,
        })?;

    info!(
        configuration_valid = reply.configuration_valid,
        "handshake complete"
    );
    Ok(HandshakeResult {
        configuration_valid: reply.configuration_valid,
        protocol_version: config.protocol_version.clone(),
    })
}

/// Driver side: answer a `ConnectRequest` against the locally stored token.
pub fn answer_connect(
    request: &ConnectRequest,
    stored_token: Option<&str>,
    config: &HandshakeConfig,
) -> HandlerResult<ConnectReply> {
    validate_version(&request.protocol_version).map_err(HandlerError::invalid_argument)?;
    validate_token(&request.concurrency_token, config.max_token_len)
        .map_err(HandlerError::invalid_argument)?;

    if !is_version_compatible(&request.protocol_version, &config.protocol_version)
        .map_err(HandlerError::invalid_argument)?
    {
        return Err(HandlerError::invalid_argument(format!(
            "incompatible version '{}' (driver '{}')",
            request.protocol_version, config.protocol_version
        )));
    }

    let configuration_valid = stored_token == Some(request.concurrency_token.as_str());
    debug!(configuration_valid, "answered connect request");
    Ok(ConnectReply {
        configuration_valid,
    })
}

fn validate_token(token: &str, max_len: usize) -> std::result::Result<(), String> {
    if token.is_empty() || token.len() > max_len {
        return Err(format!("invalid concurrency token length: {}", token.len()));
    }
    Ok(())
}

fn validate_version(version: &str) -> std::result::Result<(), String> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(format!("invalid protocol version length: {}", version.len()));
    }
    parse_version(version).map(|_| ())
}

fn is_version_compatible(
    portal_version: &str,
    driver_version: &str,
) -> std::result::Result<bool, String> {
    let (portal_major, portal_minor) = parse_version(portal_version)?;
    let (driver_major, driver_minor) = parse_version(driver_version)?;

    Ok(portal_major == driver_major && portal_minor >= driver_minor)
}

fn parse_version(version: &str) -> std::result::Result<(u16, u16), String> {
    let mut parts = version.split('.');

    let major = parts
        .next()
        .ok_or_else(|| format!("invalid version '{version}': missing major"))?;
    let minor = parts
        .next()
        .ok_or_else(|| format!("invalid version '{version}': missing minor"))?;

    if parts.next().is_some() {
        return Err(format!(
            "invalid version '{version}': expected '<major>.<minor>'"
        ));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| format!("invalid version '{version}': non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| format!("invalid version '{version}': non-numeric minor"))?;

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ledlink_frame::{Connection, ConnectionConfig};
    use ledlink_transport::loopback_pair;

    use super::*;
    use crate::channel::{Channel, ChannelConfig};
    use crate::router::Dispatcher;

    fn request(version: &str, token: &str) -> ConnectRequest {
        ConnectRequest {
            protocol_version: version.to_string(),
            concurrency_token: token.to_string(),
        }
    }

    /// A portal router talking to a driver that stores `stored`.
    fn portal_against(stored: Option<&'static str>) -> (MessageRouter, Channel) {
        let (left, right) = loopback_pair().unwrap();

        let driver = Channel::new(
            Connection::from_stream(left, ConnectionConfig::default()).unwrap(),
            ChannelConfig::default(),
        );
        let config = HandshakeConfig::default();
        driver.set_inbound_handler(Arc::new(
            Dispatcher::builder()
                .on(move |req: ConnectRequest| answer_connect(&req, stored, &config))
                .build(),
        ));
        driver.open().unwrap();

        let portal = Channel::new(
            Connection::from_stream(right, ConnectionConfig::default()).unwrap(),
            ChannelConfig::default(),
        );
        portal.open().unwrap();
        (MessageRouter::new(Arc::new(portal)), driver)
    }

    #[test]
    fn matching_token_is_valid() {
        let reply = answer_connect(
            &request("1.0", "tok-A"),
            Some("tok-A"),
            &HandshakeConfig::default(),
        )
        .unwrap();
        assert!(reply.configuration_valid);
    }

    #[test]
    fn stale_or_missing_token_is_invalid() {
        let cfg = HandshakeConfig::default();
        assert!(
            !answer_connect(&request("1.0", "tok-OLD"), Some("tok-NEW"), &cfg)
                .unwrap()
                .configuration_valid
        );
        assert!(
            !answer_connect(&request("1.0", "tok-A"), None, &cfg)
                .unwrap()
                .configuration_valid
        );
    }

    #[test]
    fn newer_minor_portal_is_compatible() {
        let reply = answer_connect(
            &request("1.3", "tok"),
            Some("tok"),
            &HandshakeConfig::default(),
        );
        assert!(reply.is_ok());
    }

    #[test]
    fn version_mismatch_rejected() {
        let err = answer_connect(&request("2.0", "tok"), Some("tok"), &HandshakeConfig::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err.message.contains("incompatible"));

        let err = answer_connect(&request("1", "tok"), None, &HandshakeConfig::default())
            .unwrap_err();
        assert!(err.message.contains("missing minor"));
    }

    #[test]
    fn token_length_enforced() {
        let cfg = HandshakeConfig {
            max_token_len: 8,
            ..HandshakeConfig::default()
        };
        assert!(answer_connect(&request("1.0", ""), None, &cfg).is_err());
        assert!(answer_connect(&request("1.0", "123456789"), None, &cfg).is_err());
    }

    #[test]
    fn parse_version_rejects_garbage() {
        assert!(parse_version("1.0.0").is_err());
        assert!(parse_version("a.1").is_err());
        assert!(parse_version("1.b").is_err());
        assert_eq!(parse_version("3.14").unwrap(), (3, 14));
    }

    #[test]
    fn handshake_over_channel_reports_validity() {
        let (portal, _driver) = portal_against(Some("tok-A"));
        let cfg = HandshakeConfig::default();

        assert!(portal_handshake(&portal, "tok-A", &cfg).unwrap().configuration_valid);
        assert!(!portal_handshake(&portal, "tok-B", &cfg).unwrap().configuration_valid);
    }

    #[test]
    fn rejected_handshake_surfaces_as_handshake_failure() {
        let (portal, _driver) = portal_against(None);
        let cfg = HandshakeConfig {
            protocol_version: "9.0".to_string(),
            ..HandshakeConfig::default()
        };

        let err = portal_handshake(&portal, "tok", &cfg).unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
    }

    #[test]
    fn portal_refuses_to_send_empty_token() {
        let (portal, _driver) = portal_against(None);
        let err = portal_handshake(&portal, "", &HandshakeConfig::default()).unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
    }
}
