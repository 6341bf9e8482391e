//! WebSocket opening handshake (RFC 6455 §4.2) over a hyper connection upgrade.

use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;

pub type Socket = Framed<TokioIo<Upgraded>, FrameCodec>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum UpgradeRejection {
    #[error("expected GET method")]
    MethodNotGet,
    #[error("expected Upgrade: websocket")]
    NotWebSocket,
    #[error("expected Connection: upgrade")]
    MissingConnectionUpgrade,
    #[error("unsupported Sec-WebSocket-Version")]
    UnsupportedVersion,
    #[error("missing Sec-WebSocket-Key")]
    MissingKey,
    #[error("connection is not upgradable")]
    NotUpgradable,
}

impl IntoResponse for UpgradeRejection {
    fn into_response(self) -> Response {
        let body = self.to_string();
        match self {
            Self::MethodNotGet | Self::MissingConnectionUpgrade | Self::MissingKey => {
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            Self::UnsupportedVersion => (
                StatusCode::UPGRADE_REQUIRED,
                [(header::SEC_WEBSOCKET_VERSION, "13")],
                body,
            )
                .into_response(),
            Self::NotWebSocket | Self::NotUpgradable => {
                (StatusCode::UPGRADE_REQUIRED, body).into_response()
            }
        }
    }
}

/// A validated upgrade request whose connection has not been taken over yet.
pub struct Upgrade {
    on_upgrade: OnUpgrade,
    accept_key: String,
}

impl Upgrade {
    /// Validate the handshake headers and claim the connection's upgrade slot.
    pub fn negotiate(request: &mut Request) -> Result<Self, UpgradeRejection> {
        if request.method() != axum::http::Method::GET {
            return Err(UpgradeRejection::MethodNotGet);
        }
        let accept_key = accept_key(request.headers())?;
        let on_upgrade = request
            .extensions_mut()
            .remove::<OnUpgrade>()
            .ok_or(UpgradeRejection::NotUpgradable)?;
        Ok(Self {
            on_upgrade,
            accept_key,
        })
    }

    /// The 101 response completing the handshake.
    pub fn response(&self) -> Response {
        (
            StatusCode::SWITCHING_PROTOCOLS,
            [
                (header::CONNECTION, "upgrade".to_string()),
                (header::UPGRADE, "websocket".to_string()),
                (header::SEC_WEBSOCKET_ACCEPT, self.accept_key.clone()),
            ],
        )
            .into_response()
    }

    /// Wait for hyper to hand over the connection once the 101 was sent.
    pub async fn into_socket(self, max_frame_size: usize) -> Result<Socket, hyper::Error> {
        let upgraded = self.on_upgrade.await?;
        Ok(Framed::new(
            TokioIo::new(upgraded),
            FrameCodec::new(max_frame_size),
        ))
    }
}

fn accept_key(headers: &HeaderMap) -> Result<String, UpgradeRejection> {
    if !header_is(headers, &header::UPGRADE, "websocket") {
        return Err(UpgradeRejection::NotWebSocket);
    }
    if !header_has_token(headers, &header::CONNECTION, "upgrade") {
        return Err(UpgradeRejection::MissingConnectionUpgrade);
    }
    if !header_is(headers, &header::SEC_WEBSOCKET_VERSION, "13") {
        return Err(UpgradeRejection::UnsupportedVersion);
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(UpgradeRejection::MissingKey)?;
    Ok(derive_accept_key(key.as_bytes()))
}

/// Case-insensitive comparison of a single-valued header.
fn header_is(headers: &HeaderMap, name: &HeaderName, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    fn handshake_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        headers
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key(&handshake_headers()).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn upgrade_header_is_case_insensitive() {
        let mut headers = handshake_headers();
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(accept_key(&headers).is_ok());
    }

    #[test]
    fn rejects_missing_pieces() {
        let mut headers = handshake_headers();
        headers.remove(header::SEC_WEBSOCKET_KEY);
        assert_eq!(accept_key(&headers), Err(UpgradeRejection::MissingKey));

        let mut headers = handshake_headers();
        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        assert_eq!(accept_key(&headers), Err(UpgradeRejection::UnsupportedVersion));

        let mut headers = handshake_headers();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert_eq!(
            accept_key(&headers),
            Err(UpgradeRejection::MissingConnectionUpgrade)
        );
    }

    #[test]
    fn request_without_upgrade_slot_is_not_upgradable() {
        let mut request = Request::builder()
            .uri("/websocket")
            .body(Body::empty())
            .unwrap();
        *request.headers_mut() = handshake_headers();
        let err = Upgrade::negotiate(&mut request).err().unwrap();
        assert_eq!(err, UpgradeRejection::NotUpgradable);
        assert_eq!(err.into_response().status(), StatusCode::UPGRADE_REQUIRED);
    }
}
