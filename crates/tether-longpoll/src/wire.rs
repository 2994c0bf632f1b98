//! Wire sub-protocol of the long-polling transport.
//!
//! Every exchange carries its routing information in the query string:
//!
//! | Parameter   | Meaning                                                     |
//! |-------------|-------------------------------------------------------------|
//! | `when`      | `open` (handshake), `poll` (reconnect / probe), `abort`     |
//! | `id`        | Session id, required for everything but `open`              |
//! | `transport` | Optional selector, must name a long-polling variant         |
//! | `jsonp`     | `"true"` to wrap frames as script callbacks                 |
//! | `callback`  | Callback name, required when `jsonp=true`                   |
//!
//! The handshake answer is `?id=<id>` (form-urlencoded). Frames are sent raw,
//! or as `<callback>(<json string literal>);` for JSONP sessions. Client to
//! server messages are `POST`ed as `data=<payload>`.

use std::fmt;
use std::str::FromStr;

use tether_traits::{TransportError, TransportResult};
use url::form_urlencoded;

/// Transport selector values accepted in the `transport` parameter.
pub const LONGPOLL_TRANSPORTS: [&str; 3] = ["longpollajax", "longpollxdr", "longpolljsonp"];

/// Content type of plain frames.
pub const CONTENT_TYPE_PLAIN: &str = "text/plain; charset=utf-8";

/// Content type of callback-wrapped frames.
pub const CONTENT_TYPE_JAVASCRIPT: &str = "text/javascript; charset=utf-8";

/// Prefix of client-to-server message bodies.
pub const MESSAGE_BODY_PREFIX: &str = "data=";

const MAX_CALLBACK_LEN: usize = 128;

/// Kind of exchange, taken from the `when` query parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum When {
    /// First exchange of a session; answered with the handshake.
    Open,
    /// Reconnect that binds the exchange as the live channel.
    Poll,
    /// Client-initiated close.
    Abort,
}

impl When {
    /// Query parameter value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Poll => "poll",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for When {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "poll" => Ok(Self::Poll),
            "abort" => Ok(Self::Abort),
            other => Err(TransportError::ProtocolError(format!(
                "unknown `when` value: {other}"
            ))),
        }
    }
}

/// How frames are written to the response body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ResponseEncoding {
    /// Frames are sent verbatim.
    #[default]
    Plain,
    /// Frames are sent as `<callback>(<json string>);`.
    Callback(String),
}

impl ResponseEncoding {
    /// Content type matching this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Plain => CONTENT_TYPE_PLAIN,
            Self::Callback(_) => CONTENT_TYPE_JAVASCRIPT,
        }
    }

    /// Formats a frame for the response body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerializationFailed`] if the frame cannot be
    /// encoded as a JSON string literal.
    pub fn format(&self, frame: &str) -> TransportResult<String> {
        match self {
            Self::Plain => Ok(frame.to_string()),
            Self::Callback(callback) => {
                let literal = serde_json::to_string(frame)?;
                Ok(format!("{callback}({literal});"))
            }
        }
    }

    /// Returns `true` for callback-wrapped sessions.
    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }
}

/// Routing information parsed from an exchange's query string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollQuery {
    /// Session id.
    pub id: Option<String>,
    /// Exchange kind.
    pub when: Option<When>,
    /// Transport selector.
    pub transport: Option<String>,
    /// JSONP requested.
    pub jsonp: bool,
    /// JSONP callback name.
    pub callback: Option<String>,
}

impl PollQuery {
    /// Parses a raw query string (without the leading `?`).
    ///
    /// Unknown parameters are ignored; the first occurrence of a repeated
    /// parameter wins.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolError`] for an unknown `when` value.
    pub fn parse(query: &str) -> TransportResult<Self> {
        let mut parsed = Self::default();
        let mut when = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "id" if parsed.id.is_none() => parsed.id = Some(value.into_owned()),
                "when" if when.is_none() => when = Some(value.into_owned()),
                "transport" if parsed.transport.is_none() => {
                    parsed.transport = Some(value.into_owned());
                }
                "jsonp" => parsed.jsonp = value == "true",
                "callback" if parsed.callback.is_none() => {
                    parsed.callback = Some(value.into_owned());
                }
                _ => {}
            }
        }
        parsed.when = when.as_deref().map(When::from_str).transpose()?;
        Ok(parsed)
    }

    /// Parses the query part of a request URI.
    ///
    /// # Errors
    ///
    /// See [`PollQuery::parse`].
    pub fn from_uri(uri: &str) -> TransportResult<Self> {
        Self::parse(uri.split_once('?').map_or("", |(_, query)| query))
    }

    /// Session id, required for every exchange except the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolError`] if `id` is missing or empty.
    pub fn require_id(&self) -> TransportResult<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransportError::ProtocolError("missing `id` parameter".into()))
    }

    /// Checks the optional transport selector.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolError`] if the selector names a
    /// transport other than long polling.
    pub fn check_transport(&self) -> TransportResult<()> {
        match self.transport.as_deref() {
            None => Ok(()),
            Some(name) if LONGPOLL_TRANSPORTS.contains(&name) => Ok(()),
            Some(other) => Err(TransportError::ProtocolError(format!(
                "unsupported transport: {other}"
            ))),
        }
    }

    /// Response encoding requested by this query.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolError`] when `jsonp=true` comes
    /// without a valid `callback`.
    pub fn encoding(&self) -> TransportResult<ResponseEncoding> {
        if !self.jsonp {
            return Ok(ResponseEncoding::Plain);
        }
        let callback = self.callback.as_deref().ok_or_else(|| {
            TransportError::ProtocolError("`jsonp=true` requires a `callback` parameter".into())
        })?;
        if !is_valid_callback(callback) {
            return Err(TransportError::ProtocolError(format!(
                "invalid callback name: {callback}"
            )));
        }
        Ok(ResponseEncoding::Callback(callback.to_string()))
    }
}

/// Callback names are limited to identifier characters and dots.
fn is_valid_callback(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CALLBACK_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'))
}

/// Handshake payload announcing the session id, before encoding.
pub fn handshake_body(id: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("id", id)
        .finish();
    format!("?{query}")
}

/// Extracts the message from a client-to-server `POST` body.
///
/// # Errors
///
/// Returns [`TransportError::ProtocolError`] if the body lacks the `data=` prefix.
pub fn decode_message_body(body: &str) -> TransportResult<String> {
    body.strip_prefix(MESSAGE_BODY_PREFIX)
        .map(str::to_string)
        .ok_or_else(|| TransportError::ProtocolError("message body must start with `data=`".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_query() {
        let query =
            PollQuery::parse("when=poll&id=abc-1&transport=longpolljsonp&jsonp=true&callback=cb")
                .expect("valid query");
        assert_eq!(
            query,
            PollQuery {
                id: Some("abc-1".into()),
                when: Some(When::Poll),
                transport: Some("longpolljsonp".into()),
                jsonp: true,
                callback: Some("cb".into()),
            }
        );
    }

    #[test]
    fn test_parse_from_uri_decodes_values() {
        let query = PollQuery::from_uri("/vibe?when=open&id=a%20b&_=1699").expect("valid query");
        assert_eq!(query.when, Some(When::Open));
        assert_eq!(query.id.as_deref(), Some("a b"));
        assert!(!query.jsonp);
    }

    #[test]
    fn test_unknown_when_is_protocol_error() {
        let err = PollQuery::parse("when=sometimes").expect_err("unknown when");
        assert!(matches!(err, TransportError::ProtocolError(_)));
    }

    #[test]
    fn test_require_id() {
        assert!(PollQuery::parse("when=poll").unwrap().require_id().is_err());
        assert!(PollQuery::parse("when=poll&id=").unwrap().require_id().is_err());
        assert_eq!(PollQuery::parse("id=x").unwrap().require_id().unwrap(), "x");
    }

    #[test]
    fn test_transport_selector() {
        assert!(PollQuery::parse("when=open").unwrap().check_transport().is_ok());
        assert!(
            PollQuery::parse("transport=longpollxdr")
                .unwrap()
                .check_transport()
                .is_ok()
        );
        assert!(PollQuery::parse("transport=ws").unwrap().check_transport().is_err());
    }

    #[test]
    fn test_jsonp_requires_callback() {
        let query = PollQuery::parse("when=open&jsonp=true").unwrap();
        assert!(matches!(query.encoding(), Err(TransportError::ProtocolError(_))));

        let query = PollQuery::parse("when=open&jsonp=true&callback=alert(1)//").unwrap();
        assert!(query.encoding().is_err());

        let query = PollQuery::parse("when=open&jsonp=true&callback=jQuery.cb_1").unwrap();
        assert_eq!(
            query.encoding().unwrap(),
            ResponseEncoding::Callback("jQuery.cb_1".into())
        );
    }

    #[test]
    fn test_jsonp_false_ignores_callback() {
        let query = PollQuery::parse("jsonp=false&callback=cb").unwrap();
        assert_eq!(query.encoding().unwrap(), ResponseEncoding::Plain);
    }

    #[test]
    fn test_plain_format_is_verbatim() {
        let encoding = ResponseEncoding::Plain;
        assert_eq!(encoding.format("a \"quoted\" frame").unwrap(), "a \"quoted\" frame");
        assert_eq!(encoding.content_type(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_callback_format_escapes_payload() {
        let encoding = ResponseEncoding::Callback("cb".into());
        assert_eq!(encoding.format("42").unwrap(), r#"cb("42");"#);
        assert_eq!(
            encoding.format("line\n\"q\"").unwrap(),
            r#"cb("line\n\"q\"");"#
        );
        assert_eq!(encoding.content_type(), "text/javascript; charset=utf-8");
    }

    #[test]
    fn test_handshake_body() {
        assert_eq!(handshake_body("abc"), "?id=abc");
        assert_eq!(handshake_body("a b&c"), "?id=a+b%26c");
    }

    #[test]
    fn test_decode_message_body() {
        assert_eq!(decode_message_body("data=hello").unwrap(), "hello");
        assert_eq!(decode_message_body("data=").unwrap(), "");
        assert!(decode_message_body("hello").is_err());
    }
}
