//! Wire constants shared by both ends of the tunnel handshake.
//!
//! The handshake is a literal HTTP/1.1 upgrade exchange; these are the only
//! protocol elements either side ever emits or matches. Header names are
//! matched case-insensitively on receipt, as HTTP requires.

/// Fixed request path of the tunnel endpoint on a gateway.
pub const TUNNEL_PATH: &str = "/ssh";

/// Value of the `Upgrade` header in both request and response.
pub const UPGRADE_PROTOCOL: &str = "ssh";

/// Expected value of the `Connection` header in the upgrade response.
pub const CONNECTION_TOKEN: &str = "upgrade";

/// Request header naming the target workload.
pub const HEADER_TARGET: &str = "X-Palisade-Target";

/// Request header carrying the hex request proof.
pub const HEADER_AUTHORIZATION: &str = "X-Palisade-Authorization";

/// Response header carrying the hex response proof.
pub const HEADER_AUTHORIZATION_RESPONSE: &str = "X-Palisade-Authorization-Response";

/// Request header carrying the detach key sequence, forwarded verbatim.
pub const HEADER_DETACH_KEYS: &str = "X-Palisade-Detach-Keys";

/// Request header carrying the login username, forwarded verbatim.
pub const HEADER_LOGIN_USERNAME: &str = "X-Palisade-Login-Username";
