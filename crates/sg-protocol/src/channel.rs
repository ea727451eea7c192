//! Channel types offered by clients

use std::fmt;

/// The type named in a channel-open request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Interactive session (`session`)
    Session,
    /// X11 forwarding (`x11`)
    X11,
    /// Local port forwarding (`direct-tcpip`)
    DirectTcpip,
    /// Remote port forwarding (`forwarded-tcpip`)
    ForwardedTcpip,
    /// Unix socket forwarding (`direct-streamlocal@openssh.com`)
    DirectStreamLocal,
    /// Anything else
    Other(String),
}

impl ChannelKind {
    /// Parse a channel type string
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "session" => Self::Session,
            "x11" => Self::X11,
            "direct-tcpip" => Self::DirectTcpip,
            "forwarded-tcpip" => Self::ForwardedTcpip,
            "direct-streamlocal@openssh.com" => Self::DirectStreamLocal,
            other => Self::Other(other.to_string()),
        }
    }

    /// The channel type as it appears on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::Session => "session",
            Self::X11 => "x11",
            Self::DirectTcpip => "direct-tcpip",
            Self::ForwardedTcpip => "forwarded-tcpip",
            Self::DirectStreamLocal => "direct-streamlocal@openssh.com",
            Self::Other(kind) => kind,
        }
    }

    /// Whether this channel carries an interactive session
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Session)
    }

    /// Rejection text for channel types the gateway does not serve
    pub fn rejection_reason(&self) -> String {
        format!("unknown channel type: {}", self.as_str())
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
