//! russh handler for one client connection
//!
//! Every callback is translated into a [`Dispatcher`] call; the handler
//! itself only owns the glue to russh's channel and reply types.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodSet};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;

use sg_core::config::GatewayConfig;
use sg_core::{ConnectionId, EncodedPublicKey};
use sg_protocol::{ChannelKind, ControlRequest, RequestReply, TerminalDimensions};

use crate::dispatch::Dispatcher;
use crate::session::{ChannelControl, SessionIo};
use crate::state::GatewayState;

/// A russh channel as seen by its session
pub struct RusshChannel {
    handle: Handle,
    id: ChannelId,
}

impl RusshChannel {
    pub fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

#[async_trait]
impl ChannelControl for RusshChannel {
    async fn exit_status(&self, code: u32) {
        if self.handle.exit_status_request(self.id, code).await.is_err() {
            tracing::debug!("Could not send exit status on {:?}", self.id);
        }
    }

    async fn close(&self) {
        let _ = self.handle.eof(self.id).await;
        if self.handle.close(self.id).await.is_err() {
            tracing::debug!("Channel {:?} already gone", self.id);
        }
    }
}

/// Handler for a single SSH client connection
pub struct ConnectionHandler {
    /// Peer address of the connecting client
    peer_addr: Option<SocketAddr>,
    /// Channel routing for this connection
    dispatcher: Dispatcher<ChannelId>,
}

impl ConnectionHandler {
    pub fn new(
        connection: ConnectionId,
        state: Arc<GatewayState>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            peer_addr,
            dispatcher: Dispatcher::new(connection, state),
        }
    }

    /// Admit a channel of `kind`, answering whether russh should confirm it
    fn open(&mut self, channel: Channel<Msg>, kind: ChannelKind, session: &mut Session) -> bool {
        let id = channel.id();
        let handle = session.handle();
        let io = move || {
            let (reader, writer) = tokio::io::split(channel.into_stream());
            SessionIo {
                reader,
                writer,
                control: RusshChannel::new(handle, id),
            }
        };

        match self.dispatcher.open_channel(id, &kind, io) {
            Ok(session_id) => {
                tracing::debug!("Channel {:?} attached to {}", id, session_id);
                true
            }
            Err(e) => {
                tracing::debug!("Channel {:?} refused: {}", id, e);
                false
            }
        }
    }

    fn request(&mut self, channel: ChannelId, request: ControlRequest, session: &mut Session) {
        let reply = self.dispatcher.route_request(channel, request);
        send_reply(session, channel, reply);
    }
}

fn send_reply(session: &mut Session, channel: ChannelId, reply: RequestReply) {
    match reply {
        RequestReply::Success => {
            let _ = session.channel_success(channel);
        }
        RequestReply::Failure => {
            let _ = session.channel_failure(channel);
        }
        RequestReply::Silent => {}
    }
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        tracing::debug!(
            "Auth attempt from {:?} as {}, key fingerprint: {}",
            self.peer_addr,
            user,
            public_key.fingerprint()
        );

        let key = EncodedPublicKey::new(public_key.name(), public_key.public_key_base64());
        if self.dispatcher.authenticate(user, key).await {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::Session, session))
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::X11, session))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::DirectTcpip, session))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(channel, ChannelKind::ForwardedTcpip, session))
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ControlRequest::PtyRequest {
            term: term.to_string(),
            dims: TerminalDimensions::new(col_width, row_height),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ControlRequest::Shell {
            payload: Bytes::new(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::warn!("Refusing exec of {} bytes on {:?}", data.len(), channel);
        let request = ControlRequest::Other {
            kind: "exec".to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("Ignoring env {} on {:?}", variable_name, channel);
        let request = ControlRequest::Other {
            kind: "env".to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Refusing subsystem {} on {:?}", name, channel);
        let request = ControlRequest::Other {
            kind: "subsystem".to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ControlRequest::WindowChange {
            dims: TerminalDimensions::new(col_width, row_height),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        _address: &str,
        _port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.dispatcher.global_request("tcpip-forward"))
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.dispatcher.global_request("cancel-tcpip-forward"))
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        self.dispatcher.close_channel(channel);
        Ok(())
    }
}

/// russh server configuration
#[derive(Clone)]
pub struct ServerConfig {
    pub ssh_config: Arc<russh::server::Config>,
}

impl ServerConfig {
    /// Build the russh configuration for `host_key` and the gateway settings
    pub fn new(host_key: KeyPair, config: &GatewayConfig) -> Self {
        let mut ssh_config = russh::server::Config::default();
        ssh_config.keys.push(host_key);
        ssh_config.methods = MethodSet::PUBLICKEY;
        ssh_config.auth_rejection_time = config.auth.auth_rejection_time;
        ssh_config.auth_rejection_time_initial = Some(Duration::ZERO);
        ssh_config.inactivity_timeout = config.limits.inactivity_timeout;

        Self {
            ssh_config: Arc::new(ssh_config),
        }
    }
}
