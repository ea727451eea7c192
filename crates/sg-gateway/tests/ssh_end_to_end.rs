//! Full SSH round trips through a running gateway

#![cfg(unix)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use sg_core::config::{CommandConfig, GatewayConfig};
use sg_gateway::auth::AuthorizedKeysVerifier;
use sg_gateway::pty::NativePtySpawner;
use sg_gateway::resolver::TemplateResolver;
use sg_gateway::server::GatewayServer;
use sg_gateway::GatewayState;

const TIMEOUT: Duration = Duration::from_secs(10);

struct TrustingClient;

#[async_trait]
impl client::Handler for TrustingClient {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct Gateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
    _keys: tempfile::TempDir,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a gateway on a loopback port that lets `alice` in with `alice_key`
async fn start_gateway(alice_key: &KeyPair, script: &str) -> Gateway {
    let keys = tempfile::tempdir().unwrap();
    let public = alice_key.clone_public_key().unwrap();
    std::fs::write(
        keys.path().join("alice"),
        format!("{} {} alice@test\n", public.name(), public.public_key_base64()),
    )
    .unwrap();

    let mut config = GatewayConfig::default();
    config.auth.auth_rejection_time = Duration::from_millis(10);
    let command = CommandConfig {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: Default::default(),
        cwd: None,
    };

    let state = Arc::new(GatewayState::new(
        config,
        Arc::new(AuthorizedKeysVerifier::new(keys.path())),
        Arc::new(TemplateResolver::new(command)),
        Arc::new(NativePtySpawner),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = GatewayServer::new(
        KeyPair::generate_ed25519().unwrap(),
        Arc::clone(&state),
        cancel.clone(),
    );
    tokio::spawn(async move { server.run_on(listener).await });

    Gateway {
        addr,
        state,
        cancel,
        _keys: keys,
    }
}

async fn connect(addr: SocketAddr) -> Handle<TrustingClient> {
    let config = Arc::new(client::Config::default());
    client::connect(config, addr, TrustingClient).await.unwrap()
}

#[tokio::test]
async fn interactive_session_round_trip() {
    let alice = KeyPair::generate_ed25519().unwrap();
    let gateway = start_gateway(&alice, "read line; echo \"got:$line\"; exit 7").await;

    let mut session = connect(gateway.addr).await;
    assert!(session
        .authenticate_publickey("alice", Arc::new(alice))
        .await
        .unwrap());

    let mut channel = session.channel_open_session().await.unwrap();
    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    channel.request_shell(true).await.unwrap();
    channel.data(&b"hello\n"[..]).await.unwrap();

    let mut output = Vec::new();
    let mut successes = 0;
    let mut exit_status = None;
    tokio::time::timeout(TIMEOUT, async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::Success => successes += 1,
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(successes, 2, "pty-req and shell are both acknowledged");
    assert!(String::from_utf8_lossy(&output).contains("got:hello"));
    assert_eq!(exit_status, Some(7), "exit-status precedes the close");
}

#[tokio::test]
async fn unknown_key_is_rejected() {
    let alice = KeyPair::generate_ed25519().unwrap();
    let gateway = start_gateway(&alice, "true").await;

    let mut session = connect(gateway.addr).await;
    let intruder = KeyPair::generate_ed25519().unwrap();
    assert!(!session
        .authenticate_publickey("alice", Arc::new(intruder))
        .await
        .unwrap());
    assert_eq!(gateway.state.active_sessions(), 0);
}

#[tokio::test]
async fn forwarding_channels_are_refused() {
    let alice = KeyPair::generate_ed25519().unwrap();
    let gateway = start_gateway(&alice, "sleep 5").await;

    let mut session = connect(gateway.addr).await;
    assert!(session
        .authenticate_publickey("alice", Arc::new(alice))
        .await
        .unwrap());

    let result = session
        .channel_open_direct_tcpip("localhost", 80, "127.0.0.1", 4000)
        .await;
    assert!(result.is_err());
    assert_eq!(gateway.state.active_sessions(), 0);

    // The connection survives the refusal
    let channel = session.channel_open_session().await;
    assert!(channel.is_ok());
}

#[tokio::test]
async fn exec_is_refused() {
    let alice = KeyPair::generate_ed25519().unwrap();
    let gateway = start_gateway(&alice, "sleep 5").await;

    let mut session = connect(gateway.addr).await;
    assert!(session
        .authenticate_publickey("alice", Arc::new(alice))
        .await
        .unwrap());

    let mut channel = session.channel_open_session().await.unwrap();
    channel.exec(true, "cat /etc/passwd").await.unwrap();

    let reply = tokio::time::timeout(TIMEOUT, async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Failure) => return true,
                Some(ChannelMsg::Success) | None => return false,
                Some(_) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(reply);
}
