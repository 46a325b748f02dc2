use std::time::Duration;

use gymproxy::{ClientError, RemoteEnv};
use gymproxy_core::{Endpoint, Fields, Map, RpcReply, SetupParams, SetupResult, Value};
use gymproxy_ipc::{
    ProxyListener, ProxyTransport,
    codec::{decode_request, encode_reply},
    framing::{read_message, write_message},
};
use gymproxyd::{ProxyServer, counter::OpCounter};
use tempfile::tempdir;
use tokio::{
    io::{DuplexStream, duplex},
    sync::oneshot,
    time::{sleep, timeout},
};

async fn spawn_server(endpoint: Endpoint) -> (ProxyServer, String) {
    let server = ProxyServer::builtin(OpCounter::default());
    let listener = ProxyListener::bind(&endpoint)
        .await
        .expect("listener should bind");
    let url = listener.local_endpoint().to_string();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    (server, url)
}

#[tokio::test]
async fn toy_episode_over_tcp() {
    let (_server, url) = spawn_server(Endpoint::Tcp("127.0.0.1:0".to_string())).await;
    let mut env = RemoteEnv::connect(&url, SetupParams::new("Toy-v0"))
        .await
        .expect("connect");

    assert_eq!(env.url(), url);
    assert_eq!(env.reward_range(), (0.0, 1.0));
    assert_eq!(
        env.action_space().as_map().and_then(|space| space.get("type")),
        Some(&Value::from("Discrete"))
    );
    let session_id = env.session_id().cloned().expect("session id");
    assert_eq!(session_id.as_str().len(), 32);

    let outcome = env.step(Value::Int(1)).await.expect("step");
    assert_eq!(outcome.reward, 1.0);
    assert!(!outcome.done);
    assert_eq!(
        outcome.obs.as_tensor().and_then(|obs| obs.to_vec::<f32>()),
        Some(vec![1.0, 1.0])
    );

    let text = env.render("ansi", false).await.expect("render");
    assert_eq!(text, Some(Value::from("......x....")));
    assert_eq!(env.render("human", false).await.expect("render"), None);

    let obs = env.reset().await.expect("reset");
    assert_eq!(
        obs.as_tensor().and_then(|obs| obs.to_vec::<f32>()),
        Some(vec![0.0, 0.0])
    );

    env.close().await.expect("close");
    assert!(env.session_id().is_none());
    assert!(matches!(
        env.step(Value::Int(0)).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn environment_errors_surface_verbatim() {
    let dir = tempdir().expect("tempdir");
    let (_server, url) = spawn_server(Endpoint::Ipc(dir.path().join("gym.sock"))).await;
    let mut env = RemoteEnv::connect(&url, SetupParams::new("Toy-v0"))
        .await
        .expect("connect");

    match env.render("hologram", false).await {
        Err(ClientError::Remote(message)) => {
            assert_eq!(message, "unsupported render mode hologram")
        }
        other => panic!("unexpected render result: {other:?}"),
    }
    env.step(Value::Int(0)).await.expect("session still usable");

    match RemoteEnv::connect(&url, SetupParams::new("Missing-v0")).await {
        Err(ClientError::Remote(message)) => {
            assert_eq!(message, "unknown environment Missing-v0")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("setup of an unknown env should fail"),
    }
}

#[tokio::test]
async fn url_variables_are_expanded() {
    let (_server, url) = spawn_server(Endpoint::Tcp("127.0.0.1:0".to_string())).await;
    let port = url.rsplit(':').next().expect("port").to_string();
    // SAFETY: no other test in this binary reads this variable.
    unsafe { std::env::set_var("GYMPROXY_TEST_PORT", &port) };

    let env = RemoteEnv::connect("tcp://127.0.0.1:$GYMPROXY_TEST_PORT", SetupParams::new("Toy-v0"))
        .await
        .expect("connect through expanded url");
    assert_eq!(env.url(), url);
}

#[tokio::test]
async fn dropped_client_releases_the_server_session() {
    let (server, url) = spawn_server(Endpoint::Tcp("127.0.0.1:0".to_string())).await;
    let env = RemoteEnv::connect(&url, SetupParams::new("Toy-v0"))
        .await
        .expect("connect");
    drop(env);

    timeout(Duration::from_secs(5), async {
        while server.state().is_active().expect("lock") {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server should release the session");

    let mut env = RemoteEnv::connect(&url, SetupParams::new("Toy-v0"))
        .await
        .expect("fresh session after reconnect");
    env.step(Value::Int(0)).await.expect("step");
}

/// Answers `setup` normally, then replies to everything with another session.
async fn stale_server(mut stream: DuplexStream) {
    let mut answered_setup = false;
    while let Ok(frames) = read_message(&mut stream).await {
        let request = decode_request(frames).expect("request");
        let session_id = if answered_setup { "someone-else" } else { "abc123" };
        answered_setup = true;

        let result = match request.method.as_str() {
            "setup" => SetupResult {
                action_space: Value::Null,
                observation_space: Value::Null,
                reward_range: (f64::NEG_INFINITY, f64::INFINITY),
                session_id: session_id.into(),
            }
            .into_map(),
            _ => Map::from([
                ("obs".to_string(), Value::Int(0)),
                ("session_id".to_string(), Value::from(session_id)),
            ]),
        };
        let frames = encode_reply(RpcReply::ok(result)).expect("reply");
        write_message(&mut stream, &frames).await.expect("write");
    }
}

#[tokio::test]
async fn reply_for_another_session_is_rejected() {
    let (client_io, server_io) = duplex(64 * 1024);
    tokio::spawn(stale_server(server_io));

    let transport = ProxyTransport::from_stream(client_io, "duplex://stale");
    let mut env = RemoteEnv::with_transport(transport, SetupParams::new("Toy-v0"))
        .await
        .expect("setup");
    assert_eq!(env.reward_range(), (f64::NEG_INFINITY, f64::INFINITY));

    match env.reset().await {
        Err(ClientError::SessionIdentity { expected, actual }) => {
            assert_eq!(expected.as_str(), "abc123");
            assert_eq!(actual.as_str(), "someone-else");
        }
        other => panic!("unexpected reset result: {other:?}"),
    }
}

/// Answers `setup` and `close` for session `abc123`; reports when the client
/// hangs up.
async fn recording_server(mut stream: DuplexStream, hung_up: oneshot::Sender<()>) {
    while let Ok(frames) = read_message(&mut stream).await {
        let request = decode_request(frames).expect("request");
        let result = match request.method.as_str() {
            "setup" => SetupResult {
                action_space: Value::Null,
                observation_space: Value::Null,
                reward_range: (0.0, 1.0),
                session_id: "abc123".into(),
            }
            .into_map(),
            _ => Map::from([("session_id".to_string(), Value::from("abc123"))]),
        };
        let frames = encode_reply(RpcReply::ok(result)).expect("reply");
        write_message(&mut stream, &frames).await.expect("write");
    }
    let _ = hung_up.send(());
}

#[tokio::test]
async fn close_keeps_the_connection_open() {
    let (client_io, server_io) = duplex(64 * 1024);
    let (hung_up_tx, mut hung_up_rx) = oneshot::channel();
    tokio::spawn(recording_server(server_io, hung_up_tx));

    let transport = ProxyTransport::from_stream(client_io, "duplex://close");
    let mut env = RemoteEnv::with_transport(transport, SetupParams::new("Toy-v0"))
        .await
        .expect("setup");
    env.close().await.expect("close");
    assert!(env.session_id().is_none());
    assert!(matches!(env.reset().await, Err(ClientError::NotConnected)));

    assert!(
        timeout(Duration::from_millis(100), &mut hung_up_rx)
            .await
            .is_err(),
        "connection must stay open after close"
    );

    drop(env);
    timeout(Duration::from_secs(5), hung_up_rx)
        .await
        .expect("server sees the hang-up")
        .expect("server task alive");
}
