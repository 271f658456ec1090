mod support;

use crun_docker::{
    ContainerClient, DockerError, EventSubscriber, ImageClient, LogStreamer, StreamError,
    SystemClient, Transport, TransportError,
};
use crun_types::{ClientConfig, ContainerSpec, EventFilter, EventType, LogOptions, LogStreamKind};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{log_frame, FakeDaemon, Handler, Reply};

fn transport_for(daemon: &FakeDaemon) -> Arc<Transport> {
    Arc::new(Transport::new(&ClientConfig::unix(daemon.socket())))
}

#[tokio::test]
async fn version_and_ping_round_trip() {
    let handler: Handler = Arc::new(|req| match (req.method.as_str(), req.path()) {
        ("GET", "/version") => Reply::Json {
            status: 200,
            body: r#"{"Version":"26.1.0","ApiVersion":"1.46","Os":"linux","Arch":"amd64"}"#
                .to_owned(),
        },
        ("GET", "/_ping") => Reply::Json {
            status: 200,
            body: "OK".to_owned(),
        },
        _ => Reply::Error {
            status: 404,
            message: "no such route".to_owned(),
        },
    });
    let daemon = FakeDaemon::start(handler).await;
    let system = SystemClient::new(transport_for(&daemon));

    let version = system.version().await.unwrap();
    assert_eq!(version.api_version.as_deref(), Some("1.46"));
    system.ping().await.unwrap();
}

#[tokio::test]
async fn create_returns_id_and_conflict_surfaces_verbatim() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_handler = calls.clone();
    let handler: Handler = Arc::new(move |req| {
        match (req.method.as_str(), req.path()) {
            ("POST", "/containers/create") => {
                assert!(req.query_contains("name=web-1"));
                // Body must be the wire-format create payload.
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                assert_eq!(body["Image"], "alpine:3.19");
                if calls_in_handler.fetch_add(1, Ordering::SeqCst) == 0 {
                    Reply::Json {
                        status: 201,
                        body: r#"{"Id":"deadbeef","Warnings":[]}"#.to_owned(),
                    }
                } else {
                    Reply::Error {
                        status: 409,
                        message: "Conflict. The container name \"/web-1\" is already in use"
                            .to_owned(),
                    }
                }
            }
            _ => Reply::Error {
                status: 404,
                message: "no such route".to_owned(),
            },
        }
    });
    let daemon = FakeDaemon::start(handler).await;
    let containers = ContainerClient::new(transport_for(&daemon));
    let spec = ContainerSpec::new("web-1", "alpine:3.19");

    let id = containers.create(&spec).await.unwrap();
    assert_eq!(id, "deadbeef");

    // The client does not resolve conflicts; that is orchestrator policy.
    let err = containers.create(&spec).await.unwrap_err();
    match err {
        DockerError::Api { status, message } => {
            assert_eq!(status, 409);
            assert!(message.contains("already in use"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn inspect_missing_container_carries_daemon_message() {
    let handler: Handler = Arc::new(|_| Reply::Error {
        status: 404,
        message: "No such container: ghost".to_owned(),
    });
    let daemon = FakeDaemon::start(handler).await;
    let containers = ContainerClient::new(transport_for(&daemon));

    let err = containers.inspect("ghost").await.unwrap_err();
    match err {
        DockerError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "No such container: ghost");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn event_stream_preserves_order_then_fails_on_disconnect() {
    let events = [
        r#"{"Type":"container","Action":"create","Actor":{"ID":"c1"},"timeNano":1}"#,
        r#"{"Type":"container","Action":"start","Actor":{"ID":"c1"},"timeNano":2}"#,
        r#"{"Type":"container","Action":"die","Actor":{"ID":"c1"},"timeNano":3}"#,
    ];
    let chunks: Vec<Vec<u8>> = events
        .iter()
        .map(|e| format!("{}\n", e).into_bytes())
        .collect();
    let handler: Handler = Arc::new(move |req| {
        assert_eq!(req.path(), "/events");
        Reply::Chunked {
            status: 200,
            chunks: chunks.clone(),
            clean_end: false,
        }
    });
    let daemon = FakeDaemon::start(handler).await;
    let subscriber = EventSubscriber::new(transport_for(&daemon));

    let mut stream = subscriber.subscribe(EventFilter::default()).await.unwrap();
    let mut actions = Vec::new();
    let mut timestamps = Vec::new();
    let disconnect = loop {
        match stream.next().await {
            Some(Ok(event)) => {
                assert_eq!(event.event_type, EventType::Container);
                actions.push(event.action.clone());
                timestamps.push(event.timestamp);
            }
            Some(Err(e)) => break e,
            None => panic!("infinite stream ended without an error"),
        }
    };

    assert_eq!(actions, vec!["create", "start", "die"]);
    assert_eq!(timestamps, vec![1, 2, 3]);
    assert!(matches!(
        disconnect,
        DockerError::Stream(StreamError::Disconnected)
    ));
}

#[tokio::test]
async fn finite_log_stream_delivers_frames_in_write_order() {
    let handler: Handler = Arc::new(|req| {
        assert_eq!(req.path(), "/containers/c1/logs");
        Reply::Chunked {
            status: 200,
            chunks: vec![
                log_frame(1, b"A\n"),
                log_frame(2, b"B\n"),
                log_frame(1, b"C\n"),
            ],
            clean_end: true,
        }
    });
    let daemon = FakeDaemon::start(handler).await;
    let streamer = LogStreamer::new(transport_for(&daemon));

    let mut stream = streamer
        .tail_logs("c1", LogOptions::default())
        .await
        .unwrap();
    let mut records = Vec::new();
    while let Some(item) = stream.next().await {
        records.push(item.unwrap());
    }

    let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["A", "B", "C"]);
    assert_eq!(records[0].stream, LogStreamKind::Stdout);
    assert_eq!(records[1].stream, LogStreamKind::Stderr);
}

#[tokio::test]
async fn followed_log_stream_surfaces_disconnect() {
    let handler: Handler = Arc::new(|_| Reply::Chunked {
        status: 200,
        chunks: vec![log_frame(1, b"alive\n")],
        clean_end: true,
    });
    let daemon = FakeDaemon::start(handler).await;
    let streamer = LogStreamer::new(transport_for(&daemon));

    let mut stream = streamer
        .tail_logs("c1", LogOptions::follow())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().message, "alive");
    // A followed stream never ends cleanly from the consumer's view.
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, DockerError::Stream(StreamError::Disconnected)));
}

#[tokio::test]
async fn unary_deadline_maps_to_timeout() {
    let handler: Handler = Arc::new(|_| Reply::Hang);
    let daemon = FakeDaemon::start(handler).await;
    let config =
        ClientConfig::unix(daemon.socket()).with_unary_timeout(Duration::from_millis(100));
    let system = SystemClient::new(Arc::new(Transport::new(&config)));

    let err = system.version().await.unwrap_err();
    assert!(matches!(
        err,
        DockerError::Transport(TransportError::Timeout)
    ));
}

#[tokio::test]
async fn dropped_connection_maps_to_reset() {
    let handler: Handler = Arc::new(|_| Reply::DropConnection);
    let daemon = FakeDaemon::start(handler).await;
    let system = SystemClient::new(transport_for(&daemon));

    let err = system.version().await.unwrap_err();
    assert!(matches!(
        err,
        DockerError::Transport(TransportError::ConnectionReset)
    ));
}

#[tokio::test]
async fn sequential_unary_calls_reuse_one_pooled_connection() {
    let handler: Handler = Arc::new(|_| Reply::Json {
        status: 200,
        body: r#"{"Version":"26.1.0"}"#.to_owned(),
    });
    let daemon = FakeDaemon::start(handler).await;
    let system = SystemClient::new(transport_for(&daemon));

    system.version().await.unwrap();
    system.version().await.unwrap();
    assert_eq!(daemon.connection_count(), 1);
}

#[tokio::test]
async fn pull_progress_stream_ends_cleanly() {
    let lines = [
        r#"{"status":"Pulling from library/alpine","id":"3.19"}"#,
        r#"{"status":"Downloading","progressDetail":{"current":10,"total":100}}"#,
        r#"{"status":"Download complete"}"#,
    ];
    let chunks: Vec<Vec<u8>> = lines
        .iter()
        .map(|l| format!("{}\n", l).into_bytes())
        .collect();
    let handler: Handler = Arc::new(move |req| {
        assert_eq!(req.path(), "/images/create");
        assert!(req.query_contains("fromImage=alpine"));
        assert!(req.query_contains("tag=3.19"));
        Reply::Chunked {
            status: 200,
            chunks: chunks.clone(),
            clean_end: true,
        }
    });
    let daemon = FakeDaemon::start(handler).await;
    let images = ImageClient::new(transport_for(&daemon));

    let mut stream = images.pull("alpine:3.19").await.unwrap();
    let mut statuses = Vec::new();
    while let Some(item) = stream.next().await {
        statuses.push(item.unwrap().status.unwrap());
    }
    assert_eq!(
        statuses,
        vec![
            "Pulling from library/alpine",
            "Downloading",
            "Download complete"
        ]
    );
}

#[tokio::test]
async fn stop_treats_not_modified_as_success() {
    let handler: Handler = Arc::new(|req| match req.path() {
        "/containers/c1/stop" => Reply::Status(304),
        _ => Reply::Error {
            status: 404,
            message: "no such route".to_owned(),
        },
    });
    let daemon = FakeDaemon::start(handler).await;
    let containers = ContainerClient::new(transport_for(&daemon));

    containers.stop("c1", Some(Duration::from_secs(2))).await.unwrap();
}
