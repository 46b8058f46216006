use std::sync::Arc;
use std::time::Duration;

use engine_gateway::scripted::{ScriptedEngine, ScriptedReply};
use engine_gateway::{Availability, EngineGateway, EngineKind, EngineOptions, GatewayError};
use futures::StreamExt;

fn gateway(fast: &ScriptedEngine, deep: &ScriptedEngine) -> EngineGateway {
    EngineGateway::new()
        .with_engine(Arc::new(fast.clone()))
        .with_engine(Arc::new(deep.clone()))
}

#[tokio::test]
async fn ready_fast_engine_with_unsupported_deep_engine() {
    let fast = ScriptedEngine::ready(EngineKind::Fast)
        .with_reply(ScriptedReply::text("Summary: fox."));
    let deep = ScriptedEngine::new(EngineKind::Deep, Availability::Unsupported);
    let gateway = gateway(&fast, &deep);

    assert_eq!(gateway.probe(EngineKind::Fast).await, Availability::Ready);
    assert_eq!(gateway.probe(EngineKind::Deep).await, Availability::Unsupported);

    let options = EngineOptions::default();
    let summary = gateway
        .run_once(EngineKind::Fast, "The quick brown fox...", &options)
        .await
        .unwrap();
    assert_eq!(summary, "Summary: fox.");

    let err = gateway
        .run_once(EngineKind::Deep, "The quick brown fox...", &options)
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::EngineUnavailable(EngineKind::Deep));
    assert_eq!(deep.acquired(), 0);
}

#[tokio::test]
async fn options_reach_the_session() {
    let fast = ScriptedEngine::ready(EngineKind::Fast).with_reply(ScriptedReply::text("ok"));
    let deep = ScriptedEngine::ready(EngineKind::Deep);
    let gateway = gateway(&fast, &deep);

    let options = EngineOptions::default().with_system_prompt("Be brief.");
    gateway
        .run_once(EngineKind::Fast, "text", &options)
        .await
        .unwrap();

    let seen = fast.session_options();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].system_prompt.as_deref(), Some("Be brief."));
}

#[tokio::test]
async fn parallel_requests_use_independent_sessions() {
    let fast = ScriptedEngine::ready(EngineKind::Fast)
        .with_latency(Duration::from_millis(10))
        .with_fallback(ScriptedReply::text("done"));
    let deep = ScriptedEngine::ready(EngineKind::Deep)
        .with_latency(Duration::from_millis(10))
        .with_fallback(ScriptedReply::stream(["a", "b"]));
    let gateway = gateway(&fast, &deep);
    let options = EngineOptions::default();

    let (one, two, three) = tokio::join!(
        gateway.run_once(EngineKind::Fast, "one", &options),
        gateway.run_once(EngineKind::Fast, "two", &options),
        async {
            gateway
                .run_streaming(EngineKind::Deep, "three", &options)
                .await?
                .collect_text()
                .await
        },
    );

    assert_eq!(one.unwrap(), "done");
    assert_eq!(two.unwrap(), "done");
    assert_eq!(three.unwrap(), "ab");
    assert_eq!(fast.acquired(), 2);
    assert_eq!(fast.released(), 2);
    assert_eq!(deep.acquired(), 1);
    assert_eq!(deep.released(), 1);
}

#[tokio::test]
async fn stream_consumed_in_another_task_releases_there() {
    let fast = ScriptedEngine::ready(EngineKind::Fast);
    let deep = ScriptedEngine::ready(EngineKind::Deep)
        .with_reply(ScriptedReply::stream(["x", "y", "z"]));
    let gateway = gateway(&fast, &deep);

    let stream = gateway
        .run_streaming(EngineKind::Deep, "text", &EngineOptions::default())
        .await
        .unwrap();
    let fragments = tokio::spawn(async move { stream.take(2).collect::<Vec<_>>().await })
        .await
        .unwrap();

    assert_eq!(fragments.len(), 2);
    assert_eq!(deep.released(), 1);
}

#[tokio::test]
async fn gateway_errors_map_to_wire_kinds() {
    use contextaware_protocol::ErrorKind;

    assert_eq!(
        GatewayError::EngineUnavailable(EngineKind::Deep).kind(),
        ErrorKind::EngineUnavailable
    );
    assert_eq!(
        GatewayError::EngineDownloadRequired(EngineKind::Fast).kind(),
        ErrorKind::EngineDownloadRequired
    );
    assert_eq!(
        GatewayError::EngineRequestFailed("boom".into()).kind(),
        ErrorKind::EngineRequestFailed
    );
}
