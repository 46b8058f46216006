use std::sync::Arc;
use std::time::Duration;

use contextaware_protocol::{
    EngineKind, Envelope, MessageType, SummarizeData, SummarizeReply, SummaryReply, SurfaceBus,
    SurfaceName,
};
use coordinator::{Coordinator, CoordinatorConfig, CoordinatorController};
use engine_gateway::scripted::{ScriptedEngine, ScriptedReply};
use engine_gateway::EngineGateway;
use result_store::{FileBackend, ResultStore};

fn file_store(config: &CoordinatorConfig) -> Arc<ResultStore> {
    Arc::new(
        ResultStore::new(Arc::new(FileBackend::new(config.store_path())))
            .with_limits(config.store_limits()),
    )
}

async fn summarize(
    bus: &SurfaceBus,
    from: SurfaceName,
    kind: MessageType,
    data: SummarizeData,
) -> SummarizeReply {
    bus.request(&from, &SurfaceName::background(), Envelope::request(kind, data))
        .await
        .expect("coordinator replies")
        .decode()
        .expect("summarize reply")
}

#[tokio::test]
async fn concurrent_requests_for_different_pages_do_not_mix() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoordinatorConfig {
        data_dir: dir.path().to_path_buf(),
        ..CoordinatorConfig::default()
    };
    config.ensure_dirs().unwrap();

    // The deep engine answers slower, so the fast reply overtakes it.
    let fast = ScriptedEngine::ready(EngineKind::Fast)
        .with_reply(ScriptedReply::text("fast summary of A"));
    let deep = ScriptedEngine::ready(EngineKind::Deep)
        .with_latency(Duration::from_millis(30))
        .with_reply(ScriptedReply::text("deep summary of B"));
    let gateway = EngineGateway::new()
        .with_engine(Arc::new(fast.clone()))
        .with_engine(Arc::new(deep.clone()));

    let bus = Arc::new(SurfaceBus::default());
    let store = file_store(&config);
    let controller = CoordinatorController::launch(
        Coordinator::new(gateway, store.clone(), config.clone()),
        bus.clone(),
    )
    .await
    .unwrap();

    let (b, a) = tokio::join!(
        summarize(
            &bus,
            SurfaceName::page(2),
            MessageType::SummarizeCloud,
            SummarizeData::new("page B text").with_url("https://b.example/post"),
        ),
        summarize(
            &bus,
            SurfaceName::popup(),
            MessageType::SummarizeLocal,
            SummarizeData::new("page A text").with_url("https://a.example/"),
        ),
    );

    assert_eq!(a.summary.as_deref(), Some("fast summary of A"));
    assert_eq!(b.summary.as_deref(), Some("deep summary of B"));

    let stored_a = store.get_result("https://a.example/").await.unwrap();
    let stored_b = store.get_result("https://b.example/post").await.unwrap();
    assert_eq!(stored_a.content, "fast summary of A");
    assert_eq!(stored_a.engine_kind, EngineKind::Fast);
    assert_eq!(stored_b.content, "deep summary of B");
    assert_eq!(stored_b.engine_kind, EngineKind::Deep);

    let sites: Vec<String> = store
        .get_site_context(None)
        .await
        .into_iter()
        .map(|context| context.site_key)
        .collect();
    assert_eq!(sites.len(), 2);
    assert!(sites.contains(&"a.example".to_string()));
    assert!(sites.contains(&"b.example".to_string()));

    controller.shutdown().await.unwrap();
    assert_eq!(fast.acquired(), fast.released());
    assert_eq!(deep.acquired(), deep.released());
}

#[tokio::test]
async fn results_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoordinatorConfig {
        data_dir: dir.path().join("data"),
        ..CoordinatorConfig::default()
    };
    config.ensure_dirs().unwrap();

    let fast = ScriptedEngine::ready(EngineKind::Fast).with_reply(ScriptedReply::text("Summary: fox."));
    let bus = Arc::new(SurfaceBus::default());
    let controller = CoordinatorController::launch(
        Coordinator::new(
            EngineGateway::new().with_engine(Arc::new(fast.clone())),
            file_store(&config),
            config.clone(),
        ),
        bus.clone(),
    )
    .await
    .unwrap();

    let reply = summarize(
        &bus,
        SurfaceName::popup(),
        MessageType::SummarizeLocal,
        SummarizeData::new("The quick brown fox...").with_url("https://example.com/fox"),
    )
    .await;
    assert!(reply.success);
    controller.shutdown().await.unwrap();

    // A fresh coordinator context reading the same file.
    let bus = Arc::new(SurfaceBus::default());
    let controller = CoordinatorController::launch(
        Coordinator::new(EngineGateway::new(), file_store(&config), config.clone()),
        bus.clone(),
    )
    .await
    .unwrap();

    let cached: SummaryReply = bus
        .request(
            &SurfaceName::popup(),
            &SurfaceName::background(),
            Envelope::request(
                MessageType::GetSummary,
                serde_json::json!({ "url": "https://example.com/fox" }),
            ),
        )
        .await
        .unwrap()
        .decode()
        .unwrap();
    let cached = cached.result.expect("result persisted");
    assert_eq!(cached.content, "Summary: fox.");
    assert_eq!(cached.engine_kind, EngineKind::Fast);

    controller.shutdown().await.unwrap();
}
