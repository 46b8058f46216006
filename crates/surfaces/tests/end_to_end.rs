use std::sync::Arc;

use contextaware_protocol::{
    EngineKind, ErrorKind, PreferencesPatch, SummaryMode, SurfaceBus, SurfaceName, Theme,
};
use coordinator::{Coordinator, CoordinatorConfig, CoordinatorController};
use engine_gateway::scripted::{ScriptedEngine, ScriptedReply};
use engine_gateway::{Availability, EngineGateway};
use result_store::{MemoryBackend, ResultStore};
use surfaces::{InMemoryPage, PageAgent, PageEvent, PageHost, Panel, PanelRoute, PanelView};
use tokio::sync::mpsc;

struct World {
    bus: Arc<SurfaceBus>,
    store: Arc<ResultStore>,
    controller: CoordinatorController,
}

async fn world(fast: &ScriptedEngine, deep: &ScriptedEngine) -> World {
    let bus = Arc::new(SurfaceBus::default());
    let store = Arc::new(ResultStore::new(Arc::new(MemoryBackend::new())));
    let gateway = EngineGateway::new()
        .with_engine(Arc::new(fast.clone()))
        .with_engine(Arc::new(deep.clone()));
    let controller = CoordinatorController::launch(
        Coordinator::new(gateway, store.clone(), CoordinatorConfig::default()),
        bus.clone(),
    )
    .await
    .unwrap();
    World {
        bus,
        store,
        controller,
    }
}

#[tokio::test]
async fn embedded_panel_summarizes_through_page_agent() {
    let fast = ScriptedEngine::ready(EngineKind::Fast);
    let deep = ScriptedEngine::ready(EngineKind::Deep)
        .with_reply(ScriptedReply::stream(["Deep ", "read."]));
    let world = world(&fast, &deep).await;

    let page = Arc::new(InMemoryPage::new("https://news.example/story#c1", "Story"));
    let (agent, mailbox) = PageAgent::install(world.bus.clone(), 1, page.clone()).unwrap();
    let (events, events_rx) = mpsc::channel(8);
    tokio::spawn(agent.run(mailbox, events_rx));

    let mut panel = Panel::open(
        world.bus.clone(),
        SurfaceName::panel(1),
        PanelRoute::ViaPageAgent(1),
        page.url(),
    )
    .await;
    assert_eq!(panel.view(), &PanelView::Idle);

    // The host's toolbar action goes through the coordinator.
    assert!(world.controller.handle().toggle_sidebar(1).await.unwrap());
    assert!(page.panel_visible());
    let context = panel.next_envelope().await.expect("page context");
    panel.handle_envelope(context);
    assert_eq!(panel.page_context().map(|page| page.title.as_str()), Some("Story"));

    let view = panel
        .summarize("A long story about things.", SummaryMode::Cloud)
        .await
        .unwrap();
    let PanelView::Ready(result) = view else {
        panic!("expected ready view, got {view:?}");
    };
    assert_eq!(result.content, "Deep read.");
    assert_eq!(result.engine_kind, EngineKind::Deep);

    let stored = world
        .store
        .get_result("https://news.example/story")
        .await
        .expect("persisted under the page key");
    assert_eq!(stored.content, "Deep read.");
    let sites = world.store.get_site_context(Some("news.example")).await;
    assert_eq!(sites[0].visit_count, 1);

    // Selection hint and control clicks arrive as page events.
    page.select("x".repeat(80));
    events.send(PageEvent::SelectionChanged).await.unwrap();
    events.send(PageEvent::ControlClicked).await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while !page.selection_ready() || page.panel_visible() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("events applied");

    panel.close().await;
    world.controller.shutdown().await.unwrap();
    assert_eq!(deep.acquired(), deep.released());
}

#[tokio::test]
async fn reopened_popup_renders_cached_result_and_shared_preferences() {
    let fast = ScriptedEngine::ready(EngineKind::Fast)
        .with_reply(ScriptedReply::text("Summary: fox."));
    let deep = ScriptedEngine::new(EngineKind::Deep, Availability::Unsupported);
    let world = world(&fast, &deep).await;
    let url = "https://example.com/fox";

    let mut popup = Panel::open(world.bus.clone(), SurfaceName::popup(), PanelRoute::Direct, url).await;
    let view = popup
        .summarize("The quick brown fox...", SummaryMode::Local)
        .await
        .unwrap();
    assert!(matches!(view, PanelView::Ready(ref result) if result.content == "Summary: fox."));

    let failed = popup
        .summarize("The quick brown fox...", SummaryMode::Cloud)
        .await
        .unwrap();
    assert!(matches!(
        failed,
        PanelView::Error {
            kind: ErrorKind::EngineUnavailable,
            ..
        }
    ));

    popup
        .update_preferences(&PreferencesPatch {
            theme: Some(Theme::Light),
            ..PreferencesPatch::default()
        })
        .await
        .unwrap();
    popup.close().await;

    // A new popup context starts from nothing but the store.
    let popup = Panel::open(world.bus.clone(), SurfaceName::popup(), PanelRoute::Direct, url).await;
    let PanelView::Ready(result) = popup.view() else {
        panic!("expected cached result, got {:?}", popup.view());
    };
    assert_eq!(result.content, "Summary: fox.");
    assert_eq!(result.engine_kind, EngineKind::Fast);
    assert_eq!(popup.preferences().theme, Theme::Light);

    popup.close().await;
    world.controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn closing_the_panel_does_not_cancel_the_request() {
    let fast = ScriptedEngine::ready(EngineKind::Fast)
        .with_latency(std::time::Duration::from_millis(20))
        .with_reply(ScriptedReply::text("Finished anyway."));
    let deep = ScriptedEngine::ready(EngineKind::Deep);
    let world = world(&fast, &deep).await;
    let url = "https://example.com/slow";

    let mut popup = Panel::open(world.bus.clone(), SurfaceName::popup(), PanelRoute::Direct, url).await;
    popup.begin_summarize("slow text", SummaryMode::Local).await.unwrap();
    popup.close().await;

    let mut status = world.controller.handle().subscribe();
    status
        .wait_for(|status| status.completed >= 3 && status.in_flight == 0)
        .await
        .unwrap();
    let stored = world.store.get_result(url).await.expect("request still completed");
    assert_eq!(stored.content, "Finished anyway.");

    world.controller.shutdown().await.unwrap();
}
