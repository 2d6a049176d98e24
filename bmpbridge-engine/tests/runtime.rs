use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use bmpbridge_config::{BridgeConfig, ConsumerConfig, InitialOffset};
use bmpbridge_core::broker::memory::{MemoryBroker, MemoryGroup};
use bmpbridge_engine::dispatcher::GroupState;
use bmpbridge_engine::{run_demo, serve, ConsumerDispatcher, LogPresenter};
use bmpbridge_telemetry::MetricsRecorder;

#[tokio::test]
async fn demo_renders_the_scripted_session() {
    let metrics = Arc::new(MetricsRecorder::new().unwrap());
    let out = run_demo(&BridgeConfig::default(), Arc::clone(&metrics), Vec::new())
        .await
        .unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("Peer Up"), "{text}");
    assert!(text.contains("Peer Down"), "{text}");
    assert_eq!(text.matches("Route Monitoring").count(), 2, "{text}");
    assert!(text.contains("203.0.113.0/24"), "{text}");
    assert!(text.contains("192.0.2.1"), "{text}");
    assert_eq!(metrics.messages_processed.get(), 4);
    assert_eq!(metrics.records_consumed.get(), 4);
    assert_eq!(metrics.records_decode_failed.get(), 0);
}

#[tokio::test]
async fn serve_stops_the_dispatcher_on_shutdown() {
    let config = ConsumerConfig {
        topics: vec!["bmp.post-policy".into()],
        initial_offset: InitialOffset::Newest,
        ..Default::default()
    };
    let broker = MemoryBroker::new(2);
    let dispatcher = Arc::new(ConsumerDispatcher::new(
        MemoryGroup::new(broker, &config),
        Arc::new(LogPresenter::new(Vec::new())),
        &config,
        Arc::new(MetricsRecorder::new().unwrap()),
    ));
    let mut ready = dispatcher.ready_signal();
    let state = dispatcher.state_signal();

    let (trigger, shutdown) = oneshot::channel::<()>();
    let served = tokio::spawn(serve(
        Arc::clone(&dispatcher),
        Duration::from_secs(2),
        async move {
            let _ = shutdown.await;
            Ok(())
        },
    ));

    tokio::time::timeout(Duration::from_secs(2), ready.wait_for(|epoch| *epoch >= 1))
        .await
        .unwrap()
        .unwrap();
    trigger.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(3), served)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(*state.borrow(), GroupState::Stopped);
}
