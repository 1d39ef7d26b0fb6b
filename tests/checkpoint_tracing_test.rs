use futures::StreamExt;
use graph_trace_core::{
    CheckpointOperationKind, CheckpointSaver, CollectingSink, ExecutionTracer,
    InMemoryCheckpointSaver, ObservationKind, RunnableConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn traced_saver() -> (
    Arc<ExecutionTracer>,
    graph_trace_core::TracedCheckpointSaver<InMemoryCheckpointSaver>,
    Arc<CollectingSink>,
) {
    let sink = Arc::new(CollectingSink::new());
    let tracer = Arc::new(
        ExecutionTracer::builder()
            .sink(sink.clone())
            .build()
            .unwrap(),
    );
    let saver = tracer.wrap_checkpoint_saver(InMemoryCheckpointSaver::new());
    (tracer, saver, sink)
}

fn checkpoint(step: usize) -> Value {
    let messages = vec!["x"; step % 7];
    json!({
        "id": format!("ckpt-{step:03}"),
        "channel_values": {"messages": messages},
        "step": step,
    })
}

#[test]
fn test_fifty_saves_average_size() {
    let (tracer, saver, sink) = traced_saver();
    let config = RunnableConfig::for_thread("bulk");

    let mut sizes = Vec::new();
    for step in 0..50 {
        let checkpoint = checkpoint(step);
        sizes.push(serde_json::to_string(&checkpoint).unwrap().len());
        saver.put(&config, &checkpoint, &json!({"source": "loop"})).unwrap();
    }

    let stats = tracer.checkpoint_tracer().get_stats().unwrap();
    let expected = sizes.iter().sum::<usize>() as f64 / sizes.len() as f64;
    assert_eq!(stats.save_count, 50);
    assert_eq!(stats.save_success_count, 50);
    assert_eq!(stats.failed_operations, 0);
    assert!((stats.avg_checkpoint_size_bytes - expected).abs() < 1e-9);
    assert_eq!(stats.total_checkpoint_size_bytes, sizes.iter().sum::<usize>() as u64);
    assert_eq!(saver.inner().checkpoint_count("bulk"), 50);
    assert_eq!(sink.records_of(ObservationKind::Checkpoint).len(), 50);
}

#[test]
fn test_load_hit_and_miss() {
    let (tracer, saver, _) = traced_saver();
    let config = RunnableConfig::for_thread("t");
    let saved = saver.put(&config, &checkpoint(1), &json!({})).unwrap();
    assert_eq!(saved.checkpoint_id(), Some("ckpt-001"));

    let hit = saver.get(&saved).unwrap().unwrap();
    assert_eq!(hit.checkpoint["step"], 1);
    assert!(saver.get(&RunnableConfig::for_thread("unknown")).unwrap().is_none());

    let stats = tracer.checkpoint_tracer().get_stats().unwrap();
    assert_eq!(stats.load_count, 2);
    assert_eq!(stats.load_success_count, 2);
    assert_eq!(stats.load_hit_count, 1);

    let loads: Vec<_> = tracer
        .checkpoint_tracer()
        .operations()
        .into_iter()
        .filter(|op| op.operation == CheckpointOperationKind::Load)
        .collect();
    assert_eq!(loads[0].found, Some(true));
    assert_eq!(loads[0].checkpoint_id.as_deref(), Some("ckpt-001"));
    assert_eq!(loads[1].found, Some(false));
}

#[test]
fn test_backend_error_is_returned_and_recorded() {
    let (tracer, saver, sink) = traced_saver();
    let error = saver
        .put(&RunnableConfig::new(), &checkpoint(0), &json!({}))
        .unwrap_err();
    assert!(error.to_string().contains("thread_id"));

    let stats = tracer.checkpoint_tracer().get_stats().unwrap();
    assert_eq!(stats.failed_operations, 1);
    assert_eq!(stats.save_success_count, 0);
    assert!(!sink.records_of(ObservationKind::Checkpoint)[0].status.is_success());
}

#[test]
fn test_list_is_recorded_when_consumed() {
    let (tracer, saver, _) = traced_saver();
    let config = RunnableConfig::for_thread("history");
    for step in 0..5 {
        saver.put(&config, &checkpoint(step), &json!({})).unwrap();
    }

    let listed = saver.list(&config, None).unwrap();
    assert_eq!(
        tracer.checkpoint_tracer().get_stats().unwrap().list_count,
        0,
        "list stays pending until consumed"
    );
    let newest: Vec<_> = listed.map(Result::unwrap).collect();
    assert_eq!(newest[0].checkpoint["step"], 4);

    let partial = saver.list(&config, None).unwrap().take(2).count();
    assert_eq!(partial, 2);

    let lists: Vec<_> = tracer
        .checkpoint_tracer()
        .operations_for_thread("history")
        .into_iter()
        .filter(|op| op.operation == CheckpointOperationKind::List)
        .collect();
    assert_eq!(lists.len(), 2);
    assert_eq!(lists[0].count, Some(5));
    assert_eq!(lists[1].count, Some(2));
    assert!(lists.iter().all(|op| op.success));
}

#[tokio::test]
async fn test_async_operations_are_flagged() {
    let (tracer, saver, _) = traced_saver();
    let config = RunnableConfig::for_thread("async");
    saver.aput(&config, &checkpoint(3), &json!({})).await.unwrap();
    assert!(saver.aget(&config).await.unwrap().is_some());
    let items: Vec<_> = saver.alist(&config, Some(10)).await.unwrap().collect().await;
    assert_eq!(items.len(), 1);

    let operations = tracer.checkpoint_tracer().operations();
    assert_eq!(operations.len(), 3);
    assert!(operations.iter().all(|op| op.is_async));
    assert_eq!(operations[2].count, Some(1));
}
