use std::sync::Arc;
use std::time::Duration;

use gateway_dispatcher::{GatewayService, MinionSession};
use gateway_domain::{
    MinionIdentity, MinionMessage, RpcRequest, RpcResponse, TaskSet, TaskSetStore,
    TenantLocationKey,
};
use gateway_errors::GatewayError;
use gateway_infrastructure::InMemoryTaskSetStore;
use gateway_testing_utils::{task, task_set, RecordingForwarder, RecordingTransport};

fn service() -> (GatewayService, Arc<InMemoryTaskSetStore>) {
    let store = Arc::new(InMemoryTaskSetStore::new());
    let service = GatewayService::new(store.clone(), Arc::new(RecordingForwarder::new()));
    (service, store)
}

async fn connect(
    service: &GatewayService,
    system_id: &str,
    location: &str,
) -> (MinionSession, RecordingTransport) {
    let transport = RecordingTransport::new();
    let sessions = service.sessions();
    let mut session = sessions.open(Arc::new(transport.clone()));
    sessions
        .handle_message(
            &mut session,
            MinionMessage::Hello(MinionIdentity::new("t1", system_id, location)),
        )
        .await
        .unwrap();
    (session, transport)
}

fn echo(location: &str, ttl_ms: u64) -> RpcRequest {
    RpcRequest::new(location, "echo", b"ping".to_vec(), Duration::from_millis(ttl_ms))
}

#[tokio::test]
async fn publish_then_subscribe_receives_full_set() {
    let (service, store) = service();
    service
        .publish_task_set("t1", "loc1", task_set(&["A", "B", "C"]))
        .await
        .unwrap();

    let stored = store
        .get(&TenantLocationKey::new("t1", "loc1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.task_ids(), vec!["A", "B", "C"]);

    let (_session, transport) = connect(&service, "m1", "loc1").await;
    let twins = transport.sent_twins();
    assert_eq!(twins.len(), 1);
    assert_eq!(twins[0].key, "t1/loc1");
    assert_eq!(twins[0].version, 1);
    assert!(!twins[0].is_patch);
    assert_eq!(
        TaskSet::from_bytes(&twins[0].payload).unwrap().task_ids(),
        vec!["A", "B", "C"]
    );
}

#[tokio::test]
async fn incremental_publish_sends_patch_to_subscriber() {
    let (service, _store) = service();
    service
        .publish_task_set("t1", "loc1", task_set(&["A", "B", "C"]))
        .await
        .unwrap();
    let (_session, transport) = connect(&service, "m1", "loc1").await;

    service
        .publish_new_tasks("t1", "loc1", vec![task("D")])
        .await
        .unwrap();

    let stored = service.fetch_task_set("t1", "loc1").await.unwrap().unwrap();
    assert_eq!(stored.task_ids(), vec!["A", "B", "C", "D"]);

    let twins = transport.sent_twins();
    let patch = twins.last().unwrap();
    assert_eq!(patch.version, 2);
    assert!(patch.is_patch);
    assert_eq!(
        TaskSet::from_bytes(&patch.payload).unwrap().task_ids(),
        vec!["D"]
    );
}

#[tokio::test]
async fn reconnect_gets_full_snapshot_instead_of_patches() {
    let (service, _store) = service();
    service
        .publish_task_set("t1", "loc1", task_set(&["A", "B", "C"]))
        .await
        .unwrap();
    let (session, _old) = connect(&service, "m1", "loc1").await;
    service
        .publish_new_tasks("t1", "loc1", vec![task("D")])
        .await
        .unwrap();

    let old_session_id = session.session_id().to_string();
    service.sessions().close(session).await;

    let (session, transport) = connect(&service, "m1", "loc1").await;
    assert_ne!(session.session_id(), old_session_id);

    let twins = transport.sent_twins();
    assert_eq!(twins.len(), 1);
    assert_eq!(twins[0].version, 2);
    assert!(!twins[0].is_patch);
    assert_eq!(twins[0].session_id, session.session_id());
    assert_eq!(
        TaskSet::from_bytes(&twins[0].payload).unwrap().task_ids(),
        vec!["A", "B", "C", "D"]
    );
}

#[tokio::test]
async fn rpc_to_empty_location_has_no_route() {
    let (service, _store) = service();
    let result = service.send_rpc("t1", echo("loc2", 1000));
    assert!(matches!(
        result,
        Err(GatewayError::NoRouteAvailable { .. })
    ));
    assert_eq!(service.correlator().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_response_resolves_to_timeout() {
    let (service, _store) = service();
    let (mut session, _transport) = connect(&service, "m1", "loc1").await;

    let future = service.send_rpc("t1", echo("loc1", 100)).unwrap();
    let request_id = future.request_id();
    let waiter = tokio::spawn(future);

    tokio::time::sleep(Duration::from_millis(150)).await;
    service
        .sessions()
        .handle_frame(
            &mut session,
            Ok(MinionMessage::RpcResponse(RpcResponse::new(
                request_id,
                "echo",
                b"pong".to_vec(),
            ))),
        )
        .await;

    let result = waiter.await.unwrap();
    assert!(matches!(
        result,
        Err(GatewayError::RequestTimedOut { request_id: id }) if id == request_id
    ));
    assert_eq!(service.correlator().pending_count(), 0);
}

#[tokio::test]
async fn deregister_fails_only_that_minions_requests() {
    let (service, _store) = service();
    let (_m1, _t1) = connect(&service, "m1", "loc1").await;
    let (_m2, _t2) = connect(&service, "m2", "loc1").await;

    let first = service
        .send_rpc("t1", echo("loc1", 60_000).with_system_id("m1"))
        .unwrap();
    let second = service
        .send_rpc("t1", echo("loc1", 60_000).with_system_id("m1"))
        .unwrap();
    let other = service
        .send_rpc("t1", echo("loc1", 60_000).with_system_id("m2"))
        .unwrap();
    let other_id = other.request_id();

    assert!(service
        .registry()
        .deregister(&MinionIdentity::new("t1", "m1", "loc1")));

    for future in [first, second] {
        assert!(matches!(
            future.await,
            Err(GatewayError::MinionDisconnected { ref system_id, .. }) if system_id == "m1"
        ));
    }
    assert!(service.correlator().is_pending(&other_id));

    service
        .correlator()
        .on_response(RpcResponse::new(other_id, "echo", b"pong".to_vec()))
        .unwrap();
    assert_eq!(other.await.unwrap().payload, b"pong".to_vec());
}

#[tokio::test]
async fn reconnect_cancels_requests_on_stale_connection() {
    let (service, _store) = service();
    let (_old, old_transport) = connect(&service, "m1", "loc1").await;
    let pending = service.send_rpc("t1", echo("loc1", 60_000)).unwrap();

    let (_new, _new_transport) = connect(&service, "m1", "loc1").await;
    assert!(old_transport.is_closed());
    assert!(matches!(
        pending.await,
        Err(GatewayError::MinionDisconnected { .. })
    ));
    assert_eq!(service.connected_minions("t1", "loc1").len(), 1);
}

#[tokio::test]
async fn versions_strictly_increase_for_a_subscription() {
    let (service, _store) = service();
    let (_session, transport) = connect(&service, "m1", "loc1").await;

    service
        .publish_task_set("t1", "loc1", task_set(&["A"]))
        .await
        .unwrap();
    for id in ["B", "C", "D"] {
        service
            .publish_new_tasks("t1", "loc1", vec![task(id)])
            .await
            .unwrap();
    }

    let versions: Vec<u64> = transport.sent_twins().iter().map(|t| t.version).collect();
    assert_eq!(versions, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn full_then_patches_reconstruct_stored_state() {
    let (service, _store) = service();
    service
        .publish_task_set("t1", "loc1", task_set(&["A", "B"]))
        .await
        .unwrap();
    let (_session, transport) = connect(&service, "m1", "loc1").await;

    service
        .publish_new_tasks("t1", "loc1", vec![task("C")])
        .await
        .unwrap();
    service
        .publish_new_tasks("t1", "loc1", vec![task("D"), task("E")])
        .await
        .unwrap();

    let mut local = TaskSet::default();
    for twin in transport.sent_twins() {
        let payload = TaskSet::from_bytes(&twin.payload).unwrap();
        if twin.is_patch {
            local.append(&payload.task_definitions);
        } else {
            local = payload;
        }
    }

    let stored = service.fetch_task_set("t1", "loc1").await.unwrap().unwrap();
    assert_eq!(local, stored);
}

#[tokio::test]
async fn subscriber_after_restart_gets_stored_state() {
    let store = Arc::new(InMemoryTaskSetStore::new());
    store
        .put(&TenantLocationKey::new("t1", "loc1"), &task_set(&["A", "B"]))
        .await
        .unwrap();

    let service = GatewayService::new(store, Arc::new(RecordingForwarder::new()));
    let (_session, transport) = connect(&service, "m1", "loc1").await;

    let twins = transport.sent_twins();
    assert_eq!(twins.len(), 1);
    assert!(!twins[0].is_patch);
    assert_eq!(
        TaskSet::from_bytes(&twins[0].payload).unwrap().task_ids(),
        vec!["A", "B"]
    );
}

#[tokio::test]
async fn tenants_cannot_collide_through_key_separator() {
    let (service, store) = service();

    let transport = RecordingTransport::new();
    let sessions = service.sessions();
    let mut session = sessions.open(Arc::new(transport.clone()));
    let hello = sessions
        .handle_message(
            &mut session,
            MinionMessage::Hello(MinionIdentity::new("a", "m1", "b/c")),
        )
        .await;
    assert!(matches!(hello, Err(GatewayError::ValidationError(_))));
    assert!(transport.is_closed());

    let publish = service
        .publish_task_set("a/b", "c", task_set(&["SECRET"]))
        .await;
    assert!(matches!(publish, Err(GatewayError::ValidationError(_))));

    assert_eq!(store.len().await, 0);
    assert!(transport.sent_twins().is_empty());
    assert!(service.connected_minions("a", "b/c").is_empty());
}
