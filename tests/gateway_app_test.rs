use std::sync::Arc;
use std::time::Duration;

use gateway_config::AppConfig;
use gateway_dispatcher::GatewayServer;
use gateway_testing_utils::{task_set, wait_until};
use minion_gateway::app::{build_gateway_service, AppMode, Application};
use minion_gateway::shutdown::ShutdownSignal;

fn sqlite_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.store.url = "sqlite::memory:".to_string();
    config.metrics.enabled = false;
    config.minion.tenant_id = "t1".to_string();
    config.minion.location = "loc1".to_string();
    config.minion.system_id = Some("m1".to_string());
    config.minion.reconnect_delay_ms = 50;
    config
}

#[tokio::test]
async fn test_minion_mode_connects_to_gateway() {
    let mut config = sqlite_config();
    let service = Arc::new(build_gateway_service(&config).await.unwrap());
    service
        .publish_task_set("t1", "loc1", task_set(&["a", "b"]))
        .await
        .unwrap();

    let server = GatewayServer::bind("127.0.0.1:0", service.sessions(), config.server.max_frame_bytes)
        .await
        .unwrap();
    config.minion.gateway_address = server.local_addr().unwrap().to_string();

    let shutdown = ShutdownSignal::new();
    tokio::spawn(server.run(shutdown.subscribe()));

    let app = Application::new(config, AppMode::Minion);
    let app_rx = shutdown.subscribe();
    let app_handle = tokio::spawn(async move { app.run(app_rx).await });

    let observer = service.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            let observer = observer.clone();
            async move { observer.connected_minions("t1", "loc1").len() == 1 }
        })
        .await
    );
    assert_eq!(service.connected_minions("t1", "loc1")[0].identity.system_id, "m1");

    let echoed = service
        .echo("t1", "loc1", None, b"ping", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(echoed, b"ping".to_vec());

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), app_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_gateway_service_persists_task_sets_in_sqlite() {
    let service = build_gateway_service(&sqlite_config()).await.unwrap();

    service
        .publish_task_set("t1", "loc1", task_set(&["a"]))
        .await
        .unwrap();
    service
        .publish_new_tasks("t1", "loc1", task_set(&["b"]).task_definitions)
        .await
        .unwrap();

    let stored = service.fetch_task_set("t1", "loc1").await.unwrap().unwrap();
    assert_eq!(stored.task_ids(), vec!["a", "b"]);
    assert_eq!(service.twin().current_version("t1/loc1").await, Some(2));
}
