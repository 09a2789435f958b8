use hastream_cluster::{ClusterConfig, SessionProperties};
use hastream_common::{HAState, SeqState};
use hastream_server::health::HealthStatus;
use hastream_server::{run, DemoSettings, Settings};

fn fast_settings(instances: u32, orders: u64, failover_after: Option<u64>) -> Settings {
    Settings {
        cluster: ClusterConfig::new("fntest", 1),
        session: SessionProperties::default(),
        demo: DemoSettings {
            instances,
            orders,
            order_interval_ms: 0,
            failover_after,
            seed: Some(11),
            settle_timeout_ms: 5000,
            ..DemoSettings::default()
        },
    }
}

#[tokio::test]
async fn test_demo_without_failover() {
    let report = run(&fast_settings(2, 25, None)).await.unwrap();

    assert_eq!(report.last_order_id, Some(25));
    assert!(report.failed_over_from.is_none());
    assert_eq!(report.queues_released, 3);
    assert_eq!(report.health.active_members, 1);

    let active = &report.final_states[0];
    assert_eq!(active.ha_state, HAState::Active);
    assert_eq!(active.last_input, 25);
}

#[tokio::test]
async fn test_demo_fails_over_to_backup() {
    let report = run(&fast_settings(3, 30, Some(12))).await.unwrap();

    assert_eq!(report.failed_over_from.as_deref(), Some("fntest_inst1"));
    assert_eq!(report.health.active_members, 1);
    assert_eq!(report.health.status, HealthStatus::Degraded);

    let killed = &report.health.members[0];
    assert_eq!(killed.status, HealthStatus::Unhealthy);

    let successor = &report.final_states[1];
    assert_eq!(successor.ha_state, HAState::Active);
    assert_eq!(successor.seq_state, SeqState::UpToDate);
    assert_eq!(successor.last_input, 30);
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let mut settings = fast_settings(0, 5, None);
    assert!(run(&settings).await.is_err());

    settings.demo.instances = 1;
    settings.cluster.standby_topic = settings.cluster.active_topic.clone();
    assert!(run(&settings).await.is_err());
}
