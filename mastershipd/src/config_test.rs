use std::time::Duration;

use anyhow::Result;
use mastership_core::ReadPolicy;

use crate::config::Config;

#[test]
fn config_deserializes_from_full_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NODE_ID".into(), "node-1".into()),
        ("CLUSTER_NODES".into(), "node-0,node-1,node-2".into()),
        ("HTTP_PORT".into(), "7000".into()),
        ("METRICS_PORT".into(), "7002".into()),
        ("STORAGE_DATA_PATH".into(), "/usr/local/mastership/data".into()),
        ("CAS_MAX_ATTEMPTS".into(), "8".into()),
        ("CAS_BACKOFF_MILLIS".into(), "10".into()),
        ("CAS_MAX_BACKOFF_MILLIS".into(), "500".into()),
        ("EVENT_BUFFER".into(), "256".into()),
        ("READ_POLICY".into(), "consistent".into()),
        ("MASTERSHIP_CHECK_SECONDS".into(), "15".into()),
    ])?;
    config.validate()?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}, expected {}", config.rust_log, "error");
    assert!(config.node_id == "node-1", "unexpected value parsed for NODE_ID, got {}, expected {}", config.node_id, "node-1");
    assert!(
        config.cluster_nodes == vec!["node-0", "node-1", "node-2"],
        "unexpected value parsed for CLUSTER_NODES, got {:?}",
        config.cluster_nodes,
    );
    assert!(config.http_port == 7000, "unexpected value parsed for HTTP_PORT, got {}, expected {}", config.http_port, 7000);
    assert!(config.metrics_port == 7002, "unexpected value parsed for METRICS_PORT, got {}, expected {}", config.metrics_port, 7002);
    assert!(
        config.storage_data_path == "/usr/local/mastership/data",
        "unexpected value parsed for STORAGE_DATA_PATH, got {}, expected {}",
        config.storage_data_path,
        "/usr/local/mastership/data"
    );
    let retry = config.retry_policy();
    assert!(retry.max_attempts == 8, "unexpected value parsed for CAS_MAX_ATTEMPTS, got {}, expected {}", retry.max_attempts, 8);
    assert!(
        retry.base_backoff == Duration::from_millis(10),
        "unexpected value parsed for CAS_BACKOFF_MILLIS, got {:?}",
        retry.base_backoff
    );
    assert!(
        retry.max_backoff == Duration::from_millis(500),
        "unexpected value parsed for CAS_MAX_BACKOFF_MILLIS, got {:?}",
        retry.max_backoff
    );
    assert!(config.event_buffer == 256, "unexpected value parsed for EVENT_BUFFER, got {}, expected {}", config.event_buffer, 256);
    assert!(
        config.read_policy == ReadPolicy::Consistent,
        "unexpected value parsed for READ_POLICY, got {:?}, expected {:?}",
        config.read_policy,
        ReadPolicy::Consistent
    );
    assert!(
        config.mastership_check_interval() == Duration::from_secs(15),
        "unexpected value parsed for MASTERSHIP_CHECK_SECONDS, got {:?}",
        config.mastership_check_interval()
    );

    Ok(())
}

#[test]
fn config_deserializes_from_sparse_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NODE_ID".into(), "node-0".into()),
        ("CLUSTER_NODES".into(), "node-0".into()),
        ("HTTP_PORT".into(), "7000".into()),
        ("METRICS_PORT".into(), "7002".into()),
    ])?;
    config.validate()?;

    assert!(
        config.storage_data_path == crate::database::DEFAULT_DATA_PATH,
        "unexpected default for STORAGE_DATA_PATH, got {}, expected {}",
        config.storage_data_path,
        crate::database::DEFAULT_DATA_PATH
    );
    assert!(config.cas_max_attempts == 32, "unexpected default for CAS_MAX_ATTEMPTS, got {}, expected {}", config.cas_max_attempts, 32);
    assert!(config.cas_backoff_millis == 5, "unexpected default for CAS_BACKOFF_MILLIS, got {}, expected {}", config.cas_backoff_millis, 5);
    assert!(
        config.cas_max_backoff_millis == 250,
        "unexpected default for CAS_MAX_BACKOFF_MILLIS, got {}, expected {}",
        config.cas_max_backoff_millis,
        250
    );
    assert!(config.event_buffer == 1024, "unexpected default for EVENT_BUFFER, got {}, expected {}", config.event_buffer, 1024);
    assert!(
        config.read_policy == ReadPolicy::Available,
        "unexpected default for READ_POLICY, got {:?}, expected {:?}",
        config.read_policy,
        ReadPolicy::Available
    );
    assert!(
        config.mastership_check_seconds == 60,
        "unexpected default for MASTERSHIP_CHECK_SECONDS, got {}, expected {}",
        config.mastership_check_seconds,
        60
    );

    Ok(())
}

#[test]
fn config_rejects_unknown_read_policy() {
    let res: Result<Config, _> = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NODE_ID".into(), "node-0".into()),
        ("CLUSTER_NODES".into(), "node-0".into()),
        ("HTTP_PORT".into(), "7000".into()),
        ("METRICS_PORT".into(), "7002".into()),
        ("READ_POLICY".into(), "eventual".into()),
    ]);

    assert!(res.is_err(), "expected an unknown READ_POLICY to be rejected");
}

#[test]
fn config_requires_local_node_in_cluster() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NODE_ID".into(), "node-3".into()),
        ("CLUSTER_NODES".into(), "node-0,node-1".into()),
        ("HTTP_PORT".into(), "7000".into()),
        ("METRICS_PORT".into(), "7002".into()),
    ])?;

    let res = config.validate();

    assert!(res.is_err(), "expected validation to fail when NODE_ID is not a cluster node");
    Ok(())
}
