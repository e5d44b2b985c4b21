use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::database::Database;

fn config_at(path: &str) -> Result<Arc<Config>> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NODE_ID".into(), "node-0".into()),
        ("CLUSTER_NODES".into(), "node-0".into()),
        ("HTTP_PORT".into(), "7000".into()),
        ("METRICS_PORT".into(), "7002".into()),
        ("STORAGE_DATA_PATH".into(), path.into()),
    ])?;
    Ok(Arc::new(config))
}

#[tokio::test]
async fn database_opens_per_node_mastership_tree() -> Result<()> {
    let tmpdir = tempfile::tempdir_in("/tmp").context("error creating tmp dir")?;
    let config = config_at(&tmpdir.path().to_string_lossy())?;

    let db = Database::new(config).await?;
    let tree = db.get_mastership_tree().await?;
    tree.insert("of:0001", "record")?;
    db.flush().await?;

    assert!(tmpdir.path().join("node-0").is_dir(), "expected a per-node database dir to be created");
    let tree = db.get_mastership_tree().await?;
    let val = tree.get("of:0001")?.context("expected record to be readable through a new tree handle")?;
    assert_eq!(val.as_ref(), b"record");
    Ok(())
}
