use std::collections::HashSet;

use anyhow::Result;
use tempfile::tempdir;

use photo_db::{Database, PhotoRepository};

#[tokio::test]
async fn rows_survive_reconnect() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("photos.db");

    {
        let database = Database::connect_file(&path).await?;
        database.insert("first.jpg", "memory://first.jpg").await?;
        database.insert("second.jpg", "memory://second.jpg").await?;
        database.pool().close().await;
    }

    // Migrations must be idempotent on an existing file.
    let database = Database::connect_file(&path).await?;
    let photos = database.list_all().await?;
    assert_eq!(photos.len(), 2);
    assert_eq!(photos[0].photo_name, "second.jpg");
    assert_eq!(photos[1].photo_name, "first.jpg");
    Ok(())
}

#[tokio::test]
async fn concurrent_inserts_get_unique_ids() -> Result<()> {
    let dir = tempdir()?;
    let database = Database::connect_file(&dir.path().join("photos.db")).await?;

    let mut handles = Vec::new();
    for idx in 0..16 {
        let database = database.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("photo-{idx}.jpg");
            database.insert(&name, &format!("memory://{name}")).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let photos = database.list_all().await?;
    assert_eq!(photos.len(), 16);
    let ids: HashSet<i64> = photos.iter().map(|p| p.id).collect();
    assert_eq!(ids.len(), 16);
    assert!(photos.windows(2).all(|pair| pair[0].id > pair[1].id));
    Ok(())
}

#[tokio::test]
async fn repository_is_usable_as_trait_object() -> Result<()> {
    let dir = tempdir()?;
    let database = Database::connect_file(&dir.path().join("photos.db")).await?;
    let repository: std::sync::Arc<dyn PhotoRepository> = std::sync::Arc::new(database);

    repository.insert("dyn.jpg", "memory://dyn.jpg").await?;
    let photos = repository.list_all().await?;
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].photo_url, "memory://dyn.jpg");
    Ok(())
}
