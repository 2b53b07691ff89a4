//! Config resolution caching

use std::time::Duration;

use mcproxy_core::InstanceRepository;
use mcproxy_gateway::{content_hash, ConfigResolver};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tests::{fixtures, MockInstanceRepository};

fn repo() -> Arc<MockInstanceRepository> {
    Arc::new(
        MockInstanceRepository::new()
            .with_instance(fixtures::instance("inst"))
            .with_backends(
                "inst",
                vec![fixtures::backend("A", &["x"]), fixtures::backend("B", &["y"])],
            ),
    )
}

#[tokio::test]
async fn test_resolution_is_cached_within_ttl() {
    let repo = repo();
    let resolver = ConfigResolver::new(repo.clone(), Duration::from_secs(60));

    let first = resolver.resolve("inst").await.unwrap();
    let second = resolver.resolve("inst").await.unwrap();

    assert_eq!(repo.loads(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.organization_id, fixtures::ORG);
    assert_eq!(first.owner_id, fixtures::OWNER);
    let names: Vec<_> = first.backends.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(first.content_hash, content_hash(&first.backends));
}

#[tokio::test]
async fn test_concurrent_misses_load_once() {
    let repo = repo();
    let resolver = Arc::new(ConfigResolver::new(repo.clone(), Duration::from_secs(60)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                resolver.resolve("inst").await.map(|r| r.content_hash.clone())
            })
        })
        .collect();
    let hashes: Vec<String> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.unwrap().unwrap())
        .collect();

    assert_eq!(repo.loads(), 1);
    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_invalidate_reloads_and_rehashes() {
    let repo = repo();
    let resolver = ConfigResolver::new(repo.clone(), Duration::from_secs(60));
    let before = resolver.resolve("inst").await.unwrap();

    repo.save_backend("inst", 1, &fixtures::backend("B", &["y", "w"]))
        .await
        .unwrap();
    // Still cached
    assert_eq!(
        resolver.resolve("inst").await.unwrap().content_hash,
        before.content_hash
    );

    resolver.invalidate("inst");
    let after = resolver.resolve("inst").await.unwrap();

    assert_eq!(repo.loads(), 2);
    assert_ne!(after.content_hash, before.content_hash);
    assert!(after.backends[1].owns("w"));
}

#[tokio::test]
async fn test_zero_ttl_always_reloads() {
    let repo = repo();
    let resolver = ConfigResolver::new(repo.clone(), Duration::ZERO);

    resolver.resolve("inst").await.unwrap();
    resolver.resolve("inst").await.unwrap();

    assert_eq!(repo.loads(), 2);
}

#[tokio::test]
async fn test_unknown_instance_is_not_found() {
    let repo = repo();
    let resolver = ConfigResolver::new(repo.clone(), Duration::from_secs(60));

    let err = resolver.resolve("missing").await.unwrap_err();

    assert_eq!(err.code(), "not_found");
    assert_eq!(repo.loads(), 0);
}

#[tokio::test]
async fn test_unknown_instances_leave_no_load_locks() {
    let repo = repo();
    let resolver = ConfigResolver::new(repo.clone(), Duration::from_secs(60));

    for i in 0..50 {
        let err = resolver.resolve(&format!("random-{}", i)).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    assert_eq!(resolver.loads_in_flight(), 0);
    resolver.resolve("inst").await.unwrap();
    assert_eq!(resolver.loads_in_flight(), 0);
}
