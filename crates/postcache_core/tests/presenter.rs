use async_trait::async_trait;
use postcache_core::{
    EntityStorage, FetchClient, FetchError, FlatStore, MemoryNamespace, Post, PostListPresenter,
    PostListView, PresenterError, PresenterState, RawRecord, StoreConfig, StoreCoordinator,
    StubApi,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingView {
    events: Mutex<Vec<String>>,
}

impl RecordingView {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PostListView for RecordingView {
    fn show_error(&self, error: &PresenterError) {
        self.events.lock().unwrap().push(format!("error: {error}"));
    }

    fn update_view(&self) {
        self.events.lock().unwrap().push("update".to_string());
    }
}

fn single_record() -> Vec<RawRecord> {
    vec![serde_json::from_value(json!({"id": 1, "title": "A", "body": "B"})).unwrap()]
}

fn stub() -> StubApi {
    StubApi::new()
        .with_delay(Duration::ZERO)
        .with_records(single_record())
}

#[tokio::test]
async fn flat_backend_publishes_stored_posts() {
    let view = Arc::new(RecordingView::default());
    let storage = Arc::new(FlatStore::new(Arc::new(MemoryNamespace::new())));
    let mut presenter = PostListPresenter::new(Arc::new(stub()), storage).with_view(view.clone());

    presenter.update().await.unwrap();

    assert_eq!(presenter.posts(), &[Post::new(1, "A", "B")]);
    assert_eq!(view.events(), vec!["update".to_string()]);
}

#[tokio::test]
async fn entity_backend_publishes_stored_posts() {
    let coordinator = StoreCoordinator::open(StoreConfig::in_memory("Model").unwrap()).unwrap();
    let view = Arc::new(RecordingView::default());
    let storage = Arc::new(EntityStorage::new(coordinator));
    let mut presenter = PostListPresenter::new(Arc::new(stub()), storage).with_view(view.clone());

    presenter.update().await.unwrap();

    assert_eq!(presenter.posts(), &[Post::new(1, "A", "B")]);
    assert_eq!(view.events(), vec!["update".to_string()]);
}

#[tokio::test]
async fn entity_backend_accumulates_across_cycles() {
    let coordinator = StoreCoordinator::open(StoreConfig::in_memory("Model").unwrap()).unwrap();
    let storage = Arc::new(EntityStorage::new(coordinator));
    let mut presenter = PostListPresenter::new(Arc::new(stub()), storage);

    presenter.update().await.unwrap();
    presenter.update().await.unwrap();

    assert_eq!(
        presenter.posts(),
        &[Post::new(1, "A", "B"), Post::new(1, "A", "B")]
    );
}

#[tokio::test]
async fn fetch_failure_notifies_error_and_keeps_posts() {
    let client = Arc::new(SwitchableClient::default());
    let view = Arc::new(RecordingView::default());
    let storage = Arc::new(FlatStore::new(Arc::new(MemoryNamespace::new())));
    let mut presenter = PostListPresenter::new(client.clone(), storage).with_view(view.clone());
    presenter.update().await.unwrap();

    client.offline.store(true, Ordering::SeqCst);
    let err = presenter.update().await.unwrap_err();

    assert!(matches!(err, PresenterError::Fetch(_)));
    assert_eq!(presenter.state(), PresenterState::Failed);
    assert_eq!(presenter.posts(), &[Post::new(1, "A", "B")]);
    assert_eq!(
        view.events(),
        vec![
            "update".to_string(),
            "error: post source unavailable: offline".to_string()
        ]
    );

    client.offline.store(false, Ordering::SeqCst);
    presenter.update().await.unwrap();
    assert_eq!(presenter.state(), PresenterState::Idle);
    assert_eq!(view.events().len(), 3);
}

#[tokio::test]
async fn failing_stub_reports_once_per_cycle() {
    let view = Arc::new(RecordingView::default());
    let storage = Arc::new(FlatStore::new(Arc::new(MemoryNamespace::new())));
    let mut presenter = PostListPresenter::new(Arc::new(stub().failing("down")), storage)
        .with_view(view.clone());

    assert!(presenter.update().await.is_err());
    assert!(presenter.update().await.is_err());

    assert!(presenter.posts().is_empty());
    assert_eq!(
        view.events(),
        vec![
            "error: post source unavailable: down".to_string(),
            "error: post source unavailable: down".to_string()
        ]
    );
}

/// Serves `single_record` until switched offline.
#[derive(Default)]
struct SwitchableClient {
    offline: AtomicBool,
}

#[async_trait]
impl FetchClient for SwitchableClient {
    async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unavailable("offline".to_string()));
        }
        Ok(single_record())
    }
}
