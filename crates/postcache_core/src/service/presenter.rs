//! Post list presenter: fetch, persist, read back, notify.
//!
//! # Responsibility
//! - Run one update cycle: fetch client -> storage save -> storage read.
//! - Publish the re-read posts and notify the attached view.
//!
//! # Invariants
//! - Save strictly precedes the read inside one cycle.
//! - Published posts always come from the storage read, never the fetch.
//! - Each cycle notifies the view exactly once: `update_view` on success,
//!   `show_error` on failure. A failed cycle leaves published posts as is.

use super::storage::{PostStorage, StorageError};
use crate::api::{FetchClient, FetchError};
use crate::model::post::Post;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// View collaborator notified at the end of every cycle.
pub trait PostListView: Send + Sync {
    fn show_error(&self, error: &PresenterError);

    fn update_view(&self);
}

/// Presenter cycle failure, forwarded verbatim to the view.
#[derive(Debug)]
pub enum PresenterError {
    Fetch(FetchError),
    Storage(StorageError),
}

impl Display for PresenterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PresenterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<FetchError> for PresenterError {
    fn from(value: FetchError) -> Self {
        Self::Fetch(value)
    }
}

impl From<StorageError> for PresenterError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// Where the presenter is inside its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterState {
    Idle,
    Fetching,
    Saving,
    Reading,
    /// The last cycle failed; the next `update` starts over.
    Failed,
}

impl PresenterState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Saving => "saving",
            Self::Reading => "reading",
            Self::Failed => "failed",
        }
    }
}

pub struct PostListPresenter {
    client: Arc<dyn FetchClient>,
    storage: Arc<dyn PostStorage>,
    view: Option<Arc<dyn PostListView>>,
    posts: Vec<Post>,
    state: PresenterState,
}

impl PostListPresenter {
    pub fn new(client: Arc<dyn FetchClient>, storage: Arc<dyn PostStorage>) -> Self {
        Self {
            client,
            storage,
            view: None,
            posts: Vec::new(),
            state: PresenterState::Idle,
        }
    }

    pub fn with_view(mut self, view: Arc<dyn PostListView>) -> Self {
        self.view = Some(view);
        self
    }

    /// Drops the view; later cycles still run but notify nobody.
    pub fn teardown(&mut self) {
        self.view = None;
    }

    /// Posts published by the last successful cycle.
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn state(&self) -> PresenterState {
        self.state
    }

    /// Runs one full cycle and notifies the view once.
    pub async fn update(&mut self) -> Result<(), PresenterError> {
        match self.run_cycle().await {
            Ok(posts) => {
                self.posts = posts;
                self.state = PresenterState::Idle;
                info!(
                    "event=presenter_update module=presenter status=ok posts={}",
                    self.posts.len()
                );
                if let Some(view) = &self.view {
                    view.update_view();
                }
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=presenter_update module=presenter status=error stage={} error={}",
                    self.state.as_str(),
                    err
                );
                self.state = PresenterState::Failed;
                if let Some(view) = &self.view {
                    view.show_error(&err);
                }
                Err(err)
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<Vec<Post>, PresenterError> {
        self.state = PresenterState::Fetching;
        let records = self.client.fetch_records().await?;

        self.state = PresenterState::Saving;
        self.storage.save(records).await?;

        self.state = PresenterState::Reading;
        Ok(self.storage.fetch().await?)
    }
}
