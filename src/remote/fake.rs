//! Scripted in-memory remote store for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use super::{
    AssetDownload, AssetFilter, Connection, Connector, RemoteAsset, RemoteError, RemoteStore,
};

/// In-memory store that counts calls and fails on demand
#[derive(Default)]
pub struct FakeStore {
    listings: Mutex<HashMap<String, Vec<RemoteAsset>>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    list_calls: AtomicU32,
    download_calls: AtomicU32,
    list_failures: AtomicU32,
    download_failures: AtomicU32,
    broken_streams: AtomicU32,
    offline: AtomicBool,
    list_call_times: Mutex<Vec<Instant>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listing(&self, folder_id: &str, assets: Vec<RemoteAsset>) {
        self.listings
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), assets);
    }

    pub fn set_content(&self, remote_id: &str, data: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), data.to_vec());
    }

    /// Fail the next `n` list calls
    pub fn fail_next_lists(&self, n: u32) {
        self.list_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` download calls before any byte is sent
    pub fn fail_next_downloads(&self, n: u32) {
        self.download_failures.store(n, Ordering::SeqCst);
    }

    /// Break the next `n` download streams after their first chunk
    pub fn break_next_streams(&self, n: u32) {
        self.broken_streams.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn list_call_times(&self) -> Vec<Instant> {
        self.list_call_times.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn list_files(
        &self,
        folder_id: &str,
        _filter: &AssetFilter,
    ) -> Result<Vec<RemoteAsset>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_call_times.lock().unwrap().push(Instant::now());

        if self.offline.load(Ordering::SeqCst) || Self::take_failure(&self.list_failures) {
            return Err(RemoteError::Server(503, "unavailable".to_string()));
        }

        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(folder_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_file(&self, remote_id: &str) -> Result<AssetDownload, RemoteError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) || Self::take_failure(&self.download_failures) {
            return Err(RemoteError::Network("connection reset".to_string()));
        }

        let data = self
            .contents
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;

        let content_length = Some(data.len() as u64);
        let half = data.len() / 2;
        let first = Bytes::copy_from_slice(&data[..half]);
        let second = Bytes::copy_from_slice(&data[half..]);

        let body = if Self::take_failure(&self.broken_streams) {
            stream::iter(vec![
                Ok(first),
                Err(RemoteError::Network("stream interrupted".to_string())),
            ])
            .boxed()
        } else {
            stream::iter(vec![Ok(first), Ok(second)]).boxed()
        };

        Ok(AssetDownload {
            content_length,
            body,
        })
    }
}

/// Connection that comes up on first use and talks to `store`
pub fn connected(store: &Arc<FakeStore>) -> Arc<Connection> {
    Arc::new(Connection::new(FakeConnector::failing_first(0, Arc::clone(store))))
}

/// Connector handing out a shared [`FakeStore`] after a number of failed attempts
pub struct FakeConnector {
    store: Arc<FakeStore>,
    failures_left: AtomicU32,
    attempts: Arc<AtomicU32>,
}

impl FakeConnector {
    pub fn failing_first(failures: u32, store: Arc<FakeStore>) -> Self {
        Self {
            store,
            failures_left: AtomicU32::new(failures),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn never(store: Arc<FakeStore>) -> Self {
        Self::failing_first(u32::MAX, store)
    }

    pub fn attempts(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if FakeStore::take_failure(&self.failures_left) {
            return Err(RemoteError::Connection("credentials rejected".to_string()));
        }
        Ok(Arc::clone(&self.store) as Arc<dyn RemoteStore>)
    }
}
