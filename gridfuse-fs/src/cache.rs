//! A byte-limited LRU cache for decoded chunks.
//!
use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{
    channel::oneshot::{channel, Sender},
    future::BoxFuture,
};
use parking_lot::Mutex;

use gridfuse::{ArrayData, Error, Result};

/// An LRU cache of decoded chunks, keyed by chunk file path.
///
/// Decoded chunks are held up to a byte limit; adding a chunk that pushes the total over
/// the limit evicts the least recently used chunks until it fits. Concurrent misses for
/// the same chunk are coalesced into a single load. Writers call `invalidate` after
/// rewriting a chunk file.
///
pub(crate) struct ChunkCache {
    entries: Mutex<Entries>,
    loaders: Mutex<HashMap<PathBuf, Arc<Loader>>>,
}

struct Entries {
    limit: u64,
    size: u64,
    map: HashMap<PathBuf, Arc<ArrayData>>,

    /// Cached paths, least recently used at the front.
    order: VecDeque<PathBuf>,
}

struct Loader {
    chunk: Mutex<Option<Result<Arc<ArrayData>>>>,
    waiters: Mutex<Vec<Sender<Result<Arc<ArrayData>>>>>,
}

fn chunk_bytes(chunk: &ArrayData) -> u64 {
    (chunk.len() * chunk.encoding().size()) as u64
}

impl ChunkCache {
    pub fn new(limit: u64) -> Self {
        Self {
            entries: Mutex::new(Entries {
                limit,
                size: 0,
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// Get a chunk, calling `load` on a miss.
    ///
    pub async fn get<L>(&self, path: &Path, load: L) -> Result<Arc<ArrayData>>
    where
        L: FnOnce(PathBuf) -> BoxFuture<'static, Result<ArrayData>>,
    {
        if let Some(chunk) = self.entries.lock().touch(path) {
            return Ok(chunk);
        }

        let (first, loader) = {
            let mut loaders = self.loaders.lock();
            match loaders.get(path) {
                Some(loader) => (false, Arc::clone(loader)),
                None => {
                    let loader = Arc::new(Loader::new());
                    loaders.insert(path.to_owned(), Arc::clone(&loader));

                    (true, loader)
                }
            }
        };

        if !first {
            return loader.wait().await;
        }

        let result = load(path.to_owned()).await.map(Arc::new);
        if let Ok(chunk) = &result {
            self.entries.lock().insert(path.to_owned(), Arc::clone(chunk));
        }
        loader.finish(&result);
        self.loaders.lock().remove(path);

        result
    }

    /// Drop a chunk from the cache after its file has been rewritten.
    ///
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.lock();
        if let Some(chunk) = entries.map.remove(path) {
            entries.size -= chunk_bytes(&chunk);
            entries.order.retain(|cached| cached != path);
        }
    }
}

impl Entries {
    /// Look up a chunk and mark it most recently used.
    ///
    fn touch(&mut self, path: &Path) -> Option<Arc<ArrayData>> {
        let chunk = self.map.get(path).cloned()?;
        self.order.retain(|cached| cached != path);
        self.order.push_back(path.to_owned());

        Some(chunk)
    }

    fn insert(&mut self, path: PathBuf, chunk: Arc<ArrayData>) {
        self.size += chunk_bytes(&chunk);
        if let Some(old) = self.map.insert(path.clone(), chunk) {
            self.size -= chunk_bytes(&old);
            self.order.retain(|cached| cached != &path);
        }
        self.order.push_back(path);

        while self.size > self.limit {
            let evicted = match self.order.pop_front() {
                Some(evicted) => evicted,
                None => break,
            };
            if let Some(chunk) = self.map.remove(&evicted) {
                self.size -= chunk_bytes(&chunk);
            }
        }
    }
}

impl Loader {
    fn new() -> Self {
        Self {
            chunk: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Hand the loaded chunk to any waiting tasks.
    ///
    fn finish(&self, result: &Result<Arc<ArrayData>>) {
        let share = |result: &Result<Arc<ArrayData>>| match result {
            Ok(chunk) => Ok(Arc::clone(chunk)),
            Err(err) => Err(Error::Corrupt(format!("chunk load failed: {err}"))),
        };

        *self.chunk.lock() = Some(share(result));
        for waiter in self.waiters.lock().drain(..) {
            // A waiter that gave up is fine to ignore.
            let _ = waiter.send(share(result));
        }
    }

    /// Wait for the loading task to finish.
    ///
    async fn wait(&self) -> Result<Arc<ArrayData>> {
        let receive = {
            let mut waiters = self.waiters.lock();
            if let Some(result) = &*self.chunk.lock() {
                return match result {
                    Ok(chunk) => Ok(Arc::clone(chunk)),
                    Err(err) => Err(Error::Corrupt(err.to_string())),
                };
            }
            let (send, receive) = channel();
            waiters.push(send);

            receive
        };

        receive.await.expect("loading task hung up")
    }
}
