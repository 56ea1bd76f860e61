use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

/// 会话内的后台操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ProvisionStore,
    Upload { batch_id: u64 },
    Indexing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub session_id: Uuid,
    pub operation: Operation,
}

impl TaskKey {
    pub fn new(session_id: Uuid, operation: Operation) -> Self {
        Self {
            session_id,
            operation,
        }
    }
}

struct Entry {
    generation: u64,
    handle: AbortHandle,
}

/// 按 (会话, 操作) 索引的可取消后台任务
#[derive(Clone, Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<TaskKey, Entry>>>,
    generation: Arc<AtomicU64>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskKey, Entry>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 启动任务；同键的旧任务会被取消
    pub fn schedule<F>(&self, key: TaskKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();

        // 持锁启动，保证任务结束时的清理发生在登记之后
        let mut guard = self.lock();
        let handle = tokio::spawn(async move {
            task.await;
            let mut map = tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if map.get(&key).map(|e| e.generation) == Some(generation) {
                map.remove(&key);
            }
        });
        if let Some(previous) = guard.insert(
            key,
            Entry {
                generation,
                handle: handle.abort_handle(),
            },
        ) {
            debug!(?key, "replacing scheduled task");
            previous.handle.abort();
        }
    }

    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// 取消某个会话的全部任务，返回取消数量
    pub fn cancel_session(&self, session_id: Uuid) -> usize {
        let mut guard = self.lock();
        let keys: Vec<TaskKey> = guard
            .keys()
            .filter(|k| k.session_id == session_id)
            .copied()
            .collect();
        for key in &keys {
            if let Some(entry) = guard.remove(key) {
                entry.handle.abort();
            }
        }
        keys.len()
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn pending(&self, session_id: Uuid) -> usize {
        self.lock()
            .keys()
            .filter(|k| k.session_id == session_id)
            .count()
    }
}
