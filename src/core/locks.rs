//! 按任务串行化：同一线程（thread key）的回复依次应用
//!
//! 同一任务的两条线程回复若并发到达，分类 + 写入会互相覆盖；这里为每个 key 维护一把异步互斥锁，
//! 不同任务之间互不阻塞。锁对象在无人持有时回收，避免 map 无限增长。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// key -> 异步互斥锁
#[derive(Default, Clone)]
pub struct TaskLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// 持有期间同一 key 的其它调用方等待；drop 时释放并尝试回收
pub struct TaskLockGuard {
    key: String,
    owner: TaskLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取某个 key 的锁（等待前一个持有者完成）
    pub async fn acquire(&self, key: &str) -> TaskLockGuard {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        TaskLockGuard {
            key: key.to_string(),
            owner: self.clone(),
            guard: Some(guard),
        }
    }

    /// 当前登记的 key 数量
    pub fn len(&self) -> usize {
        self.locks.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        // 只剩 map 自己持有引用时回收
        if let Some(lock) = map.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.key);
            }
        }
    }
}
