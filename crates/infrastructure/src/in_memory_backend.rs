use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use celery_domain::{
    result_queue_name, MessageProperties, ResultBackend, ResultRecord, TaskState, TransportMessage,
};
use celery_errors::CeleryResult;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

struct StoredResult {
    message: TransportMessage,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryBackendStats {
    pub stored: u64,
    pub reads: u64,
}

/// 内存结果后端
///
/// 按结果队列名保存，读取即移除。过期的结果在读取和写入时清理。
pub struct InMemoryBackend {
    results: Mutex<HashMap<String, VecDeque<StoredResult>>>,
    ttl: Duration,
    stored: AtomicU64,
    reads: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::with_ttl(Duration::from_millis(celery_config::DEFAULT_RESULT_EXPIRES_MS))
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            ttl,
            stored: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> InMemoryBackendStats {
        InMemoryBackendStats {
            stored: self.stored.load(Ordering::SeqCst),
            reads: self.reads.load(Ordering::SeqCst),
        }
    }

    /// 尚未被读取且未过期的结果条数
    pub fn pending(&self) -> usize {
        let now = Instant::now();
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flatten()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// 直接放入一条原始结果消息
    pub fn store_raw(&self, task_id: &str, message: TransportMessage) {
        let now = Instant::now();
        let entry = StoredResult {
            message,
            expires_at: now + self.ttl,
        };
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        sweep_expired(&mut results, now);
        results
            .entry(result_queue_name(task_id))
            .or_default()
            .push_back(entry);
        self.stored.fetch_add(1, Ordering::SeqCst);
    }

    fn pop(&self, task_id: &str) -> Option<TransportMessage> {
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        let queue = result_queue_name(task_id);
        let entries = results.get_mut(&queue)?;
        let now = Instant::now();
        let mut found = None;
        while let Some(entry) = entries.pop_front() {
            if entry.expires_at > now {
                found = Some(entry.message);
                break;
            }
            debug!("任务 {} 的结果已过期", task_id);
        }
        if entries.is_empty() {
            results.remove(&queue);
        }
        found
    }
}

/// 清除所有队列中已过期的结果，空队列一并移除
fn sweep_expired(results: &mut HashMap<String, VecDeque<StoredResult>>, now: Instant) {
    results.retain(|queue, entries| {
        let before = entries.len();
        entries.retain(|entry| entry.expires_at > now);
        if entries.len() < before {
            debug!("清理 {} 中过期的结果 {} 条", queue, before - entries.len());
        }
        !entries.is_empty()
    });
}

#[async_trait]
impl ResultBackend for InMemoryBackend {
    async fn is_ready(&self) -> CeleryResult<()> {
        Ok(())
    }

    async fn store_result(&self, task_id: &str, result: Value, state: TaskState) -> bool {
        let record = ResultRecord::completed(task_id, result, state);
        let properties = MessageProperties {
            correlation_id: Some(task_id.to_string()),
            ..MessageProperties::json_persistent()
        };
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(e) => {
                warn!("序列化任务 {} 的结果失败: {}", task_id, e);
                return false;
            }
        };
        match TransportMessage::from_json(&body, Map::new(), properties) {
            Ok(message) => {
                self.store_raw(task_id, message);
                true
            }
            Err(e) => {
                warn!("保存任务 {} 的结果失败: {}", task_id, e);
                false
            }
        }
    }

    async fn get_task_meta(&self, task_id: &str) -> Option<ResultRecord> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let message = self.pop(task_id)?;

        let decoded = message
            .validate_content()
            .and_then(|()| message.decode())
            .and_then(|body| Ok(serde_json::from_value::<ResultRecord>(body)?));
        match decoded {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("读取任务 {} 的结果失败: {}", task_id, e);
                None
            }
        }
    }

    async fn disconnect(&self) -> CeleryResult<()> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
