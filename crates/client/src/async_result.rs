use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use celery_domain::{ResultBackend, ResultRecord, TaskState};
use celery_errors::CeleryResult;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// `get` 的默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 轮询间隔的下限，更小的值按此处理
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
enum CacheSlot {
    Empty,
    Resolved(Option<ResultRecord>),
}

impl CacheSlot {
    /// 缓存中的终态记录
    fn terminal(&self) -> Option<&ResultRecord> {
        match self {
            CacheSlot::Resolved(Some(record)) if record.status.is_terminal() => Some(record),
            _ => None,
        }
    }
}

/// 单个任务的结果句柄
///
/// 结果后端的读取是破坏性的，读到的记录保存在实例自己的缓存里；
/// 只有终态记录会被复用，其余情况重新读取。不同实例之间不共享缓存。
pub struct AsyncResult {
    task_id: String,
    backend: Arc<dyn ResultBackend>,
    poll_interval: Duration,
    cache: Mutex<CacheSlot>,
}

impl AsyncResult {
    pub fn new(task_id: impl Into<String>, backend: Arc<dyn ResultBackend>) -> Self {
        Self {
            task_id: task_id.into(),
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache: Mutex::new(CacheSlot::Empty),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 等待任务结束并返回结果，使用默认轮询间隔
    pub async fn get(&self, timeout: Option<Duration>) -> CeleryResult<Value> {
        self.get_with_interval(timeout, self.poll_interval).await
    }

    /// 等待任务结束并返回结果
    ///
    /// FAILURE、REVOKED以及超时返回 `CeleryError::TaskState`，其显示文本就是状态名，
    /// `data()` 为记录中的result。
    pub async fn get_with_interval(
        &self,
        timeout: Option<Duration>,
        interval: Duration,
    ) -> CeleryResult<Value> {
        let mut cache = self.cache.lock().await;
        let record = match cache.terminal() {
            Some(record) => record.clone(),
            None => {
                let record = self.poll(timeout, interval).await;
                *cache = CacheSlot::Resolved(Some(record.clone()));
                record
            }
        };
        record.into_outcome()
    }

    /// 每隔 `interval` 读取一次，直到读到终态记录或超过 `timeout`
    ///
    /// 截止时间与轮询同时就绪时超时优先；已开始的读取会完整执行，下一次读取前重新检查截止时间。
    async fn poll(&self, timeout: Option<Duration>, interval: Duration) -> ResultRecord {
        let now = Instant::now();
        // 超出时钟范围的超时视为没有截止时间
        let deadline = timeout.and_then(|t| now.checked_add(t));
        let expired = time::sleep(timeout.unwrap_or(Duration::MAX));
        tokio::pin!(expired);

        let interval = interval.max(MIN_POLL_INTERVAL);
        let first_tick = now.checked_add(interval).unwrap_or(now);
        let mut ticker = time::interval_at(first_tick, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut expired, if deadline.is_some() => {
                    debug!("等待任务 {} 的结果超时", self.task_id);
                    return ResultRecord::timeout(&self.task_id);
                }
                _ = ticker.tick() => {}
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return ResultRecord::timeout(&self.task_id);
            }

            match self.backend.get_task_meta(&self.task_id).await {
                Some(record) if record.status.is_terminal() => return record,
                Some(record) => debug!("任务 {} 当前状态: {}", self.task_id, record.status),
                None => {}
            }
        }
    }

    /// 复用终态缓存，否则读取一次（不轮询）
    async fn fetch_once(&self) -> Option<ResultRecord> {
        let mut cache = self.cache.lock().await;
        if let Some(record) = cache.terminal() {
            return Some(record.clone());
        }
        let record = self.backend.get_task_meta(&self.task_id).await;
        *cache = CacheSlot::Resolved(record.clone());
        record
    }

    /// 当前结果，尚无记录时为 `None`
    pub async fn result(&self) -> Option<Value> {
        self.fetch_once().await.map(|record| record.result)
    }

    /// 当前状态，尚无记录时为 `None`
    pub async fn status(&self) -> Option<TaskState> {
        self.fetch_once().await.map(|record| record.status)
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("task_id", &self.task_id)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
