use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use celery_errors::{CeleryError, CeleryResult};
use serde_json::{Map, Value};

/// 任务处理器：接收位置参数和一个关键字参数映射
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<Value> {
        (self.0)(args, kwargs).await
    }
}

struct SyncHandler<F>(F);

#[async_trait]
impl<F> TaskHandler for SyncHandler<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<Value> {
        (self.0)(args, kwargs)
    }
}

/// 由异步闭包构造处理器
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// 由同步闭包构造处理器
pub fn sync_handler<F>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(SyncHandler(f))
}

/// 任务名到处理器的映射，每个名称只能注册一次
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；处理器缺失或名称重复时失败
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Option<Arc<dyn TaskHandler>>,
    ) -> CeleryResult<()> {
        let name = name.into();
        let Some(handler) = handler else {
            return Err(CeleryError::UndefinedHandler { name });
        };

        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&name) {
            return Err(CeleryError::HandlerAlreadyRegistered { name });
        }
        handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// 已注册的任务名，按字母排序
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
