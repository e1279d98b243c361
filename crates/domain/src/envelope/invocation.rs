use serde_json::{json, Map, Value};

use crate::protocol::ProtocolVersion;

/// 规范化后的任务头
///
/// v2 直接取自AMQP消息头，v1 取自扁平消息体中的同名字段。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskHeaders {
    pub lang: Option<String>,
    pub task: String,
    pub id: String,
    pub root_id: Option<String>,
    pub parent_id: Option<String>,
    pub group: Option<String>,
    pub meth: Option<String>,
    pub shadow: Option<String>,
    pub eta: Option<String>,
    pub expires: Option<String>,
    pub retries: u32,
    /// (soft, hard)，默认都没有限制
    pub timelimit: [Option<f64>; 2],
    pub argsrepr: Option<String>,
    pub kwargsrepr: Option<String>,
    pub origin: Option<String>,
}

fn str_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

impl TaskHeaders {
    pub fn new(task: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    /// 从字段映射构造，`task`/`id` 由调用方事先解析
    pub fn from_fields(task: String, id: String, fields: &Map<String, Value>) -> Self {
        let timelimit = match fields.get("timelimit") {
            Some(Value::Array(limits)) => [
                limits.first().and_then(Value::as_f64),
                limits.get(1).and_then(Value::as_f64),
            ],
            _ => [None, None],
        };

        Self {
            lang: str_field(fields, "lang"),
            task,
            id,
            root_id: str_field(fields, "root_id").or_else(|| str_field(fields, "rootId")),
            parent_id: str_field(fields, "parent_id").or_else(|| str_field(fields, "parentId")),
            group: str_field(fields, "group").or_else(|| str_field(fields, "taskset")),
            meth: str_field(fields, "meth"),
            shadow: str_field(fields, "shadow"),
            eta: str_field(fields, "eta"),
            expires: str_field(fields, "expires"),
            retries: fields
                .get("retries")
                .and_then(Value::as_u64)
                .map(|r| u32::try_from(r).unwrap_or(u32::MAX))
                .unwrap_or(0),
            timelimit,
            argsrepr: str_field(fields, "argsrepr"),
            kwargsrepr: str_field(fields, "kwargsrepr"),
            origin: str_field(fields, "origin"),
        }
    }

    /// 以Celery消息头字段名输出
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("lang".into(), json!(self.lang));
        fields.insert("task".into(), json!(self.task));
        fields.insert("id".into(), json!(self.id));
        fields.insert("root_id".into(), json!(self.root_id));
        fields.insert("parent_id".into(), json!(self.parent_id));
        fields.insert("group".into(), json!(self.group));
        fields.insert("meth".into(), json!(self.meth));
        fields.insert("shadow".into(), json!(self.shadow));
        fields.insert("eta".into(), json!(self.eta));
        fields.insert("expires".into(), json!(self.expires));
        fields.insert("retries".into(), json!(self.retries));
        fields.insert("timelimit".into(), json!(self.timelimit));
        fields.insert("argsrepr".into(), json!(self.argsrepr));
        fields.insert("kwargsrepr".into(), json!(self.kwargsrepr));
        fields.insert("origin".into(), json!(self.origin));
        fields
    }
}

/// 回调/链式编排信息，只透传不解释
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskEmbed {
    pub callbacks: Option<Value>,
    pub errbacks: Option<Value>,
    pub chord: Option<Value>,
    pub chain: Option<Value>,
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

impl TaskEmbed {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Object(fields)) => Self {
                callbacks: non_null(fields.get("callbacks")),
                errbacks: non_null(fields.get("errbacks")),
                chord: non_null(fields.get("chord")),
                chain: non_null(fields.get("chain")),
            },
            _ => Self::default(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "callbacks": self.callbacks,
            "errbacks": self.errbacks,
            "chain": self.chain,
            "chord": self.chord,
        })
    }
}

/// 与协议版本无关的任务调用
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInvocation {
    pub protocol: ProtocolVersion,
    pub headers: TaskHeaders,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub embed: TaskEmbed,
}

impl TaskInvocation {
    pub fn new(
        task: impl Into<String>,
        id: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Self {
        let mut headers = TaskHeaders::new(task, id);
        headers.root_id = Some(headers.id.clone());
        Self {
            protocol: ProtocolVersion::V2,
            headers,
            args,
            kwargs,
            embed: TaskEmbed::default(),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.headers.task
    }

    pub fn task_id(&self) -> &str {
        &self.headers.id
    }

    /// 两个调用是否请求同一次执行（名称、参数、id相同），忽略协议代际
    pub fn same_call(&self, other: &TaskInvocation) -> bool {
        self.task_name() == other.task_name()
            && self.task_id() == other.task_id()
            && self.args == other.args
            && self.kwargs == other.kwargs
    }
}
