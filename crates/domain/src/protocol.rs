//! Celery任务信封的编解码
//!
//! v2：任务名和id在消息头中，消息体为 `[args, kwargs, embed]` 三元组。
//! v1：消息体为扁平对象，`task`/`id`/`args`/`kwargs` 等都是其中的字段。

use celery_errors::{CeleryError, CeleryResult};
use serde_json::{json, Map, Value};

use crate::envelope::{MessageProperties, TaskEmbed, TaskHeaders, TaskInvocation, TransportMessage};

/// 任务信封协议代际
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    V1,
    #[default]
    V2,
}

impl ProtocolVersion {
    /// 消息头带有非空的 `task` 字段即为 v2
    pub fn detect(message: &TransportMessage) -> Self {
        match message.header("task") {
            Some(Value::String(task)) if !task.is_empty() => ProtocolVersion::V2,
            _ => ProtocolVersion::V1,
        }
    }
}

/// 将传输层消息解码为规范化的任务调用
pub fn decode_invocation(message: &TransportMessage) -> CeleryResult<TaskInvocation> {
    let body = message.decode()?;
    match ProtocolVersion::detect(message) {
        ProtocolVersion::V2 => decode_v2(message.headers(), body),
        ProtocolVersion::V1 => decode_v1(body),
    }
}

fn decode_v2(headers: &Map<String, Value>, body: Value) -> CeleryResult<TaskInvocation> {
    let task = headers
        .get("task")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    let id = headers
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CeleryError::decode(format!("任务 {task} 的消息头缺少id")))?;

    let Value::Array(mut parts) = body else {
        return Err(CeleryError::decode(format!(
            "任务 {task}[{id}] 的v2消息体不是 [args, kwargs, embed] 数组"
        )));
    };
    if parts.is_empty() || parts.len() > 3 {
        return Err(CeleryError::decode(format!(
            "任务 {task}[{id}] 的v2消息体长度无效: {}",
            parts.len()
        )));
    }
    parts.resize(3, Value::Null);
    let embed = TaskEmbed::from_value(Some(&parts[2]));
    let kwargs = take_kwargs(parts[1].take(), &task)?;
    let args = take_args(parts[0].take(), &task)?;

    Ok(TaskInvocation {
        protocol: ProtocolVersion::V2,
        headers: TaskHeaders::from_fields(task, id, headers),
        args,
        kwargs,
        embed,
    })
}

fn decode_v1(body: Value) -> CeleryResult<TaskInvocation> {
    let Value::Object(mut fields) = body else {
        return Err(CeleryError::UnrecognizedEnvelope(
            "消息头没有task字段且消息体不是对象".to_string(),
        ));
    };
    let task = match fields.get("task") {
        Some(Value::String(task)) if !task.is_empty() => task.clone(),
        _ => {
            return Err(CeleryError::UnrecognizedEnvelope(
                "消息头和消息体中都没有task字段".to_string(),
            ))
        }
    };
    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CeleryError::decode(format!("任务 {task} 的v1消息体缺少id")))?;

    let args = take_args(fields.remove("args").unwrap_or(Value::Null), &task)?;
    let kwargs = take_kwargs(fields.remove("kwargs").unwrap_or(Value::Null), &task)?;
    let embed = TaskEmbed {
        callbacks: fields.get("callbacks").filter(|v| !v.is_null()).cloned(),
        errbacks: fields.get("errbacks").filter(|v| !v.is_null()).cloned(),
        chord: fields.get("chord").filter(|v| !v.is_null()).cloned(),
        chain: None,
    };

    Ok(TaskInvocation {
        protocol: ProtocolVersion::V1,
        headers: TaskHeaders::from_fields(task, id, &fields),
        args,
        kwargs,
        embed,
    })
}

fn take_args(value: Value, task: &str) -> CeleryResult<Vec<Value>> {
    match value {
        Value::Array(args) => Ok(args),
        Value::Null => Ok(Vec::new()),
        other => Err(CeleryError::decode(format!(
            "任务 {task} 的args不是数组: {other}"
        ))),
    }
}

fn take_kwargs(value: Value, task: &str) -> CeleryResult<Map<String, Value>> {
    match value {
        Value::Object(kwargs) => Ok(kwargs),
        Value::Null => Ok(Map::new()),
        other => Err(CeleryError::decode(format!(
            "任务 {task} 的kwargs不是对象: {other}"
        ))),
    }
}

/// 编码后的信封：消息体、消息头以及建议的发布属性
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEnvelope {
    pub body: Value,
    pub headers: Map<String, Value>,
    pub properties: MessageProperties,
}

fn envelope_properties(invocation: &TaskInvocation) -> MessageProperties {
    MessageProperties {
        correlation_id: Some(invocation.task_id().to_string()),
        ..Default::default()
    }
}

/// 编码为v2信封
pub fn encode_v2(invocation: &TaskInvocation) -> EncodedEnvelope {
    EncodedEnvelope {
        body: json!([invocation.args, invocation.kwargs, invocation.embed.to_value()]),
        headers: invocation.headers.to_fields(),
        properties: envelope_properties(invocation),
    }
}

/// 编码为v1扁平消息体，消息头为空
pub fn encode_v1(invocation: &TaskInvocation) -> EncodedEnvelope {
    let headers = &invocation.headers;
    let mut body = headers.to_fields();
    body.insert("args".into(), json!(invocation.args));
    body.insert("kwargs".into(), json!(invocation.kwargs));
    body.insert("callbacks".into(), json!(invocation.embed.callbacks));
    body.insert("errbacks".into(), json!(invocation.embed.errbacks));
    body.insert("chord".into(), json!(invocation.embed.chord));
    body.insert("taskset".into(), json!(headers.group));
    body.insert("utc".into(), json!(true));

    EncodedEnvelope {
        body: Value::Object(body),
        headers: Map::new(),
        properties: envelope_properties(invocation),
    }
}
