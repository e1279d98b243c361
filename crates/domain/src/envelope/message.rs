use celery_errors::{CeleryError, CeleryResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_ENCODING_UTF8: &str = "utf-8";

/// 传输层消息属性
///
/// 接收时携带投递元数据（delivery_tag、redelivered等），发布时作为调用方覆盖项，
/// 其中为 `Some` 的字段会覆盖计算出的默认属性。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub delivery_tag: Option<u64>,
    pub redelivered: Option<bool>,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
}

impl MessageProperties {
    /// 发布时的默认属性：JSON、utf-8、持久化投递
    pub fn json_persistent() -> Self {
        Self {
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            content_encoding: Some(CONTENT_ENCODING_UTF8.to_string()),
            delivery_mode: Some(2),
            ..Default::default()
        }
    }

    /// 用 `overrides` 中已设置的字段覆盖当前属性
    pub fn merged_with(mut self, overrides: &MessageProperties) -> Self {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        take(&mut self.content_type, &overrides.content_type);
        take(&mut self.content_encoding, &overrides.content_encoding);
        take(&mut self.correlation_id, &overrides.correlation_id);
        take(&mut self.reply_to, &overrides.reply_to);
        take(&mut self.delivery_mode, &overrides.delivery_mode);
        take(&mut self.priority, &overrides.priority);
        take(&mut self.expiration, &overrides.expiration);
        take(&mut self.message_id, &overrides.message_id);
        take(&mut self.delivery_tag, &overrides.delivery_tag);
        take(&mut self.redelivered, &overrides.redelivered);
        take(&mut self.exchange, &overrides.exchange);
        take(&mut self.routing_key, &overrides.routing_key);
        self
    }
}

/// 从传输层收到的原始消息，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    body: Vec<u8>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    properties: MessageProperties,
    headers: Map<String, Value>,
}

impl TransportMessage {
    pub fn new(
        body: Vec<u8>,
        content_type: Option<String>,
        content_encoding: Option<String>,
        properties: MessageProperties,
        headers: Map<String, Value>,
    ) -> Self {
        Self {
            body,
            content_type,
            content_encoding,
            properties,
            headers,
        }
    }

    /// 以JSON/utf-8序列化消息体，属性取自 `properties`
    pub fn from_json(
        body: &Value,
        headers: Map<String, Value>,
        properties: MessageProperties,
    ) -> CeleryResult<Self> {
        let payload = serde_json::to_vec(body)?;
        Ok(Self {
            body: payload,
            content_type: properties.content_type.clone(),
            content_encoding: properties.content_encoding.clone(),
            properties,
            headers,
        })
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub fn headers(&self) -> &Map<String, Value> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// 校验内容类型与编码，目前只支持 application/json + utf-8
    pub fn validate_content(&self) -> CeleryResult<()> {
        if self.content_type() != Some(CONTENT_TYPE_JSON) {
            return Err(CeleryError::decode(format!(
                "unsupported content type {}",
                self.content_type().unwrap_or("<none>")
            )));
        }
        if self.content_encoding() != Some(CONTENT_ENCODING_UTF8) {
            return Err(CeleryError::decode(format!(
                "unsupported content encoding {}",
                self.content_encoding().unwrap_or("<none>")
            )));
        }
        Ok(())
    }

    /// 将消息体解码为JSON
    pub fn decode(&self) -> CeleryResult<Value> {
        let text = std::str::from_utf8(&self.body)
            .map_err(|e| CeleryError::decode(format!("消息体不是有效的utf-8: {e}")))?;
        serde_json::from_str(text)
            .map_err(|e| CeleryError::decode(format!("消息体不是有效的JSON: {e}")))
    }
}
