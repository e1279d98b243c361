//! JSON与AMQP字段表之间的转换

use celery_domain::{MessageProperties, TransportMessage};
use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString};
use lapin::BasicProperties;
use serde_json::{Map, Number, Value};

pub fn json_to_amqp(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AMQPValue::LongLongInt(i)
            } else {
                AMQPValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(json_to_amqp).collect::<Vec<_>>(),
        )),
        Value::Object(fields) => AMQPValue::FieldTable(json_to_table(fields)),
    }
}

pub fn json_to_table(fields: &Map<String, Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in fields {
        table.insert(ShortString::from(key.clone()), json_to_amqp(value));
    }
    table
}

pub fn amqp_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(i) => Value::from(*i),
        AMQPValue::ShortShortUInt(i) => Value::from(*i),
        AMQPValue::ShortInt(i) => Value::from(*i),
        AMQPValue::ShortUInt(i) => Value::from(*i),
        AMQPValue::LongInt(i) => Value::from(*i),
        AMQPValue::LongUInt(i) => Value::from(*i),
        AMQPValue::LongLongInt(i) => Value::from(*i),
        AMQPValue::Timestamp(t) => Value::from(*t),
        AMQPValue::Float(f) => Number::from_f64(f64::from(*f)).map_or(Value::Null, Value::Number),
        AMQPValue::Double(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(amqp_to_json).collect())
        }
        AMQPValue::FieldTable(table) => Value::Object(table_to_json(table)),
        _ => Value::Null,
    }
}

pub fn table_to_json(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), amqp_to_json(value)))
        .collect()
}

/// 将发布属性转为lapin的BasicProperties，未设置的字段保持缺省
pub fn to_basic_properties(
    properties: &MessageProperties,
    headers: &Map<String, Value>,
) -> BasicProperties {
    let mut basic = BasicProperties::default().with_headers(json_to_table(headers));
    if let Some(v) = &properties.content_type {
        basic = basic.with_content_type(ShortString::from(v.clone()));
    }
    if let Some(v) = &properties.content_encoding {
        basic = basic.with_content_encoding(ShortString::from(v.clone()));
    }
    if let Some(v) = properties.delivery_mode {
        basic = basic.with_delivery_mode(v);
    }
    if let Some(v) = properties.priority {
        basic = basic.with_priority(v);
    }
    if let Some(v) = &properties.correlation_id {
        basic = basic.with_correlation_id(ShortString::from(v.clone()));
    }
    if let Some(v) = &properties.reply_to {
        basic = basic.with_reply_to(ShortString::from(v.clone()));
    }
    if let Some(v) = &properties.expiration {
        basic = basic.with_expiration(ShortString::from(v.clone()));
    }
    if let Some(v) = &properties.message_id {
        basic = basic.with_message_id(ShortString::from(v.clone()));
    }
    basic
}

fn short(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|s| s.as_str().to_string())
}

/// 由lapin投递构造传输层消息
pub fn to_transport_message(delivery: &Delivery) -> TransportMessage {
    let basic = &delivery.properties;
    let properties = MessageProperties {
        content_type: short(basic.content_type()),
        content_encoding: short(basic.content_encoding()),
        correlation_id: short(basic.correlation_id()),
        reply_to: short(basic.reply_to()),
        delivery_mode: *basic.delivery_mode(),
        priority: *basic.priority(),
        expiration: short(basic.expiration()),
        message_id: short(basic.message_id()),
        delivery_tag: Some(delivery.delivery_tag),
        redelivered: Some(delivery.redelivered),
        exchange: Some(delivery.exchange.as_str().to_string()),
        routing_key: Some(delivery.routing_key.as_str().to_string()),
    };
    let headers = basic
        .headers()
        .as_ref()
        .map(table_to_json)
        .unwrap_or_default();

    TransportMessage::new(
        delivery.data.clone(),
        properties.content_type.clone(),
        properties.content_encoding.clone(),
        properties,
        headers,
    )
}
