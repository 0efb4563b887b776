//! 载荷归一化
//!
//! 同一个 list 命令随 CLI 版本 / 传输方式不同可能返回好几种 JSON 形状。
//! 这里统一归一为记录序列；空对象映射（{items:{}}）是合法的空结果，
//! 无法识别的形状只发一次节流告警并返回空序列，绝不向调用方抛错。

use serde_json::{Map, Value};

use crate::coordination::BackoffRegistry;

/// 见过的包装键：gh item-list 用 items，field-list 用 fields，
/// Jira search 用 issues，评论与 transition 列表各有其名
const WRAPPER_KEYS: &[&str] = &["items", "fields", "issues", "nodes", "comments", "transitions"];

/// list 响应的已识别形状
#[derive(Debug, Clone, PartialEq)]
pub enum RawListPayload {
    /// 裸数组
    Array(Vec<Value>),
    /// {items:[...]} 一类的包装数组
    Wrapped(Vec<Value>),
    /// {items:{key:{...}}} 对象映射：取 values，顺序不保证
    ObjectMap(Vec<Value>),
    /// GraphQL connection：data.*.(items|fields).nodes
    Connection(Vec<Value>),
    /// 无法识别
    Other,
}

/// 对原始响应做穷举分类
pub fn classify_list_payload(raw: &Value) -> RawListPayload {
    if let Some(arr) = raw.as_array() {
        return RawListPayload::Array(arr.clone());
    }
    if let Some(obj) = raw.as_object() {
        for key in WRAPPER_KEYS {
            match obj.get(*key) {
                Some(Value::Array(arr)) => return RawListPayload::Wrapped(arr.clone()),
                Some(Value::Object(map)) => {
                    return RawListPayload::ObjectMap(map.values().cloned().collect())
                }
                _ => {}
            }
        }
        if let Some(nodes) = connection_nodes(obj) {
            return RawListPayload::Connection(nodes);
        }
    }
    RawListPayload::Other
}

/// data 下一层是查询根（organization / repository 等），逐层向下找 nodes 数组
fn connection_nodes(obj: &Map<String, Value>) -> Option<Vec<Value>> {
    let data = obj.get("data")?.as_object()?;
    for value in data.values() {
        if let Some(found) = find_nodes(value, 0) {
            return Some(found);
        }
    }
    None
}

fn find_nodes(value: &Value, depth: usize) -> Option<Vec<Value>> {
    if depth > 4 {
        return None;
    }
    let obj = value.as_object()?;
    if let Some(Value::Array(nodes)) = obj.get("nodes") {
        return Some(nodes.clone());
    }
    for child in obj.values() {
        if child.is_object() {
            if let Some(found) = find_nodes(child, depth + 1) {
                return Some(found);
            }
        }
    }
    None
}

/// 归一化入口：调用方总是拿到序列；形状异常按 warn_key 节流告警一次
pub fn normalize_list_payload(backoff: &BackoffRegistry, warn_key: &str, raw: &Value) -> Vec<Value> {
    match classify_list_payload(raw) {
        RawListPayload::Array(items)
        | RawListPayload::Wrapped(items)
        | RawListPayload::ObjectMap(items)
        | RawListPayload::Connection(items) => items,
        RawListPayload::Other => {
            backoff.warn_throttled(
                &format!("shape:{}", warn_key),
                &format!("unexpected list payload shape for {}", warn_key),
            );
            Vec::new()
        }
    }
}
