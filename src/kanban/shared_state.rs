//! 共享状态编解码（租约协议）
//!
//! 租约记录序列化为 JSON 后包进固定 marker 块（正常渲染不可见），
//! 作为任务最新注释写入。写入是读改写而非原子 CAS：两个 worker 可能
//! 同时回收同一个过期租约，协议接受这种短暂的有界不一致，
//! 依赖执行层幂等的完成上报收敛（最终一致，非严格一致）。
//! 租约写入是 last write wins，不做合并（与退避 / owner 状态相反）。

use serde::{Deserialize, Serialize};

pub const STATE_MARKER_OPEN: &str = "<!-- bosun-state";
pub const STATE_MARKER_CLOSE: &str = "-->";

/// 租约状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Claimed,
    Working,
    Done,
    /// 终态：不再自动认领；由人工或策略显式设置，正常过期不会走到这里
    Ignored,
}

/// 分布式协调单元：当前持有者及其进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    /// "<host>/<worker>" 约定
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    /// 每次认领唯一的不透明 token
    #[serde(rename = "attemptToken")]
    pub attempt_token: String,
    #[serde(rename = "attemptStarted")]
    pub attempt_started_ms: i64,
    /// 持有者活跃期间周期性刷新
    #[serde(rename = "heartbeat")]
    pub heartbeat_ms: i64,
    pub status: LeaseStatus,
    #[serde(rename = "retryCount")]
    pub retry_count: u32,
}

impl SharedState {
    /// 新认领：attempt_token 每次生成，心跳与开始时间同刻
    pub fn new_claim(owner_id: &str, now_ms: i64) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            attempt_token: uuid::Uuid::new_v4().to_string(),
            attempt_started_ms: now_ms,
            heartbeat_ms: now_ms,
            status: LeaseStatus::Claimed,
            retry_count: 0,
        }
    }

    /// 心跳超龄即过期，可被安全回收
    pub fn is_stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.heartbeat_ms > ttl_ms
    }

    pub fn touch(&mut self, now_ms: i64) {
        self.heartbeat_ms = now_ms;
    }
}

/// 编码：JSON 包进 marker 块
pub fn encode_shared_state(state: &SharedState) -> String {
    let json = serde_json::to_string(state).expect("SharedState serializes");
    format!("{} {} {}", STATE_MARKER_OPEN, json, STATE_MARKER_CLOSE)
}

/// 解码：取文本里最后一个可解析的 marker 块；没有或全不可解析返回 None
pub fn decode_shared_state(text: &str) -> Option<SharedState> {
    let mut result = None;
    let mut rest = text;
    while let Some(start) = rest.find(STATE_MARKER_OPEN) {
        let after = &rest[start + STATE_MARKER_OPEN.len()..];
        let Some(end) = after.find(STATE_MARKER_CLOSE) else {
            break;
        };
        let body = after[..end].trim();
        if let Ok(state) = serde_json::from_str::<SharedState>(body) {
            result = Some(state);
        }
        rest = &after[end + STATE_MARKER_CLOSE.len()..];
    }
    result
}

/// 注释按时间序给出，最新的有效块胜出
pub fn latest_shared_state<I, S>(comments: I) -> Option<SharedState>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut latest = None;
    for body in comments {
        if let Some(state) = decode_shared_state(body.as_ref()) {
            latest = Some(state);
        }
    }
    latest
}

/// 认领判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    /// 无租约或租约已过期
    Claimable,
    /// 有效租约在他人手里
    HeldByOther,
    /// 终态 ignored：永不自动认领
    Ignored,
    /// 已完成
    Finished,
}

/// 纯函数的认领判定，租约规则不依赖任何后端即可测试
pub fn claim_decision(existing: Option<&SharedState>, now_ms: i64, ttl_ms: i64) -> ClaimDecision {
    match existing {
        None => ClaimDecision::Claimable,
        Some(state) => match state.status {
            LeaseStatus::Ignored => ClaimDecision::Ignored,
            LeaseStatus::Done => ClaimDecision::Finished,
            LeaseStatus::Claimed | LeaseStatus::Working => {
                if state.is_stale(now_ms, ttl_ms) {
                    ClaimDecision::Claimable
                } else {
                    ClaimDecision::HeldByOther
                }
            }
        },
    }
}
