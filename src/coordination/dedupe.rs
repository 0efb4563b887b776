//! 请求去重
//!
//! 同键并发的出站调用在进程内共享同一个 in-flight Future（Shared），
//! 调用完成后移除登记，下一次调用重新发起请求。
//! 主要用于 per-project 的 item-list / field-list 调用：
//! 调度循环多轮重叠时不会重复打同一个列表接口。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

type SharedCall = Shared<BoxFuture<'static, Result<Value, String>>>;

/// 进程内去重器：key -> (代号, in-flight Future)
///
/// 只观察本进程发起的调用，单进程事件循环下天然安全；代号用于保证
/// 只有发起者移除自己登记的那个 Future，不会误删后续调用新注册的。
#[derive(Default)]
pub struct RequestDeduper {
    inflight: Mutex<HashMap<String, (u64, SharedCall)>>,
    next_generation: AtomicU64,
}

impl RequestDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 去重执行：同键已有 in-flight 调用则共享其结果，否则用 factory 新建
    pub async fn dedupe<F>(&self, key: &str, factory: F) -> Result<Value, String>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value, String>>,
    {
        let (call, registration) = {
            let mut inflight = self.inflight.lock().expect("dedupe registry lock poisoned");
            if let Some((_, existing)) = inflight.get(key) {
                tracing::debug!(key = %key, "joining in-flight request");
                (existing.clone(), None)
            } else {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let call = factory().shared();
                inflight.insert(key.to_string(), (generation, call.clone()));
                (call, Some(generation))
            }
        };

        let result = call.await;

        // 结算后由发起者移除登记（成功失败都移除），下一次调用重新发起
        if let Some(generation) = registration {
            let mut inflight = self.inflight.lock().expect("dedupe registry lock poisoned");
            if matches!(inflight.get(key), Some((g, _)) if *g == generation) {
                inflight.remove(key);
            }
        }

        result
    }

    /// 当前 in-flight 登记数（测试用）
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .expect("dedupe registry lock poisoned")
            .len()
    }
}
