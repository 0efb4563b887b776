//! 协调层集成测试

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use bosun::config::CoordinationSection;
    use bosun::coordination::{CoordinationState, ManualClock};
    use bosun::core::{AgentExecutor, KanbanError, Scheduler};
    use bosun::kanban::{
        BackendKind, KanbanAdapter, LeaseStatus, RetryPolicy, SharedState, Task, TaskBackend,
        TaskDraft, TaskFilter, TaskPatch, TaskStatus,
    };

    const TTL_MS: i64 = 300_000;

    /// 内存后端：注释即租约介质；fail_all 模拟后端整体不可用
    struct MockBackend {
        tasks: Mutex<HashMap<String, Task>>,
        comments: Mutex<HashMap<String, Vec<String>>>,
        fail_all: AtomicBool,
        call_count: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                tasks: Mutex::new(HashMap::new()),
                comments: Mutex::new(HashMap::new()),
                fail_all: AtomicBool::new(false),
                call_count: AtomicUsize::new(0),
            }
        }

        fn with_task(self, id: &str, title: &str, status: TaskStatus) -> Self {
            self.tasks.lock().unwrap().insert(
                id.to_string(),
                Task {
                    id: id.to_string(),
                    title: title.to_string(),
                    description: String::new(),
                    status,
                    labels: ["bosun".to_string()].into_iter().collect(),
                    assignee: None,
                    task_url: format!("internal://tasks/{}", id),
                    backend: BackendKind::Internal,
                },
            );
            self
        }

        fn check(&self) -> Result<(), KanbanError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_all.load(Ordering::SeqCst) {
                Err(KanbanError::Transient("backend down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TaskBackend for MockBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Internal
        }

        async fn list_tasks(&self, _filter: &TaskFilter) -> Result<Vec<Task>, KanbanError> {
            self.check()?;
            Ok(self.tasks.lock().unwrap().values().cloned().collect())
        }

        async fn get_task(&self, id: &str) -> Result<Task, KanbanError> {
            self.check()?;
            self.tasks
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| KanbanError::NotFound(id.to_string()))
        }

        async fn create_task(&self, draft: &TaskDraft) -> Result<Task, KanbanError> {
            self.check()?;
            let id = (self.tasks.lock().unwrap().len() + 1).to_string();
            let task = Task {
                id: id.clone(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                status: TaskStatus::Todo,
                labels: ["bosun".to_string()].into_iter().collect(),
                assignee: None,
                task_url: format!("internal://tasks/{}", id),
                backend: BackendKind::Internal,
            };
            self.tasks.lock().unwrap().insert(id, task.clone());
            Ok(task)
        }

        async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, KanbanError> {
            self.check()?;
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| KanbanError::NotFound(id.to_string()))?;
            if let Some(title) = &patch.title {
                task.title = title.clone();
            }
            Ok(task.clone())
        }

        async fn update_task_status(
            &self,
            id: &str,
            status: TaskStatus,
        ) -> Result<Task, KanbanError> {
            self.check()?;
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| KanbanError::NotFound(id.to_string()))?;
            task.status = status;
            Ok(task.clone())
        }

        async fn delete_task(&self, id: &str) -> Result<bool, KanbanError> {
            self.check()?;
            Ok(self.tasks.lock().unwrap().remove(id).is_some())
        }

        async fn add_comment(&self, id: &str, body: &str) -> Result<bool, KanbanError> {
            self.check()?;
            if !self.tasks.lock().unwrap().contains_key(id) {
                return Err(KanbanError::NotFound(id.to_string()));
            }
            self.comments
                .lock()
                .unwrap()
                .entry(id.to_string())
                .or_default()
                .push(body.to_string());
            Ok(true)
        }

        async fn comments(&self, id: &str) -> Result<Vec<String>, KanbanError> {
            self.check()?;
            if !self.tasks.lock().unwrap().contains_key(id) {
                return Err(KanbanError::NotFound(id.to_string()));
            }
            Ok(self
                .comments
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct CountingExecutor {
        count: AtomicUsize,
    }

    #[async_trait]
    impl AgentExecutor for CountingExecutor {
        async fn run(&self, task: &Task) -> Result<String, String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(format!("finished {}", task.id))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl AgentExecutor for FailingExecutor {
        async fn run(&self, _task: &Task) -> Result<String, String> {
            Err("simulated executor failure".to_string())
        }
    }

    fn coord_at(dir: &std::path::Path, clock: Arc<ManualClock>) -> Arc<CoordinationState> {
        let cfg = CoordinationSection {
            state_dir: dir.to_path_buf(),
            ..CoordinationSection::default()
        };
        Arc::new(CoordinationState::new(&cfg, vec![], clock))
    }

    fn adapter_with(
        backend: Arc<MockBackend>,
        coord: Arc<CoordinationState>,
    ) -> Arc<KanbanAdapter> {
        Arc::new(KanbanAdapter::new(
            backend,
            coord,
            RetryPolicy {
                transient_delay_ms: 1,
                rate_limit_delay_ms: 1,
                max_attempts: 2,
            },
            TTL_MS,
        ))
    }

    #[tokio::test]
    async fn test_lease_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new().with_task("1", "Task 1", TaskStatus::Todo));
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), clock));

        let state = SharedState::new_claim("host-a/worker-1", 1_000);
        assert!(adapter.persist_shared_state("1", &state).await);

        // 写后立读，结构相等
        let read_back = adapter.read_shared_state("1").await;
        assert_eq!(read_back, Some(state));
    }

    #[tokio::test]
    async fn test_persist_returns_false_when_backend_always_fails() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new().with_task("1", "Task 1", TaskStatus::Todo));
        backend.fail_all.store(true, Ordering::SeqCst);
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), clock));

        let state = SharedState::new_claim("host-a/worker-1", 1_000);
        // 重试额度耗尽后返回 false，不抛错
        assert!(!adapter.persist_shared_state("1", &state).await);
        // max_attempts = 2：恰好两次出站尝试
        assert_eq!(backend.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_state_cached_negatively() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new());
        let coord = coord_at(dir.path(), clock);
        let adapter = adapter_with(Arc::clone(&backend), Arc::clone(&coord));

        assert!(adapter.read_shared_state("404").await.is_none());
        let calls_after_first = backend.call_count.load(Ordering::SeqCst);

        // 负缓存窗口内的第二次读不再发出站调用
        assert!(adapter.read_shared_state("404").await.is_none());
        assert_eq!(backend.call_count.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_stale_lease_reclaimed_fresh_lease_held() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new().with_task("1", "Task 1", TaskStatus::Todo));
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), Arc::clone(&clock)));

        let first = adapter.try_claim("1", "host-a/worker-1").await;
        assert!(first.is_some());

        // 新鲜租约在他人手里，认领失败
        assert!(adapter.try_claim("1", "host-b/worker-2").await.is_none());

        // 心跳超过 TTL 后可被回收
        clock.advance(TTL_MS + 1_000);
        let reclaimed = adapter.try_claim("1", "host-b/worker-2").await.unwrap();
        assert_eq!(reclaimed.owner_id, "host-b/worker-2");
        assert_ne!(reclaimed.attempt_token, first.unwrap().attempt_token);
    }

    #[tokio::test]
    async fn test_mark_ignored_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new().with_task("1", "Task 1", TaskStatus::Todo));
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), Arc::clone(&clock)));

        assert!(adapter.mark_task_ignored("1", "flaky environment").await);
        let state = adapter.read_shared_state("1").await.unwrap();
        assert_eq!(state.status, LeaseStatus::Ignored);
        assert_eq!(
            backend.get_task("1").await.unwrap().status,
            TaskStatus::Ignored
        );

        // ignored 是终态：TTL 过去多久都不会被重新认领
        clock.advance(TTL_MS * 10);
        assert!(adapter.try_claim("1", "host-b/worker-2").await.is_none());
    }

    #[tokio::test]
    async fn test_sibling_coordination_state_visible_without_outbound_calls() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));

        let first = coord_at(dir.path(), Arc::clone(&clock));
        first.backoff.record_failure(
            "project-items:5",
            bosun::coordination::FailureKind::RateLimited,
            "rate limit",
        );
        first.invalid_owners.mark_invalid("acme");

        // 新构造的实例（模拟兄弟进程）直接从文件继承，无任何出站调用
        let second = coord_at(dir.path(), clock);
        assert!(second.backoff.should_skip("project-items:5"));
        assert!(second.invalid_owners.is_invalid("acme"));
    }

    #[tokio::test]
    async fn test_scheduler_claims_executes_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new().with_task("1", "Task 1", TaskStatus::Todo));
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), clock));
        let executor = Arc::new(CountingExecutor {
            count: AtomicUsize::new(0),
        });

        let scheduler = Scheduler::new(
            adapter,
            Arc::clone(&executor) as Arc<dyn AgentExecutor>,
            "worker-1",
            &CoordinationSection::default(),
            CancellationToken::new(),
        );
        scheduler.run_once().await;

        assert_eq!(executor.count.load(Ordering::SeqCst), 1);
        let task = backend.get_task("1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Done);

        // 租约终态 done，完成注释也写上了
        let comments = backend.comments("1").await.unwrap();
        assert!(comments.iter().any(|c| c.contains("finished 1")));
        let state = bosun::kanban::latest_shared_state(&comments).unwrap();
        assert_eq!(state.status, LeaseStatus::Done);
    }

    #[tokio::test]
    async fn test_failed_execution_releases_lease_for_reclaim() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(MockBackend::new().with_task("1", "Task 1", TaskStatus::Todo));
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), clock));

        let scheduler = Scheduler::new(
            Arc::clone(&adapter),
            Arc::new(FailingExecutor),
            "worker-1",
            &CoordinationSection::default(),
            CancellationToken::new(),
        );
        scheduler.run_once().await;

        // 任务退回 todo，租约立即过期可被回收，重试计数 +1
        let task = backend.get_task("1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        let reclaimed = adapter.try_claim("1", "host-b/worker-2").await.unwrap();
        assert_eq!(reclaimed.retry_count, 1);
    }

    #[tokio::test]
    async fn test_scheduler_skips_done_and_ignored_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(
            MockBackend::new()
                .with_task("1", "Done already", TaskStatus::Done)
                .with_task("2", "Ignored", TaskStatus::Ignored),
        );
        let adapter = adapter_with(Arc::clone(&backend), coord_at(dir.path(), clock));
        let executor = Arc::new(CountingExecutor {
            count: AtomicUsize::new(0),
        });

        let scheduler = Scheduler::new(
            adapter,
            Arc::clone(&executor) as Arc<dyn AgentExecutor>,
            "worker-1",
            &CoordinationSection::default(),
            CancellationToken::new(),
        );
        scheduler.run_once().await;

        assert_eq!(executor.count.load(Ordering::SeqCst), 0);
    }
}
