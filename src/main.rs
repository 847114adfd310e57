use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use task_bridge::{
    Args, BridgeConfig, CallbackCall, CallbackDispatcher, CallbackRegistry, ExistingWorkPolicy,
    ProgressSender, Reply, TaskManager, TaskSubmission, TypedValue,
};

const DEMO_CALLBACK: i64 = 1;
const COUNT_TASK: i64 = 10;

/// Counts to `count`, reporting each step as progress.
struct DemoDispatcher;

#[async_trait]
impl CallbackDispatcher for DemoDispatcher {
    async fn execute(&self, call: CallbackCall, reply: Reply, progress: ProgressSender) {
        if call.task_handle != COUNT_TASK {
            reply.not_implemented();
            return;
        }

        let count = call
            .args
            .get("count")
            .and_then(TypedValue::as_int)
            .unwrap_or(3);
        for step in 1..=count {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut p = Args::new();
            p.insert("step".into(), TypedValue::Int(step));
            if let Err(e) = progress.send(&p).await {
                reply.error(Some(e.code().into()), Some(e.to_string()), None);
                return;
            }
        }

        let mut out = Args::new();
        out.insert("count".into(), TypedValue::Int(count));
        reply.success(out);
    }
}

fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("TASK_BRIDGE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "task-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = BridgeConfig::from_env().context("reading TASK_BRIDGE_* configuration")?;

    eprintln!("Task Bridge v{}", env!("CARGO_PKG_VERSION"));
    match &config.db_path {
        Some(path) => eprintln!("   Database: {}", path.display()),
        None => eprintln!("   Database: in memory"),
    }
    eprintln!("   Parallel jobs: {}\n", config.max_parallel_jobs);

    let callbacks = Arc::new(CallbackRegistry::new());
    callbacks
        .register(DEMO_CALLBACK, Arc::new(DemoDispatcher))
        .await;
    let manager = TaskManager::open(&config, callbacks)
        .await
        .context("starting task manager")?;

    let mut progress = manager.progress_events();
    let mut results = manager.result_events();
    manager.resume();

    let submissions = [
        TaskSubmission::new("count-3")
            .callback_handle(DEMO_CALLBACK)
            .task_handle(COUNT_TASK)
            .tag("demo")
            .arg("count", 3i64),
        TaskSubmission::new("count-2")
            .callback_handle(DEMO_CALLBACK)
            .task_handle(COUNT_TASK)
            .tag("demo")
            .arg("count", 2i64)
            .unique("demo-chain", ExistingWorkPolicy::Append),
        TaskSubmission::new("unknown-task")
            .callback_handle(DEMO_CALLBACK)
            .task_handle(99)
            .unique("demo-chain", ExistingWorkPolicy::Append),
    ];

    for submission in &submissions {
        let work_id = manager.submit(submission).await?;
        eprintln!("Queued {} as {}", submission.task_id, work_id);
    }

    let expected = submissions.len();
    let mut seen = 0;
    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        while seen < expected {
            tokio::select! {
                Some(event) = progress.next() => {
                    println!("progress {}", serde_json::to_string(&event)?);
                }
                Some(event) = results.next() => {
                    println!("result   {}", serde_json::to_string(&event)?);
                    seen += 1;
                }
                else => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    })
    .await;

    match drained {
        Ok(res) => res?,
        Err(_) => eprintln!("Timed out with {seen}/{expected} results"),
    }

    for summary in manager.query_by_tag("demo").await? {
        eprintln!(
            "{:<12} {}",
            summary.status,
            summary.task_id.as_deref().unwrap_or("-")
        );
    }
    eprintln!("Registry holds {} records", manager.registry().records().await?.len());

    manager.shutdown();
    Ok(())
}
