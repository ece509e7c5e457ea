use async_trait::async_trait;
use gatewayxm_shared::PollingParams;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::connection::PollingControl;

/// 现场总线：执行一次寄存器/线圈读写周期
#[async_trait]
pub trait FieldBus: Send + Sync + 'static {
    async fn poll_cycle(&self) -> anyhow::Result<()>;
}

/// 未接入现场总线时使用的空实现
#[derive(Debug, Default)]
pub struct IdleFieldBus;

#[async_trait]
impl FieldBus for IdleFieldBus {
    async fn poll_cycle(&self) -> anyhow::Result<()> {
        debug!("Field bus idle, nothing to poll");
        Ok(())
    }
}

/// 现场总线轮询驱动
pub struct PollingDriver<F: FieldBus> {
    bus: Arc<F>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    cycles: Arc<AtomicU64>,
}

impl<F: FieldBus> PollingDriver<F> {
    pub fn new(bus: Arc<F>) -> Self {
        Self {
            bus,
            shutdown: None,
            task: None,
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 已完成的轮询周期数
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F: FieldBus> PollingControl for PollingDriver<F> {
    async fn start(&mut self, params: &PollingParams) {
        if self.is_running() {
            debug!("Polling already running, restarting with new interval");
            self.stop().await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bus = self.bus.clone();
        let cycles = self.cycles.clone();
        let interval = params.interval;

        self.task = Some(tokio::spawn(run_poll_loop(bus, cycles, interval, shutdown_rx)));
        self.shutdown = Some(shutdown_tx);

        info!("Field bus polling started, interval {:?}", interval);
    }

    async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        let Some(task) = self.task.take() else {
            return;
        };

        // 等待循环退出，之后不会再有轮询周期
        if let Err(e) = task.await {
            error!("Polling task terminated abnormally: {}", e);
        }

        info!("Field bus polling stopped after {} cycles", self.cycles());
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl<F: FieldBus> Drop for PollingDriver<F> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_poll_loop<F: FieldBus>(
    bus: Arc<F>,
    cycles: Arc<AtomicU64>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    break;
                }

                if let Err(e) = bus.poll_cycle().await {
                    warn!("Field bus poll cycle failed: {}", e);
                }
                cycles.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    debug!("Poll loop exited");
}
