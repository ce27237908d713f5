//! Dashboard summary cards and recent alerts

use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::model::{
    Bed, BedStatus, Equipment, Notification, Query, QueueItem, Record, Staff, StaffRole,
};
use crate::realtime::{ChannelRegistration, RowChange};
use crate::store::{Backend, BackendExt};
use crate::sync::{SyncContext, Throttled};

/// Alerts kept on the dashboard
pub const RECENT_ALERTS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BedStats {
    pub total: usize,
    pub available: usize,
    /// Departments that have at least one bed
    pub departments: usize,
    pub available_percent: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub in_queue: usize,
    pub high_priority: usize,
    /// Rounded mean of estimated waits; unknown waits count as zero
    pub avg_wait: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StaffStats {
    pub total: usize,
    pub doctors: usize,
    pub nurses: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EquipmentStats {
    pub operational_percent: u32,
    /// In maintenance or out of order
    pub maintenance: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub beds: BedStats,
    pub queue: QueueStats,
    pub staff: StaffStats,
    pub equipment: EquipmentStats,
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

impl BedStats {
    pub fn compute(beds: &[Bed]) -> Self {
        let mut departments: Vec<&str> = beds.iter().map(|b| b.department_id.as_str()).collect();
        departments.sort_unstable();
        departments.dedup();
        let available = beds.iter().filter(|b| b.status == BedStatus::Available).count();
        Self {
            total: beds.len(),
            available,
            departments: departments.len(),
            available_percent: percent(available, beds.len()),
        }
    }
}

impl QueueStats {
    pub fn compute(queue: &[QueueItem]) -> Self {
        let total_wait: u32 = queue.iter().filter_map(|q| q.estimated_wait_time).sum();
        Self {
            in_queue: queue.len(),
            high_priority: queue.iter().filter(|q| q.priority.is_high()).count(),
            avg_wait: (total_wait as f64 / queue.len().max(1) as f64).round() as u32,
        }
    }
}

impl StaffStats {
    pub fn compute(staff: &[Staff]) -> Self {
        Self {
            total: staff.len(),
            doctors: staff.iter().filter(|s| s.role == StaffRole::Doctor).count(),
            nurses: staff.iter().filter(|s| s.role == StaffRole::Nurse).count(),
        }
    }
}

impl EquipmentStats {
    pub fn compute(equipment: &[Equipment]) -> Self {
        let maintenance = equipment.iter().filter(|e| e.status.is_down()).count();
        let operational_percent = if equipment.is_empty() {
            100
        } else {
            percent(equipment.len() - maintenance, equipment.len())
        };
        Self {
            operational_percent,
            maintenance,
        }
    }
}

impl DashboardStats {
    pub fn compute(beds: &[Bed], queue: &[QueueItem], staff: &[Staff], equipment: &[Equipment]) -> Self {
        Self {
            beds: BedStats::compute(beds),
            queue: QueueStats::compute(queue),
            staff: StaffStats::compute(staff),
            equipment: EquipmentStats::compute(equipment),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub description: String,
    /// info, warning, success, error, message, ...
    pub kind: String,
}

impl From<Notification> for Alert {
    fn from(n: Notification) -> Self {
        Self {
            title: n.title,
            description: n.message,
            kind: n.kind.unwrap_or_else(|| "info".to_string()),
        }
    }
}

struct AlertFollower {
    registration: Arc<ChannelRegistration>,
    task: JoinHandle<()>,
}

pub struct DashboardSummary {
    ctx: SyncContext,
    stats: Throttled<DashboardStats>,
    latest: RwLock<DashboardStats>,
    alerts: Arc<RwLock<Vec<Alert>>>,
    follower: Mutex<Option<AlertFollower>>,
}

impl DashboardSummary {
    pub fn new(ctx: &SyncContext) -> Self {
        Self {
            ctx: ctx.clone(),
            stats: Throttled::new(ctx.sync_options().throttle),
            latest: RwLock::new(DashboardStats::default()),
            alerts: Arc::new(RwLock::new(Vec::new())),
            follower: Mutex::new(None),
        }
    }

    /// Follow new notifications, then compute the stats
    pub async fn mount(&self) {
        self.follow_alerts();
        self.refresh().await;
    }

    pub fn unmount(&self) {
        let follower = self.follower.lock().ok().and_then(|mut f| f.take());
        if let Some(follower) = follower {
            follower.registration.close();
            follower.task.abort();
        }
    }

    fn follow_alerts(&self) {
        let mut guard = match self.follower.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if let Some(old) = guard.take() {
            old.registration.close();
            old.task.abort();
        }

        let channel = self
            .ctx
            .feed()
            .channel("alerts-changes")
            .on(Notification::TABLE)
            .subscribe();
        let registration = channel.registration();
        let alerts = Arc::clone(&self.alerts);

        let task = tokio::spawn(async move {
            let mut stream = channel.into_typed::<Notification>();
            while let Some(change) = stream.next().await {
                if let RowChange::Insert(notification) = change {
                    tracing::debug!(title = %notification.title, "Alert received");
                    if let Ok(mut alerts) = alerts.write() {
                        alerts.insert(0, Alert::from(notification));
                        alerts.truncate(RECENT_ALERTS);
                    }
                }
            }
        });

        *guard = Some(AlertFollower { registration, task });
    }

    /// Recompute the stats; repeated calls inside the throttle window
    /// reuse the previous result. A section whose table cannot be fetched
    /// keeps its previous value, and such a partial result is not reused.
    pub async fn refresh(&self) -> DashboardStats {
        let backend = Arc::clone(self.ctx.backend());
        let previous = self.stats();
        let stats = match self.stats.try_get(|| compute_from(backend, previous)).await {
            Ok(stats) | Err(stats) => stats,
        };
        if let Ok(mut latest) = self.latest.write() {
            *latest = stats;
        }
        stats
    }

    pub fn stats(&self) -> DashboardStats {
        self.latest.read().map(|s| *s).unwrap_or_default()
    }

    /// Newest first, at most three
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().map(|a| a.clone()).unwrap_or_default()
    }
}

impl Drop for DashboardSummary {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn fetch_logged<T: Record>(backend: &Arc<dyn Backend>) -> Option<Vec<T>> {
    match backend.fetch::<T>(&Query::new()).await {
        Ok(rows) => Some(rows),
        Err(e) => {
            tracing::error!(table = %T::TABLE, error = %e, "Error fetching dashboard stats");
            None
        }
    }
}

/// Fresh stats, or `Err` with failed sections carried over from `previous`
async fn compute_from(
    backend: Arc<dyn Backend>,
    previous: DashboardStats,
) -> Result<DashboardStats, DashboardStats> {
    let beds = fetch_logged::<Bed>(&backend).await;
    let queue = fetch_logged::<QueueItem>(&backend).await;
    let staff = fetch_logged::<Staff>(&backend).await;
    let equipment = fetch_logged::<Equipment>(&backend).await;
    let complete = beds.is_some() && queue.is_some() && staff.is_some() && equipment.is_some();

    let stats = DashboardStats {
        beds: beds.map_or(previous.beds, |rows| BedStats::compute(&rows)),
        queue: queue.map_or(previous.queue, |rows| QueueStats::compute(&rows)),
        staff: staff.map_or(previous.staff, |rows| StaffStats::compute(&rows)),
        equipment: equipment.map_or(previous.equipment, |rows| EquipmentStats::compute(&rows)),
    };
    if complete {
        Ok(stats)
    } else {
        Err(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::testing;
    use crate::fixtures;
    use crate::store::testing::FlakyBackend;
    use crate::sync::SyncOptions;
    use std::time::Duration;

    #[test]
    fn test_compute_from_fixtures() {
        let h = fixtures::hospital();
        let stats = DashboardStats::compute(&h.beds, &h.queue, &h.staff, &h.equipment);

        assert_eq!(stats.beds.total, 20);
        assert_eq!(stats.beds.available, 5);
        assert_eq!(stats.beds.departments, 5);
        assert_eq!(stats.beds.available_percent, 25);

        assert_eq!(stats.queue.in_queue, 5);
        assert_eq!(stats.queue.high_priority, 2);
        // (10 + 45 + 20 + 90 + 0) / 5
        assert_eq!(stats.queue.avg_wait, 33);

        assert_eq!(stats.staff.total, 14);
        assert_eq!(stats.staff.doctors, 6);
        assert_eq!(stats.staff.nurses, 6);

        assert_eq!(stats.equipment.maintenance, 2);
        assert_eq!(stats.equipment.operational_percent, 83);
    }

    #[test]
    fn test_empty_tables() {
        let stats = DashboardStats::compute(&[], &[], &[], &[]);
        assert_eq!(stats.beds.available_percent, 0);
        assert_eq!(stats.queue.avg_wait, 0);
        assert_eq!(stats.equipment.operational_percent, 100);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_stats() {
        let (store, _) = testing::hospital().await;
        let flaky = FlakyBackend::new(store);
        let ctx = SyncContext::new(flaky.clone()).options(SyncOptions {
            throttle: Duration::ZERO,
            ..SyncOptions::default()
        });
        let summary = DashboardSummary::new(&ctx);

        let before = summary.refresh().await;
        assert_eq!(before.beds.total, 20);
        assert_eq!(before.staff.total, 14);

        flaky.set_failing(true);
        let after = summary.refresh().await;
        assert_eq!(after, before);
        assert_eq!(summary.stats(), before);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_reused_inside_window() {
        let (store, _) = testing::hospital().await;
        let flaky = FlakyBackend::new(store);
        let summary = DashboardSummary::new(&SyncContext::new(flaky.clone()));

        flaky.set_failing(true);
        assert_eq!(summary.refresh().await.beds.total, 0);

        flaky.set_failing(false);
        assert_eq!(summary.refresh().await.beds.total, 20);
    }

    #[tokio::test]
    async fn test_alerts_keep_three_newest_inserts() {
        let (store, ctx) = testing::hospital().await;
        let summary = DashboardSummary::new(&ctx);
        summary.mount().await;
        assert_eq!(summary.stats().beds.total, 20);

        for i in 0..4 {
            store
                .insert_row(&Notification::new(fixtures::NURSE_USER, format!("alert {}", i), "m"))
                .await
                .unwrap();
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while summary.alerts().first().map(|a| a.title.as_str()) != Some("alert 3") {
            assert!(tokio::time::Instant::now() < deadline, "alerts never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let titles: Vec<_> = summary.alerts().into_iter().map(|a| a.title).collect();
        assert_eq!(titles, vec!["alert 3", "alert 2", "alert 1"]);
        assert_eq!(summary.alerts()[0].kind, "info");

        summary.unmount();
        assert_eq!(ctx.feed().open_channels(), 0);
    }
}
