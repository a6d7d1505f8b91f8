//! Per-container fullness state machine.
//!
//! A container's fullness is derived from its ordered list of episodes
//! ([`FullReport`] rows). At most one episode is open (`emptied_at` unset);
//! a report either bumps the open episode or opens a new one. Public boxes
//! only count as full once the open episode has collected more reports than
//! the configured ignore threshold, unless a staff member reported it.

use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, AppResult};
use crate::models::{Container, ContainerKind, FullReport, TakeoutCondition};

/// Thresholds that apply to one container after section/building lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    pub ignore_reports: i64,
    pub max_days: Option<i64>,
}

impl Thresholds {
    /// Section settings win over building settings, field by field.
    pub fn resolve(
        kind: ContainerKind,
        section: Option<&TakeoutCondition>,
        building: Option<&TakeoutCondition>,
    ) -> Self {
        let pick = |f: fn(&TakeoutCondition) -> Option<i64>| {
            section.and_then(f).or_else(|| building.and_then(f))
        };

        let ignore_reports = if kind.is_public() {
            pick(|c| c.ignore_reports).unwrap_or(0)
        } else {
            0
        };
        let max_days = if kind.is_public() {
            pick(|c| c.public_days)
        } else {
            pick(|c| c.office_days)
        };

        Thresholds {
            ignore_reports,
            max_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    /// The open episode after the report; `id` is 0 when `opened`.
    pub episode: FullReport,
    pub opened: bool,
    pub became_full: bool,
}

#[derive(Debug, Clone)]
pub struct FullnessTracker {
    container: Container,
    reports: Vec<FullReport>,
    thresholds: Thresholds,
}

impl FullnessTracker {
    pub fn new(container: Container, mut reports: Vec<FullReport>, thresholds: Thresholds) -> Self {
        reports.sort_by_key(|r| (r.reported_at, r.id));
        Self {
            container,
            reports,
            thresholds,
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn into_container(self) -> Container {
        self.container
    }

    #[cfg(test)]
    pub fn reports(&self) -> &[FullReport] {
        &self.reports
    }

    pub fn open_episode(&self) -> Option<&FullReport> {
        self.reports.iter().rev().find(|r| r.is_open())
    }

    fn open_episode_mut(&mut self) -> Option<&mut FullReport> {
        self.reports.iter_mut().rev().find(|r| r.is_open())
    }

    pub fn is_full(&self) -> bool {
        if !self.container.is_active() {
            return false;
        }
        match self.open_episode() {
            None => false,
            Some(_) if !self.container.kind.is_public() => true,
            Some(episode) if episode.by_staff => true,
            Some(episode) => episode.count > self.thresholds.ignore_reports,
        }
    }

    /// True exactly at the report that pushed the episode over the threshold.
    pub fn is_reported_just_enough(&self) -> bool {
        self.is_full()
            && self
                .open_episode()
                .is_some_and(|e| e.count == self.thresholds.ignore_reports + 1)
    }

    /// Mass currently counted toward pickup thresholds.
    pub fn full_mass(&self) -> i64 {
        if self.is_full() {
            self.container.mass()
        } else {
            0
        }
    }

    pub fn add_full_report(
        &mut self,
        by_staff: bool,
        now: DateTime<Utc>,
    ) -> AppResult<ReportOutcome> {
        if !self.container.is_active() {
            return Err(AppError::InvalidState(format!(
                "Container {} is not active",
                self.container.id
            )));
        }

        let was_full = self.is_full();
        let opened = match self.open_episode_mut() {
            Some(episode) => {
                episode.count += 1;
                episode.by_staff |= by_staff;
                false
            }
            None => {
                self.reports.push(FullReport {
                    id: 0,
                    container_id: self.container.id,
                    reported_at: now,
                    filled_at: None,
                    emptied_at: None,
                    count: 1,
                    by_staff,
                });
                true
            }
        };

        let is_full = self.is_full();
        if let Some(episode) = self.open_episode_mut() {
            if is_full && episode.filled_at.is_none() {
                episode.filled_at = Some(now);
            }
        }
        self.refresh_cached_metrics();

        let episode = self
            .open_episode()
            .cloned()
            .ok_or_else(|| AppError::InternalServerError("open episode vanished".to_string()))?;

        Ok(ReportOutcome {
            episode,
            opened,
            became_full: !was_full && is_full,
        })
    }

    /// Closes the open episode. Returns it, or `None` when nothing was open.
    pub fn mark_empty(&mut self, now: DateTime<Utc>) -> Option<FullReport> {
        let episode = self.open_episode_mut()?;
        episode.emptied_at = Some(now);
        let closed = episode.clone();
        self.refresh_cached_metrics();
        Some(closed)
    }

    /// Drops the open episode as if it was never reported.
    pub fn correct_fullness(&mut self) -> Option<FullReport> {
        let idx = self.reports.iter().rposition(|r| r.is_open())?;
        let removed = self.reports.remove(idx);
        self.refresh_cached_metrics();
        Some(removed)
    }

    /// Re-derives fullness after the thresholds, kind or status changed
    /// under an open episode. An episode that is full now gets its
    /// `filled_at`. Returns true when the cached state flips to full.
    pub fn resettle(&mut self, now: DateTime<Utc>) -> bool {
        let was_full = self.container.is_full;
        let is_full = self.is_full();
        if is_full {
            if let Some(episode) = self.open_episode_mut() {
                episode.filled_at.get_or_insert(now);
            }
        }
        self.refresh_cached_metrics();
        !was_full && is_full
    }

    pub fn refresh_cached_metrics(&mut self) {
        self.container.is_full = self.is_full();
        self.container.avg_fill_time_secs = self.avg_fill_time().map(|d| d.num_seconds());
        self.container.avg_takeout_wait_time_secs =
            self.avg_takeout_wait_time().map(|d| d.num_seconds());
    }

    /// When the container last became empty: the latest emptying, or activation.
    fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.reports
            .iter()
            .rev()
            .find_map(|r| r.emptied_at)
            .or(self.container.activated_at)
    }

    pub fn cur_fill_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.container.is_active() || self.is_full() {
            return None;
        }
        self.empty_since().map(|since| now - since)
    }

    pub fn cur_takeout_wait_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_full() {
            return None;
        }
        self.open_episode()
            .and_then(|e| e.filled_at)
            .map(|filled_at| now - filled_at)
    }

    pub fn avg_fill_time(&self) -> Option<Duration> {
        let mut intervals = Vec::new();
        let mut empty_since = self.container.activated_at;
        for report in &self.reports {
            if let (Some(since), Some(filled_at)) = (empty_since, report.filled_at) {
                if filled_at >= since {
                    intervals.push(filled_at - since);
                }
            }
            empty_since = report.emptied_at;
        }
        mean(&intervals)
    }

    pub fn avg_takeout_wait_time(&self) -> Option<Duration> {
        let waits: Vec<Duration> = self
            .reports
            .iter()
            .filter_map(|r| match (r.filled_at, r.emptied_at) {
                (Some(filled_at), Some(emptied_at)) => Some(emptied_at - filled_at),
                _ => None,
            })
            .collect();
        mean(&waits)
    }

    /// Full for at least the configured number of days.
    pub fn check_time_conditions(&self, now: DateTime<Utc>) -> bool {
        match (self.thresholds.max_days, self.cur_takeout_wait_time(now)) {
            (Some(days), Some(waited)) => waited >= Duration::days(days),
            _ => false,
        }
    }
}

fn mean(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let total: i64 = durations.iter().map(Duration::num_seconds).sum();
    Some(Duration::seconds(total / durations.len() as i64))
}
