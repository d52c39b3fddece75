use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::storage::{ledger, QuotaDatabase, QuotaKey, StorageError};

use super::source::ActiveObjectSource;

/// Reads-and-corrects per row before it is left for the next run.
const CORRECTION_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub projects_checked: usize,
    pub projects_corrected: usize,
    pub organisations_checked: usize,
    pub organisations_corrected: usize,
    /// Rows that changed under the job and were left for the next run.
    pub skipped: usize,
    pub failures: usize,
}

impl ReconciliationReport {
    pub fn corrections(&self) -> usize {
        self.projects_corrected + self.organisations_corrected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    InSync,
    Corrected,
    Skipped,
}

/// Recomputes quota counters from ground truth.
///
/// Projects are measured against the active stored objects, then organisations
/// against the sum of their projects. Every correction is a separate write
/// guarded by the version read just before measuring, and no locks are taken.
/// A row that changed under the job is measured again once before it is
/// skipped.
#[derive(Clone)]
pub struct Reconciler {
    database: Arc<QuotaDatabase>,
    source: Arc<dyn ActiveObjectSource>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        database: Arc<QuotaDatabase>,
        source: Arc<dyn ActiveObjectSource>,
        interval: Duration,
    ) -> Self {
        Self {
            database,
            source,
            interval,
        }
    }

    pub fn run_once(&self) -> Result<ReconciliationReport, StorageError> {
        info!("starting quota reconciliation");
        let conn = self.database.open_connection()?;
        let mut report = ReconciliationReport::default();

        for project in ledger::list_projects(&conn)? {
            report.projects_checked += 1;
            let key = project.key();
            match self.reconcile_project(&conn, key) {
                Ok(RowOutcome::InSync) => {}
                Ok(RowOutcome::Corrected) => report.projects_corrected += 1,
                Ok(RowOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.failures += 1;
                    error!(
                        org_id = key.org_id,
                        project_id = key.project_id,
                        error = %err,
                        "failed to reconcile project quota"
                    );
                }
            }
        }

        // organisation totals derive from the project counters corrected above
        for organisation in ledger::list_organisations(&conn)? {
            report.organisations_checked += 1;
            match self.reconcile_organisation(&conn, organisation.org_id) {
                Ok(RowOutcome::InSync) => {}
                Ok(RowOutcome::Corrected) => report.organisations_corrected += 1,
                Ok(RowOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.failures += 1;
                    error!(
                        org_id = organisation.org_id,
                        error = %err,
                        "failed to reconcile organisation quota"
                    );
                }
            }
        }

        info!(
            projects_checked = report.projects_checked,
            projects_corrected = report.projects_corrected,
            organisations_checked = report.organisations_checked,
            organisations_corrected = report.organisations_corrected,
            skipped = report.skipped,
            failures = report.failures,
            "quota reconciliation complete"
        );
        Ok(report)
    }

    fn reconcile_project(
        &self,
        conn: &Connection,
        key: QuotaKey,
    ) -> Result<RowOutcome, StorageError> {
        with_fresh_read(|| self.correct_project(conn, key))
    }

    fn correct_project(
        &self,
        conn: &Connection,
        key: QuotaKey,
    ) -> Result<RowOutcome, StorageError> {
        let Some(project) = ledger::find_project(conn, key)? else {
            return Ok(RowOutcome::InSync);
        };
        let actual = self.source.active_bytes(key)?;
        if actual == project.used_bytes {
            return Ok(RowOutcome::InSync);
        }

        if !ledger::store_project_usage(conn, key, actual, Some(project.version))? {
            debug!(
                org_id = key.org_id,
                project_id = key.project_id,
                "project quota changed during reconciliation"
            );
            return Ok(RowOutcome::Skipped);
        }

        warn!(
            org_id = key.org_id,
            project_id = key.project_id,
            recorded = project.used_bytes,
            actual,
            "project quota drift detected and corrected"
        );
        Ok(RowOutcome::Corrected)
    }

    fn reconcile_organisation(
        &self,
        conn: &Connection,
        org_id: i64,
    ) -> Result<RowOutcome, StorageError> {
        with_fresh_read(|| Self::correct_organisation(conn, org_id))
    }

    fn correct_organisation(conn: &Connection, org_id: i64) -> Result<RowOutcome, StorageError> {
        let Some(organisation) = ledger::find_organisation(conn, org_id)? else {
            return Ok(RowOutcome::InSync);
        };
        let actual = ledger::sum_project_usage(conn, org_id)?;
        if actual == organisation.used_bytes {
            return Ok(RowOutcome::InSync);
        }

        if !ledger::store_organisation_usage(conn, org_id, actual, Some(organisation.version))? {
            // every reservation in any of the org's projects bumps this version,
            // so a busy organisation can stay deferred across runs
            debug!(org_id, "organisation quota changed during reconciliation");
            return Ok(RowOutcome::Skipped);
        }

        warn!(
            org_id,
            recorded = organisation.used_bytes,
            actual,
            "organisation quota drift detected and corrected"
        );
        Ok(RowOutcome::Corrected)
    }

    /// Runs the job every `interval`, starting one interval from now.
    pub fn start_schedule(&self) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            let period = reconciler.interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let job = reconciler.clone();
                match tokio::task::spawn_blocking(move || job.run_once()).await {
                    Ok(Ok(report)) => {
                        debug!(
                            corrections = report.corrections(),
                            "scheduled reconciliation finished"
                        );
                    }
                    Ok(Err(err)) => {
                        error!(error = %err, "scheduled reconciliation failed");
                    }
                    Err(err) => {
                        error!(error = %err, "reconciliation task panicked");
                    }
                }
            }
        })
    }
}

/// Repeats a version-guarded correction while the row keeps moving under it.
fn with_fresh_read<F>(mut correct: F) -> Result<RowOutcome, StorageError>
where
    F: FnMut() -> Result<RowOutcome, StorageError>,
{
    let mut outcome = correct()?;
    let mut attempt = 1;
    while outcome == RowOutcome::Skipped && attempt < CORRECTION_ATTEMPTS {
        attempt += 1;
        outcome = correct()?;
    }
    if outcome == RowOutcome::Skipped {
        debug!(attempts = attempt, "deferring correction to the next run");
    }
    Ok(outcome)
}
