//! Job and phase bookkeeping.
//!
//! A job row is written when a run starts; named phases are appended as the
//! pipeline advances, and the job's phase_id always points at the last
//! inserted phase. Elapsed time is written once on completion.

use std::collections::HashMap;
use std::time::Instant;

use chrono::NaiveDateTime;
use tracing::info;

use super::error::TraderError;
use super::ids::stable_id;
use super::tick::format_wire;
use crate::ports::store_port::StorePort;

pub const TERMINATED_SUCCESS: &str = "TERMINATED_SUCCESS";
pub const TERMINATED_WARNINGS: &str = "TERMINATED_WARNINGS";
pub const TERMINATED_ERRORS: &str = "TERMINATED_ERRORS";
pub const TERMINATED_CANCELLED: &str = "TERMINATED_CANCELLED";

pub struct JobRecorder<'a> {
    store: &'a dyn StorePort,
    job_id: String,
    started: Instant,
    phase_seq: std::cell::Cell<u64>,
}

impl<'a> JobRecorder<'a> {
    /// Insert the job row and return a recorder for its phases.
    pub fn start(
        store: &'a dyn StorePort,
        name: &str,
        script: &str,
        version: &str,
        log_path: &str,
        now: NaiveDateTime,
    ) -> Result<Self, TraderError> {
        let job_id = stable_id(&[name, script, &format_wire(now)]);
        let mut row = HashMap::new();
        row.insert("id".to_string(), job_id.clone());
        row.insert("name".to_string(), name.to_string());
        row.insert("script".to_string(), script.to_string());
        row.insert("version".to_string(), version.to_string());
        row.insert("log_path".to_string(), log_path.to_string());
        store.insert_row("jobs", &row)?;
        info!(job = name, id = %job_id, "job started");
        Ok(JobRecorder {
            store,
            job_id,
            started: Instant::now(),
            phase_seq: std::cell::Cell::new(0),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append a named phase checkpoint and point the job at it.
    pub fn phase(&self, now: NaiveDateTime, name: &str) -> Result<(), TraderError> {
        let seq = self.phase_seq.get();
        self.phase_seq.set(seq + 1);
        let phase_id = stable_id(&[&self.job_id, name, &seq.to_string()]);

        let mut row = HashMap::new();
        row.insert("id".to_string(), phase_id.clone());
        row.insert("job_id".to_string(), self.job_id.clone());
        row.insert("date_time".to_string(), format_wire(now));
        row.insert("name".to_string(), name.to_string());
        self.store.insert_row("phases", &row)?;

        self.store
            .update_value("jobs", &[("id", &self.job_id)], "phase_id", &phase_id)?;
        info!(phase = name, "phase recorded");
        Ok(())
    }

    /// Name of the most recently recorded phase.
    pub fn current_phase(&self) -> Result<Option<String>, TraderError> {
        let job = self.store.query_one("jobs", &[("id", &self.job_id)])?;
        let Some(phase_id) = job.and_then(|r| r.get("phase_id").cloned()) else {
            return Ok(None);
        };
        if phase_id == "-" {
            return Ok(None);
        }
        let phase = self.store.query_one("phases", &[("id", &phase_id)])?;
        Ok(phase.and_then(|r| r.get("name").cloned()))
    }

    /// Record the terminal phase and write elapsed seconds on the job row.
    pub fn finish(&self, now: NaiveDateTime, terminal_phase: &str) -> Result<(), TraderError> {
        self.phase(now, terminal_phase)?;
        let elapsed = self.started.elapsed().as_secs_f64();
        self.store.update_value(
            "jobs",
            &[("id", &self.job_id)],
            "elapsed_time",
            &format!("{elapsed:.3}"),
        )?;
        Ok(())
    }
}
