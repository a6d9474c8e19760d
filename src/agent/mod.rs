//! Cycle scheduling and batch orchestration.
//!
//! The agent owns the adapter seams (hypervisor, process lister, bulk load
//! sampler, line emitter) and drives the per-cycle pipeline: enumerate →
//! correlate → batch-process → flush → sleep, forever. Everything runs on
//! one thread; the inter-snapshot waits block the whole cycle by design.
//!
//! Failure containment happens here. Domain-scoped errors are caught at
//! the batch boundary and cost one record; batch-wide tool failures and a
//! broken process listing propagate as fatal; a mid-run enumeration
//! failure propagates as transient for the supervisor to retry.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::config::{Config, UnresolvedPidPolicy};
use crate::error::{DomainError, FatalError, RunError};
use crate::hypervisor::descriptor::DomainDescriptor;
use crate::hypervisor::{DomainHandle, Hypervisor};
use crate::load::LoadSampler;
use crate::metric::{DomainRecord, DomainTags, Metric, MetricValue};
use crate::pid::{self, ProcessLister};
use crate::sampler;
use crate::sink::LineEmitter;

/// Granularity of the inter-cycle sleep, so a shutdown request does not
/// wait out the full interval.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Reads a process's cumulative cpu time in seconds.
pub type CpuTimeReader = fn(u32) -> Option<f64>;

/// Checks whether a pid still exists.
pub type PidProbe = fn(u32) -> bool;

/// Orchestrates the sampling pipeline over injected adapter seams.
pub struct Agent<H, P, L, W>
where
    H: Hypervisor,
    P: ProcessLister,
    L: LoadSampler,
    W: Write,
{
    cfg: Config,
    hypervisor: H,
    lister: P,
    load_sampler: L,
    emitter: LineEmitter<W>,
    cpu_time_reader: CpuTimeReader,
    pid_probe: PidProbe,
    shutdown: Arc<AtomicBool>,
}

impl<H, P, L, W> Agent<H, P, L, W>
where
    H: Hypervisor,
    P: ProcessLister,
    L: LoadSampler,
    W: Write,
{
    pub fn new(
        cfg: Config,
        hypervisor: H,
        lister: P,
        load_sampler: L,
        emitter: LineEmitter<W>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cfg,
            hypervisor,
            lister,
            load_sampler,
            emitter,
            cpu_time_reader: pid::read_cpu_time_seconds,
            pid_probe: pid::pid_exists,
            shutdown,
        }
    }

    /// Replace the OS process readers; used by tests to decouple the
    /// pipeline from the host's real process table.
    pub fn with_proc_readers(mut self, cpu_time_reader: CpuTimeReader, pid_probe: PidProbe) -> Self {
        self.cpu_time_reader = cpu_time_reader;
        self.pid_probe = pid_probe;
        self
    }

    /// Consume the agent, returning its emitter.
    pub fn into_emitter(self) -> LineEmitter<W> {
        self.emitter
    }

    /// Run cycles until a shutdown request or an error.
    ///
    /// Each pass runs strictly after the previous one finishes; there is
    /// no drift correction and no overlap. A shutdown request takes effect
    /// only between cycles.
    pub fn run(&mut self) -> Result<(), RunError> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, stopping");
                return Ok(());
            }

            let started = Instant::now();
            let emitted = self.run_cycle()?;
            debug!(emitted, elapsed = ?started.elapsed(), "cycle complete");

            if self.sleep_until_next_cycle() {
                info!("shutdown requested, stopping");
                return Ok(());
            }
        }
    }

    /// One full pass: enumerate, correlate, process every batch, flush.
    ///
    /// Returns the number of domains that emitted a record.
    pub fn run_cycle(&mut self) -> Result<usize, RunError> {
        let mut domains = self.hypervisor.list_domains()?;
        debug!(count = domains.len(), "enumerated domains");

        // Spread sampling order across cycles so a slow tail does not
        // starve the same domains every time.
        domains.shuffle(&mut rand::thread_rng());

        let listing = self
            .lister
            .capture()
            .map_err(FatalError::ProcessListing)?;
        let pids = pid::correlate(&listing)?;
        debug!(correlated = pids.len(), "correlated pids");

        let mut emitted = 0;
        for batch in domains.chunks(self.cfg.batch_size) {
            emitted += self.process_batch(batch, &pids)?;
        }

        self.emitter.emit_count(emitted, unix_now())?;
        self.emitter.flush()?;

        Ok(emitted)
    }

    /// Process one batch: sample every domain, take one bulk load reading
    /// over the batch's sorted pids, merge it back by pid, emit.
    fn process_batch(
        &mut self,
        batch: &[H::Domain],
        pids: &HashMap<String, u32>,
    ) -> Result<usize, RunError> {
        let mut pending: Vec<DomainRecord> = Vec::with_capacity(batch.len());

        for domain in batch {
            let name = domain.name();
            match self.sample_domain(domain, pids) {
                Ok(Some(record)) => pending.push(record),
                Ok(None) => {}
                Err(err @ DomainError::UnresolvedPid { .. })
                    if self.cfg.on_unresolved_pid == UnresolvedPidPolicy::FailBatch =>
                {
                    warn!(domain = %name, error = %err, "abandoning batch");
                    return Ok(0);
                }
                Err(err) => {
                    warn!(domain = %name, error = %err, "skipping domain");
                }
            }
        }

        if pending.is_empty() {
            return Ok(0);
        }

        // The bulk tool is invoked with pids in sorted order; its rows are
        // matched back by pid, never by row position.
        let mut batch_pids: Vec<u32> = pending.iter().map(|r| r.pid).collect();
        batch_pids.sort_unstable();

        let loads = self
            .load_sampler
            .sample(&batch_pids)
            .map_err(FatalError::LoadSampling)?;

        for record in &mut pending {
            match loads.get(&record.pid) {
                Some(load) => {
                    record
                        .metrics
                        .insert(Metric::CpuLoad, MetricValue::Float(*load));
                }
                None => {
                    warn!(
                        domain = %record.tags.deploy_id,
                        pid = record.pid,
                        "no cpu load row for pid",
                    );
                }
            }
        }

        for record in &pending {
            self.emitter.emit_record(record, unix_now())?;
        }

        Ok(pending.len())
    }

    /// Sample one domain: activity check, pid lookup, descriptor parse,
    /// two counter snapshots separated by the configured wait.
    ///
    /// `Ok(None)` is the inactive-domain skip; every `Err` is
    /// domain-scoped and handled by the caller.
    fn sample_domain(
        &self,
        domain: &H::Domain,
        pids: &HashMap<String, u32>,
    ) -> Result<Option<DomainRecord>, DomainError> {
        let name = domain.name();

        if !domain.is_active()? {
            info!(domain = %name, "domain inactive, skipping");
            return Ok(None);
        }

        let uuid = domain.uuid();
        let pid = *pids
            .get(&uuid)
            .ok_or(DomainError::UnresolvedPid { uuid })?;

        if !(self.pid_probe)(pid) {
            return Err(DomainError::PidGone { pid });
        }

        let descriptor = DomainDescriptor::parse(&domain.xml_desc()?)?;

        let first = sampler::snapshot_counters(domain, &descriptor)?;
        thread::sleep(self.cfg.snapshot_wait);
        let second = sampler::snapshot_counters(domain, &descriptor)?;
        let rates = sampler::compute_rates(&first, &second, self.cfg.snapshot_wait);

        let memory_kb = sampler::memory_kb(&domain.memory_stats()?);
        let cpu_time = (self.cpu_time_reader)(pid)
            .ok_or(DomainError::CpuTimeUnavailable { pid })?;

        let tags = DomainTags {
            deploy_id: name,
            domain_type: descriptor.domain_type.clone(),
        };

        Ok(Some(sampler::build_record(
            tags,
            pid,
            &descriptor,
            &second,
            &rates,
            memory_kb,
            cpu_time,
        )))
    }

    /// Sleep the inter-cycle interval in slices, returning true if a
    /// shutdown was requested meanwhile.
    fn sleep_until_next_cycle(&self) -> bool {
        let deadline = Instant::now() + self.cfg.interval;

        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::Relaxed) {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(SLEEP_SLICE));
        }

        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Current unix timestamp in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
