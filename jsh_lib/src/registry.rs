//! Job table and wait set.
//!
//! Both are owned by the job-control loop alone, so nothing here locks.

use std::mem;

pub use jsh_data::{JobId, JobStatus, JobSummary};
use tracing::{info, instrument, warn};

use crate::{
    error::{KillError, ReapError, WaitSetError},
    util::{ProcessHandle, ProcessId},
};

/// Something the job-control loop blocks on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waitable {
    /// A command line is available. Always at index 0.
    Input,
    Process(ProcessId),
}

/// Ordered set of waitables: the input sentinel followed by one entry per
/// live process across all running jobs.
#[derive(Debug)]
pub struct WaitSet {
    entries: Vec<Waitable>,
}

impl WaitSet {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            entries: vec![Waitable::Input],
        }
    }

    pub fn entries(&self) -> &[Waitable] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.entries.contains(&Waitable::Process(id))
    }

    /// Appends one entry per process, doubling the capacity when it runs out.
    pub fn append(&mut self, ids: &[ProcessId]) -> Result<(), WaitSetError> {
        let needed = self.entries.len() + ids.len();
        if needed > self.entries.capacity() {
            let target = needed.max(self.entries.capacity() * 2);
            self.entries.try_reserve_exact(target - self.entries.len())?;
        }
        self.entries
            .extend(ids.iter().map(|id| Waitable::Process(*id)));
        Ok(())
    }

    /// Removes the entry for `id`, keeping the order of everything else.
    /// Returns false if it was not there.
    pub fn remove(&mut self, id: ProcessId) -> bool {
        match self
            .entries
            .iter()
            .skip(1)
            .position(|w| *w == Waitable::Process(id))
        {
            Some(i) => {
                self.entries.remove(i + 1);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    foreground: bool,
    processes: Vec<ProcessHandle>,
    process_group: Option<u32>,
    command_line: String,
}

impl Job {
    fn empty(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Empty,
            foreground: false,
            processes: Vec::new(),
            process_group: None,
            command_line: String::new(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Pids of the processes not reaped yet.
    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(ProcessHandle::pid).collect()
    }

    pub fn process_ids(&self) -> Vec<ProcessId> {
        self.processes.iter().map(ProcessHandle::id).collect()
    }

    /// Process group of the pipeline: the pid of its first stage.
    pub fn process_group(&self) -> Option<u32> {
        self.process_group
    }

    fn summary(&self) -> JobSummary {
        JobSummary::new(self.id, self.status, &self.command_line)
    }

    fn reset(&mut self) {
        *self = Job::empty(self.id);
    }
}

/// Fixed-size table of job slots (slot index == job id) plus the wait set.
#[derive(Debug)]
pub struct Registry {
    jobs: Vec<Job>,
    wait_set: WaitSet,
}

impl Registry {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: (0..max_jobs).map(|i| Job::empty(JobId(i))).collect(),
            wait_set: WaitSet::new(),
        }
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.0)
    }

    pub fn status(&self, id: JobId) -> JobStatus {
        self.job(id).map_or(JobStatus::Empty, Job::status)
    }

    pub fn wait_set(&self) -> &WaitSet {
        &self.wait_set
    }

    /// First `Empty` slot, if any.
    pub fn allocate_job(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|job| job.status == JobStatus::Empty)
            .map(Job::id)
    }

    pub fn append_waitable(&mut self, ids: &[ProcessId]) -> Result<(), WaitSetError> {
        self.wait_set.append(ids)
    }

    pub fn remove_waitable(&mut self, id: ProcessId) -> bool {
        self.wait_set.remove(id)
    }

    /// Fills slot `id` with a running job. The processes must already be in
    /// the wait set.
    pub(crate) fn install(
        &mut self,
        id: JobId,
        foreground: bool,
        command_line: String,
        processes: Vec<ProcessHandle>,
    ) {
        let job = &mut self.jobs[id.0];
        debug_assert_eq!(JobStatus::Empty, job.status);
        job.status = JobStatus::Running;
        job.foreground = foreground;
        job.process_group = processes.first().map(ProcessHandle::pid);
        job.command_line = command_line;
        job.processes = processes;
    }

    /// Removes an exited process from the wait set and from its job. The job
    /// becomes `Terminated` when this was its last process.
    #[instrument(skip(self))]
    pub fn reap(&mut self, id: ProcessId) -> Result<JobId, ReapError> {
        if !self.wait_set.remove(id) {
            return Err(ReapError::NotWaited(id));
        }
        let job = self
            .jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Running)
            .find(|job| job.processes.iter().any(|p| p.id() == id))
            .ok_or(ReapError::NoOwningJob(id))?;
        job.processes.retain(|p| p.id() != id);
        if job.processes.is_empty() {
            job.processes = Vec::new();
            job.status = JobStatus::Terminated;
            info!("job {} terminated", job.id);
        }
        Ok(job.id)
    }

    /// Kills every live process of the job, waiting for each to exit, and
    /// frees the slot.
    #[instrument(skip(self))]
    pub async fn terminate(&mut self, id: JobId) {
        let processes = match self.jobs.get_mut(id.0) {
            Some(job) => mem::take(&mut job.processes),
            None => return,
        };
        for process in processes {
            let (process_id, pid) = (process.id(), process.pid());
            let status = process.terminate().await;
            info!("process {} of job {} gone, status {:?}", pid, id, status);
            if !self.wait_set.remove(process_id) {
                info!("process {} was already out of the wait set", pid);
            }
        }
        self.jobs[id.0].reset();
    }

    /// Terminates every job that is not `Empty`.
    pub async fn terminate_all(&mut self) {
        let ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|job| job.status != JobStatus::Empty)
            .map(Job::id)
            .collect();
        for id in ids {
            self.terminate(id).await;
        }
    }

    /// Lists every non-empty job. Jobs reported as `Terminated` are reclaimed,
    /// so each completion is reported exactly once.
    pub fn list_jobs(&mut self) -> Vec<JobSummary> {
        let mut summaries = Vec::new();
        for job in self.jobs.iter_mut() {
            if job.status == JobStatus::Empty {
                continue;
            }
            summaries.push(job.summary());
            if job.status == JobStatus::Terminated {
                job.reset();
            }
        }
        summaries
    }

    /// Terminates job `id`. Returns what the job looks like after the kill.
    pub async fn kill_job(&mut self, id: JobId) -> Result<JobSummary, KillError> {
        let job = self.jobs.get(id.0).ok_or(KillError::OutOfRange(id))?;
        if job.status == JobStatus::Empty {
            return Err(KillError::NoSuchJob(id));
        }
        let summary = JobSummary::new(id, JobStatus::Terminated, &job.command_line);
        self.terminate(id).await;
        Ok(summary)
    }

    #[cfg(test)]
    pub(crate) fn install_for_test(&mut self, command_line: &str, ids: &[u64]) -> JobId {
        let id = self.allocate_job().unwrap();
        let ids: Vec<ProcessId> = ids.iter().copied().map(ProcessId).collect();
        self.append_waitable(&ids).unwrap();
        let processes = ids
            .iter()
            .map(|process| ProcessHandle::detached(*process, process.0 as u32))
            .collect();
        self.install(id, false, command_line.to_string(), processes);
        id
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let live = self.wait_set.len() - 1;
        if live > 0 {
            warn!("registry dropped with {} processes still watched", live);
        }
    }
}
