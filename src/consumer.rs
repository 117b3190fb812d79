//! Execute one trial as an isolated subprocess.
//!
//! [`Consumer::consume`] drives a trial through
//! `reserved → running → {completed | interrupted | broken}`:
//!
//! 1. reserve the trial under the consumer's owner token (or check that the
//!    token already holds it);
//! 2. create its working directory `<root>/<experiment>_<trial id>`;
//! 3. refuse to run if the program's code drifted since the experiment was
//!    created;
//! 4. launch the program with the trial's parameters while a
//!    [`Pacemaker`] keeps the reservation alive;
//! 5. reconcile the exit status and the reported results with storage.
//!
//! Interruption is explicit: callers pass a [`CancellationToken`]. When it
//! fires, the child is killed, the pacemaker stopped and the trial marked
//! `interrupted`, in that order, before [`Error::Interrupted`] is returned.
//! A program that exits with the interrupt code is interrupted as well; one
//! killed by a signal is `broken`.
//!
//! # Results protocol
//!
//! The program receives its parameters as `--name=value` arguments after
//! the experiment's fixed `user_args`, and the following environment:
//!
//! | Variable | Content |
//! |----------|---------|
//! | `TRIAL_WORKER_EXPERIMENT_NAME` | experiment name |
//! | `TRIAL_WORKER_TRIAL_ID` | trial id |
//! | `TRIAL_WORKER_WORKING_DIR` | the trial's working directory (also its cwd) |
//! | `TRIAL_WORKER_RESULTS_PATH` | file to write results to |
//! | `TRIAL_WORKER_INTERRUPT_CODE` | exit code meaning "I was interrupted" |
//!
//! Results are a JSON array of `{"name", "type", "value"}` objects with at
//! least one `objective`.

use core::time::Duration;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::pacemaker::Pacemaker;
use crate::storage::Storage;
use crate::trial::{ResultType, Trial, TrialResult, TrialStatus};
use crate::vcs::{GitVersionControl, VcsChange, VersionControl};

/// Name of the results file inside a trial's working directory.
pub const RESULTS_FILE: &str = "results.json";

/// How the subprocess wait ended.
enum Outcome {
    Cancelled,
    ReservationLost,
    Exited(std::io::Result<ExitStatus>),
}

/// Runs trials of one experiment, one at a time.
///
/// Each consumer holds an owner token that storage stamps on the trials it
/// reserves. A trial reserved under another token is never run.
pub struct Consumer {
    experiment: Arc<Experiment>,
    storage: Arc<dyn Storage>,
    owner: String,
    vcs: Arc<dyn VersionControl>,
    working_dir: PathBuf,
    heartbeat: Duration,
    interrupt_code: i32,
    ignore_code_changes: bool,
    span: Span,
}

impl Consumer {
    /// Starts building a consumer for `experiment`.
    pub fn builder(experiment: Arc<Experiment>, storage: Arc<dyn Storage>) -> ConsumerBuilder {
        let defaults = WorkerConfig::default();
        let heartbeat = defaults.heartbeat();
        ConsumerBuilder {
            experiment,
            storage,
            owner: None,
            vcs: Arc::new(GitVersionControl),
            working_dir: defaults.working_dir,
            heartbeat,
            interrupt_code: defaults.interrupt_code,
            ignore_code_changes: defaults.ignore_code_changes,
            span: None,
        }
    }

    /// Builds a consumer from a [`WorkerConfig`], using `git` for
    /// versioning metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn from_config(
        experiment: Arc<Experiment>,
        storage: Arc<dyn Storage>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::builder(experiment, storage)
            .working_dir(config.working_dir.clone())
            .heartbeat(config.heartbeat())
            .interrupt_code(config.interrupt_code)
            .ignore_code_changes(config.ignore_code_changes)
            .build())
    }

    /// Token stamped on the trials this consumer reserves.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Root under which trial working directories are created.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Pacemaker heartbeat interval.
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// The working directory assigned to `trial`.
    #[must_use]
    pub fn trial_working_dir(&self, trial: &Trial) -> PathBuf {
        self.working_dir
            .join(format!("{}_{}", self.experiment.name, trial.id))
    }

    /// Executes `trial` and records its outcome in storage.
    ///
    /// On return, `trial` mirrors the stored trial. A program that fails or
    /// reports no objective leaves the trial `broken`; this is not an error
    /// for the caller, who decides whether to retry.
    ///
    /// # Errors
    ///
    /// - [`Error::ReservationConflict`] if the trial cannot be reserved, or
    ///   is reserved under another consumer's token.
    /// - [`Error::BranchingEvent`] if the program's code changed since the
    ///   experiment was created; the trial keeps its pre-execution status.
    /// - [`Error::Interrupted`] if `cancel` fired or the program exited with
    ///   the interrupt code; the trial is left `interrupted`.
    /// - [`Error::ReservationLost`] if the trial was completed or cancelled
    ///   elsewhere while running; its stored status is left as found.
    /// - [`Error::Launch`] if the program could not be started; the trial is
    ///   left `broken`.
    pub async fn consume(&mut self, trial: &mut Trial, cancel: &CancellationToken) -> Result<()> {
        let span = tracing::info_span!(parent: &self.span, "consume", trial_id = %trial.id);
        self.consume_trial(trial, cancel).instrument(span).await
    }

    async fn consume_trial(&self, trial: &mut Trial, cancel: &CancellationToken) -> Result<()> {
        let pre_status = trial.status;
        let reserved_here = self.reserve(trial)?;

        if cancel.is_cancelled() {
            return self.interrupt(trial);
        }

        let dir = self.trial_working_dir(trial);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            self.mark_broken(trial);
            return Err(e.into());
        }
        if let Err(e) = self.storage.set_working_dir(&trial.id, &dir) {
            self.mark_broken(trial);
            return Err(e);
        }
        trial.working_dir = Some(dir.clone());
        debug!(working_dir = %dir.display(), "assigned working directory");

        if let Err(e) = self.validate_code_version().await {
            if reserved_here {
                self.release(trial, pre_status);
            }
            return Err(e);
        }

        let results_path = dir.join(RESULTS_FILE);
        let program = resolve_program(&self.experiment.metadata.user_script);
        let mut child = match self.command(&program, trial, &dir, &results_path).spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!(program = %program.display(), error = %source, "failed to launch trial");
                self.mark_broken(trial);
                return Err(Error::Launch { program, source });
            }
        };
        info!("trial started");

        let pacemaker = Pacemaker::start(
            Arc::clone(&self.storage),
            trial.id.clone(),
            self.owner.clone(),
            self.heartbeat,
        );
        let lost = pacemaker.lost();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Outcome::Cancelled,
            () = lost.cancelled() => Outcome::ReservationLost,
            status = child.wait() => Outcome::Exited(status),
        };

        match outcome {
            Outcome::Cancelled => {
                kill(&mut child).await;
                pacemaker.stop().await;
                self.interrupt(trial)
            }
            Outcome::ReservationLost => {
                kill(&mut child).await;
                pacemaker.stop().await;
                if let Some(stored) = self.storage.get_trial(&trial.id) {
                    *trial = stored;
                }
                warn!(status = %trial.status, "trial reservation lost, execution aborted");
                Err(Error::ReservationLost {
                    id: trial.id.clone(),
                })
            }
            Outcome::Exited(status) => {
                pacemaker.stop().await;
                match status {
                    Ok(status) => self.reconcile(trial, status, &results_path).await,
                    Err(e) => {
                        self.mark_broken(trial);
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Makes sure the trial is reserved under our token. Returns `true` if
    /// this call performed the reservation.
    fn reserve(&self, trial: &mut Trial) -> Result<bool> {
        if trial.status == TrialStatus::Reserved {
            let stored = self
                .storage
                .get_trial(&trial.id)
                .ok_or_else(|| Error::TrialNotFound(trial.id.clone()))?;
            if stored.status != TrialStatus::Reserved
                || stored.owner.as_deref() != Some(self.owner.as_str())
            {
                debug!(owner = ?stored.owner, "trial is held by another consumer");
                return Err(Error::ReservationConflict {
                    id: trial.id.clone(),
                    status: stored.status,
                });
            }
            *trial = stored;
            return Ok(false);
        }
        *trial = self.storage.reserve(&trial.id, &self.owner)?;
        debug!("reserved trial");
        Ok(true)
    }

    async fn validate_code_version(&self) -> Result<()> {
        if self.ignore_code_changes {
            return Ok(());
        }
        let Some(recorded) = self.experiment.metadata.vcs.clone() else {
            return Ok(());
        };

        let vcs = Arc::clone(&self.vcs);
        let script = self.experiment.metadata.user_script.clone();
        let current = tokio::task::spawn_blocking(move || vcs.infer(&script))
            .await
            .map_err(|e| Error::TaskError(e.to_string()))??;

        let changes = match current {
            Some(current) => recorded.diff(&current),
            None => vec![VcsChange {
                field: "type",
                old: recorded.kind.clone(),
                new: "<none>".into(),
            }],
        };
        if changes.is_empty() {
            return Ok(());
        }
        warn!(n_changes = changes.len(), "code changed since the experiment was created");
        Err(Error::BranchingEvent { changes })
    }

    fn command(&self, program: &Path, trial: &Trial, dir: &Path, results_path: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .args(&self.experiment.metadata.user_args)
            .args(
                trial
                    .params
                    .iter()
                    .map(|p| format!("--{}={}", p.name, p.value)),
            )
            .current_dir(dir)
            .env("TRIAL_WORKER_EXPERIMENT_NAME", &self.experiment.name)
            .env("TRIAL_WORKER_TRIAL_ID", &trial.id)
            .env("TRIAL_WORKER_WORKING_DIR", dir)
            .env("TRIAL_WORKER_RESULTS_PATH", results_path)
            .env("TRIAL_WORKER_INTERRUPT_CODE", self.interrupt_code.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    async fn reconcile(
        &self,
        trial: &mut Trial,
        status: ExitStatus,
        results_path: &Path,
    ) -> Result<()> {
        match status.code() {
            Some(0) => {}
            Some(code) if code == self.interrupt_code => {
                debug!(code, "program reported an interruption");
                return self.interrupt(trial);
            }
            None => {
                warn!(signal = ?signal(status), "program killed by a signal");
                self.mark_broken(trial);
                return Ok(());
            }
            Some(code) => {
                warn!(code, "program failed");
                self.mark_broken(trial);
                return Ok(());
            }
        }

        let results = match read_results(results_path).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, path = %results_path.display(), "invalid results");
                self.mark_broken(trial);
                return Ok(());
            }
        };

        self.storage.push_results(&trial.id, &results)?;
        *trial = self.storage.set_trial_status(
            &trial.id,
            TrialStatus::Completed,
            Some(TrialStatus::Reserved),
        )?;
        info!(
            objective = trial.objective().map(|r| r.value),
            "trial completed"
        );
        Ok(())
    }

    /// Persists `interrupted` and returns the error to propagate. A trial
    /// that already left `reserved` is left alone.
    fn interrupt(&self, trial: &mut Trial) -> Result<()> {
        match self.storage.set_trial_status(
            &trial.id,
            TrialStatus::Interrupted,
            Some(TrialStatus::Reserved),
        ) {
            Ok(stored) => *trial = stored,
            Err(Error::StatusConflict { actual, .. }) => {
                debug!(status = %actual, "trial already left reservation");
                trial.status = actual;
            }
            Err(e) => return Err(e),
        }
        warn!("trial interrupted");
        Err(Error::Interrupted {
            trial_id: trial.id.clone(),
        })
    }

    fn mark_broken(&self, trial: &mut Trial) {
        match self.storage.set_trial_status(
            &trial.id,
            TrialStatus::Broken,
            Some(TrialStatus::Reserved),
        ) {
            Ok(stored) => {
                *trial = stored;
                warn!("trial broken");
            }
            Err(e) => warn!(error = %e, "cannot mark trial broken"),
        }
    }

    fn release(&self, trial: &mut Trial, status: TrialStatus) {
        match self
            .storage
            .set_trial_status(&trial.id, status, Some(TrialStatus::Reserved))
        {
            Ok(stored) => *trial = stored,
            Err(e) => warn!(error = %e, "cannot release trial"),
        }
    }
}

#[cfg(unix)]
fn signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal(_status: ExitStatus) -> Option<i32> {
    None
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill trial process");
    }
}

async fn read_results(path: &Path) -> Result<Vec<TrialResult>> {
    let content = tokio::fs::read_to_string(path).await?;
    let results: Vec<TrialResult> = serde_json::from_str(&content)?;
    if !results.iter().any(|r| r.kind == ResultType::Objective) {
        return Err(Error::InvalidResults(format!(
            "{} holds no objective",
            path.display()
        )));
    }
    Ok(results)
}

/// Paths with a directory part are made absolute so they survive the
/// change of working directory; bare names are left to `PATH` lookup.
fn resolve_program(user_script: &Path) -> PathBuf {
    if user_script.components().count() > 1 {
        std::fs::canonicalize(user_script).unwrap_or_else(|_| user_script.to_path_buf())
    } else {
        user_script.to_path_buf()
    }
}

/// Builder for [`Consumer`].
///
/// # Defaults
///
/// - versioning metadata: [`GitVersionControl`]
/// - working dir root: system temp dir / `trial-worker`
/// - heartbeat: 60 s
/// - interrupt code: 130
/// - owner token: random, unique per consumer
pub struct ConsumerBuilder {
    experiment: Arc<Experiment>,
    storage: Arc<dyn Storage>,
    owner: Option<String>,
    vcs: Arc<dyn VersionControl>,
    working_dir: PathBuf,
    heartbeat: Duration,
    interrupt_code: i32,
    ignore_code_changes: bool,
    span: Option<Span>,
}

impl ConsumerBuilder {
    /// Sets the owner token stamped on reserved trials. Two consumers must
    /// never share one.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the provider of versioning metadata.
    #[must_use]
    pub fn version_control(mut self, vcs: impl VersionControl + 'static) -> Self {
        self.vcs = Arc::new(vcs);
        self
    }

    /// Sets the root of trial working directories.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the pacemaker heartbeat interval.
    #[must_use]
    pub fn heartbeat(mut self, wait_time: Duration) -> Self {
        self.heartbeat = wait_time;
        self
    }

    /// Sets the exit code by which the program reports an interruption.
    #[must_use]
    pub fn interrupt_code(mut self, code: i32) -> Self {
        self.interrupt_code = code;
        self
    }

    /// Runs trials even when the program's code changed.
    #[must_use]
    pub fn ignore_code_changes(mut self, ignore: bool) -> Self {
        self.ignore_code_changes = ignore;
        self
    }

    /// Sets the span every event of the consumer is recorded in.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the consumer.
    #[must_use]
    pub fn build(self) -> Consumer {
        let span = self.span.unwrap_or_else(
            || tracing::info_span!("consumer", experiment = %self.experiment.name),
        );
        let owner = self
            .owner
            .unwrap_or_else(|| format!("{}-{:016x}", std::process::id(), fastrand::u64(..)));
        Consumer {
            experiment: self.experiment,
            storage: self.storage,
            owner,
            vcs: self.vcs,
            working_dir: self.working_dir,
            heartbeat: self.heartbeat,
            interrupt_code: self.interrupt_code,
            ignore_code_changes: self.ignore_code_changes,
            span,
        }
    }
}
