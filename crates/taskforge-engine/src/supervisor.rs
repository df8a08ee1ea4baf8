//! Subprocess supervisor — spawns the job's payload, streams its output
//! line by line into the run record and the keyword scanner, enforces the
//! per-run timeout, and reports the terminal result on a channel the
//! scheduler drains each tick.
//!
//! Children are placed in their own process group so cancellation reaches
//! descendants: graceful stop signal first, kill after the grace period.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskforge_core::catalog::{Job, KeywordKind, Prelude, Step};
use taskforge_core::error::{ForgeError, Result};

use crate::notify::{NotifyEvent, WebhookSink};
use crate::run::{FinishReason, RunId};
use crate::scanner::KeywordScanner;
use crate::steps;
use crate::store::RunRecordStore;

/// Everything a worker needs to execute one run; the job is a snapshot
/// taken at enqueue time.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub run_id: RunId,
    pub job: Job,
    pub skip_prelude: bool,
}

/// Terminal record handed back to the scheduler.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub job: Job,
    pub exit_code: Option<i32>,
    pub reason: FinishReason,
    /// Message of the first failure-keyword hit, when one occurred.
    pub failure_keyword: Option<String>,
}

pub struct Supervisor {
    store: Arc<RunRecordStore>,
    notify_tx: mpsc::UnboundedSender<NotifyEvent>,
    sink: Arc<dyn WebhookSink>,
    finished_tx: mpsc::UnboundedSender<RunOutcome>,
    cancels: Mutex<HashMap<RunId, CancellationToken>>,
    http: reqwest::Client,
    device_shell: String,
    grace: Duration,
}

impl Supervisor {
    pub fn new(
        store: Arc<RunRecordStore>,
        notify_tx: mpsc::UnboundedSender<NotifyEvent>,
        sink: Arc<dyn WebhookSink>,
        finished_tx: mpsc::UnboundedSender<RunOutcome>,
        device_shell: String,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            notify_tx,
            sink,
            finished_tx,
            cancels: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
            device_shell,
            grace,
        }
    }

    /// Start a worker for the run. The cancel handle is registered before
    /// the task spawns so a cancel can never race past it.
    pub fn launch(self: &Arc<Self>, spec: LaunchSpec) {
        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .unwrap()
            .insert(spec.run_id, cancel.clone());

        let sup = Arc::clone(self);
        tokio::spawn(async move {
            run_worker(sup, spec, cancel).await;
        });
    }

    /// Ask a running worker to stop. Returns false when the run is not
    /// supervised (already finished).
    pub fn cancel(&self, run_id: RunId) -> bool {
        let cancels = self.cancels.lock().unwrap();
        match cancels.get(&run_id) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.cancels.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn signal_then_kill(&self, pid: Option<u32>) -> tokio::task::JoinHandle<()> {
        let grace = self.grace;
        tokio::spawn(async move {
            signal_group(pid, GRACEFUL);
            tokio::time::sleep(grace).await;
            signal_group(pid, FORCEFUL);
        })
    }
}

#[cfg(unix)]
const GRACEFUL: i32 = libc::SIGTERM;
#[cfg(unix)]
const FORCEFUL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const GRACEFUL: i32 = 0;
#[cfg(not(unix))]
const FORCEFUL: i32 = 0;

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: i32) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: i32) {}

/// Why a streamed command stopped.
enum StreamEnd {
    Exited(Option<i32>),
    Cancelled,
    TimedOut,
    /// Killed by an `abort_on_hit` failure keyword.
    Aborted(Option<i32>),
}

/// How one payload step ended.
enum StepEnd {
    Ok(Option<i32>),
    Fail(Option<i32>, FinishReason),
    Interrupted(FinishReason),
}

struct LineHandler<'a> {
    sup: &'a Supervisor,
    run_id: RunId,
    job: &'a Job,
    scanner: KeywordScanner,
    failure_keyword: Option<String>,
}

impl LineHandler<'_> {
    /// Returns true when the rule that matched asks for the process to be
    /// aborted.
    fn on_line(&mut self, line: &str) -> bool {
        self.sup.store.append_line(self.run_id, line);
        if self.scanner.is_empty() {
            return false;
        }
        let Some(hit) = self.scanner.scan_line(line) else {
            return false;
        };
        self.sup.store.record_keyword_hit(self.run_id, line);
        debug!(
            run_id = self.run_id,
            job = %self.job.id,
            pattern = %hit.pattern,
            kind = ?hit.kind,
            "keyword hit"
        );
        match hit.kind {
            KeywordKind::Failure => {
                if self.failure_keyword.is_none() {
                    self.failure_keyword = Some(if hit.message.is_empty() {
                        hit.pattern.clone()
                    } else {
                        hit.message.clone()
                    });
                }
                hit.abort
            }
            KeywordKind::Success => false,
            KeywordKind::Alert => {
                if self.job.notify.on_keyword {
                    let _ = self.sup.notify_tx.send(NotifyEvent::KeywordHit {
                        job_id: self.job.id.clone(),
                        job_name: self.job.name.clone(),
                        run_id: self.run_id,
                        message: hit.message.clone(),
                        line: hit.line.clone(),
                    });
                }
                false
            }
        }
    }
}

async fn run_worker(sup: Arc<Supervisor>, spec: LaunchSpec, cancel: CancellationToken) {
    let LaunchSpec {
        run_id,
        job,
        skip_prelude,
    } = spec;
    info!(run_id, job = %job.id, "run worker started");

    let deadline = (job.timeout_seconds > 0)
        .then(|| Instant::now() + Duration::from_secs(job.timeout_seconds));
    let mut handler = LineHandler {
        sup: &sup,
        run_id,
        job: &job,
        scanner: KeywordScanner::compile(&job.keywords),
        failure_keyword: None,
    };

    let (mut reason, exit_code) =
        execute(&sup, &job, skip_prelude, &cancel, deadline, &mut handler).await;
    let failure_keyword = handler.failure_keyword;

    // A keyword-forced failure on an otherwise clean exit gets the
    // keyword reason.
    if reason == FinishReason::Exit && exit_code == Some(0) && failure_keyword.is_some() {
        reason = FinishReason::Keyword;
    }

    let outcome = RunOutcome {
        run_id,
        exit_code,
        reason,
        failure_keyword,
        job,
    };

    sup.cancels.lock().unwrap().remove(&run_id);
    if sup.finished_tx.send(outcome).is_err() {
        warn!(run_id, "scheduler dropped the finished-run channel");
    }
}

async fn execute(
    sup: &Supervisor,
    job: &Job,
    skip_prelude: bool,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    handler: &mut LineHandler<'_>,
) -> (FinishReason, Option<i32>) {
    if let Some(prelude) = &job.prelude {
        if !skip_prelude {
            match run_prelude(sup, job, prelude, cancel, deadline, handler).await {
                Ok(StepEnd::Ok(_)) => {}
                Ok(StepEnd::Interrupted(reason)) => return (reason, None),
                Ok(StepEnd::Fail(code, _)) => return (FinishReason::Prelude, code),
                Err(e) => {
                    sup.store
                        .append_line(handler.run_id, &format!("prelude failed: {e}"));
                    return (FinishReason::Prelude, None);
                }
            }
        }
    }

    let steps: Vec<Step> = if job.steps.is_empty() {
        vec![Step::Command {
            argv: job.command.clone(),
            continue_on_error: false,
        }]
    } else {
        job.steps.clone()
    };

    let mut last_exit = Some(0);
    for step in &steps {
        match run_payload_step(sup, job, step, cancel, deadline, handler).await {
            StepEnd::Ok(code) => last_exit = code.or(last_exit),
            StepEnd::Interrupted(reason) => return (reason, None),
            StepEnd::Fail(code, reason) => {
                if step.continue_on_error() {
                    sup.store
                        .append_line(handler.run_id, "step failed, continuing");
                } else {
                    return (reason, code);
                }
            }
        }
    }
    (FinishReason::Exit, last_exit)
}

async fn run_payload_step(
    sup: &Supervisor,
    job: &Job,
    step: &Step,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    handler: &mut LineHandler<'_>,
) -> StepEnd {
    match step {
        Step::Command { argv, .. } => {
            command_step(sup, job, argv, cancel, deadline, handler).await
        }
        Step::DeviceWake { device_id, .. } => {
            for argv in steps::wake_commands(&sup.device_shell, device_id) {
                match command_step(sup, job, &argv, cancel, deadline, handler).await {
                    StepEnd::Ok(_) => {}
                    other => return other,
                }
            }
            StepEnd::Ok(Some(0))
        }
        Step::DeviceLaunchApp {
            device_id,
            package,
            activity,
            ..
        } => {
            let argv =
                steps::launch_app_argv(&sup.device_shell, device_id, package, activity.as_deref());
            command_step(sup, job, &argv, cancel, deadline, handler).await
        }
        Step::ResolutionCheck {
            device_id,
            expected,
            ..
        } => resolution_step(sup, job, device_id, expected, cancel, deadline, handler).await,
        Step::Sleep { seconds } => {
            match interruptible_sleep(Duration::from_secs(*seconds), cancel, deadline).await {
                None => StepEnd::Ok(None),
                Some(reason) => StepEnd::Interrupted(reason),
            }
        }
        inline => match steps::run_inline_step(inline, &sup.http, sup.sink.as_ref()).await {
            Ok(output) => {
                for line in output.lines() {
                    handler.on_line(line);
                }
                StepEnd::Ok(None)
            }
            Err(e) => {
                handler.on_line(&format!("step error: {e}"));
                StepEnd::Fail(None, FinishReason::Step)
            }
        },
    }
}

/// Run the emulator prelude: connect, wake, assert resolution, launch the
/// app. Any failure stops the run before the main payload.
async fn run_prelude(
    sup: &Supervisor,
    job: &Job,
    prelude: &Prelude,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    handler: &mut LineHandler<'_>,
) -> Result<StepEnd> {
    let shell = &sup.device_shell;

    for argv in steps::prelude_commands(shell, prelude) {
        match command_step(sup, job, &argv, cancel, deadline, handler).await {
            StepEnd::Ok(_) => {}
            other => return Ok(other),
        }
    }

    if let Some(target) = &prelude.target_resolution {
        match resolution_step(
            sup,
            job,
            &prelude.device_id,
            target,
            cancel,
            deadline,
            handler,
        )
        .await
        {
            StepEnd::Ok(_) => {}
            other => return Ok(other),
        }
    }

    if let Some(package) = &prelude.launch_package {
        if prelude.launch_delay_seconds > 0 {
            if let Some(reason) = interruptible_sleep(
                Duration::from_secs(prelude.launch_delay_seconds),
                cancel,
                deadline,
            )
            .await
            {
                return Ok(StepEnd::Interrupted(reason));
            }
        }
        let argv = steps::launch_app_argv(
            shell,
            &prelude.device_id,
            package,
            prelude.launch_activity.as_deref(),
        );
        match command_step(sup, job, &argv, cancel, deadline, handler).await {
            StepEnd::Ok(_) => {}
            other => return Ok(other),
        }
    }

    Ok(StepEnd::Ok(Some(0)))
}

/// Query the device resolution and correct it when it differs.
async fn resolution_step(
    sup: &Supervisor,
    job: &Job,
    device_id: &str,
    expected: &str,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    handler: &mut LineHandler<'_>,
) -> StepEnd {
    let target = steps::normalize_resolution(expected);
    let query = steps::query_resolution_argv(&sup.device_shell, device_id);
    match run_capture(&query, job).await {
        Ok((Some(0), output)) => {
            if steps::normalize_resolution(&output).contains(&target) {
                handler.on_line(&format!("resolution already {target}"));
                StepEnd::Ok(Some(0))
            } else {
                let set = steps::set_resolution_argv(&sup.device_shell, device_id, &target);
                command_step(sup, job, &set, cancel, deadline, handler).await
            }
        }
        Ok((code, output)) => {
            handler.on_line(&format!("resolution query failed: {output}"));
            StepEnd::Fail(code, FinishReason::Step)
        }
        Err(e) => {
            handler.on_line(&format!("resolution query failed: {e}"));
            StepEnd::Fail(None, FinishReason::Spawn)
        }
    }
}

async fn command_step(
    sup: &Supervisor,
    job: &Job,
    argv: &[String],
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    handler: &mut LineHandler<'_>,
) -> StepEnd {
    match stream_command(sup, job, argv, cancel, deadline, handler).await {
        Ok(StreamEnd::Exited(Some(0))) => StepEnd::Ok(Some(0)),
        Ok(StreamEnd::Exited(code)) => StepEnd::Fail(code, FinishReason::Exit),
        Ok(StreamEnd::Cancelled) => StepEnd::Interrupted(FinishReason::Cancel),
        Ok(StreamEnd::TimedOut) => StepEnd::Interrupted(FinishReason::Timeout),
        Ok(StreamEnd::Aborted(_)) => StepEnd::Interrupted(FinishReason::Keyword),
        Err(e) => {
            handler.on_line(&format!("spawn failed: {e}"));
            StepEnd::Fail(None, FinishReason::Spawn)
        }
    }
}

/// Spawn one command in its own process group and stream both of its
/// output pipes through the line handler until they close.
async fn stream_command(
    sup: &Supervisor,
    job: &Job,
    argv: &[String],
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    handler: &mut LineHandler<'_>,
) -> Result<StreamEnd> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ForgeError::Spawn("empty argv".into()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &job.working_directory {
        command.current_dir(dir);
    }
    command.envs(&job.environment);
    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = command
        .spawn()
        .map_err(|e| ForgeError::Spawn(format!("{program}: {e}")))?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ForgeError::Spawn("child stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ForgeError::Spawn("child stderr not piped".into()))?;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut stopping = false;
    let mut cancelled = false;
    let mut timed_out = false;
    let mut aborted = false;
    let mut kill_task: Option<tokio::task::JoinHandle<()>> = None;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        if handler.on_line(&line) && !stopping {
                            stopping = true;
                            aborted = true;
                            kill_task = Some(sup.signal_then_kill(pid));
                            #[cfg(not(unix))]
                            let _ = child.start_kill();
                        }
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        if handler.on_line(&line) && !stopping {
                            stopping = true;
                            aborted = true;
                            kill_task = Some(sup.signal_then_kill(pid));
                            #[cfg(not(unix))]
                            let _ = child.start_kill();
                        }
                    }
                    _ => stderr_done = true,
                }
            }
            _ = cancel.cancelled(), if !stopping => {
                stopping = true;
                cancelled = true;
                kill_task = Some(sup.signal_then_kill(pid));
                #[cfg(not(unix))]
                let _ = child.start_kill();
            }
            _ = sleep_until_opt(deadline), if deadline.is_some() && !stopping => {
                stopping = true;
                timed_out = true;
                kill_task = Some(sup.signal_then_kill(pid));
                #[cfg(not(unix))]
                let _ = child.start_kill();
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| ForgeError::Spawn(format!("wait: {e}")))?;
    if let Some(task) = kill_task {
        task.abort();
    }

    let code = status.code();
    Ok(if cancelled {
        StreamEnd::Cancelled
    } else if timed_out {
        StreamEnd::TimedOut
    } else if aborted {
        StreamEnd::Aborted(code)
    } else if code.is_none() {
        // Killed by a signal nobody here sent.
        StreamEnd::Exited(None)
    } else {
        StreamEnd::Exited(code)
    })
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Sleep that wakes early on cancel or deadline; returns the interrupt
/// reason when one fired.
async fn interruptible_sleep(
    duration: Duration,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Option<FinishReason> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => None,
        _ = cancel.cancelled() => Some(FinishReason::Cancel),
        _ = sleep_until_opt(deadline), if deadline.is_some() => Some(FinishReason::Timeout),
    }
}

/// Run a short command to completion and capture its combined output.
async fn run_capture(argv: &[String], job: &Job) -> Result<(Option<i32>, String)> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ForgeError::Spawn("empty argv".into()))?;
    let output = Command::new(program)
        .args(args)
        .envs(&job.environment)
        .output()
        .await
        .map_err(|e| ForgeError::Spawn(format!("{program}: {e}")))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.code(), text))
}
