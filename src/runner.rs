//! Driving samplers step by step, in the foreground or on a controller thread.

use std::sync::mpsc::{sync_channel, Receiver, RecvError, SyncSender, TryRecvError};
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use log::{info, warn};

use crate::error::Result;
use crate::results::Results;

/// Life cycle of a sampler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    Burning,
    Sampling,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub struct Progress {
    pub phase: Phase,
    /// Samples stored so far.
    pub accepted: u64,
    pub requested: u64,
    /// Candidates drawn (OFTI) or ensemble steps taken (MCMC).
    pub attempts: u64,
}

impl Progress {
    pub(crate) fn new(phase: Phase, accepted: u64, requested: u64, attempts: u64) -> Self {
        Self {
            phase,
            accepted,
            requested,
            attempts,
        }
    }
}

/// A sampler that does its work in discrete steps.
///
/// Cancellation and progress reporting happen between steps, so a step should
/// be a bounded amount of work.
pub trait StepSampler: Send {
    /// Do one unit of work. Returns `true` once the requested samples are stored.
    fn step(&mut self) -> Result<bool>;

    fn progress(&self) -> Progress;

    /// Samples stored so far.
    fn results(&self) -> &Results;

    fn into_results(self) -> Results
    where
        Self: Sized;

    /// Step until complete and return all samples.
    fn run(mut self) -> Result<Results>
    where
        Self: Sized,
    {
        while !self.step()? {}
        Ok(self.into_results())
    }
}

pub struct ProgressCallback {
    pub callback: Box<dyn FnMut(Duration, Progress) + Send>,
    pub rate: Duration,
}

#[derive(Debug)]
enum SamplerCommand {
    Pause,
    Continue,
    Progress,
}

enum SamplerResponse {
    Ok(),
    Progress(Progress),
}

/// A sampler running on its own thread.
///
/// Dropping the handle or calling [`BackgroundSampler::abort`] stops the run
/// after the current step; the samples stored up to then are kept.
pub struct BackgroundSampler {
    main_thread: JoinHandle<(Result<()>, Results)>,
    commands: SyncSender<SamplerCommand>,
    responses: Receiver<SamplerResponse>,
    paused: bool,
}

impl BackgroundSampler {
    pub fn spawn<S: StepSampler + 'static>(
        sampler: S,
        callback: Option<ProgressCallback>,
    ) -> anyhow::Result<Self> {
        let (commands_tx, commands_rx) = sync_channel(0);
        let (responses_tx, responses_rx) = sync_channel(0);

        let main_thread = Builder::new()
            .name("orbitfit-controller".to_string())
            .spawn(move || {
                let mut sampler = sampler;
                let mut callback = callback;
                let result = control_loop(&mut sampler, commands_rx, responses_tx, &mut callback);
                (result, sampler.into_results())
            })
            .context("Could not start sampler thread")?;

        Ok(Self {
            main_thread,
            commands: commands_tx,
            responses: responses_rx,
            paused: false,
        })
    }

    pub fn pause(&mut self) -> anyhow::Result<()> {
        self.commands
            .send(SamplerCommand::Pause)
            .context("Could not send pause command to sampler thread")?;
        let SamplerResponse::Ok() = self
            .responses
            .recv()
            .context("Could not receive pause response from sampler thread")?
        else {
            bail!("Got invalid response from sampler thread");
        };
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self) -> anyhow::Result<()> {
        self.commands
            .send(SamplerCommand::Continue)
            .context("Could not send resume command to sampler thread")?;
        let SamplerResponse::Ok() = self.responses.recv()? else {
            bail!("Got invalid response from sampler thread");
        };
        self.paused = false;
        Ok(())
    }

    pub fn progress(&mut self) -> anyhow::Result<Progress> {
        self.commands
            .send(SamplerCommand::Progress)
            .context("Sampler thread is not running")?;
        let SamplerResponse::Progress(progress) = self.responses.recv()? else {
            bail!("Got invalid response from sampler thread");
        };
        Ok(progress)
    }

    pub fn is_finished(&self) -> bool {
        self.main_thread.is_finished()
    }

    /// Stop after the current step and return what has been sampled.
    pub fn abort(self) -> (anyhow::Result<()>, Results) {
        drop(self.commands);
        join(self.main_thread)
    }

    /// Block until the sampler completes.
    pub fn wait(mut self) -> anyhow::Result<Results> {
        if self.paused {
            // the thread may already be done, nothing to resume then
            let _ = self.resume();
        }
        let Self {
            main_thread,
            commands,
            ..
        } = self;
        let (result, results) = join(main_thread);
        drop(commands);
        result.map(|()| results)
    }
}

fn join(handle: JoinHandle<(Result<()>, Results)>) -> (anyhow::Result<()>, Results) {
    match handle.join() {
        Err(payload) => std::panic::resume_unwind(payload),
        Ok((result, results)) => (result.map_err(anyhow::Error::from), results),
    }
}

fn control_loop<S: StepSampler>(
    sampler: &mut S,
    commands: Receiver<SamplerCommand>,
    responses: SyncSender<SamplerResponse>,
    callback: &mut Option<ProgressCallback>,
) -> Result<()> {
    let start_time = Instant::now();
    let mut last_progress = Instant::now();
    let mut paused = false;

    loop {
        let msg = if paused {
            commands.recv().map_err(|RecvError| TryRecvError::Disconnected)
        } else {
            commands.try_recv()
        };
        match msg {
            // The handle is gone
            Err(TryRecvError::Disconnected) => {
                let progress = sampler.progress();
                warn!(
                    "Sampling cancelled with {} of {} samples",
                    progress.accepted, progress.requested
                );
                break;
            }
            Err(TryRecvError::Empty) => {}
            Ok(command) => {
                let response = match command {
                    SamplerCommand::Pause => {
                        paused = true;
                        SamplerResponse::Ok()
                    }
                    SamplerCommand::Continue => {
                        paused = false;
                        SamplerResponse::Ok()
                    }
                    SamplerCommand::Progress => SamplerResponse::Progress(sampler.progress()),
                };
                if responses.send(response).is_err() {
                    break;
                }
                continue;
            }
        }

        let done = sampler.step()?;

        if let Some(ProgressCallback { callback, rate }) = callback {
            if done || last_progress.elapsed() >= *rate {
                callback(start_time.elapsed(), sampler.progress());
                last_progress = Instant::now();
            }
        }
        if done {
            info!("Sampling finished after {:?}", start_time.elapsed());
            break;
        }
    }
    Ok(())
}
