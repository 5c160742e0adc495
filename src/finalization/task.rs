//! Cancellable background work units.
//!
//! `CancelToken` is a shared flag checked inside every long-running loop.
//! `TwoStageTask` runs work on its own thread and hands back exactly two
//! ordered results (a fast first result, then a refined second one) over a
//! single channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::error::FinalizeError;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), FinalizeError> {
        if self.is_cancelled() {
            Err(FinalizeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Which of the two results a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    First,
    Second,
}

/// Worker-side end of a `TwoStageTask`.
pub struct StageSender<T> {
    sender: Sender<(Stage, Result<T, FinalizeError>)>,
}

impl<T> StageSender<T> {
    /// Deliver the first result. Returns false if the task handle was dropped.
    pub fn first(&self, result: Result<T, FinalizeError>) -> bool {
        self.sender.send((Stage::First, result)).is_ok()
    }

    pub fn second(&self, result: Result<T, FinalizeError>) -> bool {
        self.sender.send((Stage::Second, result)).is_ok()
    }
}

/// Handle on background work producing a first and a second result, in that order.
pub struct TwoStageTask<T> {
    receiver: Receiver<(Stage, Result<T, FinalizeError>)>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
    first_taken: bool,
    /// Error of the first stage, repeated for the second if the worker stopped.
    first_error: Option<FinalizeError>,
}

impl<T: Send + 'static> TwoStageTask<T> {
    /// Spawn `work` on a named thread. `work` must call `first` before `second`.
    pub fn spawn<F>(name: &str, cancel: CancelToken, work: F) -> Self
    where
        F: FnOnce(StageSender<T>, CancelToken) + Send + 'static,
    {
        let (sender, receiver) = bounded(2);
        let worker_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(StageSender { sender }, worker_cancel))
            .ok();
        if handle.is_none() {
            debug!(name, "failed to spawn task thread");
        }

        Self {
            receiver,
            cancel,
            handle,
            first_taken: false,
            first_error: None,
        }
    }

    /// Block until the first result arrives.
    pub fn first_result(&mut self) -> Result<T, FinalizeError> {
        if self.first_taken {
            return Err(FinalizeError::StageFailed {
                stage: "task",
                reason: "first result already taken".to_string(),
            });
        }
        self.first_taken = true;
        let result = self.recv(Stage::First);
        if let Err(ref e) = result {
            self.first_error = Some(e.clone());
        }
        result
    }

    /// Block until the second result arrives. Discards the first if it was never taken.
    pub fn second_result(&mut self) -> Result<T, FinalizeError> {
        if !self.first_taken {
            let _ = self.first_result();
        }
        if let Some(e) = self.first_error.clone() {
            return Err(e);
        }
        self.recv(Stage::Second)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn recv(&self, expected: Stage) -> Result<T, FinalizeError> {
        match self.receiver.recv() {
            Ok((stage, result)) if stage == expected => result,
            Ok((stage, _)) => Err(FinalizeError::StageFailed {
                stage: "task",
                reason: format!("expected {expected:?} result, got {stage:?}"),
            }),
            // Worker exited without delivering.
            Err(_) if self.cancel.is_cancelled() => Err(FinalizeError::Cancelled),
            Err(_) => Err(FinalizeError::StageFailed {
                stage: "task",
                reason: "worker exited without a result".to_string(),
            }),
        }
    }
}

impl<T> Drop for TwoStageTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                // Abandon: the worker sees the flag and frees its partial results.
                self.cancel.cancel();
            }
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_results_arrive_in_order() {
        let mut task = TwoStageTask::spawn("test-two-stage", CancelToken::new(), |sink, _| {
            sink.first(Ok(1));
            sink.second(Ok(2));
        });
        assert_eq!(task.first_result(), Ok(1));
        assert_eq!(task.second_result(), Ok(2));
    }

    #[test]
    fn test_first_error_propagates_to_second() {
        let mut task: TwoStageTask<u32> =
            TwoStageTask::spawn("test-two-stage-err", CancelToken::new(), |sink, _| {
                sink.first(Err(FinalizeError::NoKeyframes));
            });
        assert_eq!(task.first_result(), Err(FinalizeError::NoKeyframes));
        assert_eq!(task.second_result(), Err(FinalizeError::NoKeyframes));
    }

    #[test]
    fn test_cancel_stops_worker() {
        let cancel = CancelToken::new();
        let mut task: TwoStageTask<u32> =
            TwoStageTask::spawn("test-two-stage-cancel", cancel.clone(), |sink, cancel| {
                sink.first(Ok(0));
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                sink.second(Err(FinalizeError::Cancelled));
            });
        assert_eq!(task.first_result(), Ok(0));
        task.cancel();
        assert_eq!(task.second_result(), Err(FinalizeError::Cancelled));
    }

    #[test]
    fn test_token_check() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.clone().cancel();
        assert_eq!(token.check(), Err(FinalizeError::Cancelled));
    }
}
