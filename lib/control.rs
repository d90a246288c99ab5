//! Cooperative cancellation and progress reporting for long-running loops.
//!
//! Circuits and the sampling estimator check a [`Control`] once per gate or
//! once per sample; nothing is ever interrupted between those points.

use std::{
    fmt,
    sync::{ Arc, atomic::{ AtomicBool, Ordering } },
};
use crate::error::{ CircuitError, CircuitResult };

/// Shared flag used to request that a running loop stop.
///
/// Clones share the same flag, so one clone can be handed to whatever decides
/// to cancel (a signal handler, another thread) while another is polled.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    /// Request cancellation.
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    /// Return `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }

    /// Clear a previous request.
    pub fn reset(&self) { self.0.store(false, Ordering::SeqCst); }
}

/// Optional cancellation and progress hooks for a single call.
///
/// Progress is reported as a fraction in `[0, 1]`.
#[derive(Default)]
pub struct Control<'a> {
    cancel: Option<CancelToken>,
    progress: Option<&'a mut dyn FnMut(f64)>,
}

impl<'a> fmt::Debug for Control<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl<'a> Control<'a> {
    /// No cancellation and no progress reporting.
    pub fn none() -> Self { Self::default() }

    /// Poll `token` before each step.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Report progress to `f` before each step and once on completion.
    pub fn with_progress(mut self, f: &'a mut dyn FnMut(f64)) -> Self {
        self.progress = Some(f);
        self
    }

    /// Return [`CircuitError::UserAborted`] if cancellation was requested.
    pub fn poll(&self) -> CircuitResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(CircuitError::UserAborted),
            _ => Ok(()),
        }
    }

    /// Report a progress fraction, if anyone is listening.
    pub fn report(&mut self, frac: f64) {
        if let Some(f) = self.progress.as_mut() { f(frac); }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancelToken::new();
        let ctrl = Control::none().with_cancel(token.clone());
        assert!(ctrl.poll().is_ok());
        token.cancel();
        assert!(matches!(ctrl.poll(), Err(CircuitError::UserAborted)));
        token.reset();
        assert!(ctrl.poll().is_ok());
    }

    #[test]
    fn progress_is_forwarded() {
        let mut seen: Vec<f64> = Vec::new();
        let mut record = |x: f64| seen.push(x);
        let mut ctrl = Control::none().with_progress(&mut record);
        ctrl.report(0.0);
        ctrl.report(0.5);
        drop(ctrl);
        assert_eq!(seen, vec![0.0, 0.5]);
    }
}
