//! Content transitions around a swap.

use async_trait::async_trait;
use std::time::Duration;
use xv_dom::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    SlideOut,
    SlideIn,
    /// Delayed reveal of the reload control.
    FadeIn,
}

/// Completion of `run` gates the next pipeline step.
#[async_trait]
pub trait Animator: Send + Sync {
    async fn run(&self, element: NodeId, transition: Transition);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedAnimator {
    pub slide: Duration,
    pub fade_delay: Duration,
}

impl Default for TimedAnimator {
    fn default() -> Self {
        Self {
            slide: Duration::from_millis(400),
            fade_delay: Duration::from_millis(600),
        }
    }
}

#[async_trait]
impl Animator for TimedAnimator {
    async fn run(&self, element: NodeId, transition: Transition) {
        let duration = match transition {
            Transition::SlideOut | Transition::SlideIn => self.slide,
            Transition::FadeIn => self.fade_delay,
        };
        tracing::trace!(element, ?transition, ms = duration.as_millis() as u64, "animate");
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstantAnimator;

#[async_trait]
impl Animator for InstantAnimator {
    async fn run(&self, _element: NodeId, _transition: Transition) {}
}

#[cfg(test)]
mod tests {
    use super::Animator;
    use super::InstantAnimator;
    use super::TimedAnimator;
    use super::Transition;
    use std::time::Duration;
    use std::time::Instant;

    #[tokio::test]
    async fn timed_animator_waits_per_transition() {
        let animator = TimedAnimator {
            slide: Duration::from_millis(20),
            fade_delay: Duration::from_millis(5),
        };
        let started = Instant::now();
        animator.run(1, Transition::SlideOut).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn instant_animator_returns_immediately() {
        let started = Instant::now();
        InstantAnimator.run(1, Transition::FadeIn).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
