//! One-shot read/write deadlines
//!
//! A deadline is an absolute instant. Setting a new one replaces the armed
//! timer, `None` disarms it. Operations race [`Deadline::expired`] against
//! their work; an instant in the past expires immediately.

use std::time::Instant;
use tokio::sync::watch;

pub(crate) struct Deadline {
    at: watch::Sender<Option<Instant>>,
}

impl Deadline {
    pub(crate) fn new() -> Self {
        let (at, _) = watch::channel(None);
        Self { at }
    }

    pub(crate) fn set(&self, at: Option<Instant>) {
        self.at.send_replace(at);
    }

    pub(crate) fn get(&self) -> Option<Instant> {
        *self.at.borrow()
    }

    pub(crate) fn is_expired(&self) -> bool {
        matches!(self.get(), Some(at) if at <= Instant::now())
    }

    /// Resolves when the armed deadline passes
    ///
    /// Follows changes made while waiting: a later deadline pushes the wakeup
    /// out, `None` parks until a new deadline is armed.
    pub(crate) async fn expired(&self) {
        let mut rx = self.at.subscribe();
        loop {
            let armed = *rx.borrow_and_update();
            match armed {
                Some(at) => {
                    let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(at));
                    tokio::select! {
                        _ = sleep => return,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                std::future::pending::<()>().await;
                            }
                        }
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_past_deadline_expires_immediately() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now()));
        assert!(deadline.is_expired());
        tokio::time::timeout(Duration::from_millis(50), deadline.expired())
            .await
            .expect("past deadline should expire at once");
    }

    #[tokio::test]
    async fn test_unset_deadline_never_expires() {
        let deadline = Deadline::new();
        assert!(!deadline.is_expired());
        let result = tokio::time::timeout(Duration::from_millis(50), deadline.expired()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clearing_disarms_timer() {
        let deadline = Arc::new(Deadline::new());
        deadline.set(Some(Instant::now() + Duration::from_millis(30)));

        let waiter = {
            let deadline = Arc::clone(&deadline);
            tokio::spawn(async move { deadline.expired().await })
        };
        deadline.set(None);

        let result = tokio::time::timeout(Duration::from_millis(100), waiter).await;
        assert!(result.is_err(), "cleared deadline must not fire");
    }

    #[tokio::test]
    async fn test_replacing_deadline_moves_wakeup() {
        let deadline = Arc::new(Deadline::new());
        deadline.set(Some(Instant::now() + Duration::from_secs(60)));

        let waiter = {
            let deadline = Arc::clone(&deadline);
            tokio::spawn(async move { deadline.expired().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        deadline.set(Some(Instant::now() + Duration::from_millis(10)));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("replaced deadline should fire")
            .unwrap();
    }
}
