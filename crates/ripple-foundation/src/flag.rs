//! An awaitable boolean flag.

use tokio::sync::watch;

/// A set/clear flag that tasks can await.
///
/// Sessions use this for the refresh-required and client-connected events:
/// a mutation sets the flag, the refresh task awaits it, the collect step
/// clears it. Unlike a bare `Notify`, a flag that is already set resolves
/// waiters immediately, so a wake-up is never lost between `set` and `wait`.
#[derive(Debug)]
pub struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    /// Create a flag in the cleared state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag, waking all waiters.
    pub fn set(&self) {
        self.tx.send_if_modified(|v| {
            let changed = !*v;
            *v = true;
            changed
        });
    }

    /// Clear the flag.
    pub fn clear(&self) {
        self.tx.send_if_modified(|v| {
            let changed = *v;
            *v = false;
            changed
        });
    }

    /// Whether the flag is currently set.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for only fails when the sender is dropped, and `self` holds it.
        let _ = rx.wait_for(|v| *v).await;
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_before_wait_resolves_immediately() {
        let flag = Flag::new();
        flag.set();
        flag.wait().await;
        assert!(flag.is_set());
    }

    #[tokio::test]
    async fn wait_resolves_after_set() {
        let flag = std::rc::Rc::new(Flag::new());

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let waiter = {
                    let flag = flag.clone();
                    tokio::task::spawn_local(async move { flag.wait().await })
                };
                tokio::task::yield_now().await;
                flag.set();
                waiter.await.unwrap();
            })
            .await;
    }

    #[test]
    fn clear_resets() {
        let flag = Flag::new();
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }
}
