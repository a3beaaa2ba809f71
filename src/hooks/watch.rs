// Watched values of watcher hooks

use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;

use super::binding::BindingInner;

/// Externally owned value a watcher re-sends on
#[async_trait]
pub trait WatchSource: Send {
    /// Wait for the next change; false once the source is closed
    async fn changed(&mut self) -> bool;
}

#[async_trait]
impl<T: Send + Sync> WatchSource for watch::Receiver<T> {
    async fn changed(&mut self) -> bool {
        watch::Receiver::changed(self).await.is_ok()
    }
}

/// Re-invoke `binding` on every change of `source`
///
/// With a non-zero `delay`, changes are debounced: the invocation runs once
/// the source has been quiet for `delay`. Each invocation is spawned so a
/// newer one can overlap (and supersede) an older one.
pub(crate) async fn watch_source(
    binding: Weak<BindingInner>,
    mut source: Box<dyn WatchSource>,
    delay: Duration,
) {
    while source.changed().await {
        if !delay.is_zero() {
            loop {
                tokio::select! {
                    changed = source.changed() => {
                        if !changed {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => break,
                }
            }
        }

        let Some(binding) = binding.upgrade() else {
            return;
        };
        if binding.is_unmounted() {
            return;
        }
        binding.spawn_invocation();
    }
}
