// src/device.rs
//
// Process-wide device facade. The physical tag bridge is a singleton: the
// first acquire spawns the acquisition task, later acquires reuse it. The
// acquire-or-create path is lock-guarded so concurrent initializations
// cannot open the device twice.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::LinkConfig;
use crate::io::pozyx::run_acquisition;
use crate::io::transport::{SerialProvider, TransportProvider};
use crate::io::Position;
use crate::publisher::{CallbackHandle, PositionPublisher};

static LINK: Lazy<Mutex<Option<Arc<PozyxLink>>>> = Lazy::new(|| Mutex::new(None));

/// One running acquisition: the publisher, the shared cancel flag, and the
/// supervisory task handle.
struct PozyxLink {
    publisher: Arc<PositionPublisher>,
    cancel_flag: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PozyxLink {
    /// Spawn the supervisory task. Must be called from within a tokio
    /// runtime; all transport I/O stays on the spawned task's blocking
    /// sections.
    fn spawn(config: LinkConfig) -> Arc<PozyxLink> {
        let publisher = Arc::new(PositionPublisher::new());
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let provider: Arc<dyn TransportProvider> = Arc::new(SerialProvider::new(&config));

        let handle = tokio::spawn(run_acquisition(
            provider,
            publisher.clone(),
            config,
            cancel_flag.clone(),
        ));

        Arc::new(PozyxLink {
            publisher,
            cancel_flag,
            task: Mutex::new(Some(handle)),
        })
    }

    async fn stop(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Handle to the process-wide tag link.
///
/// Cheap to construct: acquiring opens the singleton link on first use and
/// reuses it afterwards. Configuration supplied after the link already
/// exists is ignored (first acquisition wins).
pub struct PozyxDevice {
    link: Arc<PozyxLink>,
}

impl PozyxDevice {
    /// Acquire the device with the default link configuration.
    pub fn acquire() -> PozyxDevice {
        PozyxDevice::acquire_with(LinkConfig::default())
    }

    /// Acquire the device, supplying the configuration used if this call
    /// creates the link.
    pub fn acquire_with(config: LinkConfig) -> PozyxDevice {
        let mut guard = match LINK.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let link = match guard.as_ref() {
            Some(link) => link.clone(),
            None => {
                let link = PozyxLink::spawn(config);
                *guard = Some(link.clone());
                link
            }
        };
        PozyxDevice { link }
    }

    /// Last known decoded position, or None if nothing has been received.
    pub fn current_position(&self) -> Option<Position> {
        self.link.publisher.current_position()
    }

    /// Register for notification on each newly decoded position.
    pub fn on_position_changed(
        &self,
        callback: impl Fn(Position) + Send + Sync + 'static,
    ) -> CallbackHandle {
        self.link.publisher.subscribe(callback)
    }

    /// Remove a registration made with [`on_position_changed`].
    ///
    /// [`on_position_changed`]: PozyxDevice::on_position_changed
    pub fn unsubscribe(&self, handle: CallbackHandle) -> bool {
        self.link.publisher.unsubscribe(handle)
    }
}

/// Cancel the acquisition task, wait for it to finish, and clear the
/// singleton so a later acquire starts fresh. Normal operation never needs
/// this - teardown at process exit is fine - but tests and controlled
/// shutdowns do.
pub async fn shutdown() {
    let link = {
        let mut guard = match LINK.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take()
    };
    if let Some(link) = link {
        link.stop().await;
    }
}
