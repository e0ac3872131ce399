use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::info;

use mbx_fs::{FileSystem, OpenFlags};
use mbx_wire::{BoxSummary, MAX_BOX_NAME};

use crate::error::{BrokerError, BrokerResult};

/// Level-triggered wake state for one box, published through a watch
/// channel.
///
/// This stands in for a condition variable: `bytes_written` moves on every
/// publisher write and `removed` flips once on removal, so a waiter that
/// re-checks after `changed()` can never miss an update, and a single
/// update wakes every waiter (broadcast semantics).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoxSignal {
    /// Total bytes ever written into the box.
    pub bytes_written: u64,
    /// Set once the box has been removed from the registry.
    pub removed: bool,
}

#[derive(Debug, Default)]
struct BoxCounters {
    byte_count: u64,
    publishers: u64,
    subscribers: u64,
}

/// One registered delivery box, bound 1:1 to a backing file.
///
/// The counters mutex is only ever held to mutate counters, never across
/// blocking I/O or an `await`.
pub struct BoxState {
    name: String,
    file_path: String,
    counters: Mutex<BoxCounters>,
    signal: watch::Sender<BoxSignal>,
}

impl BoxState {
    fn new(name: String) -> Self {
        let file_path = format!("/{name}");
        let (signal, _) = watch::channel(BoxSignal::default());
        Self {
            name,
            file_path,
            counters: Mutex::new(BoxCounters::default()),
            signal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file inside the broker's volume.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Subscribe to this box's wake signal.
    pub fn watch(&self) -> watch::Receiver<BoxSignal> {
        self.signal.subscribe()
    }

    /// Account for `n` freshly written bytes and wake all waiters.
    pub(crate) fn record_write(&self, n: u64) {
        let total = {
            let mut counters = self.counters.lock().expect("lock poisoned");
            counters.byte_count += n;
            counters.byte_count
        };
        self.signal.send_modify(|s| s.bytes_written = total);
    }

    fn mark_removed(&self) {
        self.signal.send_modify(|s| s.removed = true);
    }

    /// Snapshot the box's counters.
    pub fn summary(&self) -> BoxSummary {
        let counters = self.counters.lock().expect("lock poisoned");
        BoxSummary {
            name: self.name.clone(),
            byte_count: counters.byte_count,
            publisher_count: counters.publishers,
            subscriber_count: counters.subscribers,
            last: false,
        }
    }
}

/// Releases the box's single publisher slot on drop.
pub struct PublisherGuard {
    state: Arc<BoxState>,
}

impl PublisherGuard {
    pub fn state(&self) -> &Arc<BoxState> {
        &self.state
    }
}

impl Drop for PublisherGuard {
    fn drop(&mut self) {
        self.state.counters.lock().expect("lock poisoned").publishers -= 1;
    }
}

/// Decrements the box's subscriber count on drop.
pub struct SubscriberGuard {
    state: Arc<BoxState>,
}

impl SubscriberGuard {
    pub fn state(&self) -> &Arc<BoxState> {
        &self.state
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.state.counters.lock().expect("lock poisoned").subscribers -= 1;
    }
}

/// Fixed array of named boxes behind one coarse lock.
///
/// Slot reuse requires the previous occupant to have been removed. The
/// registry owns the backing volume for its whole lifetime; boxes hold
/// their backing file by path, never by a stored handle.
pub struct BoxRegistry {
    fs: Arc<FileSystem>,
    slots: Mutex<Vec<Option<Arc<BoxState>>>>,
}

impl BoxRegistry {
    pub fn new(fs: Arc<FileSystem>, max_boxes: usize) -> Self {
        Self {
            fs,
            slots: Mutex::new((0..max_boxes).map(|_| None).collect()),
        }
    }

    /// The backing volume.
    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// Look a box up by name.
    pub fn find(&self, name: &str) -> Option<Arc<BoxState>> {
        self.slots
            .lock()
            .expect("lock poisoned")
            .iter()
            .flatten()
            .find(|state| state.name() == name)
            .cloned()
    }

    /// Register a box and create its backing file.
    pub fn create(&self, name: &str) -> BrokerResult<()> {
        validate_box_name(name)?;

        let mut slots = self.slots.lock().expect("lock poisoned");
        if slots.iter().flatten().any(|state| state.name() == name) {
            return Err(BrokerError::BoxExists(name.to_string()));
        }
        let free = slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(BrokerError::RegistryFull)?;

        let state = BoxState::new(name.to_string());
        let handle = self.fs.open(state.file_path(), OpenFlags::CREATE)?;
        self.fs.close(handle)?;

        slots[free] = Some(Arc::new(state));
        info!(box_name = name, slot = free, "box created");
        Ok(())
    }

    /// Remove a box: unlink its backing file, wake any blocked
    /// subscribers so they observe the removal, then free the slot.
    ///
    /// The unlink fails `FileBusy` while a session still holds the file
    /// open (a live publisher does); the slot then stays taken.
    pub fn remove(&self, name: &str) -> BrokerResult<()> {
        let mut slots = self.slots.lock().expect("lock poisoned");
        let (index, state) = slots
            .iter()
            .enumerate()
            .find_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|state| state.name() == name)
                    .map(|state| (index, Arc::clone(state)))
            })
            .ok_or_else(|| BrokerError::BoxNotFound(name.to_string()))?;

        self.fs.unlink(state.file_path())?;
        state.mark_removed();
        slots[index] = None;
        info!(box_name = name, "box removed");
        Ok(())
    }

    /// Snapshot every taken slot. The final summary carries the `last`
    /// marker. No ordering guarantee beyond reflecting the slots at the
    /// instant of the scan.
    pub fn list(&self) -> Vec<BoxSummary> {
        let slots = self.slots.lock().expect("lock poisoned");
        let mut summaries: Vec<BoxSummary> =
            slots.iter().flatten().map(|state| state.summary()).collect();
        if let Some(last) = summaries.last_mut() {
            last.last = true;
        }
        summaries
    }

    /// Attach as the box's sole publisher. At most one publisher is ever
    /// active per box; the returned guard releases the slot on drop.
    pub fn attach_publisher(&self, name: &str) -> BrokerResult<PublisherGuard> {
        let state = self
            .find(name)
            .ok_or_else(|| BrokerError::BoxNotFound(name.to_string()))?;
        {
            let mut counters = state.counters.lock().expect("lock poisoned");
            if counters.publishers >= 1 {
                return Err(BrokerError::PublisherPresent(name.to_string()));
            }
            counters.publishers += 1;
        }
        Ok(PublisherGuard { state })
    }

    /// Attach as one of the box's subscribers; the returned guard
    /// decrements the count on drop.
    pub fn attach_subscriber(&self, name: &str) -> BrokerResult<SubscriberGuard> {
        let state = self
            .find(name)
            .ok_or_else(|| BrokerError::BoxNotFound(name.to_string()))?;
        state.counters.lock().expect("lock poisoned").subscribers += 1;
        Ok(SubscriberGuard { state })
    }
}

fn validate_box_name(name: &str) -> BrokerResult<()> {
    if name.is_empty()
        || name.len() > MAX_BOX_NAME
        || name.bytes().any(|b| b == 0 || b == b'/')
    {
        return Err(BrokerError::InvalidBoxName(name.to_string()));
    }
    Ok(())
}
