//! Bounded polling for a device that is re-enumerating.
//!
//! After a reset the TL866 drops off the bus and comes back at a new address
//! on the same hub port. These helpers poll a [`Discovery`] at a fixed
//! interval until a predicate matches or the deadline passes.

use std::{
    cell::Cell,
    collections::HashSet,
    thread,
    time::{Duration, Instant},
};

use log::{debug, trace};

use crate::{
    device::{BOOTLOADER_USB_IDS, DetectedDevice, Discovery, TransportKind, UsbLocation},
    error::{Error, Result},
};

/// Time source for polling loops.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only advances when slept on.
#[derive(Debug)]
pub struct SimulatedClock {
    base: Instant,
    offset: Cell<Duration>,
}

impl SimulatedClock {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Total simulated time slept so far.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

/// Polling interval and overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause between enumerations.
    pub interval: Duration,
    /// Give up after this long.
    pub deadline: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            deadline: Duration::from_secs(5),
        }
    }
}

/// Poll until `accept` returns `true` for some enumerated device.
///
/// The first enumeration happens after one interval, since a device that
/// was just told to reset is usually still on the bus. An error from
/// `accept` ends the wait immediately.
pub fn wait_for<D, C, F>(
    discovery: &D,
    clock: &C,
    policy: ReconnectPolicy,
    mut accept: F,
) -> Result<DetectedDevice>
where
    D: Discovery + ?Sized,
    C: Clock + ?Sized,
    F: FnMut(&DetectedDevice) -> Result<bool>,
{
    let start = clock.now();

    loop {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }

        clock.sleep(policy.interval);

        match discovery.list_all() {
            Ok(devices) => {
                for device in devices {
                    if accept(&device)? {
                        debug!("Device reappeared: {}", device.name);
                        return Ok(device);
                    }
                }
            },
            // Enumeration can fail transiently while the bus settles.
            Err(e) => trace!("Enumeration failed while waiting: {e}"),
        }

        if clock.now().duration_since(start) >= policy.deadline {
            return Err(Error::ReconnectTimeout(policy.deadline));
        }
    }
}

fn id_list(ids: &[(u16, u16)]) -> String {
    ids.iter()
        .map(|(vid, pid)| format!("{vid:04X}:{pid:04X}"))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Wait for `previous` to come back at the same hub port with a new address.
///
/// A device that appears there with a VID/PID outside `accepted` fails with
/// [`Error::WrongDeviceReconnected`].
pub fn reconnect<D, C>(
    discovery: &D,
    clock: &C,
    policy: ReconnectPolicy,
    previous: &DetectedDevice,
    accepted: &[(u16, u16)],
) -> Result<DetectedDevice>
where
    D: Discovery + ?Sized,
    C: Clock + ?Sized,
{
    let old = previous
        .location
        .as_ref()
        .ok_or_else(|| Error::Unsupported(format!("{} has no USB position", previous.name)))?;

    wait_for(discovery, clock, policy, |candidate| {
        let Some(loc) = candidate.location.as_ref() else {
            return Ok(false);
        };
        if !loc.same_position(old) || loc.address == old.address {
            return Ok(false);
        }
        match (candidate.vid, candidate.pid) {
            (Some(vid), Some(pid)) if accepted.contains(&(vid, pid)) => Ok(true),
            _ => Err(Error::WrongDeviceReconnected {
                expected: id_list(accepted),
                actual: candidate
                    .usb_id()
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    })
}

/// Snapshot of USB positions currently on the bus.
///
/// A failed enumeration is an error: an empty snapshot would make every
/// bootloader already on the bus look new.
pub fn usb_snapshot<D: Discovery + ?Sized>(discovery: &D) -> Result<HashSet<UsbLocation>> {
    Ok(discovery
        .list_all()?
        .into_iter()
        .filter_map(|d| d.location)
        .collect())
}

/// Wait for a TL866 USB device that was not present in `before`.
pub fn wait_for_new_bootloader<D, C>(
    discovery: &D,
    clock: &C,
    policy: ReconnectPolicy,
    before: &HashSet<UsbLocation>,
) -> Result<DetectedDevice>
where
    D: Discovery + ?Sized,
    C: Clock + ?Sized,
{
    wait_for(discovery, clock, policy, |candidate| {
        Ok(candidate.transport == TransportKind::Usb
            && candidate.is_tl866()
            && candidate
                .location
                .as_ref()
                .is_some_and(|loc| !before.contains(loc)))
    })
}

/// VID/PID pairs accepted after a bootloader reset.
pub fn bootloader_ids() -> &'static [(u16, u16)] {
    BOOTLOADER_USB_IDS
}
