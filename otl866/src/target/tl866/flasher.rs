//! Mode orchestration for TL866A/CS programmers.
//!
//! Moves a device between application and bootloader mode and runs the
//! firmware update sequence:
//!
//! ```text
//!  serial (app) --'b'--> usb (bootloader)
//!  usb (app)    --Reset--> reconnect --> usb (bootloader)
//!  usb (bootloader) --Report--> Erase --> Write x N --> Report == normal
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use otl866::{
//!     NativeDiscovery, Tl866Flasher,
//!     device::{DeviceFilter, Discovery, TransportKind},
//!     image::PreparedImage,
//!     protocol::bootloader::EraseKey,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let discovery = NativeDiscovery;
//!     let device = discovery.find_one(&DeviceFilter::tl866(TransportKind::Usb))?;
//!     let image = PreparedImage::from_file("firmware.enc", EraseKey(0x10))?;
//!
//!     let flasher = Tl866Flasher::new(discovery);
//!     println!("{}", flasher.identify(&device)?);
//!     flasher.update(&device, &image, &mut |stage, done, total| {
//!         println!("{stage}: {done}/{total}");
//!     })?;
//!     Ok(())
//! }
//! ```

use {
    crate::{
        device::{
            DetectedDevice, Discovery, Mode, TransportKind,
            reconnect::{
                Clock, ReconnectPolicy, SystemClock, bootloader_ids, reconnect, usb_snapshot,
                wait_for_new_bootloader,
            },
        },
        error::{Error, Recovery, Result, UpdateStage},
        image::{FirmwareImage, FirmwareSource},
        port::Port,
        protocol::{
            ascii::{ANY_APP, AsciiClient, AsciiConfig},
            bootloader::{BootloaderClient, check_image},
            report::{DeviceStatus, Report, Status},
        },
        target::layout::FlashLayout,
    },
    log::{debug, info, warn},
};

/// Settings for [`Tl866Flasher`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Refuse writes outside the application region.
    pub safe: bool,
    /// Flash layout and chunking.
    pub layout: FlashLayout,
    /// Re-enumeration polling.
    pub reconnect: ReconnectPolicy,
    /// ASCII session settings for the serial reset path.
    pub ascii: AsciiConfig,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            safe: true,
            layout: FlashLayout::default(),
            reconnect: ReconnectPolicy::default(),
            ascii: AsciiConfig::default(),
        }
    }
}

type Session = BootloaderClient<Box<dyn Port>>;

/// Progress callback: stage, steps done, steps total.
pub type Progress<'a> = &'a mut dyn FnMut(UpdateStage, usize, usize);

/// Orchestrates identify, mode switches and firmware updates.
pub struct Tl866Flasher<D: Discovery, C: Clock = SystemClock> {
    discovery: D,
    clock: C,
    options: UpdateOptions,
    accepted_ids: Vec<(u16, u16)>,
}

impl<D: Discovery> Tl866Flasher<D, SystemClock> {
    /// Create a flasher using wall-clock time.
    pub fn new(discovery: D) -> Self {
        Self {
            discovery,
            clock: SystemClock,
            options: UpdateOptions::default(),
            accepted_ids: bootloader_ids().to_vec(),
        }
    }
}

impl<D: Discovery, C: Clock> Tl866Flasher<D, C> {
    /// Swap the time source.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Tl866Flasher<D, C2> {
        Tl866Flasher {
            discovery: self.discovery,
            clock,
            options: self.options,
            accepted_ids: self.accepted_ids,
        }
    }

    /// Replace all options.
    #[must_use]
    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Enable or disable safe-mode write checks.
    #[must_use]
    pub fn with_safe(mut self, safe: bool) -> Self {
        self.options.safe = safe;
        self
    }

    /// Use a different flash layout.
    #[must_use]
    pub fn with_layout(mut self, layout: FlashLayout) -> Self {
        self.options.layout = layout;
        self
    }

    /// VID/PID pairs accepted when the device re-enumerates after a reset.
    #[must_use]
    pub fn with_accepted_ids(mut self, ids: &[(u16, u16)]) -> Self {
        self.accepted_ids = ids.to_vec();
        self
    }

    /// Current options.
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Get a reference to the discovery backend.
    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    fn open_session(&self, device: &DetectedDevice) -> Result<Session> {
        let port = self.discovery.open(device)?;
        Ok(BootloaderClient::new(port)
            .with_layout(self.options.layout)
            .with_safe(self.options.safe))
    }

    /// Query the raw report of a device reachable over USB.
    pub fn report(&self, device: &DetectedDevice) -> Result<Report> {
        self.open_session(device)?
            .report()
    }

    /// Identify the device and its running firmware.
    pub fn identify(&self, device: &DetectedDevice) -> Result<DeviceStatus> {
        Ok(self
            .report(device)?
            .device_status())
    }

    /// Ask an application on the serial port to reboot into the bootloader
    /// and wait for the bootloader to enumerate.
    pub fn reset_to_bootloader(&self, device: &DetectedDevice) -> Result<DetectedDevice> {
        if device.transport != TransportKind::Serial {
            return Err(Error::Unsupported(format!(
                "{} is not an ASCII (serial) endpoint",
                device.name
            )));
        }

        // The application's own vendor interface carries the same IDs as the
        // bootloader, so only a position that was not there before counts.
        let before = usb_snapshot(&self.discovery)?;

        info!("Resetting {} to bootloader via serial", device.name);
        let port = self.discovery.open(device)?;
        let mut client = AsciiClient::open_with(port, Some(ANY_APP), self.options.ascii.clone())?;
        debug!("Running application: {}", client.app());
        client.bootloader()?;
        client.close()?;

        let mut found =
            wait_for_new_bootloader(&self.discovery, &self.clock, self.options.reconnect, &before)
                .map_err(|e| Error::BootloaderNotReached(Box::new(e)))?;
        info!("Bootloader appeared at {}", found.name);
        found.mode = Mode::Bootloader;
        Ok(found)
    }

    /// Get a confirmed bootloader session, resetting the device if needed.
    fn enter_bootloader(
        &self,
        device: &DetectedDevice,
        progress: Progress<'_>,
    ) -> Result<(Session, Report)> {
        let mut device = if device.transport == TransportKind::Serial {
            self.reset_to_bootloader(device)?
        } else {
            device.clone()
        };

        let mut session = self.open_session(&device)?;
        let mut report = session.report()?;

        if !report.is_bootloader() {
            info!("Device reports status {}; resetting to bootloader", report.status);
            session.reset()?;
            device = reconnect(
                &self.discovery,
                &self.clock,
                self.options.reconnect,
                &device,
                &self.accepted_ids,
            )?;
            session = self.open_session(&device)?;
            report = session.report()?;
            if !report.is_bootloader() {
                return Err(Error::ResetVerificationFailed(report.status.to_string()));
            }
        }

        info!("{} bootloader ready on {}", report.model, device.name);
        progress(UpdateStage::EnterBootloader, 1, 1);
        Ok((session, report))
    }

    /// Flash a firmware image.
    ///
    /// Returns the final report, which shows the device back in normal
    /// mode. Nothing is retried; a failure once the erase has started is
    /// followed by a single best-effort reset and reported as
    /// [`Error::UpdateFailed`].
    pub fn update(
        &self,
        device: &DetectedDevice,
        source: &dyn FirmwareSource,
        progress: Progress<'_>,
    ) -> Result<Report> {
        let (mut session, report) = self.enter_bootloader(device, progress)?;

        let image = source.load(report.model)?;
        if !image.valid {
            return Err(Error::InvalidImage(format!(
                "image source rejected the payload for {}",
                report.model
            )));
        }
        check_image(&self.options.layout, self.options.safe, image.payload.len())?;
        progress(UpdateStage::LoadImage, 1, 1);

        // Last point at which stopping leaves the device untouched.
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }

        if let Err((stage, e)) = self.flash(&mut session, &image, progress) {
            return Err(Self::recover(session, stage, e));
        }

        let report = match session.report() {
            Ok(report) => report,
            Err(e) => return Err(Self::recover(session, UpdateStage::Verify, e)),
        };
        progress(UpdateStage::Verify, 1, 1);

        if report.status == Status::Normal {
            info!("Update complete");
            Ok(report)
        } else {
            let e = Error::VerifyFailed(report.status.to_string());
            Err(Self::recover(session, UpdateStage::Verify, e))
        }
    }

    fn flash(
        &self,
        session: &mut Session,
        image: &FirmwareImage,
        progress: Progress<'_>,
    ) -> std::result::Result<(), (UpdateStage, Error)> {
        let layout = &self.options.layout;

        progress(UpdateStage::Erase, 0, 1);
        session
            .erase(image.erase_key)
            .map_err(|e| (UpdateStage::Erase, e))?;
        progress(UpdateStage::Erase, 1, 1);

        let total = layout.chunk_count(image.payload.len());
        info!(
            "Programming {} bytes in {total} chunks from {:#x}",
            image.payload.len(),
            layout.base_address
        );
        for (i, chunk) in image
            .payload
            .chunks(layout.chunk_size)
            .enumerate()
        {
            session
                .write(layout.chunk_address(i), chunk)
                .map_err(|e| (UpdateStage::Write, e))?;
            progress(UpdateStage::Write, i + 1, total);
        }
        Ok(())
    }

    fn recover(session: Session, stage: UpdateStage, error: Error) -> Error {
        warn!("Update failed during {stage}: {error}; resetting device");
        let recovery = match session.reset() {
            Ok(()) => Recovery::ResetSent,
            Err(e) => Recovery::ResetFailed(e.to_string()),
        };
        Error::UpdateFailed {
            stage,
            source: Box::new(error),
            recovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{AE_USB_ID, OPEN_USB_ID, testing::*},
        device::reconnect::SimulatedClock,
        image::{PreparedImage, WriteKey},
        port::mock::{MockPort, Reply, banner},
        protocol::{bootloader::EraseKey, report::Model},
    };

    fn report_bytes(status: u8, len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; 44];
        raw[1] = status;
        raw[4] = 2;
        raw[5] = 3;
        raw[6] = 1;
        raw.truncate(len);
        raw
    }

    fn erase_ack() -> Vec<u8> {
        let mut raw = vec![0u8; 32];
        raw[0] = 0xCC;
        raw
    }

    /// Port scripted for a full bootloader session over `chunks` writes.
    fn bootloader_port(chunks: usize, final_status: u8) -> MockPort {
        let mut port = MockPort::new()
            .reply(report_bytes(2, 39))
            .reply(erase_ack());
        for _ in 0..chunks {
            port = port.push(Reply::Silence);
        }
        port.reply(report_bytes(final_status, 40))
    }

    fn write_frames(port: &MockPort) -> Vec<Vec<u8>> {
        port.writes()
            .into_iter()
            .filter(|w| w[0] == 0xAA)
            .collect()
    }

    fn no_progress() -> impl FnMut(UpdateStage, usize, usize) {
        |_, _, _| {}
    }

    #[test]
    fn test_update_writes_chunks_at_stride() {
        let device = usb(4, OPEN_USB_ID);
        let port = bootloader_port(3, 1);
        let discovery = FakeDiscovery::new()
            .snapshot(vec![device.clone()])
            .port(&device.name, port.clone());
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        // Two full chunks and a short tail.
        let image = PreparedImage::from_bytes(vec![0x5A; 200], EraseKey(7));
        let source = |_: Model| -> Result<FirmwareImage> {
            let mut img = image.load(Model::Tl866A)?;
            img.valid = true;
            Ok(img)
        };

        let mut stages = Vec::new();
        let report = flasher
            .update(&device, &source, &mut |stage, done, total| {
                stages.push((stage, done, total));
            })
            .unwrap();
        assert_eq!(report.status, Status::Normal);

        let writes = write_frames(&port);
        assert_eq!(writes.len(), 3);
        let addresses: Vec<u32> = writes
            .iter()
            .map(|w| u32::from_le_bytes([w[4], w[5], w[6], 0]))
            .collect();
        assert_eq!(addresses, vec![0x1800, 0x1840, 0x1880]);
        let lengths: Vec<u16> = writes
            .iter()
            .map(|w| u16::from_le_bytes([w[2], w[3]]))
            .collect();
        assert_eq!(lengths, vec![80, 80, 40]);

        let erase = &port.writes()[1];
        assert_eq!(erase[0], 0xCC);
        assert_eq!(erase[7], 7);

        assert!(stages.contains(&(UpdateStage::Write, 3, 3)));
        assert_eq!(stages.last(), Some(&(UpdateStage::Verify, 1, 1)));
    }

    #[test]
    fn test_update_honors_custom_base() {
        let device = usb(4, AE_USB_ID);
        let port = bootloader_port(2, 1);
        let discovery = FakeDiscovery::new().port(&device.name, port.clone());
        let flasher = Tl866Flasher::new(discovery)
            .with_clock(SimulatedClock::new())
            .with_layout(FlashLayout::default().with_base_address(0x2000));

        let image = PreparedImage::from_bytes(vec![0; 160], EraseKey(1));
        flasher
            .update(&device, &image, &mut no_progress())
            .unwrap();

        let writes = write_frames(&port);
        assert_eq!(&writes[0][4..7], &[0x00, 0x20, 0x00]);
        assert_eq!(&writes[1][4..7], &[0x40, 0x20, 0x00]);
    }

    #[test]
    fn test_update_resets_app_firmware_first() {
        let app = usb(4, AE_USB_ID);
        let boot = usb(5, OPEN_USB_ID);
        let app_port = MockPort::new().reply(report_bytes(1, 40));
        let boot_port = bootloader_port(1, 1);
        let discovery = FakeDiscovery::new()
            .snapshot(vec![])
            .snapshot(vec![boot.clone()])
            .port(&app.name, app_port.clone())
            .port(&boot.name, boot_port.clone());
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let image = PreparedImage::from_bytes(vec![0; 80], EraseKey(1));
        flasher
            .update(&app, &image, &mut no_progress())
            .unwrap();

        assert_eq!(app_port.writes()[1], vec![0xFF, 0, 0, 0]);
        assert!(app_port.is_closed());
        assert_eq!(write_frames(&boot_port).len(), 1);
    }

    #[test]
    fn test_update_fails_when_reset_does_not_stick() {
        let app = usb(4, AE_USB_ID);
        let again = usb(5, AE_USB_ID);
        let discovery = FakeDiscovery::new()
            .snapshot(vec![again.clone()])
            .port(&app.name, MockPort::new().reply(report_bytes(1, 40)))
            .port(&again.name, MockPort::new().reply(report_bytes(1, 40)));
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let image = PreparedImage::from_bytes(vec![0; 80], EraseKey(1));
        let err = flasher
            .update(&app, &image, &mut no_progress())
            .unwrap_err();
        assert!(matches!(err, Error::ResetVerificationFailed(s) if s == "normal"));
    }

    #[test]
    fn test_update_via_serial_reset() {
        let tty = serial("/dev/ttyACM0");
        let app_iface = usb(4, AE_USB_ID);
        let boot = usb(6, AE_USB_ID);
        let tty_port = MockPort::new().reply(banner("bitbang"));
        let discovery = FakeDiscovery::new()
            .snapshot(vec![tty.clone(), app_iface.clone()])
            .snapshot(vec![app_iface.clone()])
            .snapshot(vec![boot.clone()])
            .port(&tty.name, tty_port.clone())
            .port(&boot.name, bootloader_port(1, 1));
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let image = PreparedImage::from_bytes(vec![0; 80], EraseKey(1));
        flasher
            .update(&tty, &image, &mut no_progress())
            .unwrap();

        assert_eq!(tty_port.writes(), vec![b"? \n".to_vec(), b"b \n".to_vec()]);
        assert!(tty_port.is_closed());
    }

    #[test]
    fn test_reset_to_bootloader_times_out() {
        let tty = serial("/dev/ttyACM0");
        let app_iface = usb(4, AE_USB_ID);
        let discovery = FakeDiscovery::new()
            .snapshot(vec![tty.clone(), app_iface])
            .port(&tty.name, MockPort::new().reply(banner("at89")));
        let clock = SimulatedClock::new();
        let flasher = Tl866Flasher::new(discovery).with_clock(clock);

        let err = flasher
            .reset_to_bootloader(&tty)
            .unwrap_err();
        match err {
            Error::BootloaderNotReached(inner) => {
                assert!(matches!(*inner, Error::ReconnectTimeout(_)));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reset_to_bootloader_needs_a_baseline() {
        let tty = serial("/dev/ttyACM0");
        let boot = usb(6, AE_USB_ID);
        let tty_port = MockPort::new().reply(banner("bitbang"));
        // Had the failed listing been taken as empty, the bootloader already
        // on the bus would look new.
        let discovery = FakeDiscovery::new()
            .fail_next()
            .snapshot(vec![boot])
            .port(&tty.name, tty_port.clone());
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let err = flasher
            .reset_to_bootloader(&tty)
            .unwrap_err();
        assert!(matches!(err, Error::Usb(_)));
        assert!(tty_port.writes().is_empty());
    }

    #[test]
    fn test_invalid_image_stops_before_erase() {
        let device = usb(4, AE_USB_ID);
        let port = MockPort::new().reply(report_bytes(2, 39));
        let discovery = FakeDiscovery::new().port(&device.name, port.clone());
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let image = PreparedImage::from_bytes(vec![0; 79], EraseKey(1));
        let err = flasher
            .update(&device, &image, &mut no_progress())
            .unwrap_err();

        assert!(matches!(err, Error::InvalidImage(_)));
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn test_write_into_bootloader_refused_before_erase() {
        let device = usb(4, AE_USB_ID);
        let port = bootloader_port(2, 1);
        let discovery = FakeDiscovery::new().port(&device.name, port.clone());
        let flasher = Tl866Flasher::new(discovery)
            .with_clock(SimulatedClock::new())
            .with_layout(FlashLayout::default().with_base_address(0x0100));

        let image = PreparedImage::from_bytes(vec![0; 160], EraseKey(1));
        let err = flasher
            .update(&device, &image, &mut no_progress())
            .unwrap_err();

        assert!(matches!(err, Error::SafetyViolation(_)));
        // Only the initial report went out: no erase, no write, no reset.
        assert_eq!(port.writes(), vec![vec![0x00, 0, 0, 0, 0]]);
    }

    #[test]
    fn test_write_past_flash_refused_before_erase() {
        let device = usb(4, AE_USB_ID);
        let port = bootloader_port(2, 1);
        let discovery = FakeDiscovery::new().port(&device.name, port.clone());
        let options = UpdateOptions {
            safe: false,
            layout: FlashLayout::default().with_base_address(0x1FFC0),
            ..UpdateOptions::default()
        };
        let flasher = Tl866Flasher::new(discovery)
            .with_clock(SimulatedClock::new())
            .with_options(options);

        // The second chunk would start at 0x20000.
        let image = PreparedImage::from_bytes(vec![0; 160], EraseKey(1));
        let source = |_: Model| -> Result<FirmwareImage> {
            let mut img = image.load(Model::Tl866A)?;
            img.valid = true;
            Ok(img)
        };
        let err = flasher
            .update(&device, &source, &mut no_progress())
            .unwrap_err();

        assert!(matches!(err, Error::SafetyViolation(_)));
        assert!(
            port.writes()
                .iter()
                .all(|w| w[0] != 0xCC && w[0] != 0xAA)
        );
    }

    #[test]
    fn test_write_failure_resets_once() {
        let device = usb(4, AE_USB_ID);
        let port = MockPort::new()
            .reply(report_bytes(2, 39))
            .reply(erase_ack())
            .push(Reply::Disconnect);
        let discovery = FakeDiscovery::new().port(&device.name, port.clone());
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let image = PreparedImage::from_bytes(vec![0; 240], EraseKey(1));
        let err = flasher
            .update(&device, &image, &mut no_progress())
            .unwrap_err();

        match err {
            Error::UpdateFailed {
                stage,
                source,
                recovery,
            } => {
                assert_eq!(stage, UpdateStage::Write);
                assert!(source.is_disconnect());
                assert!(matches!(recovery, Recovery::ResetFailed(_)));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        // report, erase, first write; the second write hit the disconnect.
        assert_eq!(port.writes().len(), 3);
    }

    #[test]
    fn test_bad_final_status_resets_device() {
        let device = usb(4, AE_USB_ID);
        let port = bootloader_port(1, 2);
        let discovery = FakeDiscovery::new().port(&device.name, port.clone());
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let image = PreparedImage::from_bytes(vec![0; 80], EraseKey(1));
        let err = flasher
            .update(&device, &image, &mut no_progress())
            .unwrap_err();

        match err {
            Error::UpdateFailed {
                stage,
                source,
                recovery,
            } => {
                assert_eq!(stage, UpdateStage::Verify);
                assert!(matches!(*source, Error::VerifyFailed(_)));
                assert_eq!(recovery, Recovery::ResetSent);
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(port.writes().last().unwrap(), &vec![0xFF, 0, 0, 0]);
    }

    #[test]
    fn test_identify_renders_status() {
        let device = usb(4, AE_USB_ID);
        let mut raw = report_bytes(1, 44);
        raw[39] = 255;
        let discovery = FakeDiscovery::new().port(&device.name, MockPort::new().reply(raw));
        let flasher = Tl866Flasher::new(discovery);

        let status = flasher.identify(&device).unwrap();
        assert_eq!(status.headline(), "TL866A Open Firmware v3.2");
    }

    #[test]
    fn test_closure_source_gets_detected_model() {
        let device = usb(4, AE_USB_ID);
        let discovery = FakeDiscovery::new().port(&device.name, bootloader_port(1, 1));
        let flasher = Tl866Flasher::new(discovery).with_clock(SimulatedClock::new());

        let source = |model: Model| -> Result<FirmwareImage> {
            assert_eq!(model, Model::Tl866A);
            Ok(FirmwareImage {
                valid: true,
                payload: vec![0; 80],
                write_key: WriteKey::default(),
                erase_key: EraseKey(2),
            })
        };
        flasher
            .update(&device, &source, &mut no_progress())
            .unwrap();
    }
}
