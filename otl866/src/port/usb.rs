//! USB bulk transport using the `nusb` crate.
//!
//! The TL866 bootloader exposes interface 0 with a bulk OUT endpoint at
//! `0x01` and a bulk IN endpoint at `0x81`.

use {
    crate::{
        error::{Error, Result},
        port::Port,
    },
    log::{debug, trace},
    nusb::{
        Endpoint, MaybeFuture,
        transfer::{Buffer, Bulk, In, Out, TransferError},
    },
    std::{collections::VecDeque, time::Duration},
};

/// Interface claimed on the bootloader.
pub const INTERFACE: u8 = 0;
/// Bulk OUT endpoint address.
pub const EP_OUT: u8 = 0x01;
/// Bulk IN endpoint address.
pub const EP_IN: u8 = 0x81;

struct Endpoints {
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
}

/// Bulk endpoint pair on a claimed interface.
pub struct UsbPort {
    endpoints: Option<Endpoints>,
    name: String,
    // IN transfers are packet sized; bytes beyond the caller's buffer wait here.
    leftover: VecDeque<u8>,
}

impl UsbPort {
    /// Open the device and claim the bootloader interface.
    pub fn open(info: &nusb::DeviceInfo) -> Result<Self> {
        let name = location_string(info);
        debug!(
            "Opening USB device {:04X}:{:04X} at {name}",
            info.vendor_id(),
            info.product_id()
        );

        let device = info
            .open()
            .wait()
            .map_err(|e| Error::Usb(format!("open {name}: {e}")))?;
        let interface = device
            .claim_interface(INTERFACE)
            .wait()
            .map_err(|e| Error::Usb(format!("claim interface {INTERFACE}: {e}")))?;
        let out_ep = interface
            .endpoint::<Bulk, Out>(EP_OUT)
            .map_err(|e| Error::Usb(format!("endpoint {EP_OUT:#04x}: {e}")))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(EP_IN)
            .map_err(|e| Error::Usb(format!("endpoint {EP_IN:#04x}: {e}")))?;

        Ok(Self {
            endpoints: Some(Endpoints { out_ep, in_ep }),
            name,
            leftover: VecDeque::new(),
        })
    }

    fn endpoints(&mut self) -> Result<&mut Endpoints> {
        self.endpoints
            .as_mut()
            .ok_or(Error::Disconnected)
    }

    fn drain_leftover(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.leftover.len());
        for (dst, src) in buf.iter_mut().zip(self.leftover.drain(..n)) {
            *dst = src;
        }
        n
    }
}

/// Human-readable physical location, e.g. `usb 1-3.2 addr 7`.
pub fn location_string(info: &nusb::DeviceInfo) -> String {
    let ports = info
        .port_chain()
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(".");
    format!(
        "usb {}-{} addr {}",
        info.bus_id(),
        ports,
        info.device_address()
    )
}

fn map_transfer_error(e: TransferError, operation: &str, timeout: Duration) -> Error {
    match e {
        TransferError::Cancelled => Error::timeout(operation, timeout),
        TransferError::Disconnected => Error::Disconnected,
        other => Error::Usb(format!("{operation}: {other}")),
    }
}

impl Port for UsbPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.leftover.is_empty() {
            return Ok(self.drain_leftover(buf));
        }

        let in_ep = &mut self.endpoints()?.in_ep;
        let max_packet_size = in_ep.max_packet_size();
        // Request length must be a multiple of the max packet size
        let request_len = buf.len().max(1).div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let data = match in_ep
            .transfer_blocking(in_buf, timeout)
            .into_result()
        {
            Ok(data) => data,
            Err(TransferError::Cancelled) => return Ok(0),
            Err(e) => return Err(map_transfer_error(e, "bulk read", timeout)),
        };

        trace!("{} rx {:02X?}", self.name, &data[..]);
        self.leftover.extend(data.iter().copied());
        Ok(self.drain_leftover(buf))
    }

    fn write_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        trace!("{} tx {:02X?}", self.name, data);
        let out_ep = &mut self.endpoints()?.out_ep;
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);

        out_ep
            .transfer_blocking(buf, timeout)
            .into_result()
            .map_err(|e| map_transfer_error(e, "bulk write", timeout))?;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.leftover.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.endpoints.take();
        self.leftover.clear();
        Ok(())
    }
}
