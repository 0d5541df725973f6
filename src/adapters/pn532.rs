//! PN532 NFC transceiver adapter — implements [`NfcTransport`] (§4.3) over
//! I2C.
//!
//! Grounded on `original_source/src/drivers/Pn532Driver.cpp`, which wraps
//! the Adafruit_PN532 Arduino library's `begin()` / `getFirmwareVersion()`
//! / `SAMConfig()` / `readPassiveTargetID()` calls. This adapter speaks the
//! same PN532 host-controller frame protocol directly over `embedded-hal`'s
//! `i2c::I2c` trait rather than depending on that library, following the
//! teacher's preference for thin adapters over a port trait
//! (`adapters/wifi.rs`, `adapters/mqtt.rs`) instead of vendoring a C driver.

use embedded_hal::i2c::I2c;

use crate::error::NfcFault;
use crate::nfc::NfcTransport;
use crate::uid::CardUid;

/// Default 7-bit I2C address of the PN532 (datasheet §6.2.2).
pub const PN532_I2C_ADDR: u8 = 0x24;

const PN532_PREAMBLE: u8 = 0x00;
const PN532_STARTCODE1: u8 = 0x00;
const PN532_STARTCODE2: u8 = 0xFF;
const PN532_POSTAMBLE: u8 = 0x00;
const PN532_HOSTTOPN532: u8 = 0xD4;
const PN532_PN532TOHOST: u8 = 0xD5;

const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
const CMD_POWER_DOWN: u8 = 0x16;

const MIFARE_ISO14443A: u8 = 0x00;

/// PN532 adapter over any `embedded-hal` 1.0 `I2c` bus.
///
/// The host-target simulation behind `cfg(not(target_os = "espidf"))`
/// never touches a bus at all — it is driven purely by the scripted
/// [`SimTransport`] used in `NfcReader`'s own tests, so this adapter is
/// `espidf`-only; host tests exercise `NfcReader` through a fake
/// `NfcTransport`, not through real I2C framing.
pub struct Pn532Adapter<I2C> {
    i2c: I2C,
    address: u8,
    low_power: bool,
}

impl<I2C> Pn532Adapter<I2C>
where
    I2C: I2c,
{
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: PN532_I2C_ADDR,
            low_power: false,
        }
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), NfcFault> {
        let mut frame = heapless::Vec::<u8, 32>::new();
        let len = (payload.len() + 1) as u8; // +1 for TFI byte
        let _ = frame.push(PN532_PREAMBLE);
        let _ = frame.push(PN532_STARTCODE1);
        let _ = frame.push(PN532_STARTCODE2);
        let _ = frame.push(len);
        let _ = frame.push((!len).wrapping_add(1)); // LCS
        let _ = frame.push(PN532_HOSTTOPN532);

        let mut checksum: u8 = PN532_HOSTTOPN532;
        for &b in payload {
            let _ = frame.push(b);
            checksum = checksum.wrapping_add(b);
        }
        let _ = frame.push((!checksum).wrapping_add(1)); // DCS
        let _ = frame.push(PN532_POSTAMBLE);

        self.i2c
            .write(self.address, &frame)
            .map_err(|_| NfcFault::CommunicationError)
    }

    /// Read an ACK frame followed by the command response, returning the
    /// response payload bytes after the TFI (`PN532_PN532TOHOST`) byte.
    fn read_response(&mut self, max_len: usize) -> Result<heapless::Vec<u8, 32>, NfcFault> {
        let mut ack = [0u8; 7];
        self.i2c
            .read(self.address, &mut ack)
            .map_err(|_| NfcFault::CommunicationTimeout)?;
        if ack[1..6] != [0x00, 0x00, 0xFF, 0x00, 0xFF] {
            return Err(NfcFault::InvalidResponse);
        }

        let mut buf = [0u8; 32];
        let want = (max_len + 8).min(buf.len());
        self.i2c
            .read(self.address, &mut buf[..want])
            .map_err(|_| NfcFault::CommunicationTimeout)?;

        // buf[0] is the I2C "ready" status byte on the real chip; frame
        // starts at buf[1]: PREAMBLE, 0x00, 0xFF, LEN, LCS, TFI, ... DCS, POSTAMBLE.
        if buf[1] != PN532_PREAMBLE || buf[3] != PN532_STARTCODE2 {
            return Err(NfcFault::InvalidResponse);
        }
        let len = buf[4] as usize;
        if len == 0 || buf[6] != PN532_PN532TOHOST {
            return Err(NfcFault::InvalidResponse);
        }
        let data_len = len - 1;
        let mut out = heapless::Vec::new();
        for &b in &buf[7..7 + data_len.min(buf.len() - 7)] {
            let _ = out.push(b);
        }
        Ok(out)
    }
}

impl<I2C> NfcTransport for Pn532Adapter<I2C>
where
    I2C: I2c,
{
    fn probe(&mut self) -> Result<(), NfcFault> {
        self.write_frame(&[CMD_GET_FIRMWARE_VERSION])?;
        let resp = self.read_response(4)?;
        if resp.is_empty() {
            return Err(NfcFault::HardwareNotFound);
        }
        // resp[0] is the IC identifier byte (0x32 for PN532); anything
        // else indicates we are talking to the wrong device.
        if resp[0] != 0x32 {
            return Err(NfcFault::HardwareNotFound);
        }
        self.write_frame(&[CMD_SAM_CONFIGURATION, 0x01, 0x14, 0x01])?;
        let _ = self.read_response(1)?;
        self.low_power = false;
        Ok(())
    }

    fn read_uid(&mut self, _timeout_ms: u32) -> Result<Option<CardUid>, NfcFault> {
        if self.low_power {
            return Err(NfcFault::CommunicationError);
        }
        self.write_frame(&[CMD_IN_LIST_PASSIVE_TARGET, 0x01, MIFARE_ISO14443A])?;
        let resp = self.read_response(18)?;
        // Layout: [NbTg, Tg, SENS_RES(2), SEL_RES, UIDLength, UID...]
        if resp.len() < 6 || resp[0] == 0 {
            return Ok(None);
        }
        let uid_len = resp[5] as usize;
        if uid_len == 0 || resp.len() < 6 + uid_len {
            return Err(NfcFault::InvalidResponse);
        }
        Ok(Some(CardUid::new(&resp[6..6 + uid_len])))
    }

    fn enter_low_power(&mut self) {
        let _ = self.write_frame(&[CMD_POWER_DOWN, 0x20]);
        self.low_power = true;
    }

    fn wake(&mut self) {
        // Any I2C transaction wakes the PN532 from power-down; a dummy
        // firmware-version probe both wakes it and re-validates presence.
        let _ = self.probe();
    }
}
