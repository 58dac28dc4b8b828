//! Blocking request/response wrapper over an overlay connection.
//!
//! The stabilizer drives the maintenance protocol through this client: one
//! frame out, one matching frame back. Responses are matched on the
//! (command, qualifier, sequence) triple; stale frames on the stream are
//! skipped.

use ringhub_codec::commands::*;
use ringhub_codec::{Frame, FrameError, Header, OverlayMetrics, Sequencer, HEADER_SIZE};
use ringhub_core::HubError;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub struct OverlayClient {
    stream: UnixStream,
    source: u64,
    session: u8,
    sequencer: Sequencer,
}

fn codec_err(e: FrameError) -> HubError {
    HubError::Protocol(e.to_string())
}

impl OverlayClient {
    pub fn new(stream: UnixStream, source: u64) -> Self {
        Self {
            stream,
            source,
            session: 0,
            sequencer: Sequencer::new(),
        }
    }

    /// Bounds every protocol round trip.
    pub fn set_timeout(&mut self, ms: u64) -> Result<(), HubError> {
        let timeout = Some(Duration::from_millis(ms));
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    fn transact(
        &mut self,
        host: u64,
        command: u8,
        qualifier: u8,
        payload: &[u8],
    ) -> Result<Frame, HubError> {
        let sequence = self.sequencer.next();
        let mut frame = Frame::new();
        frame.set_address(self.source, host);
        frame.set_control((HEADER_SIZE + payload.len()) as u16, sequence, self.session);
        frame.set_context(command, qualifier, AQLF_REQUEST);
        if !frame.set_payload(payload) {
            return Err(HubError::Protocol("oversized request payload".into()));
        }
        self.stream.write_all(frame.wire())?;

        loop {
            let mut wire = vec![0u8; HEADER_SIZE];
            self.stream.read_exact(&mut wire)?;
            let header = Header::parse(&wire).map_err(codec_err)?;
            wire.resize(header.length as usize, 0);
            self.stream.read_exact(&mut wire[HEADER_SIZE..])?;
            let response = Frame::from_wire(&wire).map_err(codec_err)?;
            let rh = *response.header();
            if rh.sequence != sequence || rh.command != command || rh.qualifier != qualifier {
                // Stale or unrelated frame on the loopback stream.
                continue;
            }
            if rh.aqlf != AQLF_RESPONSE {
                return Err(HubError::Protocol("request rejected".into()));
            }
            return Ok(response);
        }
    }

    pub fn ping(&mut self, host: u64) -> Result<(), HubError> {
        self.transact(host, CMD_OVERLAY, QLF_PING, &[]).map(|_| ())
    }

    pub fn describe(&mut self, host: u64) -> Result<OverlayMetrics, HubError> {
        let response = self.transact(host, CMD_NULL, QLF_DESCRIBE, &[])?;
        OverlayMetrics::unpack(response.payload())
            .ok_or_else(|| HubError::Protocol("malformed describe response".into()))
    }

    pub fn get_predecessor(&mut self, host: u64) -> Result<u64, HubError> {
        let response = self.transact(host, CMD_NODE, QLF_GET_PREDECESSOR, &[])?;
        read_u64(response.payload())
    }

    pub fn set_predecessor(&mut self, host: u64, key: u64) -> Result<(), HubError> {
        let response = self.transact(host, CMD_NODE, QLF_SET_PREDECESSOR, &key.to_be_bytes())?;
        expect_echo(response.payload(), key)
    }

    pub fn get_successor(&mut self, host: u64) -> Result<u64, HubError> {
        let response = self.transact(host, CMD_NODE, QLF_GET_SUCCESSOR, &[])?;
        read_u64(response.payload())
    }

    pub fn set_successor(&mut self, host: u64, key: u64) -> Result<(), HubError> {
        let response = self.transact(host, CMD_NODE, QLF_SET_SUCCESSOR, &key.to_be_bytes())?;
        expect_echo(response.payload(), key)
    }

    pub fn get_finger(&mut self, host: u64, index: u32) -> Result<u64, HubError> {
        let response = self.transact(host, CMD_NODE, QLF_GET_FINGER, &index.to_be_bytes())?;
        let payload = response.payload();
        if payload.len() != 12 {
            return Err(HubError::Protocol("bad finger response".into()));
        }
        let echoed = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        if echoed != index {
            return Err(HubError::Protocol("finger index mismatch".into()));
        }
        Ok(u64::from_be_bytes(payload[4..12].try_into().unwrap()))
    }

    pub fn set_finger(&mut self, host: u64, index: u32, key: u64) -> Result<(), HubError> {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&index.to_be_bytes());
        payload[4..12].copy_from_slice(&key.to_be_bytes());
        let response = self.transact(host, CMD_NODE, QLF_SET_FINGER, &payload)?;
        if response.payload() != payload {
            return Err(HubError::Protocol("finger update not applied".into()));
        }
        Ok(())
    }

    pub fn get_neighbours(&mut self, host: u64) -> Result<(u64, u64), HubError> {
        let response = self.transact(host, CMD_NODE, QLF_GET_NEIGHBOURS, &[])?;
        let payload = response.payload();
        if payload.len() != 16 {
            return Err(HubError::Protocol("bad neighbours response".into()));
        }
        Ok((
            u64::from_be_bytes(payload[0..8].try_into().unwrap()),
            u64::from_be_bytes(payload[8..16].try_into().unwrap()),
        ))
    }

    pub fn notify(&mut self, host: u64, predecessor: u64) -> Result<(), HubError> {
        let response = self.transact(host, CMD_NODE, QLF_NOTIFY, &predecessor.to_be_bytes())?;
        if response.payload_length() != 0 {
            return Err(HubError::Protocol("bad notify response".into()));
        }
        Ok(())
    }

    pub fn find_successor(&mut self, host: u64, key: u64) -> Result<u64, HubError> {
        let response = self.transact(host, CMD_OVERLAY, QLF_FIND_SUCCESSOR, &key.to_be_bytes())?;
        let payload = response.payload();
        if payload.len() != 16 {
            return Err(HubError::Protocol("bad lookup response".into()));
        }
        let echoed = u64::from_be_bytes(payload[0..8].try_into().unwrap());
        if echoed != key {
            return Err(HubError::Protocol("lookup key mismatch".into()));
        }
        Ok(u64::from_be_bytes(payload[8..16].try_into().unwrap()))
    }
}

fn read_u64(payload: &[u8]) -> Result<u64, HubError> {
    if payload.len() != 8 {
        return Err(HubError::Protocol("expected one identifier".into()));
    }
    Ok(u64::from_be_bytes(payload.try_into().unwrap()))
}

fn expect_echo(payload: &[u8], key: u64) -> Result<(), HubError> {
    if read_u64(payload)? == key {
        Ok(())
    } else {
        Err(HubError::Protocol("update not applied".into()))
    }
}
