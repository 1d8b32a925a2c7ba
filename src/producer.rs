use std::collections::HashMap;

use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtcp::sender_report::SenderReport;
use webrtc::rtp::packet::Packet;

use crate::parameters::{HeaderExtensionIds, MediaKind, RtpParameters};
use crate::rtcp::{CompoundPacket, PayloadFeedback, RtcpPacket};
use crate::stream::RtpStream;

/// Events a producer surfaces to its owning transport while handling a
/// packet or a state change. The transport relays them to the router
/// listener untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerEvent {
    StreamEnabled { mapped_ssrc: u32 },
    StreamDisabled { mapped_ssrc: u32 },
}

/// An inbound media source owned by a transport. Holds one receive stream
/// per declared primary SSRC; stream internals (jitter buffers, layer
/// selection) live elsewhere.
#[derive(Debug)]
pub struct Producer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    header_extension_ids: HeaderExtensionIds,
    paused: bool,
    streams: HashMap<u32, RtpStream>,
    last_rtcp_sent_ms: u64,
}

impl Producer {
    pub fn new(id: String, kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        let header_extension_ids = HeaderExtensionIds::from_parameters(&rtp_parameters);

        tracing::debug!("Producer {} is created", id);

        Self {
            id,
            kind,
            rtp_parameters,
            header_extension_ids,
            paused: false,
            streams: HashMap::new(),
            last_rtcp_sent_ms: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    pub fn header_extension_ids(&self) -> HeaderExtensionIds {
        self.header_extension_ids
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn stream(&self, ssrc: u32) -> Option<&RtpStream> {
        self.streams.get(&ssrc)
    }

    /// Handle one inbound RTP packet. The first packet of a declared SSRC
    /// brings its stream up.
    pub fn receive_rtp_packet(&mut self, packet: &Packet, now_ms: u64) -> Vec<ProducerEvent> {
        let ssrc = packet.header.ssrc;
        let mut events = Vec::new();

        if !self.rtp_parameters.media_ssrcs().any(|s| s == ssrc) {
            tracing::warn!(
                "ignoring RTP packet with unknown ssrc {} for producer {}",
                ssrc,
                self.id
            );
            return events;
        }

        if !self.streams.contains_key(&ssrc) {
            self.streams
                .insert(ssrc, RtpStream::new(ssrc, self.rtp_parameters.clock_rate));
            if !self.paused {
                events.push(ProducerEvent::StreamEnabled { mapped_ssrc: ssrc });
            }
        }

        if let Some(stream) = self.streams.get_mut(&ssrc) {
            stream.update(packet, now_ms);
        }

        events
    }

    pub fn receive_rtcp_sender_report(&mut self, report: &SenderReport, now_ms: u64) {
        if let Some(stream) = self.streams.get_mut(&report.ssrc) {
            stream.receive_sender_report(report, now_ms);
        }
    }

    /// Append one reception report per live stream, throttled to the
    /// kind-specific interval.
    pub fn get_rtcp(&mut self, compound: &mut CompoundPacket, max_interval_ms: u64, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_rtcp_sent_ms);
        if elapsed * 115 / 100 < max_interval_ms {
            return;
        }

        for stream in self.streams.values_mut() {
            compound.add_receiver_report(stream.reception_report(now_ms));
        }

        self.last_rtcp_sent_ms = now_ms;
    }

    /// Returns true when the call changed state. Pausing reports every
    /// live stream as disabled so downstream consumers can react.
    pub fn pause(&mut self) -> (bool, Vec<ProducerEvent>) {
        if self.paused {
            return (false, Vec::new());
        }
        self.paused = true;

        let events = self
            .streams
            .keys()
            .map(|&ssrc| ProducerEvent::StreamDisabled { mapped_ssrc: ssrc })
            .collect();
        (true, events)
    }

    pub fn resume(&mut self) -> (bool, Vec<ProducerEvent>) {
        if !self.paused {
            return (false, Vec::new());
        }
        self.paused = false;

        let events = self
            .streams
            .keys()
            .map(|&ssrc| ProducerEvent::StreamEnabled { mapped_ssrc: ssrc })
            .collect();
        (true, events)
    }

    /// Solicit a key frame from the remote sender. The transport puts the
    /// resulting packet on the wire.
    pub fn request_key_frame(&self) -> Option<RtcpPacket> {
        if self.kind != MediaKind::Video {
            return None;
        }

        let media_ssrc = self.rtp_parameters.media_ssrcs().next()?;
        Some(RtcpPacket::PayloadFeedback(PayloadFeedback::Pli(
            PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            },
        )))
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        tracing::debug!("Producer {} is dropped", self.id);
    }
}
