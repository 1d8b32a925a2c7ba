use bytes::Bytes;
use uuid::Uuid;
use webrtc::rtcp::reception_report::ReceptionReport;
use webrtc::rtcp::sender_report::SenderReport;
use webrtc::rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::MarshalSize;

use crate::parameters::{MediaKind, RtpParameters};
use crate::rate::RateCalculator;
use crate::rtcp::{unix_ms_to_ntp, CompoundPacket};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFrameRequestKind {
    Pli,
    Fir,
}

/// An outbound media sink owned by a transport. A consumer is "started"
/// once its upstream producer delivers media; until then it neither sends
/// nor answers feedback.
#[derive(Debug)]
pub struct Consumer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    cname: String,
    started: bool,
    paused: bool,
    packets_sent: u32,
    octets_sent: u32,
    last_rtp_timestamp: u32,
    rate: RateCalculator,
    last_rtcp_sent_ms: u64,
    last_receiver_report: Option<ReceptionReport>,
    nack_count: u64,
    key_frame_request_count: u64,
}

impl Consumer {
    pub fn new(id: String, kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        let cname = rtp_parameters
            .rtcp
            .cname
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        tracing::debug!("Consumer {} is created", id);

        Self {
            id,
            kind,
            rtp_parameters,
            cname,
            started: false,
            paused: false,
            packets_sent: 0,
            octets_sent: 0,
            last_rtp_timestamp: 0,
            rate: RateCalculator::default(),
            last_rtcp_sent_ms: 0,
            last_receiver_report: None,
            nack_count: 0,
            key_frame_request_count: 0,
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

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn set_started(&mut self, started: bool) {
        self.started = started;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns true when the call changed state.
    pub fn pause(&mut self) -> bool {
        let changed = !self.paused;
        self.paused = true;
        changed
    }

    pub fn resume(&mut self) -> bool {
        let changed = self.paused;
        self.paused = false;
        changed
    }

    pub fn last_receiver_report(&self) -> Option<&ReceptionReport> {
        self.last_receiver_report.as_ref()
    }

    pub fn nack_count(&self) -> u64 {
        self.nack_count
    }

    pub fn key_frame_request_count(&self) -> u64 {
        self.key_frame_request_count
    }

    /// Whether any of the consumer's wire SSRCs (primary, RTX, FEC) equals
    /// the given one.
    pub fn has_ssrc(&self, ssrc: u32) -> bool {
        for encoding in &self.rtp_parameters.encodings {
            if encoding.ssrc == ssrc {
                return true;
            }
            if let Some(rtx) = &encoding.rtx {
                if rtx.ssrc == ssrc {
                    return true;
                }
            }
            if let Some(fec) = &encoding.fec {
                if fec.ssrc == ssrc {
                    return true;
                }
            }
        }
        false
    }

    /// Forward one RTP packet toward the remote peer. Returns the packet
    /// to put on the wire, or nothing while the consumer cannot send.
    pub fn send_rtp_packet(&mut self, packet: Packet, now_ms: u64) -> Option<Packet> {
        if !self.started || self.paused {
            return None;
        }

        let size = packet.marshal_size();
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self
            .octets_sent
            .wrapping_add(packet.payload.len() as u32);
        self.last_rtp_timestamp = packet.header.timestamp;
        self.rate.update(size, now_ms);

        Some(packet)
    }

    pub fn receive_rtcp_receiver_report(&mut self, report: &ReceptionReport) {
        self.last_receiver_report = Some(report.clone());
    }

    /// A PLI/FIR arrived for this consumer. Returns whether the request
    /// should propagate upstream.
    pub fn receive_key_frame_request(&mut self, kind: KeyFrameRequestKind) -> bool {
        if self.kind != MediaKind::Video || !self.started {
            return false;
        }

        tracing::debug!(
            "{:?} received, requesting key frame for consumer {}",
            kind,
            self.id
        );
        self.key_frame_request_count += 1;
        true
    }

    pub fn receive_nack(&mut self, nack: &TransportLayerNack) {
        for pair in &nack.nacks {
            self.nack_count += 1 + u64::from(pair.lost_packets.count_ones());
        }
    }

    /// Append this consumer's sender report and SDES chunk, throttled to
    /// the kind-specific interval ceiling.
    pub fn get_rtcp(&mut self, compound: &mut CompoundPacket, max_interval_ms: u64, now_ms: u64) {
        if !self.started {
            return;
        }

        let elapsed = now_ms.saturating_sub(self.last_rtcp_sent_ms);
        if elapsed * 115 / 100 < max_interval_ms {
            return;
        }

        let Some(ssrc) = self.rtp_parameters.media_ssrcs().next() else {
            return;
        };

        compound.add_sender_report(SenderReport {
            ssrc,
            ntp_time: unix_ms_to_ntp(now_ms),
            rtp_time: self.last_rtp_timestamp,
            packet_count: self.packets_sent,
            octet_count: self.octets_sent,
            reports: vec![],
            profile_extensions: Bytes::new(),
        });
        compound.add_sdes_chunk(ssrc, &self.cname);

        self.last_rtcp_sent_ms = now_ms;
    }

    /// Current outgoing rate in bits per second.
    pub fn transmission_rate(&mut self, now_ms: u64) -> u32 {
        self.rate.rate(now_ms)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        tracing::debug!("Consumer {} is dropped", self.id);
    }
}
