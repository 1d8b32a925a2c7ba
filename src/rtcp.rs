use bytes::{Bytes, BytesMut};
use webrtc::rtcp::goodbye::Goodbye;
use webrtc::rtcp::header::{
    Header, PacketType, FORMAT_FIR, FORMAT_PLI, FORMAT_REMB, FORMAT_TLN,
};
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use webrtc::rtcp::receiver_report::ReceiverReport;
use webrtc::rtcp::reception_report::ReceptionReport;
use webrtc::rtcp::sender_report::SenderReport;
use webrtc::rtcp::source_description::{
    SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};
use webrtc::rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use webrtc::util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::{Error, TransportErrorKind};

/// Upper bound for a serialized RTCP compound packet.
pub const BUFFER_SIZE: usize = 65536;
pub const MAX_VIDEO_INTERVAL_MS: u64 = 1000;
pub const MAX_AUDIO_INTERVAL_MS: u64 = 5000;

/// Seconds between 1900 (NTP epoch) and 1970 (Unix epoch).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// A Receiver Report carries at most 31 reception reports.
const MAX_REPORTS_PER_PACKET: usize = 31;

pub fn unix_ms_to_ntp(now_ms: u64) -> u64 {
    let secs = now_ms / 1000 + NTP_UNIX_OFFSET_SECS;
    let frac = (now_ms % 1000) * (1u64 << 32) / 1000;
    (secs << 32) | frac
}

/// One RTCP packet, discriminated on (type, message type, application) at
/// ingest so that dispatch is a plain match.
#[derive(Clone, Debug)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    PayloadFeedback(PayloadFeedback),
    RtpFeedback(RtpFeedback),
    Unsupported { packet_type: u8 },
}

#[derive(Clone, Debug)]
pub enum PayloadFeedback {
    Pli(PictureLossIndication),
    Fir(FullIntraRequest),
    Remb(ReceiverEstimatedMaximumBitrate),
    Other { media_ssrc: u32, format: u8 },
}

#[derive(Clone, Debug)]
pub enum RtpFeedback {
    Nack(TransportLayerNack),
    Other { media_ssrc: u32, format: u8 },
}

impl RtcpPacket {
    /// Parse a single RTCP packet. Unknown feedback subtypes map to the
    /// `Other`/`Unsupported` arms instead of failing, so one odd packet
    /// cannot poison the rest of a compound.
    pub fn unmarshal(data: &[u8]) -> Result<RtcpPacket, Error> {
        let header = Header::unmarshal(&mut &data[..])?;

        let packet = match header.packet_type {
            PacketType::SenderReport => {
                RtcpPacket::SenderReport(SenderReport::unmarshal(&mut &data[..])?)
            }
            PacketType::ReceiverReport => {
                RtcpPacket::ReceiverReport(ReceiverReport::unmarshal(&mut &data[..])?)
            }
            PacketType::SourceDescription => {
                RtcpPacket::SourceDescription(SourceDescription::unmarshal(&mut &data[..])?)
            }
            PacketType::Goodbye => RtcpPacket::Goodbye(Goodbye::unmarshal(&mut &data[..])?),
            PacketType::PayloadSpecificFeedback => match header.count {
                FORMAT_PLI => RtcpPacket::PayloadFeedback(PayloadFeedback::Pli(
                    PictureLossIndication::unmarshal(&mut &data[..])?,
                )),
                FORMAT_FIR => RtcpPacket::PayloadFeedback(PayloadFeedback::Fir(
                    FullIntraRequest::unmarshal(&mut &data[..])?,
                )),
                FORMAT_REMB => {
                    // AFB: only the REMB application is understood.
                    match ReceiverEstimatedMaximumBitrate::unmarshal(&mut &data[..]) {
                        Ok(remb) => RtcpPacket::PayloadFeedback(PayloadFeedback::Remb(remb)),
                        Err(_) => RtcpPacket::PayloadFeedback(PayloadFeedback::Other {
                            media_ssrc: feedback_media_ssrc(data),
                            format: header.count,
                        }),
                    }
                }
                format => RtcpPacket::PayloadFeedback(PayloadFeedback::Other {
                    media_ssrc: feedback_media_ssrc(data),
                    format,
                }),
            },
            PacketType::TransportSpecificFeedback => match header.count {
                FORMAT_TLN => RtcpPacket::RtpFeedback(RtpFeedback::Nack(
                    TransportLayerNack::unmarshal(&mut &data[..])?,
                )),
                format => RtcpPacket::RtpFeedback(RtpFeedback::Other {
                    media_ssrc: feedback_media_ssrc(data),
                    format,
                }),
            },
            packet_type => RtcpPacket::Unsupported {
                packet_type: packet_type as u8,
            },
        };

        Ok(packet)
    }

    /// Walk a compound payload and yield its packets in wire order.
    pub fn unmarshal_compound(data: &[u8]) -> Result<Vec<RtcpPacket>, Error> {
        let mut packets = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            if data.len() - offset < 4 {
                return Err(Error::new_transport(
                    "truncated rtcp header".to_string(),
                    TransportErrorKind::MalformedRtcpPacketError,
                ));
            }

            let header = Header::unmarshal(&mut &data[offset..])?;
            let length = (usize::from(header.length) + 1) * 4;

            if offset + length > data.len() {
                return Err(Error::new_transport(
                    format!("rtcp packet length {} exceeds payload", length),
                    TransportErrorKind::MalformedRtcpPacketError,
                ));
            }

            packets.push(RtcpPacket::unmarshal(&data[offset..offset + length])?);
            offset += length;
        }

        Ok(packets)
    }
}

// Media SSRC of a feedback packet: header, sender SSRC, then media SSRC.
fn feedback_media_ssrc(data: &[u8]) -> u32 {
    if data.len() < 12 {
        return 0;
    }
    u32::from_be_bytes([data[8], data[9], data[10], data[11]])
}

/// Accumulator for one outbound RTCP compound packet: sender reports first,
/// then receiver reports, then SDES.
#[derive(Debug, Default)]
pub struct CompoundPacket {
    sender_reports: Vec<SenderReport>,
    receiver_reports: Vec<ReceptionReport>,
    sdes_chunks: Vec<SourceDescriptionChunk>,
}

impl CompoundPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sender_report(&mut self, report: SenderReport) {
        self.sender_reports.push(report);
    }

    pub fn add_receiver_report(&mut self, report: ReceptionReport) {
        self.receiver_reports.push(report);
    }

    pub fn add_sdes_chunk(&mut self, ssrc: u32, cname: &str) {
        self.sdes_chunks.push(SourceDescriptionChunk {
            source: ssrc,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from(cname.to_string()),
            }],
        });
    }

    pub fn has_sender_report(&self) -> bool {
        !self.sender_reports.is_empty()
    }

    pub fn receiver_report_count(&self) -> usize {
        self.receiver_reports.len()
    }

    fn receiver_report_packets(&self) -> Vec<ReceiverReport> {
        self.receiver_reports
            .chunks(MAX_REPORTS_PER_PACKET)
            .map(|reports| ReceiverReport {
                ssrc: 0,
                reports: reports.to_vec(),
                profile_extensions: Bytes::new(),
            })
            .collect()
    }

    fn source_description(&self) -> Option<SourceDescription> {
        if self.sdes_chunks.is_empty() {
            return None;
        }
        Some(SourceDescription {
            chunks: self.sdes_chunks.clone(),
        })
    }

    /// Serialized size of the whole compound.
    pub fn size(&self) -> usize {
        let mut size = 0;
        for report in &self.sender_reports {
            size += report.marshal_size();
        }
        for packet in self.receiver_report_packets() {
            size += packet.marshal_size();
        }
        if let Some(sdes) = self.source_description() {
            size += sdes.marshal_size();
        }
        size
    }

    /// Serialize into `buffer` and hand back the wire bytes.
    pub fn marshal(&self, buffer: &mut BytesMut) -> Result<Bytes, Error> {
        buffer.clear();

        for report in &self.sender_reports {
            buffer.extend_from_slice(&report.marshal()?);
        }
        for packet in self.receiver_report_packets() {
            buffer.extend_from_slice(&packet.marshal()?);
        }
        if let Some(sdes) = self.source_description() {
            buffer.extend_from_slice(&sdes.marshal()?);
        }

        Ok(buffer.split().freeze())
    }
}
