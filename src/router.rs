use webrtc::rtp::packet::Packet;

use crate::consumer::Consumer;
use crate::producer::Producer;
use crate::stream::RtpStream;

/// Identifier of a transport, unique within the owning router.
pub type TransportId = u32;

/// Capability set a router must provide to observe its transports. The
/// transport forwards producer and consumer events here verbatim; it never
/// interprets them. The router outlives its transports, so implementations
/// are shared references.
pub trait TransportListener: Send + Sync {
    fn on_transport_producer_closed(&self, transport_id: TransportId, producer: &Producer);

    fn on_transport_consumer_closed(&self, transport_id: TransportId, consumer: &Consumer);

    fn on_transport_producer_paused(&self, _transport_id: TransportId, _producer: &Producer) {}

    fn on_transport_producer_resumed(&self, _transport_id: TransportId, _producer: &Producer) {}

    fn on_transport_producer_stream_enabled(
        &self,
        _transport_id: TransportId,
        _producer: &Producer,
        _rtp_stream: &RtpStream,
        _mapped_ssrc: u32,
    ) {
    }

    fn on_transport_producer_stream_disabled(
        &self,
        _transport_id: TransportId,
        _producer: &Producer,
        _rtp_stream: &RtpStream,
        _mapped_ssrc: u32,
    ) {
    }

    fn on_transport_producer_rtp_packet_received(
        &self,
        _transport_id: TransportId,
        _producer: &Producer,
        _packet: &Packet,
    ) {
    }

    /// `ssrc` of `None` means "for all of the consumer's streams".
    fn on_transport_consumer_key_frame_requested(
        &self,
        _transport_id: TransportId,
        _consumer: &Consumer,
        _ssrc: Option<u32>,
    ) {
    }
}
