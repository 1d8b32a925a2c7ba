use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use derivative::Derivative;
use enclose::enc;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use webrtc::rtp::packet::Packet;

use crate::channel::{Method, Request, Response};
use crate::config::TransportConfig;
use crate::consumer::{Consumer, KeyFrameRequestKind};
use crate::error::{ConsumerErrorKind, Error, ProducerErrorKind, TransportErrorKind};
use crate::parameters::{HeaderExtensionIds, MediaKind};
use crate::producer::{Producer, ProducerEvent};
use crate::rtcp::{CompoundPacket, PayloadFeedback, RtcpPacket, RtpFeedback};
use crate::router::{TransportId, TransportListener};
use crate::rtp_listener::RtpListener;
use crate::scheduler;

/// Floor applied to TRANSPORT_SET_MAX_INCOMING_BITRATE requests.
const MIN_INCOMING_BITRATE: u32 = 10_000;

/// Wire capability a concrete transport variant (WebRTC/DTLS or plain UDP)
/// must implement. The core hands it already-assembled RTP/RTCP.
pub trait TransportConnection: Send {
    fn send_rtp_packet(&mut self, packet: &Packet);

    fn send_rtcp_packet(&mut self, packet: &RtcpPacket);

    fn send_rtcp_compound_packet(&mut self, data: &Bytes);

    fn is_connected(&self) -> bool;
}

/// Per-peer transport core: owns the producer and consumer registries,
/// dispatches inbound RTCP to them by SSRC and assembles the periodic
/// outbound RTCP compound packets.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Transport {
    id: TransportId,
    #[derivative(Debug = "ignore")]
    listener: Arc<dyn TransportListener>,
    #[derivative(Debug = "ignore")]
    connection: Box<dyn TransportConnection>,
    config: TransportConfig,
    producers: HashMap<String, Producer>,
    consumers: HashMap<String, Consumer>,
    rtp_listener: RtpListener,
    header_extension_ids: HeaderExtensionIds,
    max_incoming_bitrate: u32,
    available_outgoing_bitrate: u32,
    rtcp_buffer: BytesMut,
    closed: bool,
    stop_sender: mpsc::UnboundedSender<()>,
    stop_receiver: Option<mpsc::UnboundedReceiver<()>>,
}

impl Transport {
    pub fn new(
        id: TransportId,
        listener: Arc<dyn TransportListener>,
        connection: Box<dyn TransportConnection>,
        config: TransportConfig,
    ) -> Transport {
        let (stop_sender, stop_receiver) = mpsc::unbounded_channel();
        let rtcp_buffer = BytesMut::with_capacity(config.rtcp_buffer_size);

        tracing::debug!("Transport {} is created", id);

        Transport {
            id,
            listener,
            connection,
            config,
            producers: HashMap::new(),
            consumers: HashMap::new(),
            rtp_listener: RtpListener::new(),
            header_extension_ids: HeaderExtensionIds::default(),
            max_incoming_bitrate: 0,
            available_outgoing_bitrate: 0,
            rtcp_buffer,
            closed: false,
            stop_sender,
            stop_receiver: Some(stop_receiver),
        }
    }

    /// Spawn the RTCP timer loop for this transport.
    pub fn start(transport: Arc<Mutex<Transport>>) {
        tokio::spawn(enc!((transport) async move {
            scheduler::run_rtcp_loop(transport).await;
        }));
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn max_incoming_bitrate(&self) -> u32 {
        self.max_incoming_bitrate
    }

    pub fn available_outgoing_bitrate(&self) -> u32 {
        self.available_outgoing_bitrate
    }

    pub fn header_extension_ids(&self) -> HeaderExtensionIds {
        self.header_extension_ids
    }

    pub fn producer(&self, producer_id: &str) -> Option<&Producer> {
        self.producers.get(producer_id)
    }

    pub fn consumer(&self, consumer_id: &str) -> Option<&Consumer> {
        self.consumers.get(consumer_id)
    }

    pub fn consumer_mut(&mut self, consumer_id: &str) -> Option<&mut Consumer> {
        self.consumers.get_mut(consumer_id)
    }

    pub fn rtp_listener(&self) -> &RtpListener {
        &self.rtp_listener
    }

    pub(crate) fn take_stop_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<()>> {
        self.stop_receiver.take()
    }

    pub(crate) fn max_rtcp_interval_ms(&self) -> u64 {
        self.config.max_rtcp_video_interval_ms
    }

    /// Notify the router about every producer and consumer, destroy them
    /// and stop the RTCP timer. The transport must not be used afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for (_, producer) in self.producers.drain() {
            self.listener.on_transport_producer_closed(self.id, &producer);
        }

        for (_, consumer) in self.consumers.drain() {
            self.listener.on_transport_consumer_closed(self.id, &consumer);
        }

        self.rtp_listener.clear();
        let _ = self.stop_sender.send(());

        tracing::debug!("Transport {} is closed", self.id);
    }

    pub fn handle_request(&mut self, request: &Request) -> Response {
        if self.closed {
            return Response::reject("transport closed");
        }

        match request.method {
            Method::TransportSetMaxIncomingBitrate => {
                let bitrate = match request.data_u64("bitrate") {
                    Err(err) => return Response::reject(err.to_string()),
                    Ok(bitrate) => u32::try_from(bitrate).unwrap_or(u32::MAX),
                };

                self.max_incoming_bitrate = bitrate.max(MIN_INCOMING_BITRATE);

                tracing::debug!(
                    "Transport maximum incoming bitrate set to {}bps",
                    self.max_incoming_bitrate
                );

                Response::accept()
            }

            Method::ProducerClose => {
                let producer_id = match request.internal_str("producerId") {
                    Err(err) => return Response::reject(err.to_string()),
                    Ok(producer_id) => producer_id.to_string(),
                };

                let Some(producer) = self.producers.remove(&producer_id) else {
                    return Response::reject("Producer not found");
                };

                self.rtp_listener.remove_producer(&producer);
                self.listener.on_transport_producer_closed(self.id, &producer);

                tracing::debug!("Producer closed [id:{}]", producer_id);

                Response::accept()
            }

            Method::ProducerPause => {
                let producer_id = match request.internal_str("producerId") {
                    Err(err) => return Response::reject(err.to_string()),
                    Ok(producer_id) => producer_id.to_string(),
                };

                let Some(producer) = self.producers.get_mut(&producer_id) else {
                    return Response::reject("Producer not found");
                };

                let (changed, events) = producer.pause();
                if changed {
                    if let Some(producer) = self.producers.get(&producer_id) {
                        self.listener.on_transport_producer_paused(self.id, producer);
                        self.fan_out_producer_events(producer, &events);
                    }
                }

                Response::accept()
            }

            Method::ProducerResume => {
                let producer_id = match request.internal_str("producerId") {
                    Err(err) => return Response::reject(err.to_string()),
                    Ok(producer_id) => producer_id.to_string(),
                };

                let Some(producer) = self.producers.get_mut(&producer_id) else {
                    return Response::reject("Producer not found");
                };

                let (changed, events) = producer.resume();
                if changed {
                    if let Some(producer) = self.producers.get(&producer_id) {
                        self.listener.on_transport_producer_resumed(self.id, producer);
                        self.fan_out_producer_events(producer, &events);
                    }
                }

                Response::accept()
            }

            Method::ConsumerClose => {
                let consumer_id = match request.internal_str("consumerId") {
                    Err(err) => return Response::reject(err.to_string()),
                    Ok(consumer_id) => consumer_id.to_string(),
                };

                let Some(consumer) = self.consumers.remove(&consumer_id) else {
                    return Response::reject("Consumer not found");
                };

                self.listener.on_transport_consumer_closed(self.id, &consumer);

                tracing::debug!("Consumer closed [id:{}]", consumer_id);

                Response::accept()
            }

            Method::TransportDump => {
                let mut producer_ids: Vec<&str> =
                    self.producers.keys().map(String::as_str).collect();
                producer_ids.sort_unstable();
                let mut consumer_ids: Vec<&str> =
                    self.consumers.keys().map(String::as_str).collect();
                consumer_ids.sort_unstable();

                Response::accept_with(json!({
                    "id": self.id,
                    "producerIds": producer_ids,
                    "consumerIds": consumer_ids,
                    "maxIncomingBitrate": self.max_incoming_bitrate,
                    "availableOutgoingBitrate": self.available_outgoing_bitrate,
                    "rtpHeaderExtensionIds": {
                        "absSendTime": self.header_extension_ids.abs_send_time,
                        "mid": self.header_extension_ids.mid,
                        "rid": self.header_extension_ids.rid,
                    },
                }))
            }

            // Produce/consume carry entity construction and are handled by
            // the concrete transport variant before reaching the core.
            Method::TransportProduce | Method::TransportConsume => {
                tracing::error!("unknown method {:?}", request.method);

                Response::reject("unknown method")
            }
        }
    }

    /// Validate the producer id a TRANSPORT_PRODUCE request carries.
    pub fn new_producer_id_from_request(&self, request: &Request) -> Result<String, Error> {
        let producer_id = request.internal_str("producerId")?.to_string();

        if self.producers.contains_key(&producer_id) {
            return Err(Error::new_producer(
                "a producer with same producerId already exists".to_string(),
                ProducerErrorKind::DuplicateIdError,
            ));
        }

        Ok(producer_id)
    }

    /// Validate the consumer id a TRANSPORT_CONSUME request carries.
    pub fn new_consumer_id_from_request(&self, request: &Request) -> Result<String, Error> {
        let consumer_id = request.internal_str("consumerId")?.to_string();

        if self.consumers.contains_key(&consumer_id) {
            return Err(Error::new_consumer(
                "a consumer with same consumerId already exists".to_string(),
                ConsumerErrorKind::DuplicateIdError,
            ));
        }

        Ok(consumer_id)
    }

    /// Install a producer: the RTP listener first (an SSRC collision aborts
    /// with no registry change), then the map, then the header-extension
    /// union.
    pub fn register_producer(&mut self, producer: Producer) -> Result<(), Error> {
        if self.closed {
            return Err(Error::new_transport(
                "transport closed".to_string(),
                TransportErrorKind::TransportClosedError,
            ));
        }

        if self.producers.contains_key(producer.id()) {
            return Err(Error::new_producer(
                "a producer with same producerId already exists".to_string(),
                ProducerErrorKind::DuplicateIdError,
            ));
        }

        self.rtp_listener.add_producer(&producer)?;

        let producer_extension_ids = producer.header_extension_ids();
        self.producers.insert(producer.id().to_string(), producer);

        self.header_extension_ids.merge(&producer_extension_ids);

        Ok(())
    }

    /// Install a consumer. On an already-connected transport a video
    /// consumer immediately gets a key frame requested through the router
    /// listener, for all of its streams.
    pub fn register_consumer(&mut self, consumer: Consumer) -> Result<(), Error> {
        if self.closed {
            return Err(Error::new_transport(
                "transport closed".to_string(),
                TransportErrorKind::TransportClosedError,
            ));
        }

        if self.consumers.contains_key(consumer.id()) {
            return Err(Error::new_consumer(
                "a consumer with same consumerId already exists".to_string(),
                ConsumerErrorKind::DuplicateIdError,
            ));
        }

        let consumer_id = consumer.id().to_string();
        let is_video = consumer.kind() == MediaKind::Video;
        self.consumers.insert(consumer_id.clone(), consumer);

        if is_video && self.connection.is_connected() {
            tracing::debug!(
                "requesting key frame for new consumer since transport is already connected"
            );
            if let Some(consumer) = self.consumers.get(&consumer_id) {
                self.listener
                    .on_transport_consumer_key_frame_requested(self.id, consumer, None);
            }
        }

        Ok(())
    }

    /// Resolve an inbound RTP packet to its producer and relay the
    /// producer's reaction to the router.
    pub fn receive_rtp_packet(&mut self, packet: &Packet, now_ms: u64) {
        if self.closed {
            return;
        }

        let ssrc = packet.header.ssrc;
        let Some(producer_id) = self.rtp_listener.get_producer_id(ssrc).cloned() else {
            tracing::warn!("no producer found for received RTP packet [ssrc:{}]", ssrc);
            return;
        };

        let Some(producer) = self.producers.get_mut(&producer_id) else {
            return;
        };
        let events = producer.receive_rtp_packet(packet, now_ms);

        let Some(producer) = self.producers.get(&producer_id) else {
            return;
        };
        self.fan_out_producer_events(producer, &events);
        self.listener
            .on_transport_producer_rtp_packet_received(self.id, producer, packet);
    }

    /// Parse an inbound RTCP compound payload and dispatch each packet in
    /// wire order.
    pub fn receive_rtcp(&mut self, data: &[u8], now_ms: u64) {
        if self.closed {
            return;
        }

        let packets = match RtcpPacket::unmarshal_compound(data) {
            Ok(packets) => packets,
            Err(err) => {
                tracing::warn!("received invalid RTCP compound packet: {}", err);
                return;
            }
        };

        for packet in &packets {
            self.receive_rtcp_packet(packet, now_ms);
        }
    }

    pub fn receive_rtcp_packet(&mut self, packet: &RtcpPacket, now_ms: u64) {
        match packet {
            RtcpPacket::ReceiverReport(rr) => {
                for report in &rr.reports {
                    let Some(consumer_id) = self.started_consumer_id(report.ssrc) else {
                        tracing::warn!(
                            "no consumer found for received Receiver Report [ssrc:{}]",
                            report.ssrc
                        );
                        break;
                    };

                    if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
                        consumer.receive_rtcp_receiver_report(report);
                    }
                }
            }

            RtcpPacket::PayloadFeedback(feedback) => match feedback {
                PayloadFeedback::Pli(pli) => {
                    self.dispatch_key_frame_request(pli.media_ssrc, KeyFrameRequestKind::Pli);
                }
                PayloadFeedback::Fir(fir) => {
                    self.dispatch_key_frame_request(fir.media_ssrc, KeyFrameRequestKind::Fir);
                }
                PayloadFeedback::Remb(remb) => {
                    self.available_outgoing_bitrate = remb.bitrate as u32;
                }
                PayloadFeedback::Other { media_ssrc, format } => {
                    tracing::warn!(
                        "ignoring unsupported PS feedback packet [format:{}, media ssrc:{}]",
                        format,
                        media_ssrc
                    );
                }
            },

            RtcpPacket::RtpFeedback(feedback) => {
                let media_ssrc = match feedback {
                    RtpFeedback::Nack(nack) => nack.media_ssrc,
                    RtpFeedback::Other { media_ssrc, .. } => *media_ssrc,
                };

                let Some(consumer_id) = self.started_consumer_id(media_ssrc) else {
                    tracing::warn!(
                        "no consumer found for received feedback packet [media ssrc:{}]",
                        media_ssrc
                    );
                    return;
                };

                match feedback {
                    RtpFeedback::Nack(nack) => {
                        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
                            consumer.receive_nack(nack);
                        }
                    }
                    RtpFeedback::Other { format, .. } => {
                        tracing::warn!(
                            "ignoring unsupported RTP feedback packet [format:{}, media ssrc:{}]",
                            format,
                            media_ssrc
                        );
                    }
                }
            }

            RtcpPacket::SenderReport(sr) => {
                let Some(producer_id) = self.rtp_listener.get_producer_id(sr.ssrc).cloned() else {
                    tracing::warn!(
                        "no producer found for received Sender Report [ssrc:{}]",
                        sr.ssrc
                    );
                    return;
                };

                if let Some(producer) = self.producers.get_mut(&producer_id) {
                    producer.receive_rtcp_sender_report(sr, now_ms);
                }
            }

            RtcpPacket::SourceDescription(sdes) => {
                for chunk in &sdes.chunks {
                    if self.rtp_listener.get_producer_id(chunk.source).is_none() {
                        tracing::warn!(
                            "no producer for received SDES chunk [ssrc:{}]",
                            chunk.source
                        );
                    }
                }
            }

            RtcpPacket::Goodbye(_) => {
                tracing::debug!("ignoring received RTCP BYE");
            }

            RtcpPacket::Unsupported { packet_type } => {
                tracing::warn!("unhandled RTCP type received [type:{}]", packet_type);
            }
        }
    }

    /// Forward one RTP packet through a consumer toward the remote peer.
    pub fn send_consumer_rtp(
        &mut self,
        consumer_id: &str,
        packet: Packet,
        now_ms: u64,
    ) -> Result<(), Error> {
        let Some(consumer) = self.consumers.get_mut(consumer_id) else {
            return Err(Error::new_consumer(
                "Consumer not found".to_string(),
                ConsumerErrorKind::NotFoundError,
            ));
        };

        if let Some(packet) = consumer.send_rtp_packet(packet, now_ms) {
            self.connection.send_rtp_packet(&packet);
        }

        Ok(())
    }

    /// Have a producer solicit a key frame from its remote sender.
    pub fn request_producer_key_frame(&mut self, producer_id: &str) -> Result<(), Error> {
        let Some(producer) = self.producers.get(producer_id) else {
            return Err(Error::new_producer(
                "Producer not found".to_string(),
                ProducerErrorKind::NotFoundError,
            ));
        };

        if let Some(packet) = producer.request_key_frame() {
            self.connection.send_rtcp_packet(&packet);
        }

        Ok(())
    }

    /// Direct per-consumer key frame request, for routers that prefer not
    /// to go through the listener callback.
    pub fn request_consumer_key_frame(
        &mut self,
        consumer_id: &str,
        kind: KeyFrameRequestKind,
    ) -> Result<(), Error> {
        match self.consumers.get_mut(consumer_id) {
            None => Err(Error::new_consumer(
                "Consumer not found".to_string(),
                ConsumerErrorKind::NotFoundError,
            )),
            Some(consumer) => {
                consumer.receive_key_frame_request(kind);
                Ok(())
            }
        }
    }

    /// Assemble and emit outbound RTCP: consumer compounds flush whenever
    /// they contain a sender report, producers pool their receiver reports
    /// into a final compound.
    pub fn send_rtcp(&mut self, now_ms: u64) {
        let Self {
            consumers,
            producers,
            connection,
            rtcp_buffer,
            config,
            ..
        } = self;

        let mut compound = CompoundPacket::new();

        for consumer in consumers.values_mut() {
            let max_interval_ms = match consumer.kind() {
                MediaKind::Audio => config.max_rtcp_audio_interval_ms,
                MediaKind::Video => config.max_rtcp_video_interval_ms,
            };
            consumer.get_rtcp(&mut compound, max_interval_ms, now_ms);

            if compound.has_sender_report() {
                if compound.size() > config.rtcp_buffer_size {
                    tracing::warn!(
                        "cannot send RTCP packet, size too big ({} bytes)",
                        compound.size()
                    );
                    return;
                }

                match compound.marshal(rtcp_buffer) {
                    Ok(data) => connection.send_rtcp_compound_packet(&data),
                    Err(err) => {
                        tracing::error!("failed to serialize RTCP compound packet: {}", err)
                    }
                }

                compound = CompoundPacket::new();
            }
        }

        for producer in producers.values_mut() {
            let max_interval_ms = match producer.kind() {
                MediaKind::Audio => config.max_rtcp_audio_interval_ms,
                MediaKind::Video => config.max_rtcp_video_interval_ms,
            };
            producer.get_rtcp(&mut compound, max_interval_ms, now_ms);
        }

        if compound.receiver_report_count() != 0 {
            if compound.size() > config.rtcp_buffer_size {
                tracing::warn!(
                    "cannot send RTCP packet, size too big ({} bytes)",
                    compound.size()
                );
                return;
            }

            match compound.marshal(rtcp_buffer) {
                Ok(data) => connection.send_rtcp_compound_packet(&data),
                Err(err) => tracing::error!("failed to serialize RTCP compound packet: {}", err),
            }
        }
    }

    /// One RTCP timer fire: send, then derive the next interval from the
    /// current send rate.
    pub fn on_rtcp_timer(&mut self, now_ms: u64) -> u64 {
        if self.closed {
            return self.config.max_rtcp_video_interval_ms;
        }

        self.send_rtcp(now_ms);

        let mut interval = self.config.max_rtcp_video_interval_ms;
        if !self.consumers.is_empty() {
            let mut rate_kbps: u32 = 0;
            for consumer in self.consumers.values_mut() {
                rate_kbps += consumer.transmission_rate(now_ms) / 1000;
            }

            interval = scheduler::next_interval(rate_kbps, self.config.max_rtcp_video_interval_ms);
        }

        scheduler::randomize_interval(interval)
    }

    fn started_consumer_id(&self, ssrc: u32) -> Option<String> {
        self.consumers
            .values()
            .find(|consumer| consumer.is_started() && consumer.has_ssrc(ssrc))
            .map(|consumer| consumer.id().to_string())
    }

    fn dispatch_key_frame_request(&mut self, media_ssrc: u32, kind: KeyFrameRequestKind) {
        let Some(consumer_id) = self.started_consumer_id(media_ssrc) else {
            tracing::warn!(
                "no consumer found for received {:?} feedback packet [media ssrc:{}]",
                kind,
                media_ssrc
            );
            return;
        };

        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.receive_key_frame_request(kind);
        }
    }

    fn fan_out_producer_events(&self, producer: &Producer, events: &[ProducerEvent]) {
        for event in events {
            match event {
                ProducerEvent::StreamEnabled { mapped_ssrc } => {
                    if let Some(stream) = producer.stream(*mapped_ssrc) {
                        self.listener.on_transport_producer_stream_enabled(
                            self.id,
                            producer,
                            stream,
                            *mapped_ssrc,
                        );
                    }
                }
                ProducerEvent::StreamDisabled { mapped_ssrc } => {
                    if let Some(stream) = producer.stream(*mapped_ssrc) {
                        self.listener.on_transport_producer_stream_disabled(
                            self.id,
                            producer,
                            stream,
                            *mapped_ssrc,
                        );
                    }
                }
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        tracing::trace!("Transport {} is dropped", self.id);
    }
}
