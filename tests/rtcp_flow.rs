use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::json;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use webrtc::rtcp::receiver_report::ReceiverReport;
use webrtc::rtcp::reception_report::ReceptionReport;
use webrtc::rtcp::sender_report::SenderReport;
use webrtc::rtcp::transport_feedbacks::transport_layer_nack::{NackPair, TransportLayerNack};
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::Marshal;

use relaymesh::channel::{Method, Request};
use relaymesh::config::TransportConfig;
use relaymesh::consumer::{Consumer, KeyFrameRequestKind};
use relaymesh::parameters::{MediaKind, RtpEncodingParameters, RtpParameters, RtxParameters};
use relaymesh::producer::Producer;
use relaymesh::router::{TransportId, TransportListener};
use relaymesh::rtcp::RtcpPacket;
use relaymesh::stream::RtpStream;
use relaymesh::transport::{Transport, TransportConnection};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    ProducerClosed(String),
    ConsumerClosed(String),
    ProducerPaused(String),
    ProducerResumed(String),
    StreamEnabled(String, u32),
    StreamDisabled(String, u32),
    RtpPacketReceived(String, u32),
    KeyFrameRequested(String, Option<u32>),
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl TransportListener for RecordingListener {
    fn on_transport_producer_closed(&self, _transport_id: TransportId, producer: &Producer) {
        self.push(Event::ProducerClosed(producer.id().to_string()));
    }

    fn on_transport_consumer_closed(&self, _transport_id: TransportId, consumer: &Consumer) {
        self.push(Event::ConsumerClosed(consumer.id().to_string()));
    }

    fn on_transport_producer_paused(&self, _transport_id: TransportId, producer: &Producer) {
        self.push(Event::ProducerPaused(producer.id().to_string()));
    }

    fn on_transport_producer_resumed(&self, _transport_id: TransportId, producer: &Producer) {
        self.push(Event::ProducerResumed(producer.id().to_string()));
    }

    fn on_transport_producer_stream_enabled(
        &self,
        _transport_id: TransportId,
        producer: &Producer,
        rtp_stream: &RtpStream,
        _mapped_ssrc: u32,
    ) {
        self.push(Event::StreamEnabled(
            producer.id().to_string(),
            rtp_stream.ssrc(),
        ));
    }

    fn on_transport_producer_stream_disabled(
        &self,
        _transport_id: TransportId,
        producer: &Producer,
        _rtp_stream: &RtpStream,
        mapped_ssrc: u32,
    ) {
        self.push(Event::StreamDisabled(producer.id().to_string(), mapped_ssrc));
    }

    fn on_transport_producer_rtp_packet_received(
        &self,
        _transport_id: TransportId,
        producer: &Producer,
        packet: &Packet,
    ) {
        self.push(Event::RtpPacketReceived(
            producer.id().to_string(),
            packet.header.ssrc,
        ));
    }

    fn on_transport_consumer_key_frame_requested(
        &self,
        _transport_id: TransportId,
        consumer: &Consumer,
        ssrc: Option<u32>,
    ) {
        self.push(Event::KeyFrameRequested(consumer.id().to_string(), ssrc));
    }
}

#[derive(Default)]
struct SentPackets {
    rtp: Vec<Packet>,
    rtcp: Vec<RtcpPacket>,
    compounds: Vec<Bytes>,
}

struct RecordingConnection {
    connected: bool,
    sent: Arc<Mutex<SentPackets>>,
}

impl TransportConnection for RecordingConnection {
    fn send_rtp_packet(&mut self, packet: &Packet) {
        self.sent.lock().unwrap().rtp.push(packet.clone());
    }

    fn send_rtcp_packet(&mut self, packet: &RtcpPacket) {
        self.sent.lock().unwrap().rtcp.push(packet.clone());
    }

    fn send_rtcp_compound_packet(&mut self, data: &Bytes) {
        self.sent.lock().unwrap().compounds.push(data.clone());
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

struct Harness {
    transport: Transport,
    listener: Arc<RecordingListener>,
    sent: Arc<Mutex<SentPackets>>,
}

fn harness(connected: bool) -> Harness {
    harness_with_config(connected, TransportConfig::default())
}

fn harness_with_config(connected: bool, config: TransportConfig) -> Harness {
    let listener = Arc::new(RecordingListener::default());
    let sent = Arc::new(Mutex::new(SentPackets::default()));
    let connection = RecordingConnection {
        connected,
        sent: Arc::clone(&sent),
    };

    let transport = Transport::new(1, Arc::clone(&listener) as _, Box::new(connection), config);

    Harness {
        transport,
        listener,
        sent,
    }
}

fn video_producer(id: &str, ssrcs: &[u32]) -> Producer {
    let parameters = RtpParameters {
        encodings: ssrcs
            .iter()
            .map(|&ssrc| RtpEncodingParameters {
                ssrc,
                rid: None,
                rtx: None,
                fec: None,
            })
            .collect(),
        ..Default::default()
    };
    Producer::new(id.to_string(), MediaKind::Video, parameters)
}

fn video_consumer(id: &str, ssrc: u32) -> Consumer {
    let parameters = RtpParameters {
        encodings: vec![RtpEncodingParameters {
            ssrc,
            rid: None,
            rtx: Some(RtxParameters { ssrc: ssrc + 1 }),
            fec: None,
        }],
        ..Default::default()
    };
    Consumer::new(id.to_string(), MediaKind::Video, parameters)
}

fn rtp_packet(ssrc: u32, seq: u16, payload_len: usize) -> Packet {
    Packet {
        header: webrtc::rtp::header::Header {
            version: 2,
            ssrc,
            sequence_number: seq,
            timestamp: u32::from(seq) * 3000,
            payload_type: 96,
            ..Default::default()
        },
        payload: Bytes::from(vec![0u8; payload_len]),
    }
}

fn reception_report(ssrc: u32) -> ReceptionReport {
    ReceptionReport {
        ssrc,
        fraction_lost: 0,
        total_lost: 0,
        last_sequence_number: 10,
        jitter: 0,
        last_sender_report: 0,
        delay: 0,
    }
}

#[test]
fn producer_close_request_clears_every_registry() {
    let mut h = harness(false);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();

    let request = Request::new(Method::ProducerClose).with_internal(json!({ "producerId": "p1" }));
    let response = h.transport.handle_request(&request);

    assert!(response.is_accepted());
    assert_eq!(h.listener.events(), vec![Event::ProducerClosed("p1".to_string())]);
    assert!(h.transport.rtp_listener().get_producer_id(100).is_none());
    assert!(h.transport.producer("p1").is_none());
}

#[test]
fn consumer_close_request_removes_and_notifies() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();

    let request = Request::new(Method::ConsumerClose).with_internal(json!({ "consumerId": "c1" }));
    assert!(h.transport.handle_request(&request).is_accepted());
    assert_eq!(h.listener.events(), vec![Event::ConsumerClosed("c1".to_string())]);
    assert!(h.transport.consumer("c1").is_none());

    // A second close for the same id has nothing left to act on.
    let response = h.transport.handle_request(&request);
    assert!(!response.is_accepted());
}

#[test]
fn pli_reaches_the_started_consumer_without_listener_calls() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);

    let pli = PictureLossIndication {
        sender_ssrc: 0xAAAA,
        media_ssrc: 200,
    };
    let data = pli.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);

    assert_eq!(
        h.transport.consumer("c1").unwrap().key_frame_request_count(),
        1
    );
    assert!(h.listener.events().is_empty());
}

#[test]
fn pli_matches_the_rtx_ssrc_too() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);

    let pli = PictureLossIndication {
        sender_ssrc: 0xAAAA,
        media_ssrc: 201,
    };
    let data = pli.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);

    assert_eq!(
        h.transport.consumer("c1").unwrap().key_frame_request_count(),
        1
    );
}

#[test]
fn pli_for_a_stopped_consumer_is_only_logged() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();

    let pli = PictureLossIndication {
        sender_ssrc: 0xAAAA,
        media_ssrc: 200,
    };
    let data = pli.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);

    assert_eq!(
        h.transport.consumer("c1").unwrap().key_frame_request_count(),
        0
    );
}

#[test]
fn remb_updates_the_available_outgoing_bitrate() {
    let mut h = harness(false);

    let remb = ReceiverEstimatedMaximumBitrate {
        sender_ssrc: 0xAAAA,
        bitrate: 750_000.0,
        ssrcs: vec![200],
    };
    let data = remb.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);

    assert_eq!(h.transport.available_outgoing_bitrate(), 750_000);
}

#[test]
fn receiver_report_iteration_aborts_on_first_unknown_ssrc() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);

    // First report targets an unknown SSRC; the known one behind it must
    // not be delivered.
    let rr = ReceiverReport {
        ssrc: 0xAAAA,
        reports: vec![reception_report(300), reception_report(200)],
        profile_extensions: Bytes::new(),
    };
    let data = rr.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);
    assert!(h.transport.consumer("c1").unwrap().last_receiver_report().is_none());

    // With the known SSRC first, delivery happens.
    let rr = ReceiverReport {
        ssrc: 0xAAAA,
        reports: vec![reception_report(200)],
        profile_extensions: Bytes::new(),
    };
    let data = rr.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);
    assert!(h.transport.consumer("c1").unwrap().last_receiver_report().is_some());
}

#[test]
fn nack_is_forwarded_to_the_started_consumer() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);

    let nack = TransportLayerNack {
        sender_ssrc: 0xAAAA,
        media_ssrc: 200,
        nacks: vec![NackPair {
            packet_id: 17,
            lost_packets: 0,
        }],
    };
    let data = nack.marshal().unwrap();
    h.transport.receive_rtcp(&data, 0);

    assert_eq!(h.transport.consumer("c1").unwrap().nack_count(), 1);
}

#[test]
fn sender_report_iteration_continues_past_unknown_ssrcs() {
    let mut h = harness(false);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();
    h.transport.receive_rtp_packet(&rtp_packet(100, 1, 100), 0);

    let unknown_sr = SenderReport {
        ssrc: 999,
        ntp_time: 0,
        rtp_time: 0,
        packet_count: 0,
        octet_count: 0,
        reports: vec![],
        profile_extensions: Bytes::new(),
    };
    let known_sr = SenderReport {
        ssrc: 100,
        ntp_time: 0xDA8B_D1FC_DDDD_A05A,
        rtp_time: 3000,
        packet_count: 1,
        octet_count: 100,
        reports: vec![],
        profile_extensions: Bytes::new(),
    };

    let mut data = Vec::new();
    data.extend_from_slice(&unknown_sr.marshal().unwrap());
    data.extend_from_slice(&known_sr.marshal().unwrap());
    h.transport.receive_rtcp(&data, 2000);

    // The SR behind the unknown one landed: the next receiver report
    // references its NTP timestamp.
    h.transport.send_rtcp(5000);
    let compounds = h.sent.lock().unwrap().compounds.clone();
    assert_eq!(compounds.len(), 1);

    let packets = RtcpPacket::unmarshal_compound(&compounds[0]).unwrap();
    let report = packets
        .iter()
        .find_map(|packet| match packet {
            RtcpPacket::ReceiverReport(rr) => rr.reports.first(),
            _ => None,
        })
        .expect("a receiver report should have been sent");
    assert_eq!(report.ssrc, 100);
    assert_eq!(report.last_sender_report, 0xD1FC_DDDD);
}

#[test]
fn bye_and_sdes_mutate_nothing() {
    let mut h = harness(false);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();

    let sdes = webrtc::rtcp::source_description::SourceDescription {
        chunks: vec![webrtc::rtcp::source_description::SourceDescriptionChunk {
            source: 100,
            items: vec![webrtc::rtcp::source_description::SourceDescriptionItem {
                sdes_type: webrtc::rtcp::source_description::SdesType::SdesCname,
                text: Bytes::from_static(b"remote"),
            }],
        }],
    };
    let bye = webrtc::rtcp::goodbye::Goodbye {
        sources: vec![100],
        reason: Bytes::from_static(b"done"),
    };

    let mut data = Vec::new();
    data.extend_from_slice(&sdes.marshal().unwrap());
    data.extend_from_slice(&bye.marshal().unwrap());
    h.transport.receive_rtcp(&data, 0);

    assert!(h.listener.events().is_empty());
    assert!(h.transport.producer("p1").is_some());
}

#[test]
fn inbound_rtp_fans_out_stream_and_packet_events() {
    let mut h = harness(false);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();

    h.transport.receive_rtp_packet(&rtp_packet(100, 1, 100), 0);
    h.transport.receive_rtp_packet(&rtp_packet(100, 2, 100), 10);

    assert_eq!(
        h.listener.events(),
        vec![
            Event::StreamEnabled("p1".to_string(), 100),
            Event::RtpPacketReceived("p1".to_string(), 100),
            Event::RtpPacketReceived("p1".to_string(), 100),
        ]
    );
}

#[test]
fn pause_and_resume_relay_producer_state() {
    let mut h = harness(false);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();
    h.transport.receive_rtp_packet(&rtp_packet(100, 1, 100), 0);

    let pause = Request::new(Method::ProducerPause).with_internal(json!({ "producerId": "p1" }));
    assert!(h.transport.handle_request(&pause).is_accepted());
    // Pausing twice changes nothing.
    assert!(h.transport.handle_request(&pause).is_accepted());

    assert!(h.transport.producer("p1").unwrap().is_paused());

    let resume = Request::new(Method::ProducerResume).with_internal(json!({ "producerId": "p1" }));
    assert!(h.transport.handle_request(&resume).is_accepted());

    let events = h.listener.events();
    // Skip the stream-enabled and packet-received events from the feed.
    assert_eq!(
        &events[2..],
        &[
            Event::ProducerPaused("p1".to_string()),
            Event::StreamDisabled("p1".to_string(), 100),
            Event::ProducerResumed("p1".to_string()),
            Event::StreamEnabled("p1".to_string(), 100),
        ]
    );
}

#[test]
fn video_consumer_on_connected_transport_requests_a_key_frame() {
    let mut h = harness(true);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();

    assert_eq!(
        h.listener.events(),
        vec![Event::KeyFrameRequested("c1".to_string(), None)]
    );

    // Not connected: no request.
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    assert!(h.listener.events().is_empty());
}

#[test]
fn close_notifies_every_entity_exactly_once() {
    let mut h = harness(false);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();

    h.transport.close();
    let events = h.listener.events();
    assert!(events.contains(&Event::ProducerClosed("p1".to_string())));
    assert!(events.contains(&Event::ConsumerClosed("c1".to_string())));
    assert_eq!(events.len(), 2);

    // Idempotent: a second close fires nothing.
    h.transport.close();
    assert_eq!(h.listener.events().len(), 2);
}

#[test]
fn forwarded_rtp_reaches_the_wire_and_feeds_the_rate() {
    let mut h = harness(true);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);

    for i in 0..10u16 {
        h.transport
            .send_consumer_rtp("c1", rtp_packet(200, i, 1238), 9_000 + u64::from(i) * 100)
            .unwrap();
    }

    assert_eq!(h.sent.lock().unwrap().rtp.len(), 10);
    let rate = h
        .transport
        .consumer_mut("c1")
        .unwrap()
        .transmission_rate(9_900);
    assert_eq!(rate, 100_000);
}

#[test]
fn rtcp_timer_interval_stays_within_the_jitter_bounds() {
    let mut h = harness(true);
    for (id, ssrc) in [("c1", 200u32), ("c2", 300u32)] {
        h.transport.register_consumer(video_consumer(id, ssrc)).unwrap();
        h.transport.consumer_mut(id).unwrap().set_started(true);
        for i in 0..10u16 {
            h.transport
                .send_consumer_rtp(id, rtp_packet(ssrc, i, 1238), 9_000 + u64::from(i) * 100)
                .unwrap();
        }
    }

    for _ in 0..50 {
        let interval = h.transport.on_rtcp_timer(10_000);
        assert!(
            (500..=1500).contains(&interval),
            "interval {} out of bounds",
            interval
        );
    }

    // The timer tick also flushed consumer sender reports.
    assert!(!h.sent.lock().unwrap().compounds.is_empty());
}

#[test]
fn oversized_compound_is_dropped_with_no_send() {
    let config = TransportConfig {
        rtcp_buffer_size: 16,
        ..Default::default()
    };
    let mut h = harness_with_config(false, config);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);
    h.transport
        .send_consumer_rtp("c1", rtp_packet(200, 1, 100), 0)
        .unwrap();

    h.transport.send_rtcp(5_000);
    assert!(h.sent.lock().unwrap().compounds.is_empty());
}

#[test]
fn producer_key_frame_request_emits_a_pli_upstream() {
    let mut h = harness(true);
    h.transport
        .register_producer(video_producer("p1", &[100]))
        .unwrap();

    h.transport.request_producer_key_frame("p1").unwrap();

    let sent = h.sent.lock().unwrap();
    assert_eq!(sent.rtcp.len(), 1);
    match &sent.rtcp[0] {
        RtcpPacket::PayloadFeedback(relaymesh::rtcp::PayloadFeedback::Pli(pli)) => {
            assert_eq!(pli.media_ssrc, 100);
        }
        other => panic!("unexpected packet: {:?}", other),
    }
}

#[test]
fn direct_consumer_key_frame_request_path() {
    let mut h = harness(false);
    h.transport
        .register_consumer(video_consumer("c1", 200))
        .unwrap();
    h.transport.consumer_mut("c1").unwrap().set_started(true);

    h.transport
        .request_consumer_key_frame("c1", KeyFrameRequestKind::Fir)
        .unwrap();
    assert_eq!(
        h.transport.consumer("c1").unwrap().key_frame_request_count(),
        1
    );

    assert!(h
        .transport
        .request_consumer_key_frame("missing", KeyFrameRequestKind::Pli)
        .is_err());
}

#[test]
fn audio_consumers_report_on_the_longer_interval() {
    let mut h = harness(false);
    let parameters = RtpParameters {
        encodings: vec![RtpEncodingParameters {
            ssrc: 400,
            rid: None,
            rtx: None,
            fec: None,
        }],
        ..Default::default()
    };
    h.transport
        .register_consumer(Consumer::new("a1".to_string(), MediaKind::Audio, parameters))
        .unwrap();
    h.transport.consumer_mut("a1").unwrap().set_started(true);
    h.transport
        .send_consumer_rtp("a1", rtp_packet(400, 1, 100), 0)
        .unwrap();

    h.transport.send_rtcp(10_000);
    assert_eq!(h.sent.lock().unwrap().compounds.len(), 1);

    // One second later a video consumer would report again; audio waits
    // out its five-second ceiling.
    h.transport.send_rtcp(11_200);
    assert_eq!(h.sent.lock().unwrap().compounds.len(), 1);

    h.transport.send_rtcp(16_000);
    assert_eq!(h.sent.lock().unwrap().compounds.len(), 2);
}

#[test]
fn registration_fails_on_a_closed_transport() {
    let mut h = harness(false);
    h.transport.close();

    assert!(h
        .transport
        .register_producer(video_producer("p1", &[100]))
        .is_err());
    assert!(h
        .transport
        .register_consumer(video_consumer("c1", 200))
        .is_err());
}

#[tokio::test]
async fn rtcp_loop_stops_when_the_transport_closes() {
    let listener = Arc::new(RecordingListener::default());
    let sent = Arc::new(Mutex::new(SentPackets::default()));
    let connection = RecordingConnection {
        connected: true,
        sent: Arc::clone(&sent),
    };
    let transport = Arc::new(tokio::sync::Mutex::new(Transport::new(
        7,
        listener as _,
        Box::new(connection),
        TransportConfig::default(),
    )));

    Transport::start(Arc::clone(&transport));
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    transport.lock().await.close();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    assert!(transport.lock().await.is_closed());
}
