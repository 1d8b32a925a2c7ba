use webrtc::rtcp::reception_report::ReceptionReport;
use webrtc::rtcp::sender_report::SenderReport;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::MarshalSize;

/// Receive-side state for one inbound RTP stream (one SSRC). Feeds the
/// reception reports the owning producer contributes to outbound RTCP.
#[derive(Debug)]
pub struct RtpStream {
    ssrc: u32,
    clock_rate: u32,
    packets_received: u64,
    bytes_received: u64,
    base_seq: Option<u16>,
    last_seq: u16,
    seq_cycles: u16,
    highest_seq: u32,
    // Interarrival jitter, RFC 3550 appendix A.8.
    jitter: u32,
    prev_arrival_ms: Option<u64>,
    prev_rtp_ts: Option<u32>,
    // Interval state for fraction_lost.
    expected_prior: u32,
    received_prior: u32,
    // Last sender report, for LSR/DLSR in reception reports.
    last_sr_ntp: u32,
    last_sr_received_ms: Option<u64>,
    last_packet_ms: u64,
}

impl RtpStream {
    pub fn new(ssrc: u32, clock_rate: u32) -> Self {
        Self {
            ssrc,
            clock_rate,
            packets_received: 0,
            bytes_received: 0,
            base_seq: None,
            last_seq: 0,
            seq_cycles: 0,
            highest_seq: 0,
            jitter: 0,
            prev_arrival_ms: None,
            prev_rtp_ts: None,
            expected_prior: 0,
            received_prior: 0,
            last_sr_ntp: 0,
            last_sr_received_ms: None,
            last_packet_ms: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn last_packet_ms(&self) -> u64 {
        self.last_packet_ms
    }

    pub fn update(&mut self, packet: &Packet, now_ms: u64) {
        let seq = packet.header.sequence_number;

        self.packets_received += 1;
        self.bytes_received += packet.marshal_size() as u64;
        self.last_packet_ms = now_ms;

        if self.base_seq.is_none() {
            self.base_seq = Some(seq);
            self.highest_seq = u32::from(seq);
        }

        if seq < self.last_seq && self.last_seq > 0xF000 && seq < 0x1000 {
            self.seq_cycles += 1;
        }

        let extended_seq = (u32::from(self.seq_cycles) << 16) | u32::from(seq);
        if extended_seq > self.highest_seq {
            self.highest_seq = extended_seq;
        }
        self.last_seq = seq;

        if let (Some(prev_arrival_ms), Some(prev_rtp_ts)) = (self.prev_arrival_ms, self.prev_rtp_ts)
        {
            let arrival_diff_ts = (now_ms.saturating_sub(prev_arrival_ms)
                * u64::from(self.clock_rate)
                / 1000) as i64;
            let rtp_diff = i64::from(packet.header.timestamp.wrapping_sub(prev_rtp_ts));
            let d = (arrival_diff_ts - rtp_diff).unsigned_abs() as u32;

            // jitter += (|D| - jitter) / 16
            self.jitter = self.jitter.wrapping_add(d.wrapping_sub(self.jitter) / 16);
        }

        self.prev_arrival_ms = Some(now_ms);
        self.prev_rtp_ts = Some(packet.header.timestamp);
    }

    pub fn receive_sender_report(&mut self, report: &SenderReport, now_ms: u64) {
        // Middle 32 bits of the NTP timestamp, as LSR expects them.
        self.last_sr_ntp = ((report.ntp_time >> 16) & 0xFFFF_FFFF) as u32;
        self.last_sr_received_ms = Some(now_ms);
    }

    fn expected(&self) -> u32 {
        match self.base_seq {
            None => 0,
            Some(base) => self
                .highest_seq
                .wrapping_sub(u32::from(base))
                .wrapping_add(1),
        }
    }

    pub fn cumulative_lost(&self) -> u32 {
        let expected = self.expected();
        let received = self.packets_received as u32;
        // Cap at the 24 bits the wire field carries.
        expected.saturating_sub(received).min(0x00FF_FFFF)
    }

    /// Build the reception report for this stream and roll the interval
    /// counters forward.
    pub fn reception_report(&mut self, now_ms: u64) -> ReceptionReport {
        let expected = self.expected();
        let received = self.packets_received as u32;

        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = received.saturating_sub(self.received_prior);
        let lost_interval = expected_interval.saturating_sub(received_interval);

        let fraction_lost = if expected_interval == 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval).min(255) as u8
        };

        self.expected_prior = expected;
        self.received_prior = received;

        let delay = match self.last_sr_received_ms {
            None => 0,
            // DLSR in units of 1/65536 seconds.
            Some(sr_ms) => (now_ms.saturating_sub(sr_ms) * 65536 / 1000) as u32,
        };

        ReceptionReport {
            ssrc: self.ssrc,
            fraction_lost,
            total_lost: self.cumulative_lost(),
            last_sequence_number: self.highest_seq,
            jitter: self.jitter,
            last_sender_report: self.last_sr_ntp,
            delay,
        }
    }
}
