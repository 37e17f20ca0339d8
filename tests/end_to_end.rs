//! Full edge streams through a running receiver

use van_bus_rx::encoding::{EdgeSynthesizer, FrameEncoder};
use van_bus_rx::{
    EdgeEvent, EdgeHandler, FrameFormat, Level, Marker, OverflowPolicy, Packet, Receiver,
    ReceiverConfig, StartStatus, Statistics, StuffingRule,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const ID: u16 = 0x1A2;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn started(config: ReceiverConfig) -> Result<(Receiver, EdgeHandler), van_bus_rx::ConfigError> {
    init_logger();
    let (receiver, handler) = Receiver::new(config)?;
    receiver.start();
    Ok((receiver, handler))
}

fn wire(config: &ReceiverConfig, data: &[u8]) -> Vec<bool> {
    FrameEncoder::new(&config.format).encode(ID, 0, data)
}

fn edges(config: &ReceiverConfig, start_us: u32, wire: &[bool]) -> Vec<EdgeEvent> {
    EdgeSynthesizer::new(config.nominal_bit_period_us()).frame_edges(start_us, wire)
}

fn frame(config: &ReceiverConfig, start_us: u32, data: &[u8]) -> Vec<EdgeEvent> {
    edges(config, start_us, &wire(config, data))
}

/// Edges for `wire` sent by a transmitter whose bit period is `period_us`
fn skewed_edges(start_us: u32, wire: &[bool], period_us: f64) -> Vec<EdgeEvent> {
    let at = |i: usize| start_us + (i as f64 * period_us).round() as u32;
    let mut edges = Vec::new();
    let mut level = Level::IDLE;
    for (i, &bit) in wire.iter().enumerate() {
        let next = Level::from_bit(bit);
        if next != level {
            edges.push(EdgeEvent::new(at(i), next));
            level = next;
        }
    }
    if level != Level::IDLE {
        edges.push(EdgeEvent::new(at(wire.len()), Level::IDLE));
    }
    edges
}

fn only_errors(stats: &Statistics) -> Statistics {
    Statistics {
        frames_completed: 0,
        packets_valid: 0,
        queue_high_water: 0,
        ..*stats
    }
}

#[test]
fn test_valid_frame_yields_one_packet() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    handler.replay(frame(&config, 1_000, &[0x01, 0x02]));

    assert_eq!(receiver.available(), 1);
    let packet = receiver.dequeue().ok_or("no packet")?;
    assert_eq!(packet.identifier, 0x1A2);
    assert_eq!(packet.data.as_slice(), &[0x01, 0x02]);
    assert_eq!(packet.crc, 0xCC7C);
    assert!(packet.valid);
    assert!(receiver.dequeue().is_none());

    let stats = receiver.get_statistics();
    assert_eq!(stats.frames_completed, 1);
    assert_eq!(stats.packets_valid, 1);
    assert_eq!(stats.frames_rejected(), 0);
    Ok(())
}

#[test]
fn test_frame_flags_survive() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let wire = FrameEncoder::new(&config.format).encode(0x8A4, 0b1110, &[]);
    handler.replay(edges(&config, 0, &wire));

    let packet = receiver.dequeue().ok_or("no packet")?;
    assert_eq!(packet.identifier, 0x8A4);
    assert!(packet.ext());
    assert!(packet.rak());
    assert!(packet.is_read());
    assert!(!packet.rtr());
    assert_eq!(packet.data_len(), 0);
    Ok(())
}

#[test]
fn test_flipped_crc_bit_is_dropped_by_default() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let encoder = FrameEncoder::new(&config.format);
    let mut raw = encoder.raw_frame(ID, 0, &[0x01, 0x02]);
    raw[6] ^= 0x02;
    handler.replay(edges(&config, 0, &encoder.encode_raw(&raw)));

    assert_eq!(receiver.available(), 0);
    let stats = receiver.get_statistics();
    assert_eq!(stats.frames_completed, 1);
    assert_eq!(stats.packets_valid, 0);
    assert_eq!(stats.crc_mismatches, 1);
    Ok(())
}

#[test]
fn test_flipped_crc_bit_is_surfaced_when_enabled() -> TestResult {
    let config = ReceiverConfig::default().with_surface_invalid_packets(true);
    let (receiver, mut handler) = started(config.clone())?;
    let encoder = FrameEncoder::new(&config.format);
    let mut raw = encoder.raw_frame(ID, 0, &[0x01, 0x02]);
    raw[6] ^= 0x02;
    handler.replay(edges(&config, 0, &encoder.encode_raw(&raw)));

    let packet = receiver.dequeue().ok_or("no packet")?;
    assert!(!packet.valid);
    assert_eq!(packet.crc, 0xCC7E);
    assert_eq!(receiver.get_statistics().crc_mismatches, 1);
    Ok(())
}

#[test]
fn test_corrupted_data_byte() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let encoder = FrameEncoder::new(&config.format);
    let mut raw = encoder.raw_frame(ID, 0, &[0x01, 0x02]);
    raw[3] ^= 0xFF;
    handler.replay(edges(&config, 0, &encoder.encode_raw(&raw)));

    assert_eq!(receiver.available(), 0);
    assert_eq!(receiver.get_statistics().crc_mismatches, 1);
    Ok(())
}

#[test]
fn test_timing_violation_then_recovery() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;

    // Stretch a single-bit interval after the start marker to three bit
    // periods, outside every window
    let mut stream = frame(&config, 0, &[0x01, 0x02]);
    let index = (20..stream.len())
        .find(|&i| stream[i].timestamp_us - stream[i - 1].timestamp_us == 8)
        .ok_or("no single-bit interval")?;
    for edge in &mut stream[index..] {
        edge.timestamp_us += 16;
    }
    assert_eq!(stream[index].timestamp_us - stream[index - 1].timestamp_us, 24);
    stream.extend(frame(&config, 10_000, &[0x03]));
    handler.replay(stream);

    let stats = receiver.get_statistics();
    assert_eq!(stats.bit_timing_violations, 1);
    assert_eq!(stats.frames_rejected(), 1);
    assert_eq!(stats.packets_valid, 1);

    let packet = receiver.dequeue().ok_or("no packet")?;
    assert_eq!(packet.data.as_slice(), &[0x03]);
    assert!(receiver.dequeue().is_none());
    Ok(())
}

#[test]
fn test_missed_edge_is_timing_violation() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let mut stream = frame(&config, 0, &[0x01, 0x02]);
    stream.remove(30);
    handler.replay(stream);

    assert_eq!(receiver.available(), 0);
    assert_eq!(receiver.get_statistics().bit_timing_violations, 1);
    Ok(())
}

#[test]
fn test_stuffing_violation() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let mut wire = wire(&config, &[0x01, 0x02]);

    // Turn a stuffing bit after the start marker into a copy of its payload
    // bit, at a spot where the line still changes within two bit periods
    let index = (17..wire.len() - 1)
        .step_by(2)
        .find(|&i| wire[i - 2] != wire[i - 1] && wire[i + 1] != wire[i - 1])
        .ok_or("no suitable stuffing bit")?;
    wire[index] = wire[index - 1];
    handler.replay(edges(&config, 0, &wire));

    let stats = receiver.get_statistics();
    assert_eq!(stats.stuffing_violations, 1);
    assert_eq!(stats.bit_timing_violations, 0);
    assert_eq!(receiver.available(), 0);
    Ok(())
}

#[test]
fn test_end_marker_mismatch() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let format = FrameFormat {
        eof: Marker::new(0xFE, 8),
        ..FrameFormat::default()
    };
    let wire = FrameEncoder::new(&format).encode(ID, 0, &[0x01]);
    handler.replay(edges(&config, 0, &wire));

    assert_eq!(receiver.available(), 0);
    assert_eq!(receiver.get_statistics().marker_mismatches, 1);
    Ok(())
}

#[test]
fn test_truncated_frame() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let stream = frame(&config, 0, &[0x01, 0x02]);
    handler.replay(stream[..stream.len() / 2].iter().copied());
    handler.replay(frame(&config, 10_000, &[0x04]));

    let stats = receiver.get_statistics();
    assert_eq!(stats.truncated_frames, 1);
    assert_eq!(stats.packets_valid, 1);
    assert_eq!(receiver.dequeue().map(|p| p.data.to_vec()), Some(vec![0x04]));
    Ok(())
}

#[test]
fn test_frame_too_long_is_bounded() -> TestResult {
    let config = ReceiverConfig::default().with_max_packet_size(10);
    let (receiver, mut handler) = started(config.clone())?;
    handler.replay(frame(&config, 0, &[0xAA; 6]));
    handler.replay(frame(&config, 10_000, &[0xAA; 5]));

    let stats = receiver.get_statistics();
    assert_eq!(stats.frames_too_long, 1);
    assert_eq!(stats.packets_valid, 1);
    assert_eq!(receiver.dequeue().map(|p| p.data.len()), Some(5));
    Ok(())
}

#[test]
fn test_maximum_frame() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let data: Vec<u8> = (0..28).collect();
    handler.replay(frame(&config, 0, &data));

    let packet = receiver.dequeue().ok_or("no packet")?;
    assert!(packet.valid);
    assert_eq!(packet.data.as_slice(), data.as_slice());
    Ok(())
}

#[test]
fn test_frame_ending_at_idle_level() -> TestResult {
    for stuffing in [StuffingRule::RunLength(3), StuffingRule::Block(3)] {
        let config = ReceiverConfig::default().with_stuffing(stuffing);
        let (receiver, mut handler) = started(config.clone())?;
        handler.replay(frame(&config, 0, &[0x04]));
        handler.replay(frame(&config, 5_000, &[0x01, 0x02]));
        handler.replay(frame(&config, 10_000, &[0x0F]));

        // Each frame is closed by the gap before the next one; the last
        // one waits for the bus to be reported idle
        assert_eq!(receiver.available(), 2);
        handler.on_bus_idle();

        let data: Vec<Vec<u8>> = receiver.drain().map(|p| p.data.to_vec()).collect();
        assert_eq!(data, vec![vec![0x04], vec![0x01, 0x02], vec![0x0F]]);
        let stats = receiver.get_statistics();
        assert_eq!(stats.packets_valid, 3);
        assert_eq!(stats.truncated_frames, 0);
        assert_eq!(stats.frames_rejected(), 0);
    }
    Ok(())
}

#[test]
fn test_gap_shorter_than_idle_threshold_hides_next_frame() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let first = wire(&config, &[0x01]);
    let end_us = EdgeSynthesizer::new(8).duration_us(&first);

    // 40 us of idle line is a long run, not a frame boundary
    handler.replay(edges(&config, 0, &first));
    handler.replay(frame(&config, end_us + 40, &[0x02]));
    handler.replay(frame(&config, 10_000, &[0x03]));

    let data: Vec<u8> = receiver.drain().map(|p| p.data[0]).collect();
    assert_eq!(data, vec![0x01, 0x03]);
    let stats = receiver.get_statistics();
    assert_eq!(stats.frames_completed, 2);
    assert_eq!(stats.frames_rejected(), 0);
    Ok(())
}

#[test]
fn test_noise_between_frames_is_ignored() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let mut stream = vec![
        EdgeEvent::new(0, Level::Low),
        EdgeEvent::new(3, Level::High),
        EdgeEvent::new(500, Level::Low),
        EdgeEvent::new(540, Level::High),
    ];
    stream.extend(frame(&config, 2_000, &[0x01]));
    handler.replay(stream);

    assert_eq!(receiver.available(), 1);
    assert_eq!(receiver.get_statistics().frames_rejected(), 0);
    Ok(())
}

#[test]
fn test_queue_overflow_drop_newest() -> TestResult {
    let config = ReceiverConfig::default().with_queue_capacity(2);
    let (receiver, mut handler) = started(config.clone())?;
    for i in 0..5u32 {
        handler.replay(frame(&config, i * 5_000, &[i as u8]));
    }

    let stats = receiver.get_statistics();
    assert_eq!(stats.packets_valid, 5);
    assert_eq!(stats.queue_overflows, 3);
    assert_eq!(stats.queue_high_water, 2);
    assert_eq!(receiver.available(), 2);

    let sequences: Vec<u32> = receiver.drain().map(|p| p.sequence).collect();
    assert_eq!(sequences, vec![0, 1]);
    Ok(())
}

#[test]
fn test_queue_overflow_drop_oldest() -> TestResult {
    let config = ReceiverConfig::default()
        .with_queue_capacity(2)
        .with_overflow_policy(OverflowPolicy::DropOldest);
    let (receiver, mut handler) = started(config.clone())?;
    for i in 0..5u32 {
        handler.replay(frame(&config, i * 5_000, &[i as u8]));
    }

    assert_eq!(receiver.get_statistics().queue_overflows, 3);
    let data: Vec<u8> = receiver.drain().map(|p| p.data[0]).collect();
    assert_eq!(data, vec![3, 4]);
    Ok(())
}

#[test]
fn test_restart_resets_statistics_and_discards_fragments() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;

    handler.replay(frame(&config, 0, &[0x01]));
    assert_eq!(receiver.get_statistics().packets_valid, 1);
    assert!(receiver.dequeue().is_some());

    // Half a frame, then the line keeps toggling while stopped
    let interrupted = frame(&config, 5_000, &[0x02, 0x03]);
    let half = interrupted.len() / 2;
    handler.replay(interrupted[..half].iter().copied());
    receiver.stop();
    handler.replay(interrupted[half..].iter().copied());

    assert_eq!(receiver.start(), StartStatus::Started);
    assert_eq!(receiver.get_statistics(), Statistics::default());

    handler.replay(frame(&config, 20_000, &[0x04]));
    let packets: Vec<Packet> = receiver.drain().collect();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].data.as_slice(), &[0x04]);

    let stats = receiver.get_statistics();
    assert_eq!(stats.packets_valid, 1);
    assert_eq!(only_errors(&stats), Statistics::default());
    Ok(())
}

#[test]
fn test_reset_statistics() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    handler.replay(frame(&config, 0, &[0x01]));
    receiver.reset_statistics();
    assert_eq!(receiver.get_statistics().packets_valid, 0);
    assert!(receiver.is_running());
    Ok(())
}

#[test]
fn test_enhanced_manchester_stuffing() -> TestResult {
    let config = ReceiverConfig::default().with_stuffing(StuffingRule::Block(4));
    let (receiver, mut handler) = started(config.clone())?;
    handler.replay(frame(&config, 0, &[0x00, 0xFF, 0x0F]));
    handler.replay(frame(&config, 5_000, &[0x55]));

    let packets: Vec<Packet> = receiver.drain().collect();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].data.as_slice(), &[0x00, 0xFF, 0x0F]);
    assert_eq!(packets[1].data.as_slice(), &[0x55]);
    assert_eq!(receiver.get_statistics().frames_rejected(), 0);
    Ok(())
}

#[test]
fn test_edge_jitter_within_tolerance() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let stream: Vec<EdgeEvent> = frame(&config, 0, &[0x12, 0x34, 0x56])
        .into_iter()
        .enumerate()
        .map(|(i, mut edge)| {
            edge.timestamp_us += (i % 2) as u32;
            edge
        })
        .collect();
    handler.replay(stream);

    let packet = receiver.dequeue().ok_or("no packet")?;
    assert!(packet.valid);
    assert_eq!(packet.data.as_slice(), &[0x12, 0x34, 0x56]);
    Ok(())
}

#[test]
fn test_transmitter_clock_drift() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    let data: Vec<u8> = (0..28).map(|i| i * 9).collect();
    let wire = wire(&config, &data);
    handler.replay(skewed_edges(0, &wire, 8.24));
    handler.replay(skewed_edges(10_000, &wire, 7.76));

    assert_eq!(receiver.get_statistics().packets_valid, 2);
    assert!(receiver.drain().all(|p| p.data.as_slice() == data.as_slice()));
    Ok(())
}

#[test]
fn test_timestamp_wraparound() -> TestResult {
    let config = ReceiverConfig::default();
    let (receiver, mut handler) = started(config.clone())?;
    handler.replay(frame(&config, u32::MAX - 500, &[0x01, 0x02]));

    let packet = receiver.dequeue().ok_or("no packet")?;
    assert!(packet.valid);
    assert_eq!(packet.timestamp_us, u32::MAX - 500);
    Ok(())
}

#[test]
fn test_try_repair_surfaced_packet() -> TestResult {
    let config = ReceiverConfig::default().with_surface_invalid_packets(true);
    let (receiver, mut handler) = started(config.clone())?;
    let encoder = FrameEncoder::new(&config.format);
    let mut raw = encoder.raw_frame(ID, 0, &[0x10, 0x20, 0x30]);
    raw[5] ^= 0x01;
    handler.replay(edges(&config, 0, &encoder.encode_raw(&raw)));

    let mut packet = receiver.dequeue().ok_or("no packet")?;
    assert!(!packet.valid);
    assert!(receiver.try_repair(&mut packet));
    assert!(packet.valid);
    assert_eq!(packet.data.as_slice(), &[0x10, 0x20, 0x30]);
    Ok(())
}

#[test]
fn test_independent_receivers() -> TestResult {
    let first_config = ReceiverConfig::default();
    let second_config = ReceiverConfig::default().with_stuffing(StuffingRule::Block(4));
    let (first, mut first_handler) = started(first_config.clone())?;
    let (second, mut second_handler) = started(second_config.clone())?;

    first_handler.replay(frame(&first_config, 0, &[0x01]));
    second_handler.replay(frame(&second_config, 0, &[0x02]));
    second_handler.replay(frame(&second_config, 5_000, &[0x03]));

    assert_eq!(first.get_statistics().packets_valid, 1);
    assert_eq!(second.get_statistics().packets_valid, 2);
    assert_eq!(first.dequeue().map(|p| p.data[0]), Some(0x01));
    assert_eq!(second.dequeue().map(|p| p.data[0]), Some(0x02));
    Ok(())
}

#[test]
fn test_concurrent_producer_and_consumer() -> TestResult {
    const FRAMES: u32 = 200;
    let config = ReceiverConfig::default().with_queue_capacity(4);
    let (receiver, mut handler) = started(config.clone())?;
    let stream: Vec<EdgeEvent> = (0..FRAMES)
        .flat_map(|i| frame(&config, i * 2_000, &[i as u8]))
        .collect();

    let mut received = Vec::new();
    std::thread::scope(|s| {
        let producer = s.spawn(move || handler.replay(stream));
        loop {
            received.extend(receiver.drain());
            if producer.is_finished() {
                break;
            }
            std::thread::yield_now();
        }
    });
    received.extend(receiver.drain());

    let stats = receiver.get_statistics();
    assert_eq!(stats.packets_valid, FRAMES);
    assert_eq!(received.len() as u32 + stats.queue_overflows, FRAMES);
    assert!(received.iter().all(|p| p.valid));
    assert!(received.windows(2).all(|w| w[0].sequence < w[1].sequence));
    Ok(())
}

#[test]
fn test_concurrent_drop_oldest() -> TestResult {
    const FRAMES: u32 = 200;
    let config = ReceiverConfig::default()
        .with_queue_capacity(4)
        .with_overflow_policy(OverflowPolicy::DropOldest);
    let (receiver, mut handler) = started(config.clone())?;
    let stream: Vec<EdgeEvent> = (0..FRAMES)
        .flat_map(|i| frame(&config, i * 2_000, &[i as u8]))
        .collect();

    let mut received = Vec::new();
    std::thread::scope(|s| {
        let producer = s.spawn(move || handler.replay(stream));
        while !producer.is_finished() {
            if let Some(packet) = receiver.dequeue() {
                received.push(packet);
            }
        }
    });
    received.extend(receiver.drain());

    let stats = receiver.get_statistics();
    assert_eq!(stats.packets_valid, FRAMES);
    assert_eq!(received.len() as u32 + stats.queue_overflows, FRAMES);
    assert!(received.windows(2).all(|w| w[0].sequence < w[1].sequence));
    // The newest packet always displaces an older one
    assert_eq!(received.last().map(|p| p.sequence), Some(FRAMES - 1));
    assert_eq!(receiver.available(), 0);
    Ok(())
}
