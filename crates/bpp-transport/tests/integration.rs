//! # Integration tests: Sender → [Trimmer] → Receiver through the wire format
//!
//! No network I/O: packets are passed as `Bytes`. Impairments (reorder,
//! washing, drops) are applied in the middle.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use bpp_transport::chunker::ChunkerConfig;
use bpp_transport::layers::TemporalLayerModel;
use bpp_transport::nal::{AnnexBSource, Nal};
use bpp_transport::receiver::{Receiver, ReceiverConfig};
use bpp_transport::sender::{Sender, SenderConfig};
use bpp_transport::strategy::SizeStrategy;
use bpp_transport::trim::{BandwidthControl, TrimDecision, TrimPolicy, Trimmer};
use bpp_transport::wire::{BppFunction, Command, CommandBlock, Condition, MetadataBlock, NalType, Packet};
use quanta::Clock;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn nal(unit_type: u8, len: usize, seed: u8) -> Nal {
    let mut v = vec![0, 0, 0, 1, unit_type];
    v.extend((0..len).map(|i| 0x80 | (i as u8).wrapping_add(seed)));
    Nal::from_annex_b(Bytes::from(v)).unwrap()
}

/// Parameter sets followed by `groups` layer groups.
fn svc_stream(layers: usize, groups: usize, layer_len: usize) -> Vec<Nal> {
    let mut out = vec![nal(0x67, 10, 0), nal(0x68, 4, 0)];
    for g in 0..groups {
        for l in 0..layers {
            let t = if l == 0 { 0x65 } else { 0x74 };
            out.push(nal(t, layer_len + l * 37, (g * 7 + l) as u8));
        }
    }
    out
}

fn sender_config(layers: usize, max_packet_size: usize) -> SenderConfig {
    SenderConfig {
        chunker: ChunkerConfig {
            layers,
            max_packet_size,
            strategy: SizeStrategy::DynamicSplit,
            temporal: TemporalLayerModel::new(1, 4),
        },
        ..Default::default()
    }
}

fn receiver(layers: usize) -> Receiver {
    Receiver::new(ReceiverConfig {
        layers,
        temporal: TemporalLayerModel::new(1, 4),
        reorder_window: 0,
        initial_nal_number: None,
    })
}

fn encode(nals: &[Nal], config: SenderConfig) -> Vec<Bytes> {
    Sender::new(nals.iter().cloned().collect::<VecDeque<_>>(), config)
        .map(|p| p.unwrap().data)
        .collect()
}

fn deliver(rx: &mut Receiver, packets: impl IntoIterator<Item = Bytes>) -> Vec<Nal> {
    for p in packets {
        rx.receive(p).unwrap();
    }
    rx.finish();
    rx.drain_nals()
}

/// Wash one layer's content out of a packet, the way a middlebox would.
fn wash_layer(data: &Bytes, layer: usize) -> Bytes {
    let pkt = Packet::decode(&mut data.clone()).unwrap();
    let contents: Vec<Bytes> = pkt.contents().map(|(_, b)| b).collect();
    let mut metadata = pkt.metadata.clone();
    let mut payload = Vec::new();
    for (i, (meta, content)) in metadata.iter_mut().zip(&contents).enumerate() {
        if i == layer && meta.content_size > 0 {
            meta.dropped = true;
            meta.content_size = 0;
        } else {
            payload.extend_from_slice(content);
        }
    }
    Packet::new(pkt.command, metadata, Bytes::from(payload))
        .unwrap()
        .encode()
        .unwrap()
        .freeze()
}

fn first_nal_number(data: &Bytes) -> u16 {
    Packet::decode(&mut data.clone()).unwrap().metadata[0].nal_no
}

// ─── Lossless Reassembly ─────────────────────────────────────────────────────

#[test]
fn single_large_nal_reassembles_byte_identical() {
    let big = nal(0x65, 50_000, 3);
    let packets = encode(&[big.clone()], sender_config(1, 1400));
    assert!(packets.len() > 30, "should fragment: {} packets", packets.len());

    let got = deliver(&mut receiver(1), packets);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].size(), big.size());
    assert_eq!(got[0], big);
}

#[test]
fn layered_stream_roundtrip_from_annex_b_bytes() {
    let nals = svc_stream(3, 10, 900);
    let mut elementary = Vec::new();
    for n in &nals {
        elementary.extend_from_slice(n.as_bytes());
    }

    let source = AnnexBSource::from_reader(&elementary[..]).unwrap();
    let packets: Vec<Bytes> = Sender::new(source, sender_config(3, 500))
        .map(|p| p.unwrap().data)
        .collect();
    assert!(packets.iter().all(|p| p.len() <= 500));

    let mut rx = receiver(3);
    let got = deliver(&mut rx, packets);
    let rebuilt: Vec<u8> = got.iter().flat_map(|n| n.as_bytes().to_vec()).collect();
    assert_eq!(rebuilt, elementary);
    assert_eq!(rx.stats().nals_suppressed, 0);
    assert_eq!(rx.stats().nals_lost, 0);
}

// ─── Wraparound ──────────────────────────────────────────────────────────────

#[test]
fn nal_number_wraps_once_over_4097_groups() {
    let nals: Vec<Nal> = (0..4097).map(|i| nal(0x65, 8, i as u8)).collect();
    let packets = encode(&nals, sender_config(1, 1500));
    assert_eq!(packets.len(), 4097);
    assert_eq!(first_nal_number(&packets[4095]), 4095);
    assert_eq!(first_nal_number(&packets[4096]), 0);

    let mut rx = receiver(1);
    let got = deliver(&mut rx, packets);
    assert_eq!(got.len(), 4097);
    assert_eq!(got, nals);
    assert_eq!(rx.stats().nal_no_wraps, 1);
    assert_eq!(rx.stats().missing_events, 0);
}

// ─── Dependency Suppression ──────────────────────────────────────────────────

#[test]
fn washed_base_layer_suppresses_group_until_i_picture() {
    // Intra period 4: groups 1 and 5 are I pictures. 1 packet per group.
    let nals = svc_stream(3, 6, 40);
    let packets = encode(&nals, sender_config(3, 1500));
    assert_eq!(packets.len(), 7);

    // packets[0] = parameter sets, packets[2] = group 2 (a P picture).
    let mut impaired = packets.clone();
    impaired[2] = wash_layer(&packets[2], 0);

    let mut rx = receiver(3);
    let got = deliver(&mut rx, impaired);

    let group = |g: usize| &nals[2 + g * 3..2 + g * 3 + 3];
    let mut expected = nals[..2].to_vec();
    expected.extend_from_slice(group(0));
    // Video units 2 to 4 are withheld: unit 2 lost its base layer and the
    // P pictures after it reference it. Unit 5 is the next I picture.
    expected.extend_from_slice(group(4));
    expected.extend_from_slice(group(5));
    assert_eq!(got, expected);

    assert_eq!(rx.stats().nals_washed, 1);
    assert_eq!(rx.stats().nals_suppressed, 8);
}

#[test]
fn washed_top_layer_keeps_lower_layers() {
    let nals = svc_stream(3, 2, 40);
    let packets = encode(&nals, sender_config(3, 1500));
    let mut impaired = packets.clone();
    impaired[1] = wash_layer(&packets[1], 2);

    let got = deliver(&mut receiver(3), impaired);
    let mut expected = nals[..4].to_vec();
    expected.extend_from_slice(&nals[5..7]);
    assert_eq!(got, expected);
}

// ─── Packet Loss ─────────────────────────────────────────────────────────────

/// Indices of the packets carrying layer group `g` (0-based) of `svc_stream`.
fn group_packets(packets: &[Bytes], layers: usize, g: usize) -> Vec<usize> {
    let nal_no = (2 + g * layers) as u16;
    packets
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            let meta = Packet::decode(&mut (*p).clone()).unwrap().metadata[0];
            meta.nal_type == NalType::Vcl && meta.nal_no == nal_no
        })
        .map(|(i, _)| i)
        .collect()
}

fn without(packets: &[Bytes], lost: &[usize]) -> Vec<Bytes> {
    packets
        .iter()
        .enumerate()
        .filter(|(i, _)| !lost.contains(i))
        .map(|(_, p)| p.clone())
        .collect()
}

/// Parameter sets plus the listed layer groups.
fn expected(nals: &[Nal], layers: usize, groups: &[usize]) -> Vec<Nal> {
    let mut out = nals[..2].to_vec();
    for &g in groups {
        out.extend_from_slice(&nals[2 + g * layers..2 + (g + 1) * layers]);
    }
    out
}

fn is_subsequence(sub: &[Nal], full: &[Nal]) -> bool {
    let mut rest = full.iter();
    sub.iter().all(|n| rest.any(|m| m == n))
}

#[test]
fn lost_packet_suppresses_group_until_i_picture() {
    // One packet per group; intra period 4 puts I pictures at groups 0, 4, 8.
    let nals = svc_stream(3, 10, 40);
    let packets = encode(&nals, sender_config(3, 1500));
    assert_eq!(packets.len(), 11);
    assert_eq!(group_packets(&packets, 3, 1), vec![2]);

    let mut rx = receiver(3);
    let got = deliver(&mut rx, without(&packets, &[2]));
    assert_eq!(got, expected(&nals, 3, &[0, 4, 5, 6, 7, 8, 9]));
    assert_eq!(rx.stats().missing_events, 1);
    assert_eq!(rx.stats().video_units_lost, 1);
    assert_eq!(rx.stats().nals_suppressed, 6);

    // A later wash still lines up with the true I pictures.
    let mut impaired = without(&packets, &[2]);
    impaired[5] = wash_layer(&packets[6], 0);
    let got = deliver(&mut receiver(3), impaired);
    assert_eq!(got, expected(&nals, 3, &[0, 4, 8, 9]));
}

#[test]
fn lost_middle_fragment_loses_layer() {
    let nals = svc_stream(3, 8, 700);
    let packets = encode(&nals, sender_config(3, 600));
    let group = group_packets(&packets, 3, 1);
    assert!(group.len() >= 3, "group should span packets: {group:?}");

    let base_layer_len = |i: usize| Packet::decode(&mut packets[i].clone()).unwrap().metadata[0].content_size;
    let lost = *group[1..group.len() - 1]
        .iter()
        .find(|&&i| base_layer_len(i) > 0)
        .unwrap();

    let mut rx = receiver(3);
    let got = deliver(&mut rx, without(&packets, &[lost]));
    assert_eq!(got, expected(&nals, 3, &[0, 4, 5, 6, 7]));
    assert!(rx.stats().nals_lost >= 1);
    assert_eq!(rx.stats().decode_errors, 0);
    assert_eq!(rx.stats().video_units_lost, 0);
}

#[test]
fn lost_last_chunk_resolves_on_next_group() {
    let nals = svc_stream(3, 8, 700);
    let packets = encode(&nals, sender_config(3, 600));
    let group = group_packets(&packets, 3, 1);
    let lost = *group.last().unwrap();

    let mut rx = receiver(3);
    let got = deliver(&mut rx, without(&packets, &[lost]));
    assert_eq!(got, expected(&nals, 3, &[0, 4, 5, 6, 7]));
    assert_eq!(rx.stats().missing_events, 1);
    assert_eq!(rx.stats().nals_lost, 3);
    assert_eq!(rx.stats().video_units_lost, 0);
}

#[test]
fn stream_ending_mid_group_is_lost_not_stuck() {
    let nals = svc_stream(3, 8, 700);
    let packets = encode(&nals, sender_config(3, 600));
    let last = packets.len() - 1;
    assert_eq!(group_packets(&packets, 3, 7).last(), Some(&last));

    let mut rx = receiver(3);
    let got = deliver(&mut rx, without(&packets, &[last]));
    assert_eq!(got, expected(&nals, 3, &[0, 1, 2, 3, 4, 5, 6]));
    assert_eq!(rx.stats().nals_lost, 3);
    assert_eq!(rx.stats().missing_events, 0);
}

#[test]
fn scattered_loss_degrades_without_halting() {
    let nals = svc_stream(3, 24, 500);
    let packets = encode(&nals, sender_config(3, 600));
    let lost: Vec<usize> = (0..packets.len()).filter(|i| i % 9 == 4).collect();

    let mut rx = receiver(3);
    let got = deliver(&mut rx, without(&packets, &lost));
    assert_eq!(rx.stats().decode_errors, 0);
    assert!(rx.stats().missing_events + rx.stats().nals_lost > 0);
    assert!(is_subsequence(&got, &nals));
    assert!(got.len() > expected(&nals, 3, &[0]).len());
    assert!(got.len() < nals.len());
}

// ─── Trimming ────────────────────────────────────────────────────────────────

fn wash_packet(sizes: &[u16], sigs: &[u8], threshold: u8) -> Bytes {
    let metadata = sizes
        .iter()
        .zip(sigs)
        .enumerate()
        .map(|(i, (&content_size, &significance))| MetadataBlock {
            nal_count: sizes.len() as u8,
            nal_no: i as u16,
            frag_no: 1,
            content_size,
            significance,
            dropped: false,
            last_fragment: true,
            nal_type: NalType::Vcl,
        })
        .collect();
    let total: usize = sizes.iter().map(|&s| s as usize).sum();
    let command = CommandBlock::wash(Condition::Always, threshold, BppFunction::None, 100);
    Packet::new(command, metadata, Bytes::from(vec![0x5A; total]))
        .unwrap()
        .encode()
        .unwrap()
        .freeze()
}

/// Trimmer at 1,048,576 bit/s, half-way through a window, 70,000 bytes sent.
fn trimmer_at_budget_example() -> Trimmer {
    let (clock, mock) = Clock::mock();
    let mut trimmer = Trimmer::with_clock(BandwidthControl::new(1_048_576), TrimPolicy::Basic, clock);

    let filler_meta = MetadataBlock {
        nal_count: 1,
        nal_no: 0,
        frag_no: 1,
        content_size: 10_000 - 17,
        significance: 1,
        dropped: false,
        last_fragment: true,
        nal_type: NalType::NonVcl,
    };
    for seq in 0..7 {
        let filler = Packet::new(CommandBlock::forward(seq), vec![filler_meta], Bytes::from(vec![0u8; 9_983]))
            .unwrap()
            .encode()
            .unwrap()
            .freeze();
        assert_eq!(filler.len(), 10_000);
        assert_eq!(trimmer.process(filler).unwrap(), TrimDecision::Forward);
    }
    assert_eq!(trimmer.sent_this_window(), 70_000);

    mock.increment(Duration::from_millis(500));
    trimmer
}

#[test]
fn budget_example_washes_highest_index_first() {
    let mut trimmer = trimmer_at_budget_example();

    // Target is 4,464 bytes: the last three 2,000-byte contents cover it.
    let pkt = wash_packet(&[2000, 2000, 2000, 2000], &[1, 5, 5, 5], 2);
    let TrimDecision::Replace(out) = trimmer.process(pkt.clone()).unwrap() else {
        panic!("expected trimming");
    };
    let decoded = Packet::decode(&mut out.clone()).unwrap();
    let dropped: Vec<bool> = decoded.metadata.iter().map(|m| m.dropped).collect();
    assert_eq!(dropped, vec![false, true, true, true]);
    assert!(decoded.metadata[1..].iter().all(|m| m.content_size == 0));
    assert_eq!(decoded.payload.len(), 2000);
    assert_eq!(out.len(), pkt.len() - 6000);
    assert_eq!(decoded.command, Packet::decode(&mut pkt.clone()).unwrap().command);
}

#[test]
fn budget_example_stops_once_target_met() {
    let mut trimmer = trimmer_at_budget_example();

    let pkt = wash_packet(&[2000, 3000, 3000, 3000], &[3, 5, 5, 5], 2);
    let TrimDecision::Replace(out) = trimmer.process(pkt).unwrap() else {
        panic!("expected trimming");
    };
    let decoded = Packet::decode(&mut out.clone()).unwrap();
    let dropped: Vec<bool> = decoded.metadata.iter().map(|m| m.dropped).collect();
    assert_eq!(dropped, vec![false, false, true, true]);
    assert_eq!(trimmer.stats().bytes_washed, 6000);
}

#[test]
fn drop_command_is_never_forwarded() {
    let nals = svc_stream(2, 4, 300);
    let config = SenderConfig {
        command: Command::Drop,
        ..sender_config(2, 400)
    };
    let packets = encode(&nals, config);

    let mut trimmer = Trimmer::new(BandwidthControl::new(u64::MAX / 2), TrimPolicy::Basic);
    let mut forwarded = Vec::new();
    for p in packets {
        let cmd = Packet::decode(&mut p.clone()).unwrap().command.command;
        let decision = trimmer.process(p.clone()).unwrap();
        if cmd == Command::Drop {
            assert_eq!(decision, TrimDecision::Drop);
        }
        forwarded.extend(decision.apply(p));
    }

    // Only the parameter-set packet survives.
    let got = deliver(&mut receiver(2), forwarded);
    assert_eq!(got, nals[..2].to_vec());
}

#[test]
fn trimmed_stream_degrades_without_errors() {
    let nals = svc_stream(3, 40, 1200);
    let config = SenderConfig {
        condition: Condition::LimitedFn,
        threshold: 3,
        function: BppFunction::RelaxThreshold(1),
        ..sender_config(3, 1400)
    };
    let packets = encode(&nals, config);
    let total: usize = packets.iter().map(Bytes::len).sum();

    // Allow roughly half the stream through in one window.
    let (clock, mock) = Clock::mock();
    let mut trimmer = Trimmer::with_clock(BandwidthControl::new((total * 8 / 2) as u64), TrimPolicy::Basic, clock);
    let step = Duration::from_micros(900_000 / packets.len() as u64);

    let mut out = Vec::new();
    for p in packets {
        mock.increment(step);
        out.extend(trimmer.process(p.clone()).unwrap().apply(p));
    }
    assert!(trimmer.stats().packets_trimmed > 0);
    assert!(trimmer.stats().bytes_washed > 0);

    let mut rx = receiver(3);
    let got = deliver(&mut rx, out);
    assert_eq!(rx.stats().decode_errors, 0);
    assert!(rx.stats().nals_washed > 0);
    // Parameter sets are never washed.
    assert_eq!(got[..2].to_vec(), nals[..2].to_vec());
    assert!(got.len() < nals.len());
    assert!(got.iter().all(|n| nals.contains(n)));
}

// ─── Reorder Window ──────────────────────────────────────────────────────────

#[test]
fn reorder_window_restores_order() {
    let nals = svc_stream(2, 8, 700);
    let mut packets = encode(&nals, sender_config(2, 600));
    assert!(packets.len() > 10);
    for pair in packets.chunks_mut(3) {
        pair.reverse();
    }

    let mut rx = Receiver::new(ReceiverConfig {
        layers: 2,
        temporal: TemporalLayerModel::new(1, 4),
        reorder_window: 4,
        initial_nal_number: Some(1),
    });
    assert_eq!(deliver(&mut rx, packets.clone()), nals);
    assert_eq!(rx.stats().missing_events, 0);

    // Without the window the same impairment breaks groups apart.
    let mut plain = receiver(2);
    deliver(&mut plain, packets);
    assert!(plain.stats().missing_events > 0);
}
