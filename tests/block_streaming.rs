//! End-to-end block-streaming scenarios (§8): both the standalone chunk
//! sender/receiver sub-protocol (§4.5) and the reliable-ordered channel's
//! embedded block message path (§4.6), driven through their public APIs.

use bitrelay::chunk::{AckPacket, ChunkReceiver, ChunkSender, SlicePacket};
use bitrelay::{ChannelConfig, Config, Connection, MessageFactory};

#[test]
fn standalone_chunk_streaming_survives_dropped_slices_and_acks() {
    let mut sender = ChunkSender::new(512, 0.0);
    let mut receiver = ChunkReceiver::new(512, 0.0, 16 * 1024);
    let data: Vec<u8> = (0..6000u32).map(|i| (i % 200) as u8).collect();
    sender.send_chunk(data.clone());

    let mut t = 0.0;
    let mut dropped_once = false;
    loop {
        while let Some(slice) = sender.generate_slice_packet(t) {
            if !dropped_once && slice.slice_id == 2 {
                // the network drops slice 2's first transmission; the
                // resend timer lets it go out again once `t` advances
                dropped_once = true;
                continue;
            }
            receiver.process_slice_packet(&slice);
        }
        if let Some(ack) = receiver.generate_ack_packet(t) {
            sender.process_ack_packet(&ack);
        }
        if !sender.is_sending() {
            break;
        }
        t += 1.0;
        assert!(t < 1000.0, "streaming should converge, not loop forever");
    }

    let reassembled = receiver.read_chunk().expect("chunk ready after recovering the dropped slice");
    assert_eq!(reassembled, data);
}

#[test]
fn chunk_ack_for_wrong_chunk_id_is_ignored() {
    let mut sender = ChunkSender::new(512, 0.0);
    sender.send_chunk(vec![1u8; 512]);
    let stale_ack = AckPacket {
        chunk_id: 99,
        num_slices: 1,
        acked: vec![true],
    };
    sender.process_ack_packet(&stale_ack);
    assert!(sender.is_sending(), "an ack for a foreign chunk id must not complete the current send");
}

#[test]
fn chunk_receiver_ignores_slice_for_a_different_chunk_already_in_progress() {
    let mut receiver = ChunkReceiver::new(512, 0.0, 4096);
    let first = SlicePacket { chunk_id: 0, slice_id: 0, num_slices: 2, data: vec![1u8; 512] };
    receiver.process_slice_packet(&first);
    let foreign = SlicePacket { chunk_id: 5, slice_id: 0, num_slices: 1, data: vec![2u8; 512] };
    receiver.process_slice_packet(&foreign);
    assert!(receiver.read_chunk().is_none(), "an unrelated chunk id must not complete the in-flight one");
}

#[test]
fn reliable_channel_streams_a_block_message_end_to_end() {
    let mut config = Config::new(0xB10C);
    config.channels.push(ChannelConfig {
        block_fragment_size: 256,
        block_fragment_resend_time: 0.0,
        ..ChannelConfig::default()
    });
    let factory = MessageFactory::new(1);
    let mut tx = Connection::new(config.clone(), factory);
    let mut rx = Connection::new(config, factory);

    let block: Vec<u8> = (0..3000u32).map(|i| (i % 255) as u8).collect();
    let message = factory.create_block(0, block.clone()).unwrap();
    tx.send_message(0, message).unwrap();

    let mut delivered = None;
    for tick in 0..40u32 {
        let t = f64::from(tick);
        tx.advance_time(t);
        rx.advance_time(t);
        let packet = tx.send_packet().unwrap();
        rx.receive_packet(&packet);
        let reply = rx.send_packet().unwrap();
        tx.receive_packet(&reply);
        if let Some(msg) = rx.receive_message(0) {
            delivered = Some(msg);
            break;
        }
    }

    let delivered = delivered.expect("block message delivered within the tick budget");
    assert_eq!(delivered.payload.bytes(), block.as_slice());
    assert!(tx.error_level().is_none());
    assert!(rx.error_level().is_none());
}
