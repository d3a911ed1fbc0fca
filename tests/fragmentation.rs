//! End-to-end fragmentation/reassembly scenarios (§8) exercised against the
//! public `fragment` module, independent of the connection/channel layer
//! above it.

use bitrelay::fragment::{split, Reassembler};

#[test]
fn oversized_packet_splits_and_reassembles_in_order() {
    let payload: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
    let fragments = split(1024, &payload);
    assert_eq!(fragments.len(), 4);

    let mut reassembler = Reassembler::new(64, 1024, 256);
    let mut out = None;
    for fragment in &fragments {
        out = reassembler.receive_fragment(
            7,
            fragment.fragment_id,
            fragment.num_fragments,
            &fragment.data,
        );
    }
    assert_eq!(out.unwrap(), payload);
}

#[test]
fn concurrent_packets_reassemble_independently() {
    let a: Vec<u8> = vec![0xAA; 2500];
    let b: Vec<u8> = vec![0xBB; 1800];
    let frags_a = split(1024, &a);
    let frags_b = split(1024, &b);

    let mut reassembler = Reassembler::new(64, 1024, 256);
    // interleave delivery of two in-flight packets sharing the same window
    let mut result_a = None;
    let mut result_b = None;
    result_a = result_a.or(reassembler.receive_fragment(10, frags_a[0].fragment_id, frags_a[0].num_fragments, &frags_a[0].data));
    result_b = result_b.or(reassembler.receive_fragment(11, frags_b[0].fragment_id, frags_b[0].num_fragments, &frags_b[0].data));
    result_a = result_a.or(reassembler.receive_fragment(10, frags_a[1].fragment_id, frags_a[1].num_fragments, &frags_a[1].data));
    result_b = result_b.or(reassembler.receive_fragment(11, frags_b[1].fragment_id, frags_b[1].num_fragments, &frags_b[1].data));
    result_a = result_a.or(reassembler.receive_fragment(10, frags_a[2].fragment_id, frags_a[2].num_fragments, &frags_a[2].data));

    assert_eq!(result_a.unwrap(), a);
    assert_eq!(result_b.unwrap(), b);
}

#[test]
fn lost_fragment_never_completes_the_packet() {
    let data = vec![5u8; 3000];
    let fragments = split(1024, &data);
    assert_eq!(fragments.len(), 3);

    let mut reassembler = Reassembler::new(64, 1024, 256);
    // fragment 1 is dropped in transit
    let r0 = reassembler.receive_fragment(1, fragments[0].fragment_id, fragments[0].num_fragments, &fragments[0].data);
    let r2 = reassembler.receive_fragment(1, fragments[2].fragment_id, fragments[2].num_fragments, &fragments[2].data);
    assert!(r0.is_none());
    assert!(r2.is_none());
}

#[test]
fn duplicated_fragments_do_not_corrupt_reassembly() {
    let data = vec![3u8; 2048];
    let fragments = split(1024, &data);
    let mut reassembler = Reassembler::new(64, 1024, 256);

    reassembler.receive_fragment(4, fragments[0].fragment_id, fragments[0].num_fragments, &fragments[0].data);
    // network duplicates the first fragment before the second arrives
    reassembler.receive_fragment(4, fragments[0].fragment_id, fragments[0].num_fragments, &fragments[0].data);
    let out = reassembler
        .receive_fragment(4, fragments[1].fragment_id, fragments[1].num_fragments, &fragments[1].data)
        .unwrap();
    assert_eq!(out, data);
}
