use std::thread;

use crate::ring::EventChannel;

#[test]
fn records_come_out_in_commit_order() {
    let (mut producer, mut consumer) = EventChannel::new_local(64).split();
    assert!(producer.write_record(&[0x90, 60, 100]));
    assert!(producer.write_record(&[0x80, 60, 0]));

    let mut record = [0u8; 3];
    assert!(consumer.read_exact(&mut record));
    assert_eq!(record, [0x90, 60, 100]);
    assert!(consumer.read_exact(&mut record));
    assert_eq!(record, [0x80, 60, 0]);
    assert!(!consumer.has_data_available());
}

#[test]
fn uncommitted_bytes_stay_invisible() {
    let (mut producer, mut consumer) = EventChannel::new_local(16).split();
    assert!(producer.try_write(&[1, 2, 3]));
    assert!(!consumer.has_data_available());
    assert_eq!(consumer.available_read(), 0);

    producer.commit_write();
    assert_eq!(consumer.available_read(), 3);
    let mut out = [0u8; 3];
    assert!(consumer.read_exact(&mut out));
    assert_eq!(out, [1, 2, 3]);
}

#[test]
fn oversized_write_fails_without_side_effects() {
    let (mut producer, mut consumer) = EventChannel::new_local(8).split();
    assert!(producer.write_record(&[1, 2, 3, 4, 5, 6]));
    assert!(!producer.write_record(&[7, 8, 9]));
    assert_eq!(producer.available_write(), 2);

    let mut out = [0u8; 6];
    assert!(consumer.read_exact(&mut out));
    assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    assert!(!consumer.has_data_available());
    assert_eq!(producer.available_write(), 8);
}

#[test]
fn short_read_consumes_nothing() {
    let (mut producer, mut consumer) = EventChannel::new_local(16).split();
    assert!(producer.write_record(&[1, 2]));

    let mut out = [0u8; 3];
    assert!(!consumer.read_exact(&mut out));
    assert_eq!(consumer.available_read(), 2);

    assert!(producer.write_record(&[3]));
    assert!(consumer.read_exact(&mut out));
    assert_eq!(out, [1, 2, 3]);
}

#[test]
fn records_wrap_around_the_arena_edge() {
    let (mut producer, mut consumer) = EventChannel::new_local(7).split();
    let mut out = [0u8; 3];
    for round in 0..20u8 {
        let record = [round, round.wrapping_add(1), round.wrapping_add(2)];
        assert!(producer.write_record(&record), "round {round}");
        assert!(consumer.read_exact(&mut out));
        assert_eq!(out, record);
    }
}

#[test]
fn shared_mapping_behaves_like_heap_storage() {
    let channel = EventChannel::new_shared(32).expect("anonymous mapping");
    assert!(channel.is_shared());
    assert_eq!(channel.capacity(), 32);

    let (mut producer, mut consumer) = channel.split();
    assert!(producer.write_record(&[0x90, 64, 1]));
    let mut out = [0u8; 3];
    assert!(consumer.read_exact(&mut out));
    assert_eq!(out, [0x90, 64, 1]);
}

#[test]
fn concurrent_producer_and_consumer_preserve_the_stream() {
    const RECORDS: u32 = 20_000;
    let (mut producer, mut consumer) = EventChannel::new_local(64).split();

    let writer = thread::spawn(move || {
        for n in 0..RECORDS {
            let record = n.to_le_bytes();
            while !producer.write_record(&record) {
                thread::yield_now();
            }
        }
    });

    let mut expected = 0u32;
    let mut record = [0u8; 4];
    while expected < RECORDS {
        if consumer.read_exact(&mut record) {
            assert_eq!(u32::from_le_bytes(record), expected);
            expected += 1;
        } else {
            thread::yield_now();
        }
    }

    writer.join().expect("writer thread");
    assert!(!consumer.has_data_available());
}
