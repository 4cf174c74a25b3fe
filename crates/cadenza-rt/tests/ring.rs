use cadenza_rt::{frame_ring, CommandQueue};

#[test]
fn ring_streams_frames_between_endpoints() {
    let (mut producer, mut consumer) = frame_ring(2, 8);
    assert_eq!(producer.available_write_frames(), 8);
    assert_eq!(consumer.available_read_frames(), 0);

    let written = producer.write_frames(&[0.1, 0.2, 0.3, 0.4]);
    assert_eq!(written, 2);
    assert_eq!(consumer.available_read_frames(), 2);

    let mut out = [0.0; 4];
    assert_eq!(consumer.read_frames(&mut out), 2);
    assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
}

#[test]
fn queue_hands_commands_across_threads() {
    let queue = CommandQueue::new();
    let sender = queue.clone();
    std::thread::spawn(move || sender.push("hello"))
        .join()
        .unwrap();
    assert_eq!(queue.try_pop(), Some("hello"));
}
